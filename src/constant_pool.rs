use crate::insn::{CpIndex, Insn, InsnKind};
use rustc_hash::FxHashMap;

/// A resolved `Methodref`/`InterfaceMethodref`/`Fieldref` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    /// Internal class name, e.g. `java/util/List`.
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Self {
        Self {
            class: class.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    pub fn is(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }
}

/// Constant pool lookups needed to recognize compiler idioms. Only names and descriptors are
/// consulted; no type inference happens here.
pub trait ConstantPool {
    fn method_ref(&self, index: CpIndex) -> Option<&MemberRef>;
    fn field_ref(&self, index: CpIndex) -> Option<&MemberRef>;
    /// The value of a `String` constant.
    fn string(&self, index: CpIndex) -> Option<&str>;
}

/// The receiver of `insn` if it invokes a method named `name` with `descriptor`.
pub(crate) fn receiver_of<'a>(
    pool: &dyn ConstantPool,
    insn: &'a Insn,
    name: &str,
    descriptor: &str,
) -> Option<&'a Insn> {
    let InsnKind::Invoke {
        method,
        receiver: Some(receiver),
        ..
    } = &insn.kind
    else {
        return None;
    };
    pool.method_ref(*method)?
        .is(name, descriptor)
        .then_some(&**receiver)
}

/// An in-memory constant pool, for embedders without a class reader at hand and for tests.
#[derive(Debug, Default)]
pub struct MapConstantPool {
    methods: FxHashMap<CpIndex, MemberRef>,
    fields: FxHashMap<CpIndex, MemberRef>,
    strings: FxHashMap<CpIndex, String>,
}

impl MapConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, index: CpIndex, class: &str, name: &str, descriptor: &str) -> Self {
        self.methods
            .insert(index, MemberRef::new(class, name, descriptor));
        self
    }

    pub fn with_field(mut self, index: CpIndex, class: &str, name: &str, descriptor: &str) -> Self {
        self.fields
            .insert(index, MemberRef::new(class, name, descriptor));
        self
    }

    pub fn with_string(mut self, index: CpIndex, value: &str) -> Self {
        self.strings.insert(index, value.to_owned());
        self
    }
}

impl ConstantPool for MapConstantPool {
    fn method_ref(&self, index: CpIndex) -> Option<&MemberRef> {
        self.methods.get(&index)
    }

    fn field_ref(&self, index: CpIndex) -> Option<&MemberRef> {
        self.fields.get(&index)
    }

    fn string(&self, index: CpIndex) -> Option<&str> {
        self.strings.get(&index).map(String::as_str)
    }
}
