mod condition;
mod debug;
mod isomorphism;
mod iterate;

pub use self::condition::{CmpOp, Condition, LogicOp};
pub use self::isomorphism::{is_isomorphic, is_isomorphic_list};
pub use self::iterate::{for_each_sequence, for_each_sequence_mut, landing_index};
use crate::context::ContinueTargets;
use crate::exceptions::ExceptionKind;
use crate::loops::{ForEachIdiom, LoopShape};

/// Byte offset of an instruction within the method's code.
pub type Offset = u32;
/// Local variable slot.
pub type Slot = u16;
/// Index into the constant pool.
pub type CpIndex = u16;

/// Line number sentinel for instructions without debug information.
pub const UNKNOWN_LINE: u32 = 0;

/// A node of the instruction tree.
///
/// The offset of a statement is the offset of the last bytecode instruction it was built from, so
/// operands always carry smaller offsets than the statement consuming them. A jump to `T` lands on
/// the first statement `S` of a sequence with `S.offset >= T`. Structured nodes reuse the offset of
/// an instruction they absorbed, which keeps sibling offsets strictly increasing.
#[derive(Clone, Debug, PartialEq)]
pub struct Insn {
    pub offset: Offset,
    pub line: u32,
    pub kind: InsnKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(CpIndex),
    Class(CpIndex),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UShr,
    Cmp,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsnKind {
    // Operands
    Load {
        slot: Slot,
    },
    Const(Constant),
    ArrayLoad {
        array: Box<Insn>,
        index: Box<Insn>,
    },
    ArrayLength {
        array: Box<Insn>,
    },
    GetField {
        field: CpIndex,
        // `None` for static fields.
        object: Option<Box<Insn>>,
    },
    Invoke {
        kind: InvokeKind,
        method: CpIndex,
        receiver: Option<Box<Insn>>,
        args: Vec<Insn>,
    },
    CheckCast {
        class: CpIndex,
        value: Box<Insn>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Insn>,
        right: Box<Insn>,
    },
    New {
        class: CpIndex,
    },
    /// The exception pushed on entry to a handler.
    ExceptionLoad,
    /// The return address pushed by `jsr`.
    ReturnAddress,
    /// `dup` followed by a store: assigns `value` to `slot` and yields it.
    DupStore {
        slot: Slot,
        value: Box<Insn>,
    },

    // Basic statements
    Store {
        slot: Slot,
        value: Box<Insn>,
    },
    Increment {
        slot: Slot,
        delta: i32,
    },
    PutField {
        field: CpIndex,
        object: Option<Box<Insn>>,
        value: Box<Insn>,
    },
    ArrayStore {
        array: Box<Insn>,
        index: Box<Insn>,
        value: Box<Insn>,
    },
    Pop {
        value: Box<Insn>,
    },
    Return,
    ValueReturn {
        value: Box<Insn>,
    },
    Throw {
        value: Box<Insn>,
    },
    MonitorEnter {
        object: Box<Insn>,
    },
    MonitorExit {
        object: Box<Insn>,
    },

    // Raw control flow
    Goto {
        delta: i32,
    },
    Branch {
        condition: Condition,
        delta: i32,
    },
    Jsr {
        delta: i32,
    },
    Ret {
        slot: Slot,
    },
    Switch(Box<SwitchDispatch>),

    // Structured control flow
    Loop(Box<Loop>),
    ForEach(Box<ForEach>),
    If {
        condition: Condition,
        then: Vec<Insn>,
    },
    IfElse {
        condition: Condition,
        then: Vec<Insn>,
        else_: Vec<Insn>,
    },
    /// `if .. else if .. [else ..]` with at least two arms.
    IfChain {
        arms: Vec<IfArm>,
        else_: Option<Vec<Insn>>,
    },
    SwitchBlock(Box<SwitchBlock>),
    Try(Box<TryBlock>),
    Synchronized {
        monitor: Box<Insn>,
        body: Vec<Insn>,
    },
    Jump(Jump),
    ConditionalJump {
        condition: Condition,
        jump: Jump,
    },
    /// Label marker placed on the statement a labeled jump lands on.
    Labeled(Box<Insn>),
    /// Declares the variable with the given index in the local variable table right before (or,
    /// for an initializing store, as part of) the wrapped statement.
    Declare {
        variable: usize,
        statement: Box<Insn>,
    },
}

/// `tableswitch`/`lookupswitch` with jump deltas relative to the instruction offset.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchDispatch {
    pub key: Insn,
    pub default: i32,
    pub cases: Vec<(i32, i32)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    pub shape: LoopShape,
    pub init: Option<Insn>,
    pub test: Option<Condition>,
    pub update: Option<Insn>,
    pub body: Vec<Insn>,
    pub continue_targets: ContinueTargets,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForEach {
    pub idiom: ForEachIdiom,
    pub variable: Slot,
    pub iterable: Insn,
    pub body: Vec<Insn>,
    pub continue_targets: ContinueTargets,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfArm {
    pub condition: Condition,
    pub body: Vec<Insn>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SwitchKind {
    Int,
    /// Switch over `Enum.ordinal()` through a synthetic switch map; case labels stay the map's
    /// indices.
    Enum { switch_map: CpIndex },
    String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchBlock {
    pub kind: SwitchKind,
    pub key: Insn,
    pub cases: Vec<SwitchCase>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchCase {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Insn>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaseLabel {
    Int(i32),
    String(String),
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryBlock {
    pub kind: ExceptionKind,
    pub body: Vec<Insn>,
    pub catches: Vec<Catch>,
    pub finally: Option<Vec<Insn>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Catch {
    pub types: Vec<CpIndex>,
    /// `None` if the compiler discarded the exception immediately.
    pub variable: Option<Slot>,
    pub handler: Offset,
    pub body: Vec<Insn>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Jump {
    Break,
    Continue,
    LabeledBreak(Offset),
    LabeledContinue(Offset),
    /// A jump to a `return`, inlined at the jump site.
    Return(Option<Box<Insn>>),
}

impl Insn {
    pub fn new(offset: Offset, line: u32, kind: InsnKind) -> Self {
        Self { offset, line, kind }
    }

    pub fn with_kind(&self, kind: InsnKind) -> Self {
        Self {
            offset: self.offset,
            line: self.line,
            kind,
        }
    }

    /// The absolute target of `goto`, conditional branches and `jsr`.
    pub fn jump_target(&self) -> Option<Offset> {
        match self.kind {
            InsnKind::Goto { delta }
            | InsnKind::Branch { delta, .. }
            | InsnKind::Jsr { delta } => self.offset.checked_add_signed(delta),
            _ => None,
        }
    }

    /// Points a `goto`, branch or `jsr` at `target`.
    pub fn retarget(&mut self, target: Offset) {
        let new = target.wrapping_sub(self.offset) as i32;
        if let InsnKind::Goto { delta } | InsnKind::Branch { delta, .. } | InsnKind::Jsr { delta } =
            &mut self.kind
        {
            *delta = new;
        }
    }

    /// The condition of a conditional branch.
    pub fn into_condition(self) -> Option<Condition> {
        match self.kind {
            InsnKind::Branch { condition, .. } => Some(condition),
            _ => None,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match &self.kind {
            InsnKind::Branch { condition, .. } => Some(condition),
            _ => None,
        }
    }

    pub fn is_goto(&self) -> bool {
        matches!(self.kind, InsnKind::Goto { .. })
    }

    /// Whether the jump of this `goto` or branch goes backwards (or to itself).
    pub fn is_backward_jump(&self) -> bool {
        matches!(self.kind, InsnKind::Goto { .. } | InsnKind::Branch { .. })
            && self.jump_target().is_some_and(|target| target <= self.offset)
    }

    pub fn is_forward_jump(&self) -> bool {
        matches!(self.kind, InsnKind::Goto { .. } | InsnKind::Branch { .. })
            && self.jump_target().is_some_and(|target| target > self.offset)
    }

    /// Whether control never falls through this statement.
    pub fn is_divergent(&self) -> bool {
        matches!(
            self.kind,
            InsnKind::Goto { .. }
                | InsnKind::Return
                | InsnKind::ValueReturn { .. }
                | InsnKind::Throw { .. }
                | InsnKind::Ret { .. }
                | InsnKind::Switch(_)
                | InsnKind::Jump(_)
        )
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, InsnKind::Return | InsnKind::ValueReturn { .. })
    }

    /// The slot written by a store or an increment.
    pub fn written_slot(&self) -> Option<Slot> {
        match self.kind {
            InsnKind::Store { slot, .. } | InsnKind::Increment { slot, .. } => Some(slot),
            _ => None,
        }
    }

    /// The slot and value of a plain store.
    pub fn as_store(&self) -> Option<(Slot, &Insn)> {
        match &self.kind {
            InsnKind::Store { slot, value } => Some((*slot, value)),
            _ => None,
        }
    }

    pub fn as_load(&self) -> Option<Slot> {
        match self.kind {
            InsnKind::Load { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn is_load_of(&self, slot: Slot) -> bool {
        self.as_load() == Some(slot)
    }

    /// If this is `slot = <exception>`, returns the slot.
    pub fn exception_store(&self) -> Option<Slot> {
        match &self.kind {
            InsnKind::Store { slot, value } if value.kind == InsnKind::ExceptionLoad => Some(*slot),
            _ => None,
        }
    }

    /// Whether this is `pop <exception>`.
    pub fn is_exception_pop(&self) -> bool {
        matches!(&self.kind, InsnKind::Pop { value } if value.kind == InsnKind::ExceptionLoad)
    }

    /// Whether this is `throw <load slot>`.
    pub fn is_rethrow_of(&self, slot: Slot) -> bool {
        matches!(&self.kind, InsnKind::Throw { value } if value.is_load_of(slot))
    }

    /// If this is `monitorexit <load slot>`, returns the slot.
    pub fn monitor_exit_slot(&self) -> Option<Slot> {
        match &self.kind {
            InsnKind::MonitorExit { object } => object.as_load(),
            _ => None,
        }
    }
}

/// Convenience constructors, mostly used to describe method bodies in tests and by embedders
/// bridging their own class reader.
pub mod build {
    use super::*;

    pub fn load(offset: Offset, slot: Slot) -> Insn {
        Insn::new(offset, UNKNOWN_LINE, InsnKind::Load { slot })
    }

    pub fn int(offset: Offset, value: i32) -> Insn {
        Insn::new(offset, UNKNOWN_LINE, InsnKind::Const(Constant::Int(value)))
    }

    pub fn string(offset: Offset, index: CpIndex) -> Insn {
        Insn::new(offset, UNKNOWN_LINE, InsnKind::Const(Constant::String(index)))
    }

    pub fn exception(offset: Offset) -> Insn {
        Insn::new(offset, UNKNOWN_LINE, InsnKind::ExceptionLoad)
    }

    pub fn store(offset: Offset, line: u32, slot: Slot, value: Insn) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Store {
                slot,
                value: Box::new(value),
            },
        )
    }

    pub fn increment(offset: Offset, line: u32, slot: Slot, delta: i32) -> Insn {
        Insn::new(offset, line, InsnKind::Increment { slot, delta })
    }

    pub fn invoke(
        offset: Offset,
        kind: InvokeKind,
        method: CpIndex,
        receiver: Option<Insn>,
        args: Vec<Insn>,
    ) -> Insn {
        Insn::new(
            offset,
            UNKNOWN_LINE,
            InsnKind::Invoke {
                kind,
                method,
                receiver: receiver.map(Box::new),
                args,
            },
        )
    }

    /// An invocation evaluated for its side effects, e.g. `foo();`.
    pub fn call(offset: Offset, line: u32, method: CpIndex) -> Insn {
        let mut insn = invoke(offset, InvokeKind::Static, method, None, Vec::new());
        insn.line = line;
        insn
    }

    pub fn goto(offset: Offset, line: u32, target: Offset) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Goto {
                delta: delta(offset, target),
            },
        )
    }

    pub fn branch(offset: Offset, line: u32, condition: Condition, target: Offset) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Branch {
                condition,
                delta: delta(offset, target),
            },
        )
    }

    pub fn jsr(offset: Offset, line: u32, target: Offset) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Jsr {
                delta: delta(offset, target),
            },
        )
    }

    pub fn ret(offset: Offset, line: u32, slot: Slot) -> Insn {
        Insn::new(offset, line, InsnKind::Ret { slot })
    }

    pub fn return_(offset: Offset, line: u32) -> Insn {
        Insn::new(offset, line, InsnKind::Return)
    }

    pub fn value_return(offset: Offset, line: u32, value: Insn) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::ValueReturn {
                value: Box::new(value),
            },
        )
    }

    pub fn throw(offset: Offset, line: u32, value: Insn) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Throw {
                value: Box::new(value),
            },
        )
    }

    pub fn monitor_enter(offset: Offset, line: u32, object: Insn) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::MonitorEnter {
                object: Box::new(object),
            },
        )
    }

    pub fn monitor_exit(offset: Offset, line: u32, object: Insn) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::MonitorExit {
                object: Box::new(object),
            },
        )
    }

    pub fn switch(
        offset: Offset,
        line: u32,
        key: Insn,
        default: Offset,
        cases: &[(i32, Offset)],
    ) -> Insn {
        Insn::new(
            offset,
            line,
            InsnKind::Switch(Box::new(SwitchDispatch {
                key,
                default: delta(offset, default),
                cases: cases
                    .iter()
                    .map(|&(key, target)| (key, delta(offset, target)))
                    .collect(),
            })),
        )
    }

    pub fn compare(op: CmpOp, left: Insn, right: Insn) -> Condition {
        Condition::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn zero(op: CmpOp, value: Insn) -> Condition {
        Condition::Zero {
            op,
            value: Box::new(value),
        }
    }

    fn delta(offset: Offset, target: Offset) -> i32 {
        target as i32 - offset as i32
    }
}
