use crate::ConstantPool;
use crate::constant_pool::receiver_of;
use crate::insn::{CpIndex, Insn, InsnKind, InvokeKind};

/// Matches `$SwitchMap$pkg$Enum[x.ordinal()]` (javac) and `$SWITCH_TABLE$pkg$Enum()[x.ordinal()]`
/// (Eclipse). Returns the field or method holding the map, and `x`.
pub fn match_enum_key<'a>(pool: &dyn ConstantPool, key: &'a Insn) -> Option<(CpIndex, &'a Insn)> {
    let InsnKind::ArrayLoad { array, index } = &key.kind else {
        return None;
    };
    let switch_map = match &array.kind {
        InsnKind::GetField {
            field,
            object: None,
        } => {
            let field_ref = pool.field_ref(*field)?;
            field_ref.name.starts_with("$SwitchMap$").then_some(*field)?
        }
        InsnKind::Invoke {
            kind: InvokeKind::Static,
            method,
            args,
            ..
        } if args.is_empty() => {
            let method_ref = pool.method_ref(*method)?;
            method_ref.name.starts_with("$SWITCH_TABLE$").then_some(*method)?
        }
        _ => return None,
    };
    let value = receiver_of(pool, index, "ordinal", "()I")?;
    Some((switch_map, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapConstantPool;
    use crate::insn::build::{invoke, load};

    #[test]
    fn eclipse_switch_table() {
        let pool = MapConstantPool::new()
            .with_method(40, "Foo", "$SWITCH_TABLE$Color", "()[I")
            .with_method(41, "Color", "ordinal", "()I")
            .with_method(42, "Color", "hashCode", "()I");
        let key = |method| {
            Insn::new(3, 0, InsnKind::ArrayLoad {
                array: Box::new(invoke(0, InvokeKind::Static, 40, None, Vec::new())),
                index: Box::new(invoke(2, InvokeKind::Virtual, method, Some(load(1, 4)), Vec::new())),
            })
        };
        let matched = key(41);
        assert_eq!(match_enum_key(&pool, &matched), Some((40, &load(1, 4))));
        assert_eq!(match_enum_key(&pool, &key(42)), None);
    }
}
