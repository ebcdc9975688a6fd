use super::Dispatch;
use crate::ConstantPool;
use crate::constant_pool::receiver_of;
use crate::insn::{CaseLabel, Constant, Insn, InsnKind, Offset, Slot, SwitchKind, landing_index};
use rustc_hash::FxHashMap;

/// javac lowers `switch (x)` over strings to
///
/// ```text
/// s = x; k = -1;
/// switch (s.hashCode()) { case h: if (!s.equals("..")) goto D; k = n; goto D; .. }
/// D: switch (k) { case n: .. }
/// ```
pub(super) struct StringSwitch {
    /// Index of `s = x`.
    pub(super) first: usize,
    /// Index of the dispatch over `k`.
    pub(super) dispatch: usize,
    pub(super) dispatch_parts: Dispatch,
    /// `s` and `k`, each with an offset inside its live range.
    pub(super) temporaries: [(Slot, Offset); 2],
}

pub(super) fn match_string_switch(
    pool: &dyn ConstantPool,
    list: &[Insn],
    index: usize,
) -> Option<StringSwitch> {
    let first = index.checked_sub(2)?;
    let (string_slot, value) = list[first].as_store()?;
    let (number_slot, initial) = list[first + 1].as_store()?;
    if initial.kind != InsnKind::Const(Constant::Int(-1)) || string_slot == number_slot {
        return None;
    }

    let hash_insn = &list[index];
    let InsnKind::Switch(hash_dispatch) = &hash_insn.kind else {
        return None;
    };
    if !receiver_of(pool, &hash_dispatch.key, "hashCode", "()I")
        .is_some_and(|receiver| receiver.is_load_of(string_slot))
    {
        return None;
    }
    let dispatch = landing_index(list, hash_insn.offset.checked_add_signed(hash_dispatch.default)?);
    let number_insn = list.get(dispatch)?;
    let InsnKind::Switch(number_dispatch) = &number_insn.kind else {
        return None;
    };
    if !number_dispatch.key.is_load_of(number_slot) {
        return None;
    }
    let guards_enter_inside = hash_dispatch.cases.iter().all(|&(_, delta)| {
        hash_insn.offset.checked_add_signed(delta).is_some_and(|target| {
            let start = landing_index(list, target);
            index < start && start <= dispatch
        })
    });
    if !guards_enter_inside {
        return None;
    }

    let guards = &list[index + 1..dispatch];
    let strings = guard_strings(pool, guards, string_slot, number_slot, number_insn.offset)?;
    let target = |delta: i32| number_insn.offset.checked_add_signed(delta);
    let arms = number_dispatch
        .cases
        .iter()
        .map(|&(number, delta)| {
            let string = strings.get(&number)?;
            Some((CaseLabel::String(string.clone()), target(delta)?))
        })
        .collect::<Option<Vec<_>>>()?;

    Some(StringSwitch {
        first,
        dispatch,
        dispatch_parts: Dispatch {
            kind: SwitchKind::String,
            key: value.clone(),
            arms,
            default: target(number_dispatch.default)?,
        },
        temporaries: [
            (string_slot, list[first].offset),
            (number_slot, list[first + 1].offset),
        ],
    })
}

// Parses `if (!s.equals("..")) goto ..; k = n; [goto D;]` guards into `n -> ".."`.
fn guard_strings(
    pool: &dyn ConstantPool,
    guards: &[Insn],
    string_slot: Slot,
    number_slot: Slot,
    dispatch_offset: Offset,
) -> Option<FxHashMap<i32, String>> {
    let mut strings = FxHashMap::default();
    let mut rest = guards;
    while let [guard, assignment, tail @ ..] = rest {
        let tested = guard.condition()?.falsy_value()?;
        let string = compared_string(pool, tested, string_slot)?;
        let (slot, number) = assignment.as_store()?;
        let InsnKind::Const(Constant::Int(number)) = &number.kind else {
            return None;
        };
        if slot != number_slot {
            return None;
        }
        strings.insert(*number, string.to_owned());
        rest = match tail {
            [jump, tail @ ..]
                if jump.is_goto()
                    && jump
                        .jump_target()
                        .is_some_and(|target| target <= dispatch_offset && target > jump.offset) =>
            {
                tail
            }
            _ => tail,
        };
    }
    rest.is_empty().then_some(strings)
}

// The string constant in `s.equals("..")`.
fn compared_string<'a>(pool: &'a dyn ConstantPool, insn: &Insn, slot: Slot) -> Option<&'a str> {
    let receiver = receiver_of(pool, insn, "equals", "(Ljava/lang/Object;)Z")?;
    let InsnKind::Invoke { args, .. } = &insn.kind else {
        return None;
    };
    match args.as_slice() {
        [argument] if receiver.is_load_of(slot) => match argument.kind {
            InsnKind::Const(Constant::String(index)) => pool.string(index),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapConstantPool;
    use crate::insn::build::*;
    use crate::insn::{CmpOp, InvokeKind};

    fn guard(offset: Offset, constant: u16, target: Offset) -> Insn {
        let equals = invoke(
            offset - 1,
            InvokeKind::Virtual,
            41,
            Some(load(offset - 3, 2)),
            vec![string(offset - 2, constant)],
        );
        branch(offset, 1, zero(CmpOp::Eq, equals), target)
    }

    #[test]
    fn guards_map_numbers_to_strings() {
        let pool = MapConstantPool::new()
            .with_method(41, "java/lang/String", "equals", "(Ljava/lang/Object;)Z")
            .with_string(50, "a")
            .with_string(51, "b");
        let guards = [
            guard(13, 50, 30),
            store(15, 1, 3, int(14, 0)),
            goto(17, 1, 30),
            guard(23, 51, 30),
            store(25, 1, 3, int(24, 1)),
        ];
        let strings = guard_strings(&pool, &guards, 2, 3, 30).unwrap();
        assert_eq!(strings.get(&0).map(String::as_str), Some("a"));
        assert_eq!(strings.get(&1).map(String::as_str), Some("b"));
        assert!(guard_strings(&pool, &guards[..4], 2, 3, 30).is_none());
    }
}
