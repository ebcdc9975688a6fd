use super::{Frame, TestPosition};
use crate::ConstantPool;
use crate::constant_pool::receiver_of;
use crate::insn::{CmpOp, Condition, Constant, Insn, InsnKind, Offset, Slot};
use displaydoc::Display;

/// The lowering a `for (T v : iterable)` loop was recognized from.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ForEachIdiom {
    /// iterator
    Iterator,
    /// javac array
    JavacArray,
    /// IBM array
    IbmArray,
}

pub(super) struct ForEachMatch {
    pub idiom: ForEachIdiom,
    /// Index of the first lowered header statement.
    pub first: usize,
    pub body_start: usize,
    /// The index of the counter increment, or of the back-edge.
    pub body_end: usize,
    pub variable: Slot,
    pub variable_offset: Offset,
    pub iterable: Insn,
    /// Compiler temporaries, each with an offset inside its live range.
    pub temporaries: Vec<(Slot, Offset)>,
}

pub(super) fn match_for_each(
    pool: &dyn ConstantPool,
    list: &[Insn],
    frame: Frame,
) -> Option<ForEachMatch> {
    let found = match frame.test {
        TestPosition::Top => match_iterator_top(pool, list, frame)
            .or_else(|| match_array(list, frame)),
        TestPosition::Bottom => match_iterator_bottom(pool, list, frame),
        TestPosition::DoWhile | TestPosition::None => None,
    }?;
    let uses_temporary = list[found.body_start..found.body_end].iter().any(|insn| {
        found
            .temporaries
            .iter()
            .any(|&(slot, _)| insn.references_slot(slot))
    });
    (!uses_temporary).then_some(found)
}

// `it = X.iterator(); while (it.hasNext()) { v = (T) it.next(); .. }`
fn match_iterator_top(pool: &dyn ConstantPool, list: &[Insn], frame: Frame) -> Option<ForEachMatch> {
    let s = frame.first;
    let init = list.get(s.checked_sub(1)?)?;
    let (iterator, iterable) = iterator_store(pool, init)?;
    let has_next = list[s].condition()?.falsy_value()?;
    if !calls_on(pool, has_next, "hasNext", "()Z", iterator) || s + 1 >= frame.back_edge {
        return None;
    }
    let (variable, variable_offset) = next_store(pool, &list[s + 1], iterator)?;
    Some(ForEachMatch {
        idiom: ForEachIdiom::Iterator,
        first: s - 1,
        body_start: s + 2,
        body_end: frame.back_edge,
        variable,
        variable_offset,
        iterable: iterable.clone(),
        temporaries: vec![(iterator, init.offset)],
    })
}

// `it = X.iterator(); goto test; body: v = (T) it.next(); ..; test: if (it.hasNext()) goto body`
fn match_iterator_bottom(
    pool: &dyn ConstantPool,
    list: &[Insn],
    frame: Frame,
) -> Option<ForEachMatch> {
    let init = list.get(frame.first.checked_sub(1)?)?;
    let (iterator, iterable) = iterator_store(pool, init)?;
    let has_next = list[frame.back_edge].condition()?.truthy_value()?;
    if !calls_on(pool, has_next, "hasNext", "()Z", iterator) || frame.body_start >= frame.back_edge
    {
        return None;
    }
    let (variable, variable_offset) = next_store(pool, &list[frame.body_start], iterator)?;
    Some(ForEachMatch {
        idiom: ForEachIdiom::Iterator,
        first: frame.first - 1,
        body_start: frame.body_start + 1,
        body_end: frame.back_edge,
        variable,
        variable_offset,
        iterable: iterable.clone(),
        temporaries: vec![(iterator, init.offset)],
    })
}

// javac: `arr = X; len = arr.length; i = 0; while (i < len) { v = arr[i]; ..; i++; }`
// IBM: `len = (arr = X).length; i = 0; ..`
fn match_array(list: &[Insn], frame: Frame) -> Option<ForEachMatch> {
    let s = frame.first;
    let counter_init = list.get(s.checked_sub(1)?)?;
    let (counter, zero) = counter_init.as_store()?;
    if zero.kind != InsnKind::Const(Constant::Int(0)) {
        return None;
    }
    let length_init = list.get(s.checked_sub(2)?)?;
    let (length, length_value) = length_init.as_store()?;
    let InsnKind::ArrayLength { array } = &length_value.kind else {
        return None;
    };

    let (idiom, first, array_slot, array_offset, iterable) = match &array.kind {
        InsnKind::Load { slot } => {
            let array_init = list.get(s.checked_sub(3)?)?;
            let (array_slot, iterable) = array_init.as_store()?;
            if array_slot != *slot {
                return None;
            }
            (ForEachIdiom::JavacArray, s - 3, array_slot, array_init.offset, iterable)
        }
        InsnKind::DupStore { slot, value } => {
            (ForEachIdiom::IbmArray, s - 2, *slot, length_init.offset, &**value)
        }
        _ => return None,
    };

    let Condition::Compare {
        op: CmpOp::Ge,
        left,
        right,
    } = list[s].condition()?
    else {
        return None;
    };
    if !left.is_load_of(counter) || !right.is_load_of(length) {
        return None;
    }

    let e = frame.back_edge;
    if s + 2 >= e {
        return None;
    }
    let is_step = matches!(
        list[e - 1].kind,
        InsnKind::Increment { slot, delta: 1 } if slot == counter
    );
    let (variable, element) = list[s + 1].as_store()?;
    let InsnKind::ArrayLoad { array, index } = &element.kind else {
        return None;
    };
    if !is_step || !array.is_load_of(array_slot) || !index.is_load_of(counter) {
        return None;
    }

    let mut temporaries = vec![
        (array_slot, array_offset),
        (length, length_init.offset),
        (counter, counter_init.offset),
    ];
    temporaries.dedup_by_key(|(slot, _)| *slot);
    Some(ForEachMatch {
        idiom,
        first,
        body_start: s + 2,
        body_end: e - 1,
        variable,
        variable_offset: list[s + 1].offset,
        iterable: iterable.clone(),
        temporaries,
    })
}

fn uncast(insn: &Insn) -> &Insn {
    match &insn.kind {
        InsnKind::CheckCast { value, .. } => value,
        _ => insn,
    }
}

fn calls_on(pool: &dyn ConstantPool, insn: &Insn, name: &str, descriptor: &str, slot: Slot) -> bool {
    receiver_of(pool, insn, name, descriptor).is_some_and(|receiver| receiver.is_load_of(slot))
}

fn iterator_store<'a>(pool: &dyn ConstantPool, insn: &'a Insn) -> Option<(Slot, &'a Insn)> {
    let (slot, value) = insn.as_store()?;
    let iterable = receiver_of(pool, value, "iterator", "()Ljava/util/Iterator;")?;
    Some((slot, iterable))
}

fn next_store(pool: &dyn ConstantPool, insn: &Insn, iterator: Slot) -> Option<(Slot, Offset)> {
    let (slot, value) = insn.as_store()?;
    calls_on(pool, uncast(value), "next", "()Ljava/lang/Object;", iterator)
        .then_some((slot, insn.offset))
}
