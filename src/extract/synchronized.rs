use crate::exceptions::monitor_enter_slot;
use crate::insn::{Insn, InsnKind, Slot, for_each_sequence_mut};
use crate::structurer::Structurer;
use crate::variables::LocalVariableTable;
use log::debug;

/// The object a `monitorenter` locks: the value stored with `dup`, or the value of the preceding
/// store to the loaded local.
pub fn monitor_expression(enter: &Insn, stored: Option<Insn>) -> Option<Insn> {
    let InsnKind::MonitorEnter { object } = &enter.kind else {
        return None;
    };
    match &object.kind {
        InsnKind::DupStore { value, .. } => Some((**value).clone()),
        InsnKind::Load { slot } => match stored?.kind {
            InsnKind::Store { slot: stored_slot, value } if stored_slot == *slot => Some(*value),
            _ => None,
        },
        _ => None,
    }
}

/// Structures `monitorenter`/`monitorexit` pairs that have no exception table entry, at every
/// nesting level.
pub fn structure_bare_monitors(structurer: &mut Structurer<'_>, list: &mut Vec<Insn>) {
    let variables = &mut structurer.variables;
    for_each_sequence_mut(list, &mut |sequence| {
        structure_in_sequence(sequence, variables);
    });
}

fn structure_in_sequence(sequence: &mut Vec<Insn>, variables: &mut LocalVariableTable) {
    let mut index = 0;
    while index < sequence.len() {
        if let Some(slot) = monitor_enter_slot(sequence, index) {
            if let Some(exit) = find_release(sequence, index, slot) {
                index = build_block(sequence, index, exit, slot, variables);
            }
        }
        index += 1;
    }
}

// The release on the fall-through path: a top-level `monitorexit` not immediately followed by an
// exit.
fn find_release(sequence: &[Insn], enter: usize, slot: Slot) -> Option<usize> {
    (enter + 1..sequence.len()).find(|&index| {
        sequence[index].monitor_exit_slot() == Some(slot)
            && !sequence
                .get(index + 1)
                .is_some_and(|next| next.is_return() || matches!(next.kind, InsnKind::Throw { .. }))
    })
}

// Returns the index of the new `Synchronized` statement.
fn build_block(
    sequence: &mut Vec<Insn>,
    mut enter: usize,
    exit: usize,
    slot: Slot,
    variables: &mut LocalVariableTable,
) -> usize {
    let stores_before = enter > 0
        && sequence[enter - 1].written_slot() == Some(slot)
        && matches!(&sequence[enter].kind, InsnKind::MonitorEnter { object } if object.is_load_of(slot));

    let mut body: Vec<Insn> = sequence.drain(enter + 1..exit + 1).collect();
    body.pop();
    let stored = if stores_before {
        enter -= 1;
        Some(sequence.remove(enter))
    } else {
        None
    };
    let Some(monitor) = monitor_expression(&sequence[enter], stored) else {
        return enter;
    };

    for_each_sequence_mut(&mut body, &mut |sequence| {
        let mut index = sequence.len();
        while index > 1 {
            index -= 1;
            if sequence[index].is_return() && sequence[index - 1].monitor_exit_slot() == Some(slot) {
                sequence.remove(index - 1);
                index -= 1;
            }
        }
    });
    structure_in_sequence(&mut body, variables);

    variables.remove(slot, sequence[enter].offset);
    debug!("structured bare synchronized block at {}", sequence[enter].offset);
    sequence[enter].kind = InsnKind::Synchronized {
        monitor: Box::new(monitor),
        body,
    };
    enter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::*;

    #[test]
    fn pairs_become_blocks() {
        let mut variables = LocalVariableTable::new();
        variables.insert_synthetic(3, 0, 30);
        let mut sequence = vec![
            store(2, 1, 3, load(1, 0)),
            monitor_enter(5, 1, load(4, 3)),
            call(8, 2, 1),
            monitor_exit(11, 2, load(10, 3)),
            return_(12, 3),
            monitor_exit(15, 3, load(14, 3)),
            call(18, 4, 2),
        ];
        structure_in_sequence(&mut sequence, &mut variables);
        assert_eq!(sequence.len(), 2);
        let InsnKind::Synchronized { monitor, body } = &sequence[0].kind else {
            panic!("expected a synchronized block, got {}", sequence[0]);
        };
        assert_eq!(**monitor, load(1, 0));
        assert_eq!(body, &[call(8, 2, 1), return_(12, 3)]);
        assert_eq!(sequence[0].offset, 5);
        assert!(variables.is_empty());
    }
}
