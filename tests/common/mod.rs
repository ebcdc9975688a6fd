#![allow(dead_code)]

use jstructure::insn::{Insn, InsnKind, Jump, Offset, for_each_sequence};
use jstructure::{
    ConstantPool, ExceptionTableEntry, LocalVariable, LocalVariableTable, MethodBody, Options,
    Slot, StructuredMethod, structure_method,
};

pub fn variable(slot: Slot, start_pc: Offset, length: u32) -> LocalVariable {
    LocalVariable {
        slot,
        name: format!("v{slot}"),
        signature: "I".to_owned(),
        start_pc,
        length,
        declared: false,
        synthetic: false,
    }
}

pub fn parameter(slot: Slot, length: u32) -> LocalVariable {
    LocalVariable {
        declared: true,
        ..variable(slot, 0, length)
    }
}

pub fn finally_row(start_pc: Offset, end_pc: Offset, handler_pc: Offset) -> ExceptionTableEntry {
    ExceptionTableEntry {
        start_pc,
        end_pc,
        handler_pc,
        catch_type: 0,
    }
}

pub fn run(
    pool: &dyn ConstantPool,
    instructions: Vec<Insn>,
    exception_table: Vec<ExceptionTableEntry>,
    variables: Vec<LocalVariable>,
) -> StructuredMethod {
    let body = MethodBody {
        instructions,
        exception_table,
        variables: variables.into_iter().collect::<LocalVariableTable>(),
    };
    structure_method(pool, body, &Options::default())
}

/// Whether statement offsets increase strictly in every sequence of the tree.
pub fn offsets_increase(list: &[Insn]) -> bool {
    let mut ok = true;
    for_each_sequence(list, &mut |sequence| {
        ok &= sequence.windows(2).all(|pair| pair[0].offset < pair[1].offset);
    });
    ok
}

/// Offsets of every statement of every sequence, in visiting order.
pub fn statement_offsets(list: &[Insn]) -> Vec<Offset> {
    let mut offsets = Vec::new();
    for_each_sequence(list, &mut |sequence| {
        offsets.extend(sequence.iter().map(|insn| insn.offset));
    });
    offsets
}

pub fn count_labels(list: &[Insn]) -> usize {
    let mut count = 0;
    for insn in list {
        insn.visit(&mut |insn| count += usize::from(matches!(insn.kind, InsnKind::Labeled(_))));
    }
    count
}

/// Offsets labeled jumps refer to.
pub fn labeled_jump_targets(list: &[Insn]) -> Vec<Offset> {
    let mut targets = Vec::new();
    for insn in list {
        insn.visit(&mut |insn| {
            let jump = match &insn.kind {
                InsnKind::Jump(jump) | InsnKind::ConditionalJump { jump, .. } => jump,
                _ => return,
            };
            if let Jump::LabeledBreak(target) | Jump::LabeledContinue(target) = jump {
                targets.push(*target);
            }
        });
    }
    targets
}

/// Offsets of statements wrapped in a label marker.
pub fn label_offsets(list: &[Insn]) -> Vec<Offset> {
    let mut offsets = Vec::new();
    for insn in list {
        insn.visit(&mut |insn| {
            if matches!(insn.kind, InsnKind::Labeled(_)) {
                offsets.push(insn.offset);
            }
        });
    }
    offsets
}

pub fn has_raw_jumps(list: &[Insn]) -> bool {
    let mut found = false;
    for insn in list {
        insn.visit(&mut |insn| {
            found |= matches!(insn.kind, InsnKind::Goto { .. } | InsnKind::Branch { .. });
        });
    }
    found
}
