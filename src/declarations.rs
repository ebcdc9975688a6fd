use crate::insn::{Insn, InsnKind, Offset, Slot};
use crate::variables::LocalVariableTable;
use log::trace;

/// Wraps, for each local that is neither declared nor synthetic, the first statement using it in
/// a `Declare` marker. The marker goes into the innermost sequence holding every use, unless a
/// construct's header (loop init, condition, switch key) uses the variable itself.
pub fn place_declarations(list: &mut Vec<Insn>, variables: &mut LocalVariableTable) {
    let pending: Vec<(usize, Use)> = variables
        .iter()
        .filter(|(_, variable)| !variable.declared && !variable.synthetic)
        .map(|(index, variable)| {
            let range = Use {
                slot: variable.slot,
                from: variable.start_pc.saturating_sub(4),
                to: variable.end_pc(),
            };
            (index, range)
        })
        .collect();

    for (index, range) in pending {
        if declare_in(list, index, range) {
            variables.mark_declared_at(index);
        }
    }
}

/// Accesses to `slot` at offsets in `[from, to)`.
#[derive(Clone, Copy, Debug)]
struct Use {
    slot: Slot,
    from: Offset,
    to: Offset,
}

impl Use {
    fn is_in(&self, insn: &Insn) -> bool {
        let mut found = false;
        insn.visit(&mut |insn| {
            found |= (self.from..self.to).contains(&insn.offset) && accesses(insn, self.slot);
        });
        found
    }

    fn is_in_header(&self, insn: &Insn) -> bool {
        insn.operands().into_iter().any(|operand| self.is_in(operand))
    }
}

fn accesses(insn: &Insn, slot: Slot) -> bool {
    match insn.kind {
        InsnKind::Load { slot: s }
        | InsnKind::Store { slot: s, .. }
        | InsnKind::DupStore { slot: s, .. }
        | InsnKind::Increment { slot: s, .. } => s == slot,
        _ => false,
    }
}

fn declare_in(list: &mut [Insn], variable: usize, range: Use) -> bool {
    let mut users = list
        .iter()
        .enumerate()
        .filter(|(_, insn)| range.is_in(insn))
        .map(|(index, _)| index);
    let Some(first) = users.next() else {
        return false;
    };
    let is_only_user = users.next().is_none();

    let insn = &mut list[first];
    if is_only_user && !range.is_in_header(insn) {
        let mut holders = insn
            .sequences_mut()
            .into_iter()
            .filter(|sequence| sequence.iter().any(|insn| range.is_in(insn)));
        if let (Some(sequence), None) = (holders.next(), holders.next()) {
            return declare_in(sequence, variable, range);
        }
    }

    trace!("variable {variable} declared at {}", insn.offset);
    let placeholder = Insn::new(insn.offset, insn.line, InsnKind::Return);
    let statement = core::mem::replace(insn, placeholder);
    insn.kind = InsnKind::Declare {
        variable,
        statement: Box::new(statement),
    };
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::CmpOp;
    use crate::insn::build::*;
    use crate::variables::LocalVariable;

    fn table(entries: &[(Slot, Offset, u32)]) -> LocalVariableTable {
        entries
            .iter()
            .map(|&(slot, start_pc, length)| LocalVariable {
                slot,
                name: format!("v{slot}"),
                signature: "I".to_owned(),
                start_pc,
                length,
                declared: false,
                synthetic: false,
            })
            .collect()
    }

    fn declared(insn: &Insn) -> Option<usize> {
        match insn.kind {
            InsnKind::Declare { variable, .. } => Some(variable),
            _ => None,
        }
    }

    #[test]
    fn declaration_goes_to_first_use() {
        let mut list = vec![
            call(2, 1, 5),
            store(4, 2, 1, int(3, 7)),
            call(7, 3, 6),
            value_return(9, 4, load(8, 1)),
        ];
        let mut variables = table(&[(1, 5, 5)]);
        place_declarations(&mut list, &mut variables);
        assert_eq!(declared(&list[1]), Some(0));
        assert_eq!(declared(&list[3]), None);
        assert!(variables.get(0).is_some_and(|variable| variable.declared));
    }

    #[test]
    fn declaration_moves_into_the_only_arm_using_it() {
        let mut list = vec![
            Insn::new(2, 1, InsnKind::IfElse {
                condition: zero(CmpOp::Eq, load(1, 0)),
                then: vec![store(4, 2, 1, int(3, 1)), call(6, 2, 5)],
                else_: vec![call(9, 3, 6)],
            }),
            return_(11, 4),
        ];
        let mut variables = table(&[(1, 5, 3), (0, 0, 12)]);
        place_declarations(&mut list, &mut variables);
        // Slot 0 is read by the condition, so it is declared in front of the whole statement.
        assert_eq!(declared(&list[0]), Some(1));
        let InsnKind::IfElse { then, .. } = &list[0].unwrapped().kind else {
            panic!("expected an if, got {}", list[0]);
        };
        assert_eq!(declared(&then[0]), Some(0));
    }

    #[test]
    fn synthetic_and_declared_variables_are_skipped() {
        let mut list = vec![store(4, 1, 3, int(3, 0)), return_(6, 2)];
        let mut variables = LocalVariableTable::new();
        variables.insert_synthetic(3, 0, 10);
        place_declarations(&mut list, &mut variables);
        assert_eq!(declared(&list[0]), None);
    }
}
