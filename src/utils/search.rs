use crate::insn::{Insn, InsnKind, Offset};

/// `(source, target)` for every raw jump in `list` and below, including switch dispatch arms.
pub fn jump_targets(list: &[Insn]) -> Vec<(Offset, Offset)> {
    let mut out = Vec::new();
    for insn in list {
        insn.visit(&mut |insn| match &insn.kind {
            InsnKind::Switch(dispatch) => {
                let deltas = dispatch
                    .cases
                    .iter()
                    .map(|(_, delta)| *delta)
                    .chain([dispatch.default]);
                for delta in deltas {
                    if let Some(target) = insn.offset.checked_add_signed(delta) {
                        out.push((insn.offset, target));
                    }
                }
            }
            _ => {
                if let Some(target) = insn.jump_target() {
                    out.push((insn.offset, target));
                }
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::CmpOp;
    use crate::insn::build::{branch, call, goto, load, switch, zero};

    #[test]
    fn finds_nested_and_dispatch_targets() {
        let list = [
            branch(3, 1, zero(CmpOp::Eq, load(1, 0)), 20),
            call(6, 1, 1),
            goto(9, 1, 2),
            switch(15, 2, load(14, 1), 30, &[(1, 25)]),
        ];
        let mut targets = jump_targets(&list);
        targets.sort();
        assert_eq!(targets, [(3, 20), (9, 2), (15, 25), (15, 30)]);
    }
}
