use crate::context::{Context, Landing};
use crate::insn::build::goto;
use crate::insn::{Insn, InsnKind, Offset, landing_index};
use log::debug;

/// javac drops the `goto` an inner `while` would exit through when that `goto` would only jump to
/// an outer loop's head, and sends the inner test straight to the outer head instead. This puts
/// the `goto` back right after the inner back-edge and points the inner test at it, so that both
/// loops have a regular shape.
pub fn restore_elided_gotos(list: &mut Vec<Insn>, ctx: Context) {
    let mut index = list.len();
    while index > 0 {
        index -= 1;
        let Some((test, target)) = elided_exit(list, index, ctx) else {
            continue;
        };
        let back_edge = &list[index];
        let offset = back_edge.offset + 1;
        let restored = goto(offset, back_edge.line, target);
        list.insert(index + 1, restored);
        list[test].retarget(offset);
        debug!("restored goto {offset} -> {target} after inner loop at {}", list[index].offset);
    }
}

// For a backward `goto` at `index` whose target starts with a branch to before the loop, returns
// the branch index and its target.
fn elided_exit(list: &[Insn], index: usize, ctx: Context) -> Option<(usize, Offset)> {
    let back_edge = &list[index];
    if !back_edge.is_goto() || !back_edge.is_backward_jump() {
        return None;
    }
    let start = landing_index(list, back_edge.jump_target()?);
    if start >= index || !matches!(list[start].kind, InsnKind::Branch { .. }) {
        return None;
    }
    let target = list[start].jump_target()?;
    let loop_from = Landing::at(list, start, ctx.from, ctx.fallthrough.to).from;
    if target >= loop_from || !(ctx.is_continue(target) || target >= ctx.from) {
        return None;
    }
    // The byte after a `goto` opcode is its operand, so no real instruction sits there.
    let offset = back_edge.offset.checked_add(1)?;
    let is_free = match list.get(index + 1) {
        Some(next) => offset < next.min_offset(),
        None => offset <= ctx.fallthrough.to,
    };
    is_free.then_some((start, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::CmpOp;
    use crate::insn::build::*;

    #[test]
    fn inner_exit_to_outer_head_gets_its_goto_back() {
        // while (a) { while (b) { f(); } }
        let mut list = vec![
            branch(1, 1, zero(CmpOp::Eq, load(0, 1)), 20),
            branch(4, 2, zero(CmpOp::Eq, load(3, 2)), 0),
            call(7, 3, 5),
            goto(10, 3, 3),
            return_(20, 4),
        ];
        let ctx = Context::method(&list);
        restore_elided_gotos(&mut list, ctx);
        assert_eq!(list.len(), 6);
        assert_eq!(list[4], goto(11, 3, 0));
        assert_eq!(list[1].jump_target(), Some(11));
    }

    #[test]
    fn regular_exit_is_left_alone() {
        let mut list = vec![
            branch(4, 2, zero(CmpOp::Eq, load(3, 2)), 11),
            call(7, 3, 5),
            goto(10, 3, 3),
            return_(11, 4),
        ];
        let expected = list.clone();
        let ctx = Context::method(&list);
        restore_elided_gotos(&mut list, ctx);
        assert_eq!(list, expected);
    }
}
