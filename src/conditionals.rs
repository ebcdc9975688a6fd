use crate::StructuringError;
use crate::context::{Context, Landing};
use crate::insn::{Condition, IfArm, Insn, InsnKind, landing_index};
use crate::structurer::Structurer;
use crate::utils::jump_targets;
use log::debug;

/// Builds `if`, `if`-`else` and `else if` chains from forward branches in `list`. Branches leaving
/// the sequence are left for the jump resolver.
pub fn structure_conditionals(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
) -> Result<(), StructuringError> {
    let mut index = 0;
    while index < list.len() {
        if let Some(extent) = Extent::find(list, index, ctx) {
            build(structurer, list, ctx, extent)?;
        }
        index += 1;
    }
    Ok(())
}

/// `list[branch]` is the test, `list[branch + 1..then_end]` the consequent (with a trailing `goto`
/// if there is an alternative), `list[then_end..end]` the alternative.
#[derive(Clone, Copy, Debug)]
struct Extent {
    branch: usize,
    then_end: usize,
    end: usize,
}

impl Extent {
    fn find(list: &[Insn], branch: usize, ctx: Context) -> Option<Self> {
        let insn = &list[branch];
        if !matches!(insn.kind, InsnKind::Branch { .. }) || !insn.is_forward_jump() {
            return None;
        }
        let target = insn.jump_target()?;
        if target > ctx.fallthrough.to {
            return None;
        }
        let then_end = landing_index(list, target);
        let end = else_end(list, branch, then_end, ctx).unwrap_or(then_end);
        Some(Self {
            branch,
            then_end,
            end,
        })
    }

    fn has_else(&self) -> bool {
        self.end > self.then_end
    }
}

// The end of the alternative, if the consequent ends with a `goto` over it.
fn else_end(list: &[Insn], branch: usize, then_end: usize, ctx: Context) -> Option<usize> {
    if then_end <= branch + 1 || then_end >= list.len() {
        return None;
    }
    let last = &list[then_end - 1];
    if !last.is_goto() {
        return None;
    }
    let target = last.jump_target()?;
    let end = if target > list[then_end].offset && target <= ctx.fallthrough.to {
        landing_index(list, target)
    } else if ctx.falls_to_continue && ctx.is_continue(target) {
        // At the end of a loop body, javac jumps to the loop head instead of over the
        // alternative.
        list.len()
    } else {
        return None;
    };

    // The consequent must not be entered from the alternative.
    let then_from = Landing::at(list, branch + 1, ctx.from, ctx.fallthrough.to).from;
    let enters_then = jump_targets(&list[then_end..end])
        .into_iter()
        .any(|(_, target)| then_from <= target && target <= last.offset);
    (!enters_then).then_some(end)
}

fn build(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
    extent: Extent,
) -> Result<(), StructuringError> {
    let Extent {
        branch,
        then_end,
        end,
    } = extent;
    let then_ctx = ctx.for_range(list, branch + 1, end);
    let else_ctx = ctx.for_range(list, then_end, end);

    let mut drained: Vec<Insn> = list.drain(branch..end).collect();
    let mut else_ = drained.split_off(then_end - branch);
    let mut then = drained.split_off(1);
    if extent.has_else() {
        then.pop();
    }
    let Some(test) = drained.pop() else {
        return Err(StructuringError::shape(ctx.from, "branch"));
    };
    let (offset, line) = (test.offset, test.line);
    let condition = test
        .into_condition()
        .ok_or(StructuringError::shape(offset, "branch"))?
        .invert();

    structurer.structure_sequence(&mut then, then_ctx)?;
    let kind = if extent.has_else() {
        structurer.structure_sequence(&mut else_, else_ctx)?;
        debug!("if-else at {offset}");
        chain(condition, then, else_)
    } else {
        debug!("if at {offset}");
        InsnKind::If { condition, then }
    };
    list.insert(branch, Insn::new(offset, line, kind));
    Ok(())
}

// Flattens an alternative made of a single conditional into an `else if` chain.
fn chain(condition: Condition, then: Vec<Insn>, mut else_: Vec<Insn>) -> InsnKind {
    let first = IfArm {
        condition,
        body: then,
    };
    let single = match else_.len() {
        1 => else_.pop(),
        _ => None,
    };
    let (nested, rest) = match single.map(|single| (single.offset, single.line, single.kind)) {
        Some((_, _, InsnKind::If { condition, then })) => (
            vec![IfArm {
                condition,
                body: then,
            }],
            None,
        ),
        Some((_, _, InsnKind::IfElse {
            condition,
            then,
            else_,
        })) => (
            vec![IfArm {
                condition,
                body: then,
            }],
            Some(else_),
        ),
        Some((_, _, InsnKind::IfChain { arms, else_ })) => (arms, else_),
        Some((offset, line, kind)) => {
            return InsnKind::IfElse {
                condition: first.condition,
                then: first.body,
                else_: vec![Insn::new(offset, line, kind)],
            };
        }
        None => {
            return InsnKind::IfElse {
                condition: first.condition,
                then: first.body,
                else_,
            };
        }
    };
    let mut arms = vec![first];
    arms.extend(nested);
    InsnKind::IfChain { arms, else_: rest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::CmpOp;
    use crate::insn::build::*;
    use crate::variables::LocalVariableTable;
    use crate::{MapConstantPool, Options};

    fn structure_in(mut list: Vec<Insn>, ctx: Context) -> Vec<Insn> {
        let pool = MapConstantPool::new();
        let options = Options::default();
        let mut structurer = Structurer::new(&pool, &options, LocalVariableTable::new());
        structure_conditionals(&mut structurer, &mut list, ctx).unwrap();
        list
    }

    fn structure(list: Vec<Insn>) -> Vec<Insn> {
        let ctx = Context::method(&list);
        structure_in(list, ctx)
    }

    #[test]
    fn if_else_inverts_the_branch() {
        let list = structure(vec![
            branch(2, 1, zero(CmpOp::Eq, load(1, 1)), 8),
            call(5, 2, 5),
            goto(7, 2, 11),
            call(10, 3, 6),
            return_(11, 4),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], Insn::new(2, 1, InsnKind::IfElse {
            condition: zero(CmpOp::Ne, load(1, 1)),
            then: vec![call(5, 2, 5)],
            else_: vec![call(10, 3, 6)],
        }));
    }

    #[test]
    fn if_without_alternative() {
        let list = structure(vec![
            branch(2, 1, zero(CmpOp::Eq, load(1, 1)), 8),
            call(5, 2, 5),
            return_(8, 3),
        ]);
        assert_eq!(list, [
            Insn::new(2, 1, InsnKind::If {
                condition: zero(CmpOp::Ne, load(1, 1)),
                then: vec![call(5, 2, 5)],
            }),
            return_(8, 3),
        ]);
    }

    #[test]
    fn else_if_is_flattened() {
        let list = structure(vec![
            branch(2, 1, zero(CmpOp::Eq, load(1, 1)), 8),
            call(5, 2, 5),
            goto(7, 2, 20),
            branch(10, 3, zero(CmpOp::Eq, load(9, 2)), 16),
            call(13, 4, 6),
            goto(15, 4, 20),
            call(18, 6, 7),
            return_(20, 7),
        ]);
        assert_eq!(list.len(), 2);
        let InsnKind::IfChain { arms, else_ } = &list[0].kind else {
            panic!("expected an else-if chain, got {}", list[0]);
        };
        assert_eq!(arms.len(), 2);
        assert_eq!(arms[1].condition, zero(CmpOp::Ne, load(9, 2)));
        assert_eq!(arms[1].body, [call(13, 4, 6)]);
        assert_eq!(else_.as_deref(), Some(&[call(18, 6, 7)][..]));
    }

    #[test]
    fn branch_leaving_the_sequence_is_kept() {
        let list = vec![
            branch(2, 1, zero(CmpOp::Eq, load(1, 1)), 40),
            call(5, 2, 5),
        ];
        let ctx = Context {
            fallthrough: Landing::new(6, 8),
            ..Context::method(&list)
        };
        let expected = list.clone();
        assert_eq!(structure_in(list, ctx), expected);
    }
}
