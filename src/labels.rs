use crate::{Options, StructuringError};
use crate::context::{Context, ContinueTargets, Landing};
use crate::insn::{Insn, InsnKind, Jump, Offset, for_each_sequence, for_each_sequence_mut};
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

/// Rewrites the raw jumps left after structuring into `break`, `continue`, labeled jumps and
/// inlined returns, and wraps every statement a labeled jump refers to in a `Labeled` marker.
///
/// Contexts are rebuilt from the tree, so this can run on any structured method. Running it on its
/// own output changes nothing. Fails on a backward jump that continues no enclosing loop, since no
/// `break` can express it.
pub fn label_jumps(list: &mut Vec<Insn>, options: &Options) -> Result<(), StructuringError> {
    let terminal = if options.inline_returns {
        TerminalReturn::find(list)
    } else {
        None
    };
    let mut resolver = Resolver {
        frames: Vec::new(),
        terminal,
        node_labels: FxHashSet::default(),
        target_labels: FxHashSet::default(),
    };
    let ctx = Context::method(list);
    resolver.resolve(list, ctx)?;

    wrap_nodes(list, &resolver.node_labels);
    let mut targets: Vec<Offset> = resolver.target_labels.into_iter().collect();
    targets.sort_unstable();
    let mut renamed = FxHashMap::default();
    for target in targets {
        if let Some(offset) = place_target_label(list, target) {
            trace!("label for jumps to {target} placed at {offset}");
            renamed.insert(target, offset);
        }
    }
    if !renamed.is_empty() {
        for_each_sequence_mut(list, &mut |sequence| {
            for insn in sequence.iter_mut() {
                if let Some(Jump::LabeledBreak(target)) = jump_mut(insn) {
                    if let Some(&offset) = renamed.get(&*target) {
                        *target = offset;
                    }
                }
            }
        });
    }
    Ok(())
}

/// An enclosing construct a jump may leave or restart.
#[derive(Clone, Copy, Debug)]
enum Frame {
    Loop {
        node: Offset,
        continue_: ContinueTargets,
        break_: Landing,
    },
    Switch {
        node: Offset,
        break_: Landing,
    },
}

enum Decision {
    /// The jump goes where control would flow anyway.
    Fallthrough,
    Jump(Jump),
}

/// The `return` ending the method, which jumps to it may duplicate.
struct TerminalReturn {
    landing: Landing,
    value: Option<Insn>,
    /// Landings of every raw `goto`, with the goto's target.
    gotos: Vec<(Landing, Offset)>,
}

impl TerminalReturn {
    fn find(list: &[Insn]) -> Option<Self> {
        let last = list.last()?;
        let value = match &last.kind {
            InsnKind::Return => None,
            InsnKind::ValueReturn { value } => Some((**value).clone()),
            _ => return None,
        };
        let mut returns = 0;
        for insn in list {
            insn.visit(&mut |insn| returns += usize::from(insn.is_return()));
        }
        let is_simple = value
            .as_ref()
            .is_none_or(|value| value.operands().is_empty());
        if !is_simple && returns > 1 {
            return None;
        }

        let mut gotos = Vec::new();
        for_each_sequence(list, &mut |sequence| {
            for (index, insn) in sequence.iter().enumerate() {
                let Some(target) = insn.jump_target().filter(|_| insn.is_goto()) else {
                    continue;
                };
                let from = match index.checked_sub(1) {
                    Some(prev) => sequence[prev].max_offset() + 1,
                    None => insn.min_offset(),
                };
                gotos.push((Landing::new(from, insn.offset), target));
            }
        });
        Some(Self {
            landing: Landing::at(list, list.len() - 1, 0, Offset::MAX),
            value,
            gotos,
        })
    }

    // Follows chains of `goto`s, at most once through each.
    fn is_reached_from(&self, mut target: Offset) -> bool {
        for _ in 0..=self.gotos.len() {
            if self.landing.contains(target) {
                return true;
            }
            match self.gotos.iter().find(|(landing, _)| landing.contains(target)) {
                Some(&(_, next)) => target = next,
                None => return false,
            }
        }
        false
    }
}

struct Resolver {
    frames: Vec<Frame>,
    terminal: Option<TerminalReturn>,
    /// Offsets of loops and switches left by labeled jumps.
    node_labels: FxHashSet<Offset>,
    /// Raw targets of labeled jumps that leave no enclosing construct.
    target_labels: FxHashSet<Offset>,
}

impl Resolver {
    fn resolve(&mut self, list: &mut Vec<Insn>, ctx: Context) -> Result<(), StructuringError> {
        let mut index = 0;
        while index < list.len() {
            let after = Landing::at(list, index + 1, ctx.from, ctx.fallthrough.to);
            let is_last = index + 1 == list.len();
            let insn = &mut list[index];
            let is_raw_jump = matches!(insn.kind, InsnKind::Goto { .. } | InsnKind::Branch { .. });
            match insn.jump_target().filter(|_| is_raw_jump) {
                Some(target) => {
                    let decision = self.classify(insn.offset, target, after, ctx)?;
                    trace!("jump at {} to {target}: {}", insn.offset, describe(&decision));
                    let is_goto = insn.is_goto();
                    let elided = match &decision {
                        Decision::Fallthrough => is_goto,
                        Decision::Jump(Jump::Continue) => is_goto && is_last && ctx.falls_to_continue,
                        Decision::Jump(_) => false,
                    };
                    if elided {
                        list.remove(index);
                        continue;
                    }
                    insn.kind = match (decision, core::mem::replace(&mut insn.kind, InsnKind::Return)) {
                        (Decision::Fallthrough, InsnKind::Branch { condition, .. }) => InsnKind::If {
                            condition: condition.invert(),
                            then: Vec::new(),
                        },
                        (Decision::Jump(jump), InsnKind::Branch { condition, .. }) => {
                            InsnKind::ConditionalJump { condition, jump }
                        }
                        (Decision::Jump(jump), _) => InsnKind::Jump(jump),
                        (Decision::Fallthrough, kind) => kind,
                    };
                }
                None => {
                    let node_from = Landing::at(list, index, ctx.from, ctx.fallthrough.to).from;
                    let inner = Context {
                        falls_to_continue: ctx.falls_to_continue && is_last,
                        ..ctx
                    };
                    self.resolve_nested(&mut list[index], node_from, after, inner)?;
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn classify(
        &mut self,
        source: Offset,
        target: Offset,
        after: Landing,
        ctx: Context,
    ) -> Result<Decision, StructuringError> {
        if after.contains(target) {
            return Ok(Decision::Fallthrough);
        }
        if ctx.is_continue(target) {
            return Ok(Decision::Jump(Jump::Continue));
        }
        if ctx.is_break(target) {
            return Ok(Decision::Jump(Jump::Break));
        }
        if let Some(terminal) = &self.terminal {
            if terminal.is_reached_from(target) {
                return Ok(Decision::Jump(Jump::Return(terminal.value.clone().map(Box::new))));
            }
        }
        for frame in self.frames.iter().rev() {
            let jump = match *frame {
                Frame::Loop {
                    node, continue_, ..
                } if continue_.contains(target) => Jump::LabeledContinue(node),
                Frame::Loop { node, break_, .. } | Frame::Switch { node, break_ }
                    if break_.contains(target) =>
                {
                    Jump::LabeledBreak(node)
                }
                _ => continue,
            };
            if let Jump::LabeledBreak(node) | Jump::LabeledContinue(node) = jump {
                self.node_labels.insert(node);
            }
            return Ok(Decision::Jump(jump));
        }
        if target <= source {
            return Err(StructuringError::shape(source, "backward jump to a loop head"));
        }
        self.target_labels.insert(target);
        Ok(Decision::Jump(Jump::LabeledBreak(target)))
    }

    fn resolve_nested(
        &mut self,
        insn: &mut Insn,
        node_from: Offset,
        after: Landing,
        ctx: Context,
    ) -> Result<(), StructuringError> {
        let offset = insn.offset;
        // The handler store a `try` takes its offset from follows the body.
        let first = if matches!(insn.kind, InsnKind::Try(_)) {
            node_from
        } else {
            offset + 1
        };
        match &mut insn.kind {
            InsnKind::Labeled(inner) | InsnKind::Declare {
                statement: inner, ..
            } => return self.resolve_nested(inner, node_from, after, ctx),
            InsnKind::Loop(loop_) => {
                let targets = loop_.continue_targets;
                let top_tested = loop_.test.is_some() && !targets.head.is_empty();
                let from = if top_tested {
                    targets.head.to + 1
                } else {
                    node_from
                };
                let body_ctx = ctx.for_loop_body(from, after, targets);
                return self.resolve_loop_body(&mut loop_.body, offset, body_ctx);
            }
            InsnKind::ForEach(for_each) => {
                let targets = for_each.continue_targets;
                let from = if targets.head.is_empty() {
                    node_from
                } else {
                    targets.head.to + 1
                };
                let body_ctx = ctx.for_loop_body(from, after, targets);
                return self.resolve_loop_body(&mut for_each.body, offset, body_ctx);
            }
            InsnKind::SwitchBlock(switch) => {
                let froms = running_starts(switch.cases.iter().map(|case| &case.body), first);
                let next_offsets: Vec<Offset> = (0..switch.cases.len())
                    .map(|index| {
                        switch.cases[index + 1..]
                            .iter()
                            .find_map(|case| case.body.first())
                            .map_or(after.to, |insn| insn.offset)
                    })
                    .collect();
                let count = switch.cases.len();
                self.frames.push(Frame::Switch {
                    node: offset,
                    break_: after,
                });
                for (index, case) in switch.cases.iter_mut().enumerate() {
                    let fallthrough = if index + 1 == count {
                        after
                    } else {
                        Landing::new(froms[index + 1], next_offsets[index])
                    };
                    self.resolve(&mut case.body, ctx.for_switch_case(froms[index], fallthrough, after))?;
                }
                self.frames.pop();
                return Ok(());
            }
            InsnKind::Try(_)
            | InsnKind::Synchronized { .. }
            | InsnKind::If { .. }
            | InsnKind::IfElse { .. }
            | InsnKind::IfChain { .. } => {}
            _ => return Ok(()),
        }

        let arm = |from| Context {
            from,
            fallthrough: after,
            depth: ctx.depth + 1,
            ..ctx
        };
        let froms = running_starts(insn.sequences().into_iter(), first);
        for (sequence, from) in insn.sequences_mut().into_iter().zip(froms) {
            self.resolve(sequence, arm(from))?;
        }
        Ok(())
    }

    fn resolve_loop_body(
        &mut self,
        body: &mut Vec<Insn>,
        node: Offset,
        ctx: Context,
    ) -> Result<(), StructuringError> {
        let (Some(continue_), Some(break_)) = (ctx.continue_, ctx.break_) else {
            return Ok(());
        };
        self.frames.push(Frame::Loop {
            node,
            continue_,
            break_,
        });
        let resolved = self.resolve(body, ctx);
        self.frames.pop();
        resolved
    }
}

// The smallest target landing in each of consecutive sequences, the first starting at `first`.
fn running_starts<'a>(sequences: impl Iterator<Item = &'a Vec<Insn>>, first: Offset) -> Vec<Offset> {
    let mut from = first;
    sequences
        .map(|sequence| {
            let start = from;
            if let Some(last) = sequence.last() {
                from = last.max_offset() + 1;
            }
            start
        })
        .collect()
}

fn describe(decision: &Decision) -> String {
    match decision {
        Decision::Fallthrough => "fallthrough".to_owned(),
        Decision::Jump(jump) => format!("{jump:?}"),
    }
}

fn jump_mut(insn: &mut Insn) -> Option<&mut Jump> {
    match &mut insn.kind {
        InsnKind::Jump(jump) | InsnKind::ConditionalJump { jump, .. } => Some(jump),
        InsnKind::Labeled(inner) | InsnKind::Declare {
            statement: inner, ..
        } => jump_mut(inner),
        _ => None,
    }
}

fn wrap(insn: &mut Insn) {
    let placeholder = Insn::new(insn.offset, insn.line, InsnKind::Return);
    let inner = core::mem::replace(insn, placeholder);
    insn.kind = InsnKind::Labeled(Box::new(inner));
}

fn wrap_nodes(list: &mut Vec<Insn>, labels: &FxHashSet<Offset>) {
    if labels.is_empty() {
        return;
    }
    for_each_sequence_mut(list, &mut |sequence| {
        for insn in sequence.iter_mut() {
            let is_labeled = labels.contains(&insn.offset)
                && matches!(
                    insn.kind,
                    InsnKind::Loop(_) | InsnKind::ForEach(_) | InsnKind::SwitchBlock(_)
                );
            if is_labeled {
                wrap(insn);
            }
        }
    });
}

// Labels the innermost statement `target` lands on and returns its offset.
fn place_target_label(list: &mut [Insn], target: Offset) -> Option<Offset> {
    let index = list.iter().position(|insn| insn.max_offset() >= target)?;
    let insn = &mut list[index];
    if let Some(offset) = place_inside(insn, target) {
        return Some(offset);
    }
    if !matches!(insn.kind, InsnKind::Labeled(_)) {
        wrap(insn);
    }
    Some(insn.offset)
}

// Descends into the sequence of `insn` that `target` lands in, unless the node's own code (header,
// condition, dispatch) sits between the target and that sequence.
fn place_inside(insn: &mut Insn, target: Offset) -> Option<Offset> {
    let own = own_offsets(insn);
    let sequence = insn
        .sequences_mut()
        .into_iter()
        .find(|sequence| sequence.last().is_some_and(|last| last.max_offset() >= target))?;
    let start = sequence.first()?.min_offset();
    if own.iter().any(|&offset| target <= offset && offset < start) {
        return None;
    }
    place_target_label(sequence, target)
}

fn own_offsets(insn: &Insn) -> Vec<Offset> {
    match &insn.kind {
        InsnKind::Labeled(inner) | InsnKind::Declare {
            statement: inner, ..
        } => own_offsets(inner),
        _ => {
            let mut offsets = vec![insn.offset];
            for operand in insn.operands() {
                operand.visit(&mut |insn| offsets.push(insn.offset));
            }
            offsets
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::*;
    use crate::insn::{CmpOp, Loop};
    use crate::loops::LoopShape;

    fn infinite(offset: Offset, head: Landing, body: Vec<Insn>) -> Insn {
        Insn::new(
            offset,
            1,
            InsnKind::Loop(Box::new(Loop {
                shape: LoopShape::Infinite,
                init: None,
                test: None,
                update: None,
                body,
                continue_targets: ContinueTargets {
                    head,
                    tail: Landing::new(offset, offset),
                },
            })),
        )
    }

    fn body(insn: &Insn) -> &[Insn] {
        match &insn.unwrapped().kind {
            InsnKind::Loop(loop_) => &loop_.body,
            _ => panic!("expected a loop, got {insn}"),
        }
    }

    #[test]
    fn loop_exits_become_break_and_continue() {
        let mut list = vec![
            infinite(9, Landing::new(0, 3), vec![
                branch(3, 1, zero(CmpOp::Eq, load(2, 1)), 12),
                call(6, 2, 5),
                goto(8, 2, 0),
            ]),
            return_(12, 3),
        ];
        label_jumps(&mut list, &Options::default()).unwrap();
        assert_eq!(body(&list[0]), [
            Insn::new(3, 1, InsnKind::ConditionalJump {
                condition: zero(CmpOp::Eq, load(2, 1)),
                jump: Jump::Break,
            }),
            call(6, 2, 5),
        ]);
    }

    #[test]
    fn leaving_an_outer_loop_labels_it() {
        let inner = infinite(9, Landing::new(4, 6), vec![
            call(6, 2, 5),
            branch(8, 2, zero(CmpOp::Ne, load(7, 1)), 13),
        ]);
        let mut list = vec![
            infinite(11, Landing::new(0, 9), vec![call(3, 1, 5), inner]),
            call(13, 3, 6),
        ];
        label_jumps(&mut list, &Options::default()).unwrap();
        assert!(matches!(list[0].kind, InsnKind::Labeled(_)));
        let inner = &body(&list[0])[1];
        assert_eq!(body(inner)[1].kind, InsnKind::ConditionalJump {
            condition: zero(CmpOp::Ne, load(7, 1)),
            jump: Jump::LabeledBreak(11),
        });
    }

    #[test]
    fn jump_to_final_return_is_inlined() {
        let mut list = vec![
            Insn::new(2, 1, InsnKind::If {
                condition: zero(CmpOp::Ne, load(1, 1)),
                then: vec![call(5, 2, 5), goto(7, 2, 19)],
            }),
            call(10, 3, 6),
            value_return(20, 4, load(19, 1)),
        ];
        label_jumps(&mut list, &Options::default()).unwrap();
        let InsnKind::If { then, .. } = &list[0].kind else {
            panic!("expected an if, got {}", list[0]);
        };
        assert_eq!(
            then[1].kind,
            InsnKind::Jump(Jump::Return(Some(Box::new(load(19, 1)))))
        );
    }

    #[test]
    fn other_targets_get_a_label_once() {
        let mut list = vec![
            Insn::new(2, 1, InsnKind::If {
                condition: zero(CmpOp::Ne, load(1, 1)),
                then: vec![goto(5, 2, 12)],
            }),
            call(8, 3, 5),
            call(12, 4, 6),
            return_(14, 5),
        ];
        label_jumps(&mut list, &Options::default()).unwrap();
        assert_eq!(list[2].kind, InsnKind::Labeled(Box::new(call(12, 4, 6))));
        let once = list.clone();
        label_jumps(&mut list, &Options::default()).unwrap();
        assert_eq!(list, once);
    }

    #[test]
    fn backward_jump_outside_a_loop_is_rejected() {
        let mut list = vec![
            call(2, 1, 5),
            Insn::new(6, 1, InsnKind::If {
                condition: zero(CmpOp::Ne, load(3, 1)),
                then: vec![goto(9, 2, 0)],
            }),
            return_(11, 3),
        ];
        assert_eq!(
            label_jumps(&mut list, &Options::default()),
            Err(StructuringError::shape(9, "backward jump to a loop head"))
        );
    }
}
