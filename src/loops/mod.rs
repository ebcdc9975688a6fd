mod foreach;
mod unoptimize;

pub use self::foreach::ForEachIdiom;
use self::foreach::ForEachMatch;
use crate::StructuringError;
use crate::context::{Context, ContinueTargets, Landing};
use crate::insn::{Condition, ForEach, Insn, InsnKind, Loop, UNKNOWN_LINE, landing_index};
use crate::structurer::Structurer;
use crate::utils::jump_targets;
use displaydoc::Display;
use log::debug;

/// Which of the `for` header parts a loop carries. The first eight variants are numbered by the
/// bitmask `init | test << 1 | update << 2`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum LoopShape {
    /// for (;;)
    Infinite,
    /// for (init;;)
    Init,
    /// while (test)
    While,
    /// for (init; test;)
    InitTest,
    /// for (;; update)
    Update,
    /// for (init;; update)
    InitUpdate,
    /// for (; test; update)
    TestUpdate,
    /// for (init; test; update)
    For,
    /// do .. while (test)
    DoWhile,
}

impl LoopShape {
    pub fn from_parts(init: bool, test: bool, update: bool) -> Self {
        match u8::from(init) | u8::from(test) << 1 | u8::from(update) << 2 {
            0 => Self::Infinite,
            1 => Self::Init,
            2 => Self::While,
            3 => Self::InitTest,
            4 => Self::Update,
            5 => Self::InitUpdate,
            6 => Self::TestUpdate,
            _ => Self::For,
        }
    }

    /// The header bitmask, `None` for `do .. while`.
    pub fn case(self) -> Option<u8> {
        Some(match self {
            Self::Infinite => 0,
            Self::Init => 1,
            Self::While => 2,
            Self::InitTest => 3,
            Self::Update => 4,
            Self::InitUpdate => 5,
            Self::TestUpdate => 6,
            Self::For => 7,
            Self::DoWhile => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TestPosition {
    /// `head: if (!test) goto after; body; goto head`.
    Top,
    /// `goto test; body: ..; test: if (test) goto body`.
    Bottom,
    /// `body: ..; if (test) goto body`, no entry jump.
    DoWhile,
    /// `body: ..; goto body`.
    None,
}

/// Positions of one lowered loop in its sequence.
#[derive(Clone, Copy, Debug)]
struct Frame {
    test: TestPosition,
    /// The top test, the entry `goto`, or the first body statement.
    first: usize,
    body_start: usize,
    body_end: usize,
    back_edge: usize,
}

impl Frame {
    fn classify(list: &[Insn], start: usize, back_edge: usize, ctx: Context) -> Self {
        let frame = |test, first, body_start| Self {
            test,
            first,
            body_start,
            body_end: back_edge,
            back_edge,
        };
        if matches!(list[back_edge].kind, InsnKind::Branch { .. }) {
            let entry = start.checked_sub(1).filter(|&entry| {
                list[entry].is_goto()
                    && list[entry].is_forward_jump()
                    && list[entry]
                        .jump_target()
                        .is_some_and(|target| landing_index(list, target) == back_edge)
            });
            return match entry {
                Some(entry) => frame(TestPosition::Bottom, entry, start),
                None => frame(TestPosition::DoWhile, start, start),
            };
        }
        let after = Landing::at(list, back_edge + 1, ctx.from, ctx.fallthrough.to);
        let exits_at_top = start < back_edge
            && matches!(list[start].kind, InsnKind::Branch { .. })
            && list[start]
                .jump_target()
                .is_some_and(|target| after.contains(target));
        if exits_at_top {
            frame(TestPosition::Top, start, start + 1)
        } else {
            frame(TestPosition::None, start, start)
        }
    }

    fn test<'a>(&self, list: &'a [Insn]) -> Option<&'a Insn> {
        match self.test {
            TestPosition::Top => Some(&list[self.first]),
            TestPosition::Bottom | TestPosition::DoWhile => Some(&list[self.back_edge]),
            TestPosition::None => None,
        }
    }

    fn continue_targets(&self, list: &[Insn], ctx: Context, has_update: bool) -> ContinueTargets {
        let landing = |index| Landing::at(list, index, ctx.from, ctx.fallthrough.to);
        let head = match self.test {
            TestPosition::Top => landing(self.first),
            TestPosition::None => landing(self.body_start),
            TestPosition::Bottom | TestPosition::DoWhile => Landing::EMPTY,
        };
        let tail_index = if has_update {
            self.body_end - 1
        } else {
            self.back_edge
        };
        let tail = Landing::new(landing(tail_index).from, list[self.back_edge].offset);
        ContinueTargets { head, tail }
    }

    fn body_context(&self, list: &[Insn], ctx: Context, continue_: ContinueTargets) -> Context {
        let from = Landing::at(list, self.body_start, ctx.from, ctx.fallthrough.to).from;
        let break_ = Landing::at(list, self.back_edge + 1, ctx.from, ctx.fallthrough.to);
        ctx.for_loop_body(from, break_, continue_)
    }
}

/// Replaces every loop in `list` with a `Loop` or `ForEach` node and structures the loop bodies.
/// Back-edges are visited from the end, so outer loops are built before the loops they contain.
pub fn structure_loops(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
) -> Result<(), StructuringError> {
    unoptimize::restore_elided_gotos(list, ctx);
    let mut index = list.len();
    while index > 0 {
        index -= 1;
        let Some(start) = back_edge_start(list, index, ctx) else {
            continue;
        };
        let frame = Frame::classify(list, start, index, ctx);
        index = build_loop(structurer, list, ctx, frame)?;
    }
    Ok(())
}

// The index a backward jump at `index` lands on, unless it is a `continue` of an enclosing loop or
// leaves the sequence.
fn back_edge_start(list: &[Insn], index: usize, ctx: Context) -> Option<usize> {
    let insn = &list[index];
    if !insn.is_backward_jump() {
        return None;
    }
    let target = insn.jump_target()?;
    if ctx.is_continue(target) || target < ctx.from {
        return None;
    }
    Some(landing_index(list, target))
}

// Returns the index of the new node.
fn build_loop(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
    frame: Frame,
) -> Result<usize, StructuringError> {
    if structurer.options.recognize_for_each {
        if let Some(found) = foreach::match_for_each(structurer.pool, list, frame) {
            return build_for_each(structurer, list, ctx, frame, found);
        }
    }

    let (has_init, has_update) = select_header(list, frame, ctx);
    let continue_targets = frame.continue_targets(list, ctx, has_update);
    let body_ctx = frame.body_context(list, ctx, continue_targets);
    let (offset, line) = (list[frame.back_edge].offset, list[frame.back_edge].line);

    let start = if has_init { frame.first - 1 } else { frame.first };
    let mut drained: Vec<Insn> = list.drain(start..=frame.back_edge).collect();
    let back_edge = drained
        .pop()
        .ok_or(StructuringError::shape(offset, "back-edge"))?;
    let update = if has_update { drained.pop() } else { None };
    let mut body = drained.split_off(frame.body_start - start);
    let header = if frame.first < frame.body_start {
        drained.pop()
    } else {
        None
    };
    let init = if has_init { drained.pop() } else { None };

    let test = match frame.test {
        TestPosition::Top => Some(
            header
                .and_then(Insn::into_condition)
                .ok_or(StructuringError::shape(offset, "loop test"))?
                .invert(),
        ),
        TestPosition::Bottom | TestPosition::DoWhile => Some(
            back_edge
                .into_condition()
                .ok_or(StructuringError::shape(offset, "loop test"))?,
        ),
        TestPosition::None => None,
    };
    let shape = match frame.test {
        TestPosition::DoWhile => LoopShape::DoWhile,
        _ => LoopShape::from_parts(init.is_some(), test.is_some(), update.is_some()),
    };

    structurer.structure_sequence(&mut body, body_ctx)?;
    debug!("loop at {offset} is {shape}, continue targets {continue_targets}");
    list.insert(
        start,
        Insn::new(
            offset,
            line,
            InsnKind::Loop(Box::new(Loop {
                shape,
                init,
                test,
                update,
                body,
                continue_targets,
            })),
        ),
    );
    Ok(start)
}

fn build_for_each(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
    frame: Frame,
    found: ForEachMatch,
) -> Result<usize, StructuringError> {
    let has_update = found.body_end < frame.back_edge;
    let continue_targets = frame.continue_targets(list, ctx, has_update);
    let body_frame = Frame {
        body_start: found.body_start,
        ..frame
    };
    let body_ctx = body_frame.body_context(list, ctx, continue_targets);
    let (offset, line) = (list[frame.back_edge].offset, list[frame.back_edge].line);

    let mut drained: Vec<Insn> = list.drain(found.first..=frame.back_edge).collect();
    drained.truncate(found.body_end - found.first);
    let mut body = drained.split_off(found.body_start - found.first);

    for &(slot, at) in &found.temporaries {
        structurer.variables.remove(slot, at);
    }
    structurer
        .variables
        .mark_declared(found.variable, found.variable_offset);

    structurer.structure_sequence(&mut body, body_ctx)?;
    debug!("loop at {offset} is a for-each over {}", found.idiom);
    list.insert(
        found.first,
        Insn::new(
            offset,
            line,
            InsnKind::ForEach(Box::new(ForEach {
                idiom: found.idiom,
                variable: found.variable,
                iterable: found.iterable,
                body,
                continue_targets,
            })),
        ),
    );
    Ok(found.first)
}

// Decides whether the store before the loop and the last body statement belong to the header.
// With line numbers, header parts share the test's line; without them, they touch the slot the
// test reads. Without a test, the two must agree with each other.
fn select_header(list: &[Insn], frame: Frame, ctx: Context) -> (bool, bool) {
    if frame.test == TestPosition::DoWhile {
        return (false, false);
    }
    let init = frame
        .first
        .checked_sub(1)
        .map(|index| &list[index])
        .filter(|insn| matches!(insn.kind, InsnKind::Store { .. }))
        .filter(|_| !entered_past_init(list, frame, ctx));
    let update = (frame.body_start < frame.body_end)
        .then(|| &list[frame.body_end - 1])
        .filter(|insn| insn.written_slot().is_some())
        .filter(|_| !update_is_skipped(list, frame, ctx));

    let lines_known = |a: &Insn, b: &Insn| a.line != UNKNOWN_LINE && b.line != UNKNOWN_LINE;
    match frame.test(list) {
        Some(test) => {
            let Some(condition) = test.condition() else {
                return (false, false);
            };
            let belongs = |insn: &Insn| {
                if lines_known(insn, test) {
                    insn.line == test.line
                } else {
                    insn.written_slot()
                        .is_some_and(|slot| reads_slot(condition, slot))
                }
            };
            (init.is_some_and(belongs), update.is_some_and(belongs))
        }
        None => match (init, update) {
            (Some(init), Some(update)) => {
                let paired = if lines_known(init, update) {
                    init.line == update.line
                } else {
                    init.written_slot() == update.written_slot()
                };
                (paired, paired)
            }
            _ => (false, false),
        },
    }
}

fn reads_slot(condition: &Condition, slot: crate::insn::Slot) -> bool {
    condition
        .operands()
        .into_iter()
        .any(|operand| operand.references_slot(slot))
}

// A jump from outside the loop to its head would land inside the node if the init were absorbed.
fn entered_past_init(list: &[Insn], frame: Frame, ctx: Context) -> bool {
    let head = Landing::at(list, frame.first, ctx.from, ctx.fallthrough.to);
    let (before, rest) = list.split_at(frame.first - 1);
    let after = &rest[frame.back_edge + 2 - frame.first..];
    jump_targets(before)
        .into_iter()
        .chain(jump_targets(after))
        .any(|(_, target)| head.contains(target))
}

// A `continue` that jumps past the last body statement means that statement is not an update.
fn update_is_skipped(list: &[Insn], frame: Frame, ctx: Context) -> bool {
    let landing = |index| Landing::at(list, index, ctx.from, ctx.fallthrough.to);
    let head = match frame.test {
        TestPosition::Top => landing(frame.first),
        TestPosition::None => landing(frame.body_start),
        TestPosition::Bottom | TestPosition::DoWhile => Landing::EMPTY,
    };
    let past_update = landing(frame.back_edge);
    jump_targets(&list[frame.body_start..frame.body_end - 1])
        .into_iter()
        .any(|(_, target)| head.contains(target) || past_update.contains(target))
}
