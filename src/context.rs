use crate::StructuringError;
use crate::insn::{Insn, Offset};
use displaydoc::Display;

// The set of jump targets that land on one position, as an inclusive offset interval. Statements
// are keyed by the offset of their last bytecode instruction, so a jump lands on statement `S`
// whenever its target lies after the previous statement and at or before `S`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
/// {from}..={to}
pub struct Landing {
    pub from: Offset,
    pub to: Offset,
}

impl Landing {
    pub const EMPTY: Self = Self { from: 1, to: 0 };

    pub fn new(from: Offset, to: Offset) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, target: Offset) -> bool {
        self.from <= target && target <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Targets landing on `list[index]`, or past the end of `list` if `index == list.len()`.
    /// `list_from` is the smallest target landing inside `list`; `list_end` is the largest target
    /// landing right after it.
    pub fn at(list: &[Insn], index: usize, list_from: Offset, list_end: Offset) -> Self {
        let from = match index.checked_sub(1) {
            Some(prev) => list[prev].max_offset().saturating_add(1),
            None => list_from,
        };
        let to = match list.get(index) {
            Some(insn) => insn.offset,
            None => list_end,
        };
        Self { from, to }
    }
}

// Targets a `continue` of one loop may jump to: the loop entry (top-tested and infinite loops) and
// the code right before the back-edge (update statement, bottom test or the back-edge itself).
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
/// head {head}, tail {tail}
pub struct ContinueTargets {
    pub head: Landing,
    pub tail: Landing,
}

impl ContinueTargets {
    pub fn contains(&self, target: Offset) -> bool {
        self.head.contains(target) || self.tail.contains(target)
    }
}

/// Where control goes when leaving the sequence being structured in various ways. Passed down by
/// value; each nested sequence derives its own.
#[derive(Clone, Copy, Debug)]
pub struct Context {
    /// The smallest jump target that lands inside the sequence.
    pub from: Offset,
    /// Targets meaning "fall off the end of the sequence".
    pub fallthrough: Landing,
    /// Targets of `break` from the nearest enclosing loop or switch.
    pub break_: Option<Landing>,
    /// Targets of `continue` in the nearest enclosing loop.
    pub continue_: Option<ContinueTargets>,
    /// Whether falling off the end of the sequence is the same as `continue`.
    pub falls_to_continue: bool,
    pub depth: usize,
}

impl Context {
    pub fn method(list: &[Insn]) -> Self {
        let end = list
            .iter()
            .map(Insn::max_offset)
            .max()
            .map_or(0, |max| max.saturating_add(1));
        Self {
            from: 0,
            fallthrough: Landing::new(end, Offset::MAX),
            break_: None,
            continue_: None,
            falls_to_continue: false,
            depth: 0,
        }
    }

    /// Context for a sequence extracted from `list[start..end]` (before extraction) that continues
    /// with whatever follows `list[end - 1]`.
    pub fn for_range(&self, list: &[Insn], start: usize, end: usize) -> Self {
        let from = Landing::at(list, start, self.from, self.fallthrough.to).from;
        let fallthrough = Landing::at(list, end, self.from, self.fallthrough.to);
        Self {
            from,
            fallthrough,
            falls_to_continue: self.falls_to_continue && end == list.len(),
            depth: self.depth + 1,
            ..*self
        }
    }

    pub fn for_loop_body(&self, from: Offset, break_: Landing, continue_: ContinueTargets) -> Self {
        Self {
            from,
            fallthrough: continue_.tail,
            break_: Some(break_),
            continue_: Some(continue_),
            falls_to_continue: true,
            depth: self.depth + 1,
        }
    }

    pub fn for_switch_case(&self, from: Offset, fallthrough: Landing, break_: Landing) -> Self {
        Self {
            from,
            fallthrough,
            break_: Some(break_),
            falls_to_continue: false,
            depth: self.depth + 1,
            ..*self
        }
    }

    pub fn is_continue(&self, target: Offset) -> bool {
        self.continue_.is_some_and(|continue_| continue_.contains(target))
    }

    pub fn is_break(&self, target: Offset) -> bool {
        self.break_.is_some_and(|break_| break_.contains(target))
    }

    /// Fails if nesting is deeper than `limit`.
    pub fn check_depth(&self, limit: usize) -> Result<(), StructuringError> {
        if self.depth > limit {
            return Err(StructuringError::NestingTooDeep { limit });
        }
        Ok(())
    }
}
