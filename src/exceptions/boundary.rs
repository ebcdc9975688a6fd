use super::classify::{Subroutine, rethrow_index};
use super::{AggregatedException, ExceptionKind};
use crate::insn::{Insn, InsnKind, Offset, UNKNOWN_LINE, landing_index};
use crate::utils::jump_targets;
use log::debug;

/// An estimate of where a construct ends. Narrowing only ever moves it down, and never to or below
/// `floor`, the start of the construct's last handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boundary {
    floor: Offset,
    after: Offset,
}

impl Boundary {
    pub fn new(floor: Offset, after: Offset) -> Self {
        Self { floor, after }
    }

    pub fn after(&self) -> Offset {
        self.after
    }

    /// Tightens the bound to `candidate` if it lies strictly between the floor and the current
    /// bound. Returns whether it did.
    pub fn narrow(&mut self, candidate: Offset) -> bool {
        if self.floor < candidate && candidate < self.after {
            self.after = candidate;
            true
        } else {
            false
        }
    }
}

/// Computes `after_offset` of every record, and the end of each of its `catch` clauses.
///
/// Records whose catch-any handler fixes the layout get exact ends. Catch-only records start from
/// the trailing jumps of their bodies and are narrowed by branch instructions, line numbers, switch
/// instructions and enclosing constructs, in this order.
pub fn resolve_boundaries(records: &mut [AggregatedException], list: &[Insn]) {
    let list_end = list
        .last()
        .map_or(0, |insn| insn.max_offset().saturating_add(1));

    for record in records.iter_mut() {
        record.after_offset = if record.kind.has_exact_end() {
            exact_end(record, list).unwrap_or(list_end)
        } else {
            list_end
        };
    }

    for i in 0..records.len() {
        if records[i].kind != ExceptionKind::Catch {
            continue;
        }
        let record = &records[i];
        let mut boundary = Boundary::new(record.max_offset, estimate_end(record, list, list_end));
        narrow_by_jumps(&mut boundary, record, list);
        narrow_by_lines(&mut boundary, record, list);
        narrow_by_switches(&mut boundary, record, list);
        for (j, other) in records.iter().enumerate() {
            if j != i && encloses(other, record) {
                narrow_by_enclosing(&mut boundary, other);
            }
        }
        debug!(
            "catch block {}..{} ends at {}",
            record.try_from,
            record.try_to,
            boundary.after()
        );
        records[i].after_offset = boundary.after();
    }

    for record in records.iter_mut() {
        let handlers = record.handlers();
        for catch in &mut record.catches {
            catch.end = handlers
                .iter()
                .copied()
                .find(|&handler| handler > catch.handler)
                .unwrap_or(record.after_offset);
        }
    }
}

fn exact_end(record: &AggregatedException, list: &[Insn]) -> Option<Offset> {
    let handler = landing_index(list, record.finally?);
    let exception = list.get(handler)?.exception_store()?;
    let end = if record.kind.uses_subroutine() {
        let subroutine = list
            .get(handler + 1)?
            .jump_target()
            .and_then(|target| Subroutine::find(list, landing_index(list, target)))?;
        subroutine.ret.max(handler + 2)
    } else {
        rethrow_index(list, handler, exception)?
    };
    Some(list[end].offset.saturating_add(1))
}

// The `try` body and every `catch` body but the last leave through a `goto` to the end of the
// construct. If all of them return or throw, the last `catch` ends at its first exit that no
// earlier forward jump skips over.
fn estimate_end(record: &AggregatedException, list: &[Insn], list_end: Offset) -> Offset {
    let trailing_jumps = record
        .handlers()
        .into_iter()
        .filter_map(|handler| landing_index(list, handler).checked_sub(1))
        .filter_map(|index| list.get(index))
        .filter(|insn| insn.is_goto())
        .filter_map(Insn::jump_target)
        .filter(|&target| target > record.max_offset)
        .min();
    if let Some(target) = trailing_jumps {
        return target;
    }

    let mut reach = record.max_offset;
    for insn in &list[landing_index(list, record.max_offset)..] {
        for (source, target) in jump_targets(core::slice::from_ref(insn)) {
            if target > source {
                reach = reach.max(target);
            }
        }
        if insn.is_divergent() && insn.offset >= reach {
            // A back-edge to a loop head before the `try` belongs to the loop around it.
            if insn.is_goto() && insn.jump_target().is_some_and(|target| target < record.try_from) {
                return insn.min_offset();
            }
            return insn.offset.saturating_add(1);
        }
    }
    list_end
}

// Jumps into the region from before the `try`, and back-edges from after it, land outside the
// construct.
fn narrow_by_jumps(boundary: &mut Boundary, record: &AggregatedException, list: &[Insn]) {
    for (source, target) in jump_targets(list) {
        let from_before = source < record.try_from && target > source;
        let from_after = source >= boundary.after() && target <= source;
        if from_before || from_after {
            boundary.narrow(target);
        }
    }
}

// Heuristic: a statement of the last `catch` body whose line precedes the line of the handler
// itself is assumed to follow the construct.
fn narrow_by_lines(boundary: &mut Boundary, record: &AggregatedException, list: &[Insn]) {
    let start = landing_index(list, record.max_offset);
    let Some(handler_line) = list.get(start).map(|insn| insn.line) else {
        return;
    };
    if handler_line == UNKNOWN_LINE {
        return;
    }
    let end = landing_index(list, boundary.after());
    if let Some(insn) = list[start..end]
        .iter()
        .find(|insn| insn.line != UNKNOWN_LINE && insn.line < handler_line)
    {
        boundary.narrow(insn.min_offset());
    }
}

// A case of a switch preceding the `try` cannot start inside the construct.
fn narrow_by_switches(boundary: &mut Boundary, record: &AggregatedException, list: &[Insn]) {
    let end = landing_index(list, record.try_from);
    for insn in &list[..end] {
        insn.visit(&mut |insn| {
            if let InsnKind::Switch(dispatch) = &insn.kind {
                let deltas = dispatch.cases.iter().map(|(_, delta)| *delta);
                for delta in deltas.chain([dispatch.default]) {
                    if let Some(target) = insn.offset.checked_add_signed(delta) {
                        boundary.narrow(target);
                    }
                }
            }
        });
    }
}

fn encloses(outer: &AggregatedException, inner: &AggregatedException) -> bool {
    outer.kind != ExceptionKind::Undefined
        && outer.try_from <= inner.try_from
        && inner.max_offset < outer.after_offset
        && (outer.try_from, outer.max_offset) != (inner.try_from, inner.max_offset)
}

fn narrow_by_enclosing(boundary: &mut Boundary, outer: &AggregatedException) {
    boundary.narrow(outer.try_to);
    for handler in outer.handlers() {
        boundary.narrow(handler);
    }
    boundary.narrow(outer.after_offset);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::CatchEntry;
    use crate::insn::CmpOp;
    use crate::insn::build::*;
    use proptest::prelude::*;

    fn catch_record(try_from: Offset, try_to: Offset, handlers: &[Offset]) -> AggregatedException {
        let mut record = AggregatedException {
            try_from,
            try_to,
            catches: handlers
                .iter()
                .map(|&handler| CatchEntry {
                    types: vec![1],
                    handler,
                    end: handler,
                })
                .collect(),
            finally: None,
            nbr_finally: 0,
            max_offset: 0,
            monitor: None,
            after_offset: 0,
            kind: ExceptionKind::Catch,
        };
        record.update_max_offset();
        record
    }

    proptest! {
        #[test]
        fn narrowing_never_widens(
            floor in 0u32..50,
            start in 0u32..100,
            candidates in proptest::collection::vec(0u32..120, 0..16),
        ) {
            let mut boundary = Boundary::new(floor, start);
            for candidate in candidates {
                let before = boundary.after();
                boundary.narrow(candidate);
                prop_assert!(boundary.after() <= before);
                prop_assert!(boundary.after() == start || boundary.after() > floor);
            }
        }
    }

    #[test]
    fn trailing_goto_bounds_catch() {
        // try { A } catch (E e) { B } C
        let list = [
            call(3, 1, 1),
            goto(6, 1, 15),
            store(9, 2, 1, exception(9)),
            call(12, 3, 2),
            call(15, 4, 3),
            return_(16, 4),
        ];
        let mut records = [catch_record(0, 6, &[9])];
        resolve_boundaries(&mut records, &list);
        assert_eq!(records[0].after_offset, 15);
        assert_eq!(records[0].catches[0].end, 15);
    }

    #[test]
    fn returning_bodies_end_at_first_exit() {
        // try { return; } catch (E e) { if (c) B; return; }
        let list = [
            return_(3, 1),
            store(4, 2, 1, exception(4)),
            branch(7, 3, zero(CmpOp::Eq, load(6, 2)), 13),
            call(10, 3, 1),
            return_(13, 4),
            call(16, 5, 2),
            return_(17, 5),
        ];
        let mut records = [catch_record(0, 3, &[4])];
        resolve_boundaries(&mut records, &list);
        assert_eq!(records[0].after_offset, 14);
    }

    #[test]
    fn jump_from_before_narrows() {
        // The goto after the catch overshoots; a branch before the try lands closer.
        let list = [
            branch(2, 1, zero(CmpOp::Eq, load(1, 2)), 12),
            call(5, 2, 1),
            goto(6, 2, 18),
            store(9, 3, 1, exception(9)),
            call(12, 4, 2),
            call(18, 5, 3),
        ];
        let mut records = [catch_record(3, 6, &[9])];
        resolve_boundaries(&mut records, &list);
        assert_eq!(records[0].after_offset, 12);
    }

    #[test]
    fn loop_back_edge_after_catch_stays_outside() {
        // while (c) { try { A } catch (E e) { B } }
        let list = [
            branch(1, 1, zero(CmpOp::Eq, load(0, 1)), 20),
            call(4, 2, 1),
            goto(7, 2, 0),
            store(10, 3, 2, exception(10)),
            call(13, 4, 2),
            goto(16, 4, 0),
            return_(20, 5),
        ];
        let mut records = [catch_record(2, 7, &[10])];
        resolve_boundaries(&mut records, &list);
        assert_eq!(records[0].after_offset, 16);
        assert_eq!(records[0].catches[0].end, 16);
    }
}
