use super::classify::Subroutine;
use super::{AggregatedException, CatchEntry, ExceptionKind, ExceptionTableEntry, sort_records};
use crate::insn::{CpIndex, Insn, InsnKind, Offset, Slot, landing_index};
use crate::utils::{hull, merge_overlapping_ranges};
use core::ops::Range;
use rustc_hash::FxHashMap;

struct HandlerGroup {
    handler: Offset,
    ranges: Vec<Range<Offset>>,
    types: Vec<CpIndex>,
    nbr_finally: usize,
}

/// Groups exception table rows into logical `try` constructs. The result is sorted with
/// [`sort_records`]; kinds are left `Undefined` for the classifier to fill in.
pub fn aggregate(entries: &[ExceptionTableEntry], list: &[Insn]) -> Vec<AggregatedException> {
    let groups = group_by_handler(entries);
    let handlers: Vec<Offset> = groups.iter().map(|group| group.handler).collect();

    let mut records: Vec<AggregatedException> = groups
        .into_iter()
        .filter_map(|group| {
            let range = if group.types.is_empty() {
                finally_try_range(&group, &handlers)
            } else {
                hull(&group.ranges)
            }?;
            Some(record_for_group(group, range, list))
        })
        .collect();

    records = merge_same_range(records);
    sort_records(&mut records);
    records
}

fn group_by_handler(entries: &[ExceptionTableEntry]) -> Vec<HandlerGroup> {
    let mut groups: FxHashMap<Offset, HandlerGroup> = FxHashMap::default();
    for entry in entries {
        let group = groups
            .entry(entry.handler_pc)
            .or_insert_with(|| HandlerGroup {
                handler: entry.handler_pc,
                ranges: Vec::new(),
                types: Vec::new(),
                nbr_finally: 0,
            });
        group.ranges.push(entry.start_pc..entry.end_pc);
        if entry.catch_type == 0 {
            group.nbr_finally += 1;
        } else if !group.types.contains(&entry.catch_type) {
            group.types.push(entry.catch_type);
        }
    }

    let mut groups: Vec<HandlerGroup> = groups.into_values().collect();
    groups.sort_by_key(|group| group.handler);
    for group in &mut groups {
        group.ranges.sort_by_key(|range| range.start);
        merge_overlapping_ranges(&mut group.ranges);
    }
    groups
}

// Catch-any rows cover the `try` body, every `catch` body, and often parts of the handler itself.
// Only the rows before the first sibling `catch` handler belong to the `try` body. Handlers nested
// strictly inside one of the rows belong to inner constructs and do not count.
fn finally_try_range(group: &HandlerGroup, handlers: &[Offset]) -> Option<Range<Offset>> {
    let first = group.ranges.first()?;
    let earliest = handlers
        .iter()
        .copied()
        .filter(|&handler| first.start < handler && handler < group.handler)
        .filter(|&handler| {
            !group
                .ranges
                .iter()
                .any(|range| range.start < handler && handler < range.end)
        })
        .min()
        .unwrap_or(group.handler);
    hull(group.ranges.iter().filter(|range| range.end <= earliest)).or(Some(first.clone()))
}

fn record_for_group(
    group: HandlerGroup,
    range: Range<Offset>,
    list: &[Insn],
) -> AggregatedException {
    let mut catches = Vec::new();
    let mut finally = None;
    if !group.types.is_empty() {
        catches.push(CatchEntry {
            types: group.types,
            handler: group.handler,
            end: group.handler,
        });
    }
    // A handler with both typed and catch-any rows keeps both; the classifier rejects it.
    if group.nbr_finally > 0 {
        finally = Some(group.handler);
    }
    let monitor = finally.and_then(|handler| synchronized_monitor(list, range.start, handler));
    AggregatedException {
        try_from: range.start,
        try_to: range.end,
        catches,
        finally,
        nbr_finally: group.nbr_finally,
        max_offset: group.handler,
        monitor,
        after_offset: group.handler,
        kind: ExceptionKind::Undefined,
    }
}

/// If the statement before `try_from` acquires a monitor held in a local, and the handler releases
/// that local before rethrowing, either directly or in a `jsr` subroutine, returns the local.
pub fn synchronized_monitor(list: &[Insn], try_from: Offset, handler: Offset) -> Option<Slot> {
    let index = landing_index(list, try_from);
    let slot = monitor_enter_slot(list, index.checked_sub(1)?)?;
    let handler_index = landing_index(list, handler);
    list.get(handler_index)?.exception_store()?;
    for insn in &list[handler_index + 1..] {
        if insn.monitor_exit_slot() == Some(slot) {
            return Some(slot);
        }
        if let InsnKind::Jsr { .. } = insn.kind {
            let subroutine = Subroutine::find(list, landing_index(list, insn.jump_target()?))?;
            return subroutine
                .body(list)
                .iter()
                .any(|insn| insn.monitor_exit_slot() == Some(slot))
                .then_some(slot);
        }
        if insn.is_divergent() {
            break;
        }
    }
    None
}

/// The local holding the monitor of the `monitorenter` at `list[index]`, either stored with `dup`
/// or loaded from a store right before.
pub fn monitor_enter_slot(list: &[Insn], index: usize) -> Option<Slot> {
    let InsnKind::MonitorEnter { object } = &list.get(index)?.kind else {
        return None;
    };
    match &object.kind {
        InsnKind::DupStore { slot, .. } => Some(*slot),
        InsnKind::Load { slot } => Some(*slot),
        _ => None,
    }
}

fn merge_same_range(records: Vec<AggregatedException>) -> Vec<AggregatedException> {
    let mut out: Vec<AggregatedException> = Vec::with_capacity(records.len());
    for record in records {
        let target = out.iter_mut().find(|other| {
            other.try_from == record.try_from
                && other.try_to == record.try_to
                && !other.is_synchronized()
                && !record.is_synchronized()
                && !(other.finally.is_some() && record.finally.is_some())
        });
        match target {
            Some(other) => {
                other.catches.extend(record.catches);
                other.catches.sort_by_key(|catch| catch.handler);
                other.finally = other.finally.or(record.finally);
                other.nbr_finally += record.nbr_finally;
                other.update_max_offset();
            }
            None => out.push(record),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::{
        call, exception, goto, jsr, load, monitor_enter, monitor_exit, ret, store, throw,
    };

    fn entry(start_pc: Offset, end_pc: Offset, handler_pc: Offset, catch_type: CpIndex) -> ExceptionTableEntry {
        ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        }
    }

    #[test]
    fn try_catch_finally_is_one_record() {
        // try { A } catch (E) { B } finally { F }
        let entries = [
            entry(0, 4, 10, 7),
            entry(0, 4, 20, 0),
            entry(10, 14, 20, 0),
            entry(20, 24, 20, 0),
        ];
        let records = aggregate(&entries, &[]);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!((record.try_from, record.try_to), (0, 4));
        assert_eq!(record.catches.len(), 1);
        assert_eq!(record.catches[0].types, [7]);
        assert_eq!(record.finally, Some(20));
        assert_eq!(record.nbr_finally, 3);
        assert_eq!(record.max_offset, 20);
    }

    #[test]
    fn duplicate_types_are_suppressed() {
        let entries = [entry(0, 4, 10, 7), entry(6, 8, 10, 7), entry(0, 4, 10, 9)];
        let records = aggregate(&entries, &[]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].catches[0].types, [7, 9]);
        assert_eq!((records[0].try_from, records[0].try_to), (0, 8));
    }

    #[test]
    fn split_finally_ranges_are_joined() {
        // try { if (c) return; A } finally { F }, split around the inlined copy before `return`.
        let entries = [entry(0, 5, 30, 0), entry(12, 20, 30, 0), entry(30, 34, 30, 0)];
        let records = aggregate(&entries, &[]);
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].try_from, records[0].try_to), (0, 20));
        assert_eq!(records[0].nbr_finally, 3);
    }

    #[test]
    fn nested_handlers_do_not_cut_outer_finally() {
        // try { try { A } catch (E) { B } } finally { F }
        let entries = [entry(2, 6, 10, 7), entry(2, 16, 30, 0), entry(30, 34, 30, 0)];
        let records = aggregate(&entries, &[]);
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].try_from, records[0].try_to), (2, 16));
        assert_eq!(records[0].finally, Some(30));
        assert_eq!((records[1].try_from, records[1].try_to), (2, 6));
    }

    #[test]
    fn detects_monitor_release() {
        let list = [
            monitor_enter(
                3,
                1,
                crate::insn::Insn::new(
                    2,
                    1,
                    InsnKind::DupStore {
                        slot: 2,
                        value: Box::new(load(0, 0)),
                    },
                ),
            ),
            call(6, 2, 1),
            monitor_exit(9, 2, load(8, 2)),
            store(14, 2, 3, exception(14)),
            monitor_exit(17, 2, load(16, 2)),
            throw(19, 2, load(18, 3)),
        ];
        let entries = [entry(4, 10, 14, 0), entry(14, 18, 14, 0)];
        let records = aggregate(&entries, &list);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].monitor, Some(2));
    }

    #[test]
    fn detects_monitor_release_in_subroutine() {
        let list = [
            store(2, 1, 2, load(1, 1)),
            monitor_enter(4, 1, load(3, 2)),
            call(7, 2, 1),
            jsr(8, 2, 20),
            goto(11, 2, 26),
            store(14, 3, 3, exception(14)),
            jsr(15, 3, 20),
            throw(19, 3, load(18, 3)),
            store(20, 3, 4, crate::insn::Insn::new(20, 0, InsnKind::ReturnAddress)),
            monitor_exit(23, 3, load(22, 2)),
            ret(25, 3, 4),
        ];
        let records = aggregate(&[entry(5, 9, 14, 0)], &list);
        assert_eq!(records[0].monitor, Some(2));
    }
}
