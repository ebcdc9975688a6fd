mod finally;
mod synchronized;

pub use self::synchronized::structure_bare_monitors;
use self::finally::{ExitCopy, FinallyCleanup, remove_trailing_goto};
use self::synchronized::monitor_expression;
use crate::StructuringError;
use crate::context::Landing;
use crate::exceptions::{AggregatedException, ExceptionKind, Subroutine};
use crate::insn::{Catch, Insn, InsnKind, Offset, TryBlock, landing_index};
use crate::structurer::Structurer;
use log::debug;

/// Replaces every classified `try` construct in the flat method body with a `Try` or
/// `Synchronized` node. Inner constructs are extracted first and end up as single statements inside
/// the outer ones.
pub fn extract_exceptions(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    records: &[AggregatedException],
) -> Result<(), StructuringError> {
    // Read off the flat body, before any handler is extracted.
    let copies: Vec<Option<ExitCopy>> = records
        .iter()
        .map(|record| ExitCopy::of(record, list))
        .collect();
    for (index, record) in records.iter().enumerate().rev() {
        if record.kind == ExceptionKind::Undefined {
            continue;
        }
        // Records are sorted outer first.
        let enclosing = records
            .iter()
            .zip(&copies)
            .enumerate()
            .filter(|&(other, (outer, _))| other != index && encloses(outer, record))
            .filter_map(|(_, (_, copy))| copy.clone())
            .collect();
        extract_record(structurer, list, record, enclosing)?;
    }
    Ok(())
}

// Whether exits from `inner` leave `outer` too, i.e. `inner` lies in its `try` or a `catch` body.
fn encloses(outer: &AggregatedException, inner: &AggregatedException) -> bool {
    outer.try_from <= inner.try_from && inner.after_offset <= outer.max_offset
}

struct Parts {
    body: Vec<Insn>,
    catches: Vec<(Offset, Vec<Insn>)>,
    handler: Vec<Insn>,
    subroutine: Vec<Insn>,
}

fn extract_record(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    record: &AggregatedException,
    enclosing: Vec<ExitCopy>,
) -> Result<(), StructuringError> {
    let mut start = landing_index(list, record.try_from);
    let end = landing_index(list, record.after_offset);
    let handlers = record.handlers();
    if handlers.iter().any(|&handler| landing_index(list, handler) >= end) || start >= end {
        return Err(StructuringError::shape(
            record.try_from,
            "handlers between the try block and its end",
        ));
    }
    let after = Landing::at(list, end, 0, Offset::MAX);

    // `monitorenter` and the store of the monitor, if it was not stored with `dup`.
    let mut monitor_prefix = Vec::new();
    if let Some(slot) = record.monitor {
        let enter = start
            .checked_sub(1)
            .ok_or(StructuringError::shape(record.try_from, "monitorenter"))?;
        start = enter;
        if let InsnKind::MonitorEnter { object } = &list[enter].kind {
            if object.is_load_of(slot) && enter > 0 && list[enter - 1].written_slot() == Some(slot)
            {
                start -= 1;
            }
        }
        monitor_prefix = list.drain(start..enter + 1).collect();
    }
    let end = end - monitor_prefix.len();

    let region: Vec<Insn> = list.drain(start..end).collect();
    let mut parts = split_region(region, record)?;

    let mut cleanup = FinallyCleanup::new(record, after, enclosing);
    let finally = match record.finally {
        Some(_) => Some(cleanup.take_finally_body(structurer, &mut parts.handler, &mut parts.subroutine)?),
        None => None,
    };

    let mut catches = Vec::with_capacity(parts.catches.len());
    for (handler, mut body) in parts.catches {
        let head = body
            .first()
            .ok_or(StructuringError::shape(handler, "exception store"))?;
        let variable = match head.exception_store() {
            Some(slot) => {
                structurer.variables.mark_declared(slot, head.offset);
                Some(slot)
            }
            None if head.is_exception_pop() => None,
            None => return Err(StructuringError::shape(head.offset, "exception store")),
        };
        let store = body.remove(0);
        let removed_goto = remove_trailing_goto(&mut body, after);
        cleanup.strip_copies(structurer, &mut body, removed_goto);
        let types = record
            .catches
            .iter()
            .find(|catch| catch.handler == handler)
            .map(|catch| catch.types.clone())
            .unwrap_or_default();
        catches.push((store.offset, store.line, Catch {
            types,
            variable,
            handler,
            body,
        }));
    }

    let removed_goto = remove_trailing_goto(&mut parts.body, after);
    cleanup.strip_copies(structurer, &mut parts.body, removed_goto);

    let node = if record.kind.is_synchronized() {
        let mut prefix = monitor_prefix.into_iter();
        let enter = prefix
            .next_back()
            .ok_or(StructuringError::shape(record.try_from, "monitorenter"))?;
        let stored = prefix.next();
        let monitor = monitor_expression(&enter, stored)
            .ok_or(StructuringError::shape(enter.offset, "monitorenter on a local"))?;
        if let Some(slot) = record.monitor {
            structurer.variables.remove(slot, enter.offset);
        }
        enter.with_kind(InsnKind::Synchronized {
            monitor: Box::new(monitor),
            body: parts.body,
        })
    } else {
        let (offset, line) = match (catches.first(), cleanup.handler_store()) {
            (Some(&(offset, line, _)), Some((handler_offset, _))) if offset < handler_offset => {
                (offset, line)
            }
            (_, Some(store)) => store,
            (Some(&(offset, line, _)), None) => (offset, line),
            (None, None) => return Err(StructuringError::shape(record.try_from, "handler")),
        };
        Insn::new(
            offset,
            line,
            InsnKind::Try(Box::new(TryBlock {
                kind: record.kind,
                body: parts.body,
                catches: catches.into_iter().map(|(_, _, catch)| catch).collect(),
                finally,
            })),
        )
    };

    debug!(
        "extracted {} block {}..{} as statement at {}",
        record.kind, record.try_from, record.after_offset, node.offset
    );
    list.insert(start, node);
    Ok(())
}

// Splits the drained region by handler offsets, after taking out a `jsr` subroutine that may sit
// anywhere in it.
fn split_region(mut region: Vec<Insn>, record: &AggregatedException) -> Result<Parts, StructuringError> {
    let mut subroutine = Vec::new();
    if record.kind.uses_subroutine() {
        let finally = record.finally.unwrap_or(record.max_offset);
        let handler = landing_index(&region, finally);
        let target = region
            .get(handler + 1)
            .and_then(Insn::jump_target)
            .ok_or(StructuringError::shape(finally, "jsr to the finally subroutine"))?;
        let start = landing_index(&region, target);
        let found = Subroutine::find(&region, start)
            .ok_or(StructuringError::shape(target, "finally subroutine"))?;
        subroutine = region.drain(found.start..found.ret + 1).collect();
    }

    let handlers = record.handlers();
    let Some(&first_handler) = handlers.first() else {
        return Err(StructuringError::shape(record.try_from, "handler"));
    };
    let mut rest = region.into_iter().peekable();
    let body: Vec<Insn> = core::iter::from_fn(|| rest.next_if(|insn| insn.offset < first_handler)).collect();
    let mut catches = Vec::new();
    let mut handler = Vec::new();
    for (i, &start) in handlers.iter().enumerate() {
        let next = handlers.get(i + 1).copied().unwrap_or(Offset::MAX);
        let part: Vec<Insn> = core::iter::from_fn(|| rest.next_if(|insn| insn.offset < next)).collect();
        if part.first().is_none_or(|insn| insn.offset < start) {
            return Err(StructuringError::shape(start, "handler code"));
        }
        if Some(start) == record.finally {
            handler = part;
        } else {
            catches.push((start, part));
        }
    }
    Ok(Parts {
        body,
        catches,
        handler,
        subroutine,
    })
}
