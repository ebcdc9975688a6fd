use super::{AggregatedException, ExceptionKind};
use crate::insn::{Insn, InsnKind, Slot, landing_index};

// Signatures, by the window around the catch-any handler `H` (exception stored to `t`):
//
// - `Catch`: no catch-any handler.
// - `Finally`, `FinallyThrow`, `CatchFinally`: `H: t = exc; F...; throw t`, with `F` copied before
//   every exit of the `try` and `catch` bodies. The `Throw` variant has no trailing `goto` after the
//   `try` body.
// - `Synchronized`: `H: t = exc; monitorexit m; throw t`, with `monitorenter m` before the `try`.
// - `JsrFinally`, `JsrFinallyThrow`, `JsrCatchFinally`: `H: t = exc; jsr S; throw t` and
//   `S: r = retaddr; F...; ret r` after the handler.
// - `Jikes`: as above, but `S` precedes `H`.
// - `JsrSynchronized`: `H: t = exc; jsr S; throw t` with `S: r = retaddr; monitorexit m; ret r`.

/// Classifies a record by inspecting the instructions around its handlers.
pub fn classify(record: &AggregatedException, list: &[Insn]) -> ExceptionKind {
    if record
        .catches
        .iter()
        .any(|catch| Some(catch.handler) == record.finally)
    {
        return ExceptionKind::Undefined;
    }
    for catch in &record.catches {
        let start = list.get(landing_index(list, catch.handler));
        if !start.is_some_and(|insn| insn.exception_store().is_some() || insn.is_exception_pop()) {
            return ExceptionKind::Undefined;
        }
    }

    let Some(finally) = record.finally else {
        return if record.catches.is_empty() {
            ExceptionKind::Undefined
        } else {
            ExceptionKind::Catch
        };
    };

    let handler = landing_index(list, finally);
    let Some(exception) = list.get(handler).and_then(Insn::exception_store) else {
        return ExceptionKind::Undefined;
    };
    let has_catches = !record.catches.is_empty();
    let falls_out = try_body_falls_out(record, list);

    match list.get(handler + 1).map(|insn| &insn.kind) {
        Some(InsnKind::Jsr { .. }) => {
            if !list
                .get(handler + 2)
                .is_some_and(|insn| insn.is_rethrow_of(exception))
            {
                return ExceptionKind::Undefined;
            }
            let Some(subroutine) = list[handler + 1]
                .jump_target()
                .and_then(|target| Subroutine::find(list, landing_index(list, target)))
            else {
                return ExceptionKind::Undefined;
            };
            if let Some(monitor) = record.monitor {
                return if subroutine.releases(list, monitor) {
                    ExceptionKind::JsrSynchronized
                } else {
                    ExceptionKind::Undefined
                };
            }
            if subroutine.start < handler {
                ExceptionKind::Jikes
            } else if has_catches {
                ExceptionKind::JsrCatchFinally
            } else if falls_out {
                ExceptionKind::JsrFinally
            } else {
                ExceptionKind::JsrFinallyThrow
            }
        }
        Some(_) => {
            if rethrow_index(list, handler, exception).is_none() {
                return ExceptionKind::Undefined;
            }
            if let Some(monitor) = record.monitor {
                return if list[handler + 1].monitor_exit_slot() == Some(monitor) {
                    ExceptionKind::Synchronized
                } else {
                    ExceptionKind::Undefined
                };
            }
            if has_catches {
                ExceptionKind::CatchFinally
            } else if falls_out {
                ExceptionKind::Finally
            } else {
                ExceptionKind::FinallyThrow
            }
        }
        None => ExceptionKind::Undefined,
    }
}

/// Whether the `try` body ends with a jump over the handlers, i.e. can complete normally.
fn try_body_falls_out(record: &AggregatedException, list: &[Insn]) -> bool {
    let Some(&first_handler) = record.handlers().first() else {
        return false;
    };
    landing_index(list, first_handler)
        .checked_sub(1)
        .and_then(|index| list.get(index))
        .is_some_and(Insn::is_forward_jump)
}

/// The index of the first `throw t` at or after `list[handler]`.
pub fn rethrow_index(list: &[Insn], handler: usize, exception: Slot) -> Option<usize> {
    (handler..list.len()).find(|&index| list[index].is_rethrow_of(exception))
}

/// A `jsr` subroutine: `list[start]` stores the return address to `slot`, `list[ret]` is `ret slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subroutine {
    pub start: usize,
    pub ret: usize,
    pub slot: Slot,
}

impl Subroutine {
    pub fn find(list: &[Insn], start: usize) -> Option<Self> {
        let InsnKind::Store { slot, value } = &list.get(start)?.kind else {
            return None;
        };
        if value.kind != InsnKind::ReturnAddress {
            return None;
        }
        let ret = (start + 1..list.len())
            .find(|&index| list[index].kind == InsnKind::Ret { slot: *slot })?;
        Some(Self {
            start,
            ret,
            slot: *slot,
        })
    }

    /// The statements between the return address store and `ret`.
    pub fn body<'a>(&self, list: &'a [Insn]) -> &'a [Insn] {
        &list[self.start + 1..self.ret]
    }

    fn releases(&self, list: &[Insn], monitor: Slot) -> bool {
        matches!(self.body(list), [exit] if exit.monitor_exit_slot() == Some(monitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::CatchEntry;
    use crate::insn::build::*;
    use crate::insn::{CpIndex, Offset};

    fn record(
        try_from: Offset,
        try_to: Offset,
        catches: &[(Offset, CpIndex)],
        finally: Option<Offset>,
    ) -> AggregatedException {
        let mut record = AggregatedException {
            try_from,
            try_to,
            catches: catches
                .iter()
                .map(|&(handler, ty)| CatchEntry {
                    types: vec![ty],
                    handler,
                    end: handler,
                })
                .collect(),
            finally,
            nbr_finally: finally.map_or(0, |_| 1),
            max_offset: 0,
            monitor: None,
            after_offset: 0,
            kind: ExceptionKind::Undefined,
        };
        record.update_max_offset();
        record
    }

    #[test]
    fn inline_finally() {
        let list = [
            call(3, 1, 1),
            call(6, 2, 2),
            goto(9, 2, 20),
            store(12, 2, 1, exception(12)),
            call(15, 2, 2),
            throw(17, 2, load(16, 1)),
            return_(20, 3),
        ];
        assert_eq!(
            classify(&record(0, 4, &[], Some(12)), &list),
            ExceptionKind::Finally
        );
    }

    #[test]
    fn catch_only_and_malformed_catch() {
        let list = [
            call(3, 1, 1),
            goto(6, 1, 14),
            store(9, 2, 1, exception(9)),
            call(12, 2, 2),
            return_(14, 3),
        ];
        assert_eq!(
            classify(&record(0, 4, &[(9, 5)], None), &list),
            ExceptionKind::Catch
        );
        // The handler does not start by consuming the exception.
        assert_eq!(
            classify(&record(0, 4, &[(12, 5)], None), &list),
            ExceptionKind::Undefined
        );
    }

    #[test]
    fn jsr_finally_placement() {
        let after = [
            call(3, 1, 1),
            jsr(4, 1, 20),
            goto(7, 1, 26),
            store(10, 2, 1, exception(10)),
            jsr(11, 2, 20),
            throw(15, 2, load(14, 1)),
            store(20, 2, 2, Insn::new(20, 0, InsnKind::ReturnAddress)),
            call(23, 2, 2),
            ret(25, 2, 2),
            return_(26, 3),
        ];
        assert_eq!(
            classify(&record(0, 4, &[], Some(10)), &after),
            ExceptionKind::JsrFinally
        );
        assert_eq!(
            Subroutine::find(&after, 6),
            Some(Subroutine {
                start: 6,
                ret: 8,
                slot: 2
            })
        );

        let before = [
            call(3, 1, 1),
            jsr(4, 1, 10),
            goto(7, 1, 26),
            store(10, 2, 2, Insn::new(10, 0, InsnKind::ReturnAddress)),
            call(13, 2, 2),
            ret(15, 2, 2),
            store(20, 2, 1, exception(20)),
            jsr(21, 2, 10),
            throw(25, 2, load(24, 1)),
            return_(26, 3),
        ];
        assert_eq!(
            classify(&record(0, 4, &[], Some(20)), &before),
            ExceptionKind::Jikes
        );
    }
}
