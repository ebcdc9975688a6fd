mod aggregate;
mod boundary;
mod classify;

pub use self::aggregate::{aggregate, monitor_enter_slot};
pub use self::boundary::resolve_boundaries;
pub use self::classify::{Subroutine, classify, rethrow_index};
use crate::insn::{CpIndex, Insn, Offset, Slot};
use displaydoc::Display;
use log::{debug, warn};

/// One row of the `Code` attribute's exception table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: Offset,
    pub end_pc: Offset,
    pub handler_pc: Offset,
    /// `0` for catch-any entries, which is how `finally` and `synchronized` are compiled.
    pub catch_type: CpIndex,
}

/// The compiler idiom a `try` construct was lowered with.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// unclassified
    Undefined,
    /// catch
    Catch,
    /// inline finally
    Finally,
    /// inline finally, try body never falls out
    FinallyThrow,
    /// catch with inline finally
    CatchFinally,
    /// synchronized
    Synchronized,
    /// jsr finally
    JsrFinally,
    /// jsr finally, try body never falls out
    JsrFinallyThrow,
    /// catch with jsr finally
    JsrCatchFinally,
    /// jsr synchronized
    JsrSynchronized,
    /// jsr finally, subroutine before handler
    Jikes,
}

impl ExceptionKind {
    pub fn uses_subroutine(self) -> bool {
        matches!(
            self,
            Self::JsrFinally
                | Self::JsrFinallyThrow
                | Self::JsrCatchFinally
                | Self::JsrSynchronized
                | Self::Jikes
        )
    }

    pub fn is_synchronized(self) -> bool {
        matches!(self, Self::Synchronized | Self::JsrSynchronized)
    }

    /// Whether the end of the construct is known exactly from the catch-any handler's layout, as
    /// opposed to being estimated from jumps.
    pub fn has_exact_end(self) -> bool {
        !matches!(self, Self::Undefined | Self::Catch)
    }
}

/// A `catch` clause of an aggregated record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatchEntry {
    /// Several types for multi-catch or for duplicated table rows.
    pub types: Vec<CpIndex>,
    pub handler: Offset,
    /// Start of whatever follows the clause: the next handler or the end of the construct.
    pub end: Offset,
}

/// One logical `try` construct after merging the table rows the compiler emitted for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatedException {
    pub try_from: Offset,
    pub try_to: Offset,
    pub catches: Vec<CatchEntry>,
    /// Handler of the catch-any entries.
    pub finally: Option<Offset>,
    /// How many catch-any rows point to `finally`; more than one when the compiler duplicated
    /// the protected range around inlined `finally` copies.
    pub nbr_finally: usize,
    /// The largest handler offset.
    pub max_offset: Offset,
    /// The monitor slot if the catch-any handler releases a monitor acquired right before
    /// `try_from`.
    pub monitor: Option<Slot>,
    pub after_offset: Offset,
    pub kind: ExceptionKind,
}

impl AggregatedException {
    pub fn is_synchronized(&self) -> bool {
        self.monitor.is_some()
    }

    /// Handler offsets in ascending order.
    pub fn handlers(&self) -> Vec<Offset> {
        let mut handlers: Vec<Offset> = self
            .catches
            .iter()
            .map(|catch| catch.handler)
            .chain(self.finally)
            .collect();
        handlers.sort_unstable();
        handlers
    }

    pub(crate) fn update_max_offset(&mut self) {
        self.max_offset = self.handlers().last().copied().unwrap_or(self.try_to);
    }
}

/// Sorts by `(try_from asc, max_offset desc, try_to desc)`: outer constructs precede the ones they
/// contain, so walking the list backwards visits inner constructs first.
pub fn sort_records(records: &mut [AggregatedException]) {
    records.sort_by(|a, b| {
        a.try_from
            .cmp(&b.try_from)
            .then(b.max_offset.cmp(&a.max_offset))
            .then(b.try_to.cmp(&a.try_to))
    });
}

pub fn is_sorted(records: &[AggregatedException]) -> bool {
    records.windows(2).all(|pair| {
        let (a, b) = (&pair[0], &pair[1]);
        (a.try_from, b.max_offset, b.try_to) <= (b.try_from, a.max_offset, a.try_to)
    })
}

/// Aggregates, classifies and bounds every `try` construct of the method. Unclassifiable records
/// are kept with `ExceptionKind::Undefined`; the second return value reports whether there were
/// any.
pub fn analyze(entries: &[ExceptionTableEntry], list: &[Insn]) -> (Vec<AggregatedException>, bool) {
    let mut records = aggregate(entries, list);
    let mut has_undefined = false;
    for record in &mut records {
        record.kind = classify(record, list);
        if record.kind == ExceptionKind::Undefined {
            warn!(
                "cannot classify try block {}..{} with handlers {:?}",
                record.try_from,
                record.try_to,
                record.handlers()
            );
            has_undefined = true;
        } else {
            debug!(
                "try block {}..{} classified as {}",
                record.try_from, record.try_to, record.kind
            );
        }
    }
    resolve_boundaries(&mut records, list);
    debug_assert!(is_sorted(&records));
    (records, has_undefined)
}
