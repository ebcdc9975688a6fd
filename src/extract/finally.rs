use crate::StructuringError;
use crate::context::Landing;
use crate::exceptions::{AggregatedException, ExceptionKind, rethrow_index};
use crate::insn::{Insn, InsnKind, Offset, for_each_sequence_mut, is_isomorphic_list, landing_index};
use crate::structurer::Structurer;
use crate::variables::LocalVariableTable;

/// What a construct with a catch-any handler leaves in front of every exit that leaves it.
#[derive(Clone, Debug, PartialEq)]
pub enum ExitCopy {
    /// An inlined copy of these statements.
    Inline(Vec<Insn>),
    /// A `jsr` to the subroutine starting at this offset.
    Jsr(Offset),
}

impl ExitCopy {
    /// Reads the copy off the catch-any handler of `record` in the flat method body.
    pub fn of(record: &AggregatedException, list: &[Insn]) -> Option<Self> {
        if record.kind == ExceptionKind::Undefined {
            return None;
        }
        let handler = landing_index(list, record.finally?);
        let exception = list.get(handler)?.exception_store()?;
        if record.kind.uses_subroutine() {
            return list.get(handler + 1)?.jump_target().map(Self::Jsr);
        }
        let rethrow = rethrow_index(list, handler, exception)?;
        Some(Self::Inline(list[handler + 1..rethrow].to_vec()))
    }

    // The number of statements ending at `sequence[end - 1]` that form this copy.
    fn matched_before(&self, sequence: &[Insn], end: usize) -> Option<usize> {
        match self {
            Self::Inline(body) => {
                let start = end.checked_sub(body.len())?;
                (!body.is_empty() && is_isomorphic_list(&sequence[start..end], body))
                    .then_some(body.len())
            }
            Self::Jsr(target) => {
                let insn = sequence.get(end.checked_sub(1)?)?;
                (matches!(insn.kind, InsnKind::Jsr { .. }) && insn.jump_target() == Some(*target))
                    .then_some(1)
            }
        }
    }
}

/// Removes the artifacts `finally` lowering leaves in `try` and `catch` bodies: inlined copies of
/// the `finally` body before exits, or `jsr` calls to the shared subroutine.
pub struct FinallyCleanup {
    try_from: Offset,
    after: Landing,
    finally: Vec<Insn>,
    subroutine: Option<Insn>,
    handler_store: Option<(Offset, u32)>,
    /// Copies of enclosing constructs, outermost first. An exit leaving several constructs is
    /// preceded by their copies, innermost first.
    enclosing: Vec<ExitCopy>,
}

impl FinallyCleanup {
    pub fn new(record: &AggregatedException, after: Landing, enclosing: Vec<ExitCopy>) -> Self {
        Self {
            try_from: record.try_from,
            after,
            finally: Vec::new(),
            subroutine: None,
            handler_store: None,
            enclosing,
        }
    }

    /// Offset and line of the catch-any handler's exception store, once taken.
    pub fn handler_store(&self) -> Option<(Offset, u32)> {
        self.handler_store
    }

    /// Takes the `finally` body out of the catch-any handler (`t = exc; F; throw t`) or out of the
    /// subroutine (`r = retaddr; F; ret r`, with the handler being `t = exc; jsr; throw t`).
    pub fn take_finally_body(
        &mut self,
        structurer: &mut Structurer<'_>,
        handler: &mut Vec<Insn>,
        subroutine: &mut Vec<Insn>,
    ) -> Result<Vec<Insn>, StructuringError> {
        let head = handler
            .first()
            .ok_or(StructuringError::shape(self.after.from, "catch-any handler"))?;
        let exception = head
            .exception_store()
            .ok_or(StructuringError::shape(head.offset, "exception store"))?;
        let (head_offset, head_line) = (head.offset, head.line);
        if !handler.last().is_some_and(|last| last.is_rethrow_of(exception)) || handler.len() < 2 {
            return Err(StructuringError::shape(head_offset, "rethrow"));
        }
        structurer.variables.remove(exception, head_offset);
        self.handler_store = Some((head_offset, head_line));

        let body = if subroutine.is_empty() {
            let len = handler.len();
            handler.drain(1..len - 1).collect()
        } else {
            if !matches!(&handler[1..handler.len() - 1], [jsr] if matches!(jsr.kind, InsnKind::Jsr { .. }))
            {
                return Err(StructuringError::shape(head_offset, "jsr to the finally subroutine"));
            }
            let entry = subroutine
                .first()
                .ok_or(StructuringError::shape(head_offset, "finally subroutine"))?;
            if let Some(slot) = entry.written_slot() {
                structurer.variables.remove(slot, entry.offset);
            }
            let len = subroutine.len();
            if len < 2 {
                return Err(StructuringError::shape(entry.offset, "ret"));
            }
            self.subroutine = Some(entry.clone());
            subroutine.drain(1..len - 1).collect()
        };
        self.finally = body;
        Ok(self.finally.clone())
    }

    /// Strips `finally` artifacts from a `try` or `catch` body. `removed_goto` tells whether the
    /// body fell out of the construct through a `goto`, in which case a copy precedes that exit too.
    pub fn strip_copies(
        &self,
        structurer: &mut Structurer<'_>,
        body: &mut Vec<Insn>,
        removed_goto: bool,
    ) {
        let fold = structurer.options.fold_return_temporaries;
        let variables = &mut structurer.variables;

        if let Some(entry) = &self.subroutine {
            for_each_sequence_mut(body, &mut |sequence| {
                remove_subroutine_calls(sequence, entry, fold, variables);
            });
            return;
        }

        let n = self.finally.len();
        if n == 0 {
            return;
        }
        if removed_goto && body.len() >= n && is_isomorphic_list(&body[body.len() - n..], &self.finally) {
            body.truncate(body.len() - n);
        }
        for_each_sequence_mut(body, &mut |sequence| {
            let mut index = sequence.len();
            while index > 0 {
                index -= 1;
                if !self.is_exit(&sequence[index]) {
                    continue;
                }
                let end = self.skip_enclosing_copies(sequence, index);
                if end >= n && is_isomorphic_list(&sequence[end - n..end], &self.finally) {
                    sequence.drain(end - n..end);
                    // Outer copies still separate a return temporary from its `return`.
                    let folds = end == index;
                    index -= n;
                    if folds && fold && fold_return_temporary(sequence, index, variables) {
                        index -= 1;
                    }
                }
            }
        });
    }

    // The index the copy of this construct's `finally` would end at, in front of the exit at
    // `sequence[exit]`.
    fn skip_enclosing_copies(&self, sequence: &[Insn], exit: usize) -> usize {
        let mut end = exit;
        for copy in &self.enclosing {
            if let Some(len) = copy.matched_before(sequence, end) {
                end -= len;
            }
        }
        end
    }

    // `throw` is not an exit: the catch-any handler covers it and runs the `finally` body, so no
    // copy precedes it.
    fn is_exit(&self, insn: &Insn) -> bool {
        match insn.kind {
            InsnKind::Return | InsnKind::ValueReturn { .. } => true,
            InsnKind::Goto { .. } => insn
                .jump_target()
                .is_some_and(|target| target < self.try_from || target >= self.after.from),
            _ => false,
        }
    }
}

fn remove_subroutine_calls(
    sequence: &mut Vec<Insn>,
    entry: &Insn,
    fold: bool,
    variables: &mut LocalVariableTable,
) {
    let calls_subroutine = |insn: &Insn| {
        matches!(insn.kind, InsnKind::Jsr { .. })
            && insn
                .jump_target()
                .is_some_and(|target| entry.min_offset() <= target && target <= entry.offset)
    };
    let mut index = sequence.len();
    while index > 0 {
        index -= 1;
        if calls_subroutine(&sequence[index]) {
            sequence.remove(index);
            if fold && index < sequence.len() && fold_return_temporary(sequence, index, variables) {
                index -= 1;
            }
        }
    }
}

/// Folds `tmp = v; return tmp` at `sequence[index - 1..=index]` into `return v`. Returns whether
/// it did.
fn fold_return_temporary(
    sequence: &mut Vec<Insn>,
    index: usize,
    variables: &mut LocalVariableTable,
) -> bool {
    if index == 0 {
        return false;
    }
    let InsnKind::ValueReturn { value } = &sequence[index].kind else {
        return false;
    };
    let Some(temporary) = value.as_load() else {
        return false;
    };
    if sequence[index - 1].written_slot() != Some(temporary)
        || !matches!(sequence[index - 1].kind, InsnKind::Store { .. })
    {
        return false;
    }
    let store = sequence.remove(index - 1);
    variables.remove(temporary, store.offset);
    if let InsnKind::Store { value, .. } = store.kind {
        sequence[index - 1].kind = InsnKind::ValueReturn { value };
    }
    true
}

/// Removes a final `goto` that jumps to the end of the construct.
pub fn remove_trailing_goto(body: &mut Vec<Insn>, after: Landing) -> bool {
    let is_exit = body.last().is_some_and(|last| {
        last.is_goto() && last.jump_target().is_some_and(|target| after.contains(target))
    });
    if is_exit {
        body.pop();
    }
    is_exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::*;
    use crate::{MapConstantPool, Options};

    fn cleanup(finally: Vec<Insn>, enclosing: Vec<ExitCopy>) -> FinallyCleanup {
        FinallyCleanup {
            try_from: 0,
            after: Landing::new(30, 40),
            finally,
            subroutine: None,
            handler_store: None,
            enclosing,
        }
    }

    fn strip(cleanup: &FinallyCleanup, mut body: Vec<Insn>) -> Vec<Insn> {
        let pool = MapConstantPool::new();
        let options = Options::default();
        let mut structurer = Structurer::new(&pool, &options, LocalVariableTable::new());
        cleanup.strip_copies(&mut structurer, &mut body, false);
        body
    }

    #[test]
    fn copy_before_return_is_stripped() {
        let cleanup = cleanup(vec![call(50, 6, 7)], Vec::new());
        let body = vec![call(3, 1, 1), call(6, 1, 7), return_(7, 1)];
        assert_eq!(strip(&cleanup, body), [call(3, 1, 1), return_(7, 1)]);
    }

    #[test]
    fn call_before_throw_is_kept() {
        // try { f(); throw e; } finally { f(); }
        let cleanup = cleanup(vec![call(50, 6, 7)], Vec::new());
        let body = vec![call(3, 1, 7), throw(5, 1, load(4, 1))];
        assert_eq!(strip(&cleanup, body.clone()), body);
    }

    #[test]
    fn enclosing_copy_sits_between_copy_and_exit() {
        // try { try { A; return; } finally { f(); } } finally { g(); }
        let enclosing = vec![ExitCopy::Inline(vec![call(60, 7, 9)])];
        let cleanup = cleanup(vec![call(50, 6, 7)], enclosing);
        let body = vec![call(3, 1, 1), call(6, 1, 7), call(9, 1, 9), return_(10, 1)];
        assert_eq!(
            strip(&cleanup, body),
            [call(3, 1, 1), call(9, 1, 9), return_(10, 1)]
        );
    }

    #[test]
    fn enclosing_jsr_is_skipped() {
        let enclosing = vec![ExitCopy::Jsr(20)];
        let cleanup = cleanup(vec![call(50, 6, 7)], enclosing);
        let body = vec![call(6, 1, 7), jsr(7, 1, 20), return_(10, 1)];
        assert_eq!(strip(&cleanup, body), [jsr(7, 1, 20), return_(10, 1)]);
    }

    #[test]
    fn folds_return_temporary() {
        let mut variables = LocalVariableTable::new();
        variables.insert_synthetic(4, 0, 20);
        let mut sequence = vec![
            call(3, 1, 1),
            store(6, 2, 4, load(5, 1)),
            value_return(8, 2, load(7, 4)),
        ];
        assert!(fold_return_temporary(&mut sequence, 2, &mut variables));
        assert_eq!(sequence, [call(3, 1, 1), value_return(8, 2, load(5, 1))]);
        assert!(variables.is_empty());
    }

    #[test]
    fn trailing_goto_must_leave_construct() {
        let mut body = vec![call(3, 1, 1), goto(6, 1, 40)];
        assert!(!remove_trailing_goto(&mut body, Landing::new(30, 35)));
        assert!(remove_trailing_goto(&mut body, Landing::new(30, 40)));
        assert_eq!(body, [call(3, 1, 1)]);
    }
}
