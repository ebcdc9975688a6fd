use crate::context::{Context, Landing};
use crate::exceptions::{self, AggregatedException, ExceptionTableEntry};
use crate::insn::{Insn, InsnKind, Offset};
use crate::utils::jump_targets;
use crate::variables::LocalVariableTable;
use crate::{ConstantPool, Options, StructuringError};
use crate::{conditionals, declarations, extract, labels, loops, switch};
use log::debug;

/// Per-method state shared by the passes.
pub struct Structurer<'a> {
    pub pool: &'a dyn ConstantPool,
    pub options: &'a Options,
    pub variables: LocalVariableTable,
    pub contains_error: bool,
}

impl<'a> Structurer<'a> {
    pub fn new(
        pool: &'a dyn ConstantPool,
        options: &'a Options,
        variables: LocalVariableTable,
    ) -> Self {
        Self {
            pool,
            options,
            variables,
            contains_error: false,
        }
    }

    pub fn run(
        &mut self,
        mut list: Vec<Insn>,
        exception_table: &[ExceptionTableEntry],
    ) -> Result<(Vec<Insn>, Vec<AggregatedException>), StructuringError> {
        validate_jumps(&list)?;

        let (records, has_undefined) = exceptions::analyze(exception_table, &list);
        self.contains_error |= has_undefined;
        extract::extract_exceptions(self, &mut list, &records)?;

        let ctx = Context::method(&list);
        self.structure_sequence(&mut list, ctx)?;
        extract::structure_bare_monitors(self, &mut list);

        labels::label_jumps(&mut list, self.options)?;
        declarations::place_declarations(&mut list, &mut self.variables);
        Ok((list, records))
    }

    /// Structures `list` and everything nested in it. Loops go first so that conditionals never
    /// straddle a back-edge; switches go before conditionals so that case bodies are delimited
    /// before their branches are.
    pub fn structure_sequence(
        &mut self,
        list: &mut Vec<Insn>,
        ctx: Context,
    ) -> Result<(), StructuringError> {
        ctx.check_depth(self.options.max_nesting_depth)?;
        loops::structure_loops(self, list, ctx)?;
        switch::structure_switches(self, list, ctx)?;
        conditionals::structure_conditionals(self, list, ctx)?;

        for index in 0..list.len() {
            if !matches!(
                list[index].kind,
                InsnKind::Try(_) | InsnKind::Synchronized { .. }
            ) {
                continue;
            }
            let from = Landing::at(list, index, ctx.from, ctx.fallthrough.to).from;
            let fallthrough = Landing::at(list, index + 1, ctx.from, ctx.fallthrough.to);
            let falls_to_continue = ctx.falls_to_continue && index + 1 == list.len();
            let mut part_from = from;
            for part in list[index].sequences_mut() {
                let part_ctx = Context {
                    from: part_from,
                    fallthrough,
                    falls_to_continue,
                    depth: ctx.depth + 1,
                    ..ctx
                };
                if let Some(last) = part.last() {
                    part_from = last.max_offset().saturating_add(1);
                }
                self.structure_sequence(part, part_ctx)?;
            }
        }
        Ok(())
    }
}

fn validate_jumps(list: &[Insn]) -> Result<(), StructuringError> {
    let mut invalid: Option<Offset> = None;
    for insn in list {
        insn.visit(&mut |insn| {
            let is_jump = matches!(
                insn.kind,
                InsnKind::Goto { .. } | InsnKind::Branch { .. } | InsnKind::Jsr { .. }
            );
            if is_jump && insn.jump_target().is_none() {
                invalid.get_or_insert(insn.offset);
            }
        });
    }
    let last = list.last().map_or(0, |insn| insn.offset);
    if let Some((source, _)) = jump_targets(list)
        .into_iter()
        .find(|(_, target)| *target > last)
    {
        invalid.get_or_insert(source);
    }
    match invalid {
        Some(offset) => {
            debug!("jump at {offset} leaves the method");
            Err(StructuringError::UnknownJumpTarget { offset })
        }
        None => Ok(()),
    }
}
