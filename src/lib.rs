//! Control-flow structuring for decompiled JVM methods.
//!
//! The input is a method body as produced by a class-file reader: a flat, offset-ordered list of
//! statements with raw jumps, the raw exception table, and the local variable table. The output is
//! the same list with loops, conditionals, switches, `try`/`synchronized` blocks, `break`/`continue`
//! and declaration markers in place of the lowered jumps.

mod conditionals;
mod constant_pool;
mod context;
mod declarations;
mod exceptions;
mod extract;
pub mod insn;
mod labels;
mod loops;
mod structurer;
mod switch;
mod utils;
mod variables;

pub use self::constant_pool::{ConstantPool, MapConstantPool, MemberRef};
pub use self::context::{ContinueTargets, Landing};
pub use self::exceptions::{AggregatedException, CatchEntry, ExceptionKind, ExceptionTableEntry};
pub use self::insn::{Insn, InsnKind, Offset, Slot};
pub use self::labels::label_jumps;
pub use self::loops::{ForEachIdiom, LoopShape};
pub use self::variables::{LocalVariable, LocalVariableTable};
use self::structurer::Structurer;
use log::warn;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StructuringError {
    #[error("Expected {expected} at offset {offset}")]
    UnexpectedShape {
        offset: Offset,
        expected: &'static str,
    },

    #[error("Control flow is nested deeper than {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("Jump at offset {offset} targets an offset outside the method")]
    UnknownJumpTarget { offset: Offset },
}

impl StructuringError {
    pub(crate) fn shape(offset: Offset, expected: &'static str) -> Self {
        Self::UnexpectedShape { offset, expected }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    /// Bounds recursion on adversarial input.
    pub max_nesting_depth: usize,
    pub recognize_for_each: bool,
    pub recognize_enum_switch: bool,
    pub recognize_string_switch: bool,
    /// Replace jumps to the method's terminal `return` with a copy of it.
    pub inline_returns: bool,
    /// Fold `tmp = v; <finally>; return tmp` into `return v` once the `finally` copy is removed.
    pub fold_return_temporaries: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_nesting_depth: 256,
            recognize_for_each: true,
            recognize_enum_switch: true,
            recognize_string_switch: true,
            inline_returns: true,
            fold_return_temporaries: true,
        }
    }
}

/// A method body as decoded by the class-file reader.
#[derive(Clone, Debug, Default)]
pub struct MethodBody {
    /// Top-level statements with strictly increasing offsets.
    pub instructions: Vec<Insn>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub variables: LocalVariableTable,
}

#[derive(Clone, Debug)]
pub struct StructuredMethod {
    pub instructions: Vec<Insn>,
    pub variables: LocalVariableTable,
    /// Aggregated `try` constructs, in `(try_from asc, max_offset desc, try_to desc)` order.
    pub exceptions: Vec<AggregatedException>,
    /// Set if some construct could not be structured. If a fatal error occurred, `instructions`
    /// and `variables` are the unmodified input.
    pub contains_error: bool,
}

/// Structures one method. Never fails: methods that cannot be structured are returned as-is with
/// `contains_error` set, so that the caller can fall back to a bytecode listing.
pub fn structure_method(
    pool: &dyn ConstantPool,
    body: MethodBody,
    options: &Options,
) -> StructuredMethod {
    let input = body.clone();
    let mut structurer = Structurer::new(pool, options, body.variables);
    match structurer.run(body.instructions, &body.exception_table) {
        Ok((instructions, exceptions)) => StructuredMethod {
            instructions,
            variables: structurer.variables,
            exceptions,
            contains_error: structurer.contains_error,
        },
        Err(error) => {
            warn!("falling back to unstructured code: {error}");
            StructuredMethod {
                instructions: input.instructions,
                variables: input.variables,
                exceptions: Vec::new(),
                contains_error: true,
            }
        }
    }
}
