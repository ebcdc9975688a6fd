use super::{
    CaseLabel, Condition, Constant, Insn, InsnKind, InvokeKind, Jump, SwitchKind, UNKNOWN_LINE,
};
use core::fmt::{self, Display};

// A compact pseudo-Java rendering for logs and test failures. Constant pool references are printed
// as `#index`; the layout stage owns real formatting.

impl Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl Insn {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.offset, indent = depth * 4)?;
        if self.line != UNKNOWN_LINE {
            write!(f, " (line {})", self.line)?;
        }
        write!(f, ": ")?;

        use InsnKind::*;
        match &self.kind {
            Loop(loop_) => {
                write!(f, "loop[{}]", loop_.shape)?;
                if let Some(init) = &loop_.init {
                    write!(f, " init {}", Expr(init))?;
                }
                if let Some(test) = &loop_.test {
                    write!(f, " test {test}")?;
                }
                if let Some(update) = &loop_.update {
                    write!(f, " update {}", Expr(update))?;
                }
                writeln!(f)?;
                fmt_list(f, &loop_.body, depth + 1)
            }
            ForEach(for_each) => {
                writeln!(
                    f,
                    "for (slot{} : {}) [{}]",
                    for_each.variable,
                    Expr(&for_each.iterable),
                    for_each.idiom
                )?;
                fmt_list(f, &for_each.body, depth + 1)
            }
            If { condition, then } => {
                writeln!(f, "if ({condition})")?;
                fmt_list(f, then, depth + 1)
            }
            IfElse {
                condition,
                then,
                else_,
            } => {
                writeln!(f, "if ({condition})")?;
                fmt_list(f, then, depth + 1)?;
                writeln!(f, "{:indent$}else", "", indent = depth * 4)?;
                fmt_list(f, else_, depth + 1)
            }
            IfChain { arms, else_ } => {
                for (i, arm) in arms.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{:indent$}else ", "", indent = depth * 4)?;
                    }
                    writeln!(f, "if ({})", arm.condition)?;
                    fmt_list(f, &arm.body, depth + 1)?;
                }
                if let Some(else_) = else_ {
                    writeln!(f, "{:indent$}else", "", indent = depth * 4)?;
                    fmt_list(f, else_, depth + 1)?;
                }
                Ok(())
            }
            SwitchBlock(switch) => {
                let kind = match switch.kind {
                    SwitchKind::Int => "",
                    SwitchKind::Enum { .. } => "enum ",
                    SwitchKind::String => "string ",
                };
                writeln!(f, "{kind}switch ({})", Expr(&switch.key))?;
                for case in &switch.cases {
                    write!(f, "{:indent$}", "", indent = (depth + 1) * 4)?;
                    for label in &case.labels {
                        match label {
                            CaseLabel::Int(value) => write!(f, "case {value}: ")?,
                            CaseLabel::String(value) => write!(f, "case {value:?}: ")?,
                            CaseLabel::Default => write!(f, "default: ")?,
                        }
                    }
                    writeln!(f)?;
                    fmt_list(f, &case.body, depth + 2)?;
                }
                Ok(())
            }
            Try(try_) => {
                writeln!(f, "try [{}]", try_.kind)?;
                fmt_list(f, &try_.body, depth + 1)?;
                for catch in &try_.catches {
                    write!(f, "{:indent$}catch (", "", indent = depth * 4)?;
                    for (i, ty) in catch.types.iter().enumerate() {
                        if i > 0 {
                            write!(f, " | ")?;
                        }
                        write!(f, "#{ty}")?;
                    }
                    match catch.variable {
                        Some(slot) => writeln!(f, " slot{slot})")?,
                        None => writeln!(f, ")")?,
                    }
                    fmt_list(f, &catch.body, depth + 1)?;
                }
                if let Some(finally) = &try_.finally {
                    writeln!(f, "{:indent$}finally", "", indent = depth * 4)?;
                    fmt_list(f, finally, depth + 1)?;
                }
                Ok(())
            }
            Synchronized { monitor, body } => {
                writeln!(f, "synchronized ({})", Expr(monitor))?;
                fmt_list(f, body, depth + 1)
            }
            Labeled(statement) => {
                writeln!(f, "label{}:", self.offset)?;
                statement.fmt_indented(f, depth)
            }
            Declare {
                variable,
                statement,
            } => {
                writeln!(f, "declare var{variable}")?;
                statement.fmt_indented(f, depth)
            }
            _ => writeln!(f, "{}", Expr(self)),
        }
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, list: &[Insn], depth: usize) -> fmt::Result {
    for insn in list {
        insn.fmt_indented(f, depth)?;
    }
    Ok(())
}

/// Renders a leaf statement or an operand on a single line.
struct Expr<'a>(&'a Insn);

impl Display for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InsnKind::*;
        match &self.0.kind {
            Load { slot } => write!(f, "slot{slot}"),
            Const(constant) => match constant {
                Constant::Null => write!(f, "null"),
                Constant::Int(value) => write!(f, "{value}"),
                Constant::Long(value) => write!(f, "{value}L"),
                Constant::Float(value) => write!(f, "{value}F"),
                Constant::Double(value) => write!(f, "{value}D"),
                Constant::String(index) => write!(f, "str#{index}"),
                Constant::Class(index) => write!(f, "class#{index}"),
            },
            ArrayLoad { array, index } => write!(f, "{}[{}]", Expr(array), Expr(index)),
            ArrayLength { array } => write!(f, "{}.length", Expr(array)),
            GetField { field, object } => match object {
                Some(object) => write!(f, "{}.#{field}", Expr(object)),
                None => write!(f, "#{field}"),
            },
            Invoke {
                kind,
                method,
                receiver,
                args,
            } => {
                if let Some(receiver) = receiver {
                    write!(f, "{}.", Expr(receiver))?;
                }
                if *kind == InvokeKind::Dynamic {
                    write!(f, "indy")?;
                }
                write!(f, "#{method}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Expr(arg))?;
                }
                write!(f, ")")
            }
            CheckCast { class, value } => write!(f, "(#{class}) {}", Expr(value)),
            Binary { op, left, right } => write!(f, "({} {op:?} {})", Expr(left), Expr(right)),
            New { class } => write!(f, "new #{class}"),
            ExceptionLoad => write!(f, "<exception>"),
            ReturnAddress => write!(f, "<return address>"),
            DupStore { slot, value } => write!(f, "(slot{slot} = {})", Expr(value)),
            Store { slot, value } => write!(f, "slot{slot} = {};", Expr(value)),
            Increment { slot, delta } => write!(f, "slot{slot} += {delta};"),
            PutField {
                field,
                object,
                value,
            } => match object {
                Some(object) => write!(f, "{}.#{field} = {};", Expr(object), Expr(value)),
                None => write!(f, "#{field} = {};", Expr(value)),
            },
            ArrayStore {
                array,
                index,
                value,
            } => write!(f, "{}[{}] = {};", Expr(array), Expr(index), Expr(value)),
            Pop { value } => write!(f, "{};", Expr(value)),
            Return => write!(f, "return;"),
            ValueReturn { value } => write!(f, "return {};", Expr(value)),
            Throw { value } => write!(f, "throw {};", Expr(value)),
            MonitorEnter { object } => write!(f, "monitorenter {};", Expr(object)),
            MonitorExit { object } => write!(f, "monitorexit {};", Expr(object)),
            Goto { .. } | Jsr { .. } => {
                let name = if self.0.is_goto() { "goto" } else { "jsr" };
                match self.0.jump_target() {
                    Some(target) => write!(f, "{name} {target};"),
                    None => write!(f, "{name} <invalid>;"),
                }
            }
            Branch { condition, .. } => match self.0.jump_target() {
                Some(target) => write!(f, "if ({condition}) goto {target};"),
                None => write!(f, "if ({condition}) goto <invalid>;"),
            },
            Ret { slot } => write!(f, "ret slot{slot};"),
            Switch(dispatch) => write!(f, "switch ({}) <dispatch>;", Expr(&dispatch.key)),
            Jump(jump) => write!(f, "{jump}"),
            ConditionalJump { condition, jump } => write!(f, "if ({condition}) {jump}"),
            // Structured nodes are rendered by `Insn::fmt`; reaching them here means they are used
            // as an operand, which only happens for wrapped loop headers.
            _ => write!(f, "{}", self.0),
        }
    }
}

impl Display for Jump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Break => write!(f, "break;"),
            Self::Continue => write!(f, "continue;"),
            Self::LabeledBreak(target) => write!(f, "break label{target};"),
            Self::LabeledContinue(target) => write!(f, "continue label{target};"),
            Self::Return(None) => write!(f, "return;"),
            Self::Return(Some(value)) => write!(f, "return {};", Expr(value)),
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { op, left, right } => {
                write!(f, "{} {op} {}", Expr(left), Expr(right))
            }
            Self::Zero { op, value } => write!(f, "{} {op} 0", Expr(value)),
            Self::Null { is_null, value } => {
                let op = if *is_null { "==" } else { "!=" };
                write!(f, "{} {op} null", Expr(value))
            }
            Self::Logic { op, operands } => {
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {op} ")?;
                    }
                    write!(f, "({operand})")?;
                }
                Ok(())
            }
        }
    }
}
