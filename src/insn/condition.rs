use super::Insn;
use displaydoc::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum CmpOp {
    /// ==
    Eq,
    /// !=
    Ne,
    /// <
    Lt,
    /// >=
    Ge,
    /// >
    Gt,
    /// <=
    Le,
}

impl CmpOp {
    pub fn invert(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LogicOp {
    /// &&
    And,
    /// ||
    Or,
}

/// The test of a conditional branch.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// `if_icmp<op>`, `if_acmp<op>`.
    Compare {
        op: CmpOp,
        left: Box<Insn>,
        right: Box<Insn>,
    },
    /// `if<op>`: compares a value to zero (`false` for booleans).
    Zero { op: CmpOp, value: Box<Insn> },
    /// `ifnull`/`ifnonnull`.
    Null { is_null: bool, value: Box<Insn> },
    /// `&&`/`||` chains built by the reader from short-circuit branch sequences.
    Logic {
        op: LogicOp,
        operands: Vec<Condition>,
    },
}

impl Condition {
    /// Logical negation, pushed down through compound conditions.
    pub fn invert(self) -> Self {
        match self {
            Self::Compare { op, left, right } => Self::Compare {
                op: op.invert(),
                left,
                right,
            },
            Self::Zero { op, value } => Self::Zero {
                op: op.invert(),
                value,
            },
            Self::Null { is_null, value } => Self::Null {
                is_null: !is_null,
                value,
            },
            Self::Logic { op, operands } => Self::Logic {
                op: match op {
                    LogicOp::And => LogicOp::Or,
                    LogicOp::Or => LogicOp::And,
                },
                operands: operands.into_iter().map(Self::invert).collect(),
            },
        }
    }

    pub fn operands(&self) -> Vec<&Insn> {
        match self {
            Self::Compare { left, right, .. } => vec![&**left, &**right],
            Self::Zero { value, .. } | Self::Null { value, .. } => vec![&**value],
            Self::Logic { operands, .. } => operands.iter().flat_map(Self::operands).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Insn> {
        match self {
            Self::Compare { left, right, .. } => vec![&mut **left, &mut **right],
            Self::Zero { value, .. } | Self::Null { value, .. } => vec![&mut **value],
            Self::Logic { operands, .. } => operands
                .iter_mut()
                .flat_map(Self::operands_mut)
                .collect(),
        }
    }

    /// If this tests `value != 0` (i.e. a boolean call result being true), returns `value`.
    pub fn truthy_value(&self) -> Option<&Insn> {
        match self {
            Self::Zero {
                op: CmpOp::Ne,
                value,
            } => Some(value),
            _ => None,
        }
    }

    /// If this tests `value == 0` (i.e. a boolean being false), returns `value`.
    pub fn falsy_value(&self) -> Option<&Insn> {
        match self {
            Self::Zero {
                op: CmpOp::Eq,
                value,
            } => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::{compare, load, zero};

    #[test]
    fn invert_is_involutive() {
        let condition = Condition::Logic {
            op: LogicOp::And,
            operands: vec![
                compare(CmpOp::Lt, load(0, 1), load(1, 2)),
                zero(CmpOp::Eq, load(2, 3)),
            ],
        };
        assert_eq!(condition.clone().invert().invert(), condition);
    }

    #[test]
    fn invert_applies_de_morgan() {
        let condition = Condition::Logic {
            op: LogicOp::Or,
            operands: vec![
                compare(CmpOp::Ge, load(0, 1), load(1, 2)),
                zero(CmpOp::Ne, load(2, 3)),
            ],
        };
        let expected = Condition::Logic {
            op: LogicOp::And,
            operands: vec![
                compare(CmpOp::Lt, load(0, 1), load(1, 2)),
                zero(CmpOp::Eq, load(2, 3)),
            ],
        };
        assert_eq!(condition.invert(), expected);
    }
}
