use crate::error::FitError;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConstraintOp {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
}

impl ConstraintOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::Greater => ">",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn value(&self) -> f64 {
        match self {
            Self::Plus => 1.0,
            Self::Minus => -1.0,
        }
    }
}

/// One slot of the positional constraint notation
///
/// `[a, op, b]` reads `a op b`, while `[a, b, op]` reads `a op -b`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstraintSlot {
    Index(usize),
    Op(ConstraintOp),
}

/// Inequality between two model parameters
///
/// Reads `value[lhs] op rhs_sign * value[rhs] + offset`. Fitting enforces the non-strict
/// version of the inequality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Constraint {
    pub lhs: usize,
    pub rhs: usize,
    pub rhs_sign: Sign,
    pub op: ConstraintOp,
    pub offset: f64,
}

impl Constraint {
    /// `value[lhs] op value[rhs]`
    pub fn new(lhs: usize, op: ConstraintOp, rhs: usize) -> Self {
        Self {
            lhs,
            rhs,
            rhs_sign: Sign::Plus,
            op,
            offset: 0.0,
        }
    }

    /// `value[lhs] op -value[rhs]`
    pub fn negated(lhs: usize, op: ConstraintOp, rhs: usize) -> Self {
        Self {
            rhs_sign: Sign::Minus,
            ..Self::new(lhs, op, rhs)
        }
    }

    pub fn less(lhs: usize, rhs: usize) -> Self {
        Self::new(lhs, ConstraintOp::Less, rhs)
    }

    pub fn greater(lhs: usize, rhs: usize) -> Self {
        Self::new(lhs, ConstraintOp::Greater, rhs)
    }

    pub fn with_offset(self, offset: f64) -> Self {
        Self { offset, ..self }
    }

    /// Decode the positional notation, `[a, op, b]` or `[a, b, op]`
    pub fn from_slots(slots: [ConstraintSlot; 3], offset: f64) -> Result<Self, FitError> {
        use ConstraintSlot::{Index, Op};

        let constraint = match slots {
            [Index(a), Op(op), Index(b)] => Self::new(a, op, b),
            [Index(a), Index(b), Op(op)] => Self::negated(a, op, b),
            _ => {
                return Err(FitError::InvalidConstraint {
                    constraint: format!("{slots:?}"),
                    reason: "slots must read [a, op, b] or [a, b, op]".to_string(),
                });
            }
        };
        Ok(constraint.with_offset(offset))
    }

    pub fn sign(&self) -> f64 {
        self.rhs_sign.value()
    }

    pub fn validate(&self, nparams: usize) -> Result<(), FitError> {
        if self.lhs >= nparams
            || self.rhs >= nparams
            || self.lhs == self.rhs
            || !self.offset.is_finite()
        {
            return Err(FitError::InvalidConstraint {
                constraint: self.to_string(),
                reason: format!(
                    "expected two different parameter indices below {nparams} and a finite offset"
                ),
            });
        }
        Ok(())
    }

    /// Whether the values satisfy the non-strict inequality
    pub fn is_satisfied(&self, values: &[f64]) -> bool {
        let rhs = self.sign() * values[self.rhs] + self.offset;
        match self.op {
            ConstraintOp::Less => values[self.lhs] <= rhs,
            ConstraintOp::Greater => values[self.lhs] >= rhs,
        }
    }

    pub fn describe(&self, names: &[String]) -> String {
        let name = |i: usize| names.get(i).cloned().unwrap_or_else(|| format!("#{i}"));
        let sign = match self.rhs_sign {
            Sign::Plus => "",
            Sign::Minus => "-",
        };
        let mut s = format!(
            "{} {} {}{}",
            name(self.lhs),
            self.op.symbol(),
            sign,
            name(self.rhs)
        );
        if self.offset != 0.0 {
            s.push_str(&format!(" + {}", self.offset));
        }
        s
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.rhs_sign {
            Sign::Plus => "",
            Sign::Minus => "-",
        };
        write!(
            f,
            "[{}] {} {}[{}]",
            self.lhs,
            self.op.symbol(),
            sign,
            self.rhs
        )?;
        if self.offset != 0.0 {
            write!(f, " + {}", self.offset)?;
        }
        Ok(())
    }
}
