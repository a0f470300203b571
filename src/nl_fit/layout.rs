//! Mapping between model parameter vectors and optimizer variables
//!
//! A [ParameterLayout] decides which model parameters the optimizer sees. Fixed parameters keep
//! their value, variable parameters become free variables and constraints between two variable
//! parameters replace the parameter with the higher index by an expression of the other one and
//! a non-negative slack variable:
//!
//! ```text
//! lhs = s rhs + offset - δ        constraint lhs < s rhs + offset, lhs is dependent
//! lhs = s rhs + offset + δ        constraint lhs > s rhs + offset, lhs is dependent
//! rhs = s (lhs - offset) + s δ    constraint lhs < s rhs + offset, rhs is dependent
//! rhs = s (lhs - offset) - s δ    constraint lhs > s rhs + offset, rhs is dependent
//! ```

use crate::model::{Constraint, ConstraintOp};
use crate::nl_fit::bounds::Bound;
use crate::nl_fit::results::Diagnostic;

use itertools::Itertools;
use std::collections::HashMap;

/// What a free optimizer variable stands for
#[derive(Clone, Debug, PartialEq)]
pub enum SlotKind {
    /// A model parameter, shared between all correlations of a global fit using it
    Parameter,
    /// Slack of a constraint between two variable parameters
    Slack,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FreeSlot {
    pub name: String,
    pub kind: SlotKind,
    pub start: f64,
    pub bound: Bound,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Source {
    Fixed,
    Free(usize),
    Derived,
}

/// `value[dependent] = scale * value[driver] + offset + slack_sign * x[slack]`, clamped
#[derive(Clone, Debug, PartialEq)]
struct Derived {
    dependent: usize,
    driver: usize,
    scale: f64,
    offset: f64,
    slack_sign: f64,
    slack: usize,
    bound: Bound,
}

impl Derived {
    fn value(&self, values: &[f64], slack: f64) -> f64 {
        self.bound.clamp(
            self.scale * values[self.driver] + self.offset + self.slack_sign * slack,
        )
    }
}

/// Parameters of one correlation
#[derive(Clone, Debug, PartialEq)]
struct Block {
    values: Vec<f64>,
    sources: Vec<Source>,
    derived: Vec<Derived>,
}

impl Block {
    fn decode(&self, x: &[f64]) -> Vec<f64> {
        let mut values = self.values.clone();
        for (value, source) in values.iter_mut().zip(self.sources.iter()) {
            if let Source::Free(k) = source {
                *value = x[*k];
            }
        }
        for derived in self.derived.iter() {
            values[derived.dependent] = derived.value(&values, x[derived.slack]);
        }
        values
    }
}

/// Translation between model parameters of one or several correlations and the free variables
/// of an optimizer
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterLayout {
    free: Vec<FreeSlot>,
    blocks: Vec<Block>,
}

impl ParameterLayout {
    /// Layout of a global fit, variable parameters with the same name share a free variable
    ///
    /// The first correlation using a name provides its start value and bound.
    pub fn global<'a>(
        parameters: impl IntoIterator<Item = LayoutInput<'a>>,
    ) -> Self {
        let mut free: Vec<FreeSlot> = vec![];
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        let blocks = parameters
            .into_iter()
            .map(|input| {
                let sources = (0..input.values.len())
                    .map(|i| {
                        if !input.variable[i] || input.bounds[i].is_point() {
                            return Source::Fixed;
                        }
                        let name = input.names[i].as_str();
                        let k = *by_name.entry(name).or_insert_with(|| {
                            free.push(FreeSlot {
                                name: name.to_string(),
                                kind: SlotKind::Parameter,
                                start: input.bounds[i].clamp(input.values[i]),
                                bound: input.bounds[i],
                            });
                            free.len() - 1
                        });
                        Source::Free(k)
                    })
                    .collect();
                let values = input
                    .values
                    .iter()
                    .zip(input.bounds)
                    .map(|(&x, bound)| if bound.is_point() { bound.lower } else { x })
                    .collect();
                Block {
                    values,
                    sources,
                    derived: vec![],
                }
            })
            .collect();
        Self { free, blocks }
    }

    pub fn nfree(&self) -> usize {
        self.free.len()
    }

    pub fn free(&self) -> &[FreeSlot] {
        &self.free
    }

    pub fn nblocks(&self) -> usize {
        self.blocks.len()
    }

    /// Optimizer start vector
    pub fn encode(&self) -> Vec<f64> {
        self.free.iter().map(|slot| slot.start).collect()
    }

    pub fn bounds(&self) -> Vec<Bound> {
        self.free.iter().map(|slot| slot.bound).collect()
    }

    /// Model parameters of every correlation for the free variables `x`
    pub fn decode(&self, x: &[f64]) -> Vec<Vec<f64>> {
        self.blocks.iter().map(|block| block.decode(x)).collect()
    }

    /// Model parameters of the correlation `block` for the free variables `x`
    pub fn decode_block(&self, block: usize, x: &[f64]) -> Vec<f64> {
        self.blocks[block].decode(x)
    }

    /// Free variable index of every parameter of a correlation, `None` for fixed and derived
    pub fn free_indices(&self, block: usize) -> Vec<Option<usize>> {
        self.blocks[block]
            .sources
            .iter()
            .map(|source| match source {
                Source::Free(k) => Some(*k),
                Source::Fixed | Source::Derived => None,
            })
            .collect()
    }

    /// New start vector, e.g. for a retry
    pub fn set_start(&mut self, x: &[f64]) {
        for (slot, &x) in self.free.iter_mut().zip(x) {
            slot.start = slot.bound.clamp(x);
        }
    }
}

/// Parameters of a single correlation entering a layout
#[derive(Clone, Copy, Debug)]
pub struct LayoutInput<'a> {
    pub names: &'a [String],
    pub values: &'a [f64],
    pub variable: &'a [bool],
    pub bounds: &'a [Bound],
}

/// Builder of a single-correlation [ParameterLayout] applying model constraints
#[derive(Clone, Debug)]
pub struct LayoutBuilder {
    names: Vec<String>,
    values: Vec<f64>,
    variable: Vec<bool>,
    bounds: Vec<Bound>,
    derived: Vec<Derived>,
    slacks: Vec<FreeSlot>,
    diagnostics: Vec<Diagnostic>,
}

impl LayoutBuilder {
    pub fn new(input: LayoutInput) -> Self {
        Self {
            names: input.names.to_vec(),
            values: input
                .values
                .iter()
                .zip(input.bounds)
                .map(|(&x, bound)| bound.clamp(x))
                .collect(),
            variable: input.variable.to_vec(),
            bounds: input.bounds.to_vec(),
            derived: vec![],
            slacks: vec![],
            diagnostics: vec![],
        }
    }

    fn is_dependent(&self, index: usize) -> bool {
        self.derived.iter().any(|d| d.dependent == index)
    }

    /// Translate a constraint into tightened bounds or a derived parameter
    pub fn apply_constraint(&mut self, constraint: &Constraint) -> &mut Self {
        let Constraint {
            lhs, rhs, offset, ..
        } = *constraint;
        let s = constraint.sign();
        let less = constraint.op == ConstraintOp::Less;

        match (self.variable[lhs], self.variable[rhs]) {
            (false, false) => {}
            (true, false) => {
                let value = s * self.values[rhs] + offset;
                let bound = if less {
                    Bound::upper_only(value)
                } else {
                    Bound::lower_only(value)
                };
                self.tighten(lhs, bound, value, constraint);
            }
            (false, true) => {
                let value = s * (self.values[lhs] - offset);
                let bound = if less != (s < 0.0) {
                    Bound::lower_only(value)
                } else {
                    Bound::upper_only(value)
                };
                self.tighten(rhs, bound, value, constraint);
            }
            (true, true) => {
                let (dependent, driver) = (lhs.max(rhs), lhs.min(rhs));
                if self.is_dependent(dependent) {
                    let diagnostic = Diagnostic::ConstraintSkipped {
                        constraint: constraint.describe(&self.names),
                    };
                    log::warn!("{diagnostic}");
                    self.diagnostics.push(diagnostic);
                    return self;
                }
                let (scale, shift, slack_sign) = if dependent == lhs {
                    (s, offset, if less { -1.0 } else { 1.0 })
                } else {
                    (s, -s * offset, if less { s } else { -s })
                };
                let at_zero = scale * self.values[driver] + shift;
                let slack = FreeSlot {
                    name: format!("δ({})", constraint.describe(&self.names)),
                    kind: SlotKind::Slack,
                    start: (self.values[dependent] - at_zero).abs(),
                    bound: Bound::lower_only(0.0),
                };
                self.derived.push(Derived {
                    dependent,
                    driver,
                    scale,
                    offset: shift,
                    slack_sign,
                    // Slack indices are relative until the layout is built
                    slack: self.slacks.len(),
                    bound: self.bounds[dependent],
                });
                self.slacks.push(slack);
            }
        }
        self
    }

    fn tighten(&mut self, index: usize, bound: Bound, value: f64, constraint: &Constraint) {
        self.bounds[index] = match self.bounds[index].intersect(&bound) {
            Some(bound) => bound,
            None => {
                let diagnostic = Diagnostic::EmptyConstraintBound {
                    constraint: constraint.describe(&self.names),
                    value,
                };
                log::warn!("{diagnostic}");
                self.diagnostics.push(diagnostic);
                Bound::new(value, value)
            }
        };
        self.values[index] = self.bounds[index].clamp(self.values[index]);
        for derived in self.derived.iter_mut().filter(|d| d.dependent == index) {
            derived.bound = self.bounds[index];
        }
    }

    pub fn apply_constraints<'a>(
        &mut self,
        constraints: impl IntoIterator<Item = &'a Constraint>,
    ) -> &mut Self {
        for constraint in constraints {
            self.apply_constraint(constraint);
        }
        self
    }

    pub fn build(self) -> (ParameterLayout, Vec<Diagnostic>) {
        let mut free = vec![];
        let sources = (0..self.values.len())
            .map(|i| {
                if !self.variable[i] {
                    Source::Fixed
                } else if self.is_dependent(i) {
                    Source::Derived
                } else if self.bounds[i].is_point() {
                    // Pinned by its range or by an unsatisfiable constraint
                    Source::Fixed
                } else {
                    free.push(FreeSlot {
                        name: self.names[i].clone(),
                        kind: SlotKind::Parameter,
                        start: self.values[i],
                        bound: self.bounds[i],
                    });
                    Source::Free(free.len() - 1)
                }
            })
            .collect_vec();
        let nparameters = free.len();
        free.extend(self.slacks);
        // Drivers have lower indices than their dependents
        let derived = self
            .derived
            .into_iter()
            .map(|d| Derived {
                slack: d.slack + nparameters,
                ..d
            })
            .sorted_by_key(|d| d.dependent)
            .collect();
        let layout = ParameterLayout {
            free,
            blocks: vec![Block {
                values: self.values,
                sources,
                derived,
            }],
        };
        (layout, self.diagnostics)
    }
}
