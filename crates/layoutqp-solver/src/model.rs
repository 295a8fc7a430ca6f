//! Variables, summands and constraints as stored by a [`LinearSpec`](crate::LinearSpec).
//!
//! Entities are owned by the spec and referred to by generation-checked ids;
//! an id becomes stale the moment its entity is removed.

use crate::arena::Slot;
use crate::problem::ConstraintOp;

/// Default lower bound of a fresh variable; narrower ranges add a bound constraint
pub const DEFAULT_MIN: f64 = -20000.0;
/// Default upper bound of a fresh variable
pub const DEFAULT_MAX: f64 = 20000.0;

/// Handle to a variable of a [`LinearSpec`](crate::LinearSpec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(pub(crate) Slot);

/// Handle to a constraint of a [`LinearSpec`](crate::LinearSpec)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub(crate) Slot);

impl VariableId {
    /// Stable slot number, unique among live variables
    pub fn index(self) -> usize {
        self.0.index as usize
    }
}

impl ConstraintId {
    /// Stable slot number, unique among live constraints
    pub fn index(self) -> usize {
        self.0.index as usize
    }
}

/// One `coefficient * variable` term of a left-hand side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summand {
    pub coeff: f64,
    pub var: VariableId,
}

impl Summand {
    pub fn new(coeff: f64, var: VariableId) -> Self {
        Self { coeff, var }
    }
}

/// Merge summands that share a variable by adding their coefficients.
/// The first occurrence of each variable keeps its position.
pub fn merge_summands(summands: impl IntoIterator<Item = Summand>) -> Vec<Summand> {
    let mut merged: Vec<Summand> = Vec::new();
    for s in summands {
        match merged.iter_mut().find(|m| m.var == s.var) {
            Some(existing) => existing.coeff += s.coeff,
            None => merged.push(s),
        }
    }
    merged
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) value: f64,
    pub(crate) label: Option<String>,
    /// Number of live constraints whose left side mentions this variable
    pub(crate) references: usize,
    /// Hard `v >= min` constraint, present once `min` is narrowed
    pub(crate) lower_bound: Option<ConstraintId>,
    /// Hard `v <= max` constraint, present once `max` is narrowed
    pub(crate) upper_bound: Option<ConstraintId>,
    /// Owned by the elastic transform of a soft inequality
    pub(crate) slack: bool,
}

impl Variable {
    pub(crate) fn new() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            value: f64::NAN,
            label: None,
            references: 0,
            lower_bound: None,
            upper_bound: None,
            slack: false,
        }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Value from the last successful solve; NaN before that
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Referenced by at least one constraint, and so a matrix column
    pub fn is_used(&self) -> bool {
        self.references > 0
    }

    pub fn is_slack(&self) -> bool {
        self.slack
    }
}

/// Why a constraint exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintRole {
    /// Added by the caller
    User,
    /// Range bound owned by a variable
    Bound(VariableId),
    /// `slack = 0` penalty term owned by an elastic constraint
    SlackPenalty(ConstraintId),
}

/// Slack injected into a soft inequality
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticSlack {
    /// The slack variable, range `[0, 20000]`
    pub slack: VariableId,
    /// Coefficient of the slack summand: -1 for `<=`, +1 for `>=`
    pub coeff: f64,
    /// Auxiliary soft equality `slack = 0`
    pub penalty: ConstraintId,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub(crate) left_side: Vec<Summand>,
    pub(crate) op: ConstraintOp,
    pub(crate) right_side: f64,
    pub(crate) penalty_neg: f64,
    pub(crate) penalty_pos: f64,
    pub(crate) label: Option<String>,
    pub(crate) role: ConstraintRole,
    pub(crate) elastic: Option<ElasticSlack>,
    /// Temporarily withdrawn (size queries); keeps its id but takes no part
    pub(crate) suspended: bool,
}

impl Constraint {
    pub(crate) fn new(
        left_side: Vec<Summand>,
        op: ConstraintOp,
        right_side: f64,
        penalty_neg: f64,
        penalty_pos: f64,
        role: ConstraintRole,
    ) -> Self {
        Self {
            left_side: merge_summands(left_side),
            op,
            right_side,
            penalty_neg,
            penalty_pos,
            label: None,
            role,
            elastic: None,
            suspended: false,
        }
    }

    /// Summands, including the injected slack of an elastic constraint
    pub fn left_side(&self) -> &[Summand] {
        &self.left_side
    }

    pub fn op(&self) -> ConstraintOp {
        self.op
    }

    pub fn right_side(&self) -> f64 {
        self.right_side
    }

    /// Penalty for the left side ending up too large
    pub fn penalty_neg(&self) -> f64 {
        self.penalty_neg
    }

    /// Penalty for the left side ending up too small
    pub fn penalty_pos(&self) -> f64 {
        self.penalty_pos
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn role(&self) -> ConstraintRole {
        self.role
    }

    pub fn elastic(&self) -> Option<&ElasticSlack> {
        self.elastic.as_ref()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// At least one penalty is positive, whatever the operator
    pub fn is_soft(&self) -> bool {
        self.penalty_neg > 0.0 || self.penalty_pos > 0.0
    }

    /// Soft `<=`/`>=`: gets a slack and an auxiliary penalty on registration
    pub fn is_soft_inequality(&self) -> bool {
        self.is_soft() && self.op != ConstraintOp::Eq
    }

    /// Soft equality: contributes to the quadratic objective instead of the
    /// hard rows
    pub fn is_objective_term(&self) -> bool {
        self.is_soft() && self.op == ConstraintOp::Eq
    }

    pub fn references(&self, var: VariableId) -> bool {
        self.left_side.iter().any(|s| s.var == var)
    }
}
