//! The owning registry of variables and constraints.
//!
//! Every structural change is applied synchronously: bound constraints follow
//! variable ranges, and soft inequalities gain or lose their elastic slack
//! before the mutating call returns.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::arena::Arena;
use crate::model::{
    Constraint, ConstraintId, ConstraintRole, DEFAULT_MAX, DEFAULT_MIN, Summand, Variable,
    VariableId, merge_summands,
};
use crate::problem::ConstraintOp;
use crate::solution::{ResultCode, Snapshot, VariableSnapshot};
use crate::solver::SolverOptions;

/// Misuse of the model API. The model is left unchanged when one is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("{coefficients} coefficients given for {variables} variables")]
    LengthMismatch { coefficients: usize, variables: usize },
    #[error("variable {0:?} does not exist or is managed internally")]
    InvalidVariable(VariableId),
    #[error("constraint {0:?} does not exist or is managed internally")]
    InvalidConstraint(ConstraintId),
    #[error("invalid range [{min}, {max}]")]
    RangeConstraintRejected { min: f64, max: f64 },
    #[error("penalties must be finite and non-negative, got ({neg}, {pos})")]
    InvalidPenalty { neg: f64, pos: f64 },
    #[error("right side must be finite, got {0}")]
    InvalidRightSide(f64),
    #[error("saving a specification is not supported")]
    Unsupported,
}

/// A set of variables and linear constraints to be solved together
#[derive(Debug, Clone)]
pub struct LinearSpec {
    pub(crate) variables: Arena<Variable>,
    pub(crate) constraints: Arena<Constraint>,
    pub(crate) options: SolverOptions,
    pub(crate) result: ResultCode,
    pub(crate) solving_time: Duration,
}

impl Default for LinearSpec {
    fn default() -> Self {
        Self::with_options(SolverOptions::default())
    }
}

impl LinearSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SolverOptions) -> Self {
        Self {
            variables: Arena::default(),
            constraints: Arena::default(),
            options,
            result: ResultCode::Error,
            solving_time: Duration::ZERO,
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }


    /// Add a variable with the default range `[-20000, 20000]`
    pub fn add_variable(&mut self) -> VariableId {
        VariableId(self.variables.insert(Variable::new()))
    }

    /// Add a labelled variable
    pub fn add_named_variable(&mut self, label: impl Into<String>) -> VariableId {
        let id = self.add_variable();
        if let Some(var) = self.variables.get_mut(id.0) {
            var.label = Some(label.into());
        }
        id
    }

    /// Remove a variable together with every constraint that references it.
    ///
    /// Returns false for stale handles and for slack variables, which belong
    /// to their elastic constraint.
    pub fn remove_variable(&mut self, id: VariableId) -> bool {
        match self.variables.get(id.0) {
            Some(var) if !var.slack => {}
            _ => return false,
        }

        let referencing: Vec<ConstraintId> = self
            .constraints
            .iter()
            .filter(|(_, c)| c.role == ConstraintRole::User && c.references(id))
            .map(|(slot, _)| ConstraintId(slot))
            .collect();
        for constraint in referencing {
            self.drop_constraint(constraint);
        }

        self.drop_variable(id);
        true
    }

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.0)
    }

    /// Value from the last successful solve; None for stale handles
    pub fn value(&self, id: VariableId) -> Option<f64> {
        self.variable(id).map(Variable::value)
    }

    /// Every live variable in id order, slacks included
    pub fn variables(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables.iter().map(|(slot, v)| (VariableId(slot), v))
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    /// Variables referenced by at least one constraint, in id order
    pub fn used_variables(&self) -> Vec<VariableId> {
        self.variables()
            .filter(|(_, v)| v.is_used())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn set_variable_label(
        &mut self,
        id: VariableId,
        label: impl Into<String>,
    ) -> Result<(), SpecError> {
        let var = self.variables.get_mut(id.0).ok_or(SpecError::InvalidVariable(id))?;
        var.label = Some(label.into());
        Ok(())
    }

    /// Restrict a variable to `[min, max]`.
    ///
    /// A bound narrower than the default range is enforced by a hard bound
    /// constraint owned by the variable.
    pub fn set_range(&mut self, id: VariableId, min: f64, max: f64) -> Result<(), SpecError> {
        match self.variables.get(id.0) {
            Some(var) if !var.slack => {}
            _ => return Err(SpecError::InvalidVariable(id)),
        }
        if min.is_nan() || max.is_nan() || min > max {
            return Err(SpecError::RangeConstraintRejected { min, max });
        }
        self.apply_range(id, min, max);
        Ok(())
    }

    pub fn set_min(&mut self, id: VariableId, min: f64) -> Result<(), SpecError> {
        let max = self.variable(id).ok_or(SpecError::InvalidVariable(id))?.max;
        self.set_range(id, min, max)
    }

    pub fn set_max(&mut self, id: VariableId, max: f64) -> Result<(), SpecError> {
        let min = self.variable(id).ok_or(SpecError::InvalidVariable(id))?.min;
        self.set_range(id, min, max)
    }


    /// Add a hard constraint `sum(coefficients[i] * variables[i]) op right_side`
    pub fn add_constraint(
        &mut self,
        coefficients: &[f64],
        variables: &[VariableId],
        op: ConstraintOp,
        right_side: f64,
    ) -> Result<ConstraintId, SpecError> {
        self.add_soft_constraint(coefficients, variables, op, right_side, 0.0, 0.0)
    }

    /// Add a constraint that may be violated at a quadratic cost.
    ///
    /// `penalty_neg` weighs the left side ending above the right side and
    /// `penalty_pos` below it. With both at zero the constraint is hard.
    pub fn add_soft_constraint(
        &mut self,
        coefficients: &[f64],
        variables: &[VariableId],
        op: ConstraintOp,
        right_side: f64,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<ConstraintId, SpecError> {
        let left_side = self.summands(coefficients, variables)?;
        check_right_side(right_side)?;
        check_penalties(penalty_neg, penalty_pos)?;
        let constraint = Constraint::new(
            left_side,
            op,
            right_side,
            penalty_neg,
            penalty_pos,
            ConstraintRole::User,
        );
        Ok(self.register(constraint))
    }

    /// Remove a caller-owned constraint along with its slack, if any.
    ///
    /// Bound and slack-penalty constraints are managed internally and cannot
    /// be removed this way.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> bool {
        match self.constraints.get(id.0) {
            Some(c) if c.role == ConstraintRole::User => {
                self.drop_constraint(id);
                true
            }
            _ => false,
        }
    }

    pub fn constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.get(id.0)
    }

    /// Every live constraint in id order, internal ones included
    pub fn constraints(&self) -> impl Iterator<Item = (ConstraintId, &Constraint)> {
        self.constraints.iter().map(|(slot, c)| (ConstraintId(slot), c))
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Replace the left side of a constraint
    pub fn set_left_side(
        &mut self,
        id: ConstraintId,
        coefficients: &[f64],
        variables: &[VariableId],
    ) -> Result<(), SpecError> {
        self.user_constraint(id)?;
        let left_side = self.summands(coefficients, variables)?;
        self.mutate(id, |c| c.left_side = merge_summands(left_side));
        Ok(())
    }

    pub fn set_operator(&mut self, id: ConstraintId, op: ConstraintOp) -> Result<(), SpecError> {
        self.user_constraint(id)?;
        self.mutate(id, |c| c.op = op);
        Ok(())
    }

    pub fn set_right_side(&mut self, id: ConstraintId, right_side: f64) -> Result<(), SpecError> {
        self.user_constraint(id)?;
        check_right_side(right_side)?;
        self.mutate(id, |c| c.right_side = right_side);
        Ok(())
    }

    pub fn set_penalties(
        &mut self,
        id: ConstraintId,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<(), SpecError> {
        self.user_constraint(id)?;
        check_penalties(penalty_neg, penalty_pos)?;
        self.mutate(id, |c| {
            c.penalty_neg = penalty_neg;
            c.penalty_pos = penalty_pos;
        });
        Ok(())
    }

    pub fn set_constraint_label(
        &mut self,
        id: ConstraintId,
        label: impl Into<String>,
    ) -> Result<(), SpecError> {
        let c = self.constraints.get_mut(id.0).ok_or(SpecError::InvalidConstraint(id))?;
        c.label = Some(label.into());
        Ok(())
    }


    /// `a = b`
    pub fn is_equal(&mut self, a: VariableId, b: VariableId) -> Result<ConstraintId, SpecError> {
        self.is_equal_soft(a, b, 0.0, 0.0)
    }

    /// `a <= b`
    pub fn is_smaller_or_equal(
        &mut self,
        a: VariableId,
        b: VariableId,
    ) -> Result<ConstraintId, SpecError> {
        self.is_smaller_or_equal_soft(a, b, 0.0, 0.0)
    }

    /// `a >= b`
    pub fn is_greater_or_equal(
        &mut self,
        a: VariableId,
        b: VariableId,
    ) -> Result<ConstraintId, SpecError> {
        self.is_greater_or_equal_soft(a, b, 0.0, 0.0)
    }

    pub fn is_equal_soft(
        &mut self,
        a: VariableId,
        b: VariableId,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<ConstraintId, SpecError> {
        self.relation(a, b, ConstraintOp::Eq, penalty_neg, penalty_pos)
    }

    pub fn is_smaller_or_equal_soft(
        &mut self,
        a: VariableId,
        b: VariableId,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<ConstraintId, SpecError> {
        self.relation(a, b, ConstraintOp::Le, penalty_neg, penalty_pos)
    }

    pub fn is_greater_or_equal_soft(
        &mut self,
        a: VariableId,
        b: VariableId,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<ConstraintId, SpecError> {
        self.relation(a, b, ConstraintOp::Ge, penalty_neg, penalty_pos)
    }

    fn relation(
        &mut self,
        a: VariableId,
        b: VariableId,
        op: ConstraintOp,
        penalty_neg: f64,
        penalty_pos: f64,
    ) -> Result<ConstraintId, SpecError> {
        self.add_soft_constraint(&[1.0, -1.0], &[a, b], op, 0.0, penalty_neg, penalty_pos)
    }


    /// Result of the last solve; `Error` before the first one
    pub fn result(&self) -> ResultCode {
        self.result
    }

    /// Wall time spent in the last solve
    pub fn solving_time(&self) -> Duration {
        self.solving_time
    }

    /// Values of every caller-owned variable after the last solve
    pub fn snapshot(&self) -> Snapshot {
        let variables = self
            .variables()
            .filter(|(_, v)| !v.slack)
            .map(|(_, v)| VariableSnapshot {
                label: v.label.clone(),
                value: v.value,
                min: v.min,
                max: v.max,
            })
            .collect();
        Snapshot {
            result: self.result,
            solving_time_ms: self.solving_time.as_secs_f64() * 1000.0,
            variables,
        }
    }

    /// Writing a specification to a file has no defined format yet
    pub fn save(&self, _path: impl AsRef<Path>) -> Result<(), SpecError> {
        Err(SpecError::Unsupported)
    }


    /// Validate handles and build the left side. Slacks cannot be referenced.
    fn summands(
        &self,
        coefficients: &[f64],
        variables: &[VariableId],
    ) -> Result<Vec<Summand>, SpecError> {
        if coefficients.len() != variables.len() {
            return Err(SpecError::LengthMismatch {
                coefficients: coefficients.len(),
                variables: variables.len(),
            });
        }
        let usable = |v: &VariableId| self.variables.get(v.0).is_some_and(|var| !var.slack);
        if let Some(&invalid) = variables.iter().find(|v| !usable(*v)) {
            return Err(SpecError::InvalidVariable(invalid));
        }
        Ok(coefficients
            .iter()
            .zip(variables)
            .map(|(&coeff, &var)| Summand::new(coeff, var))
            .collect())
    }

    fn user_constraint(&self, id: ConstraintId) -> Result<&Constraint, SpecError> {
        match self.constraints.get(id.0) {
            Some(c) if c.role == ConstraintRole::User => Ok(c),
            _ => Err(SpecError::InvalidConstraint(id)),
        }
    }

    /// Store a constraint, count its references and elasticise it if needed
    pub(crate) fn register(&mut self, constraint: Constraint) -> ConstraintId {
        self.retain(&constraint.left_side);
        let id = ConstraintId(self.constraints.insert(constraint));
        self.attach_elastic(id);
        id
    }

    /// Remove a constraint of any role, releasing everything it owns
    pub(crate) fn drop_constraint(&mut self, id: ConstraintId) {
        self.detach_elastic(id);
        if let Some(constraint) = self.constraints.remove(id.0) {
            self.release(&constraint.left_side);
        }
    }

    /// Remove a variable and its bound constraints. Callers have already
    /// dropped every other constraint referencing it.
    pub(crate) fn drop_variable(&mut self, id: VariableId) {
        let bounds = match self.variables.get(id.0) {
            Some(var) => [var.lower_bound, var.upper_bound],
            None => return,
        };
        for bound in bounds.into_iter().flatten() {
            self.drop_constraint(bound);
        }
        self.variables.remove(id.0);
    }

    /// Structural mutation: the elastic slack is rebuilt around the change
    fn mutate(&mut self, id: ConstraintId, change: impl FnOnce(&mut Constraint)) {
        self.detach_elastic(id);
        let Some(constraint) = self.constraints.get_mut(id.0) else {
            return;
        };
        let before = constraint.left_side.clone();
        change(constraint);
        let after = constraint.left_side.clone();
        self.release(&before);
        self.retain(&after);
        self.attach_elastic(id);
    }

    /// Set a variable's range and keep its bound constraints in step
    pub(crate) fn apply_range(&mut self, id: VariableId, min: f64, max: f64) {
        let Some(var) = self.variables.get_mut(id.0) else {
            return;
        };
        var.min = min;
        var.max = max;
        let (lower, upper) = (var.lower_bound, var.upper_bound);

        let lower = self.sync_bound(id, lower, ConstraintOp::Ge, min, min > DEFAULT_MIN);
        let upper = self.sync_bound(id, upper, ConstraintOp::Le, max, max < DEFAULT_MAX);
        if let Some(var) = self.variables.get_mut(id.0) {
            var.lower_bound = lower;
            var.upper_bound = upper;
        }
    }

    fn sync_bound(
        &mut self,
        id: VariableId,
        existing: Option<ConstraintId>,
        op: ConstraintOp,
        value: f64,
        needed: bool,
    ) -> Option<ConstraintId> {
        match (existing, needed) {
            (Some(bound), true) => {
                if let Some(c) = self.constraints.get_mut(bound.0) {
                    c.right_side = value;
                }
                Some(bound)
            }
            (Some(bound), false) => {
                self.drop_constraint(bound);
                None
            }
            (None, true) => {
                let constraint = Constraint::new(
                    vec![Summand::new(1.0, id)],
                    op,
                    value,
                    0.0,
                    0.0,
                    ConstraintRole::Bound(id),
                );
                Some(self.register(constraint))
            }
            (None, false) => None,
        }
    }

    pub(crate) fn retain(&mut self, left_side: &[Summand]) {
        for s in left_side {
            if let Some(var) = self.variables.get_mut(s.var.0) {
                var.references += 1;
            }
        }
    }

    pub(crate) fn release(&mut self, left_side: &[Summand]) {
        for s in left_side {
            if let Some(var) = self.variables.get_mut(s.var.0) {
                var.references = var.references.saturating_sub(1);
            }
        }
    }

    pub(crate) fn variable_name(&self, id: VariableId) -> String {
        match self.variable(id).and_then(Variable::label) {
            Some(label) => label.to_string(),
            None if self.variable(id).is_some_and(Variable::is_slack) => format!("s{}", id.index()),
            None => format!("x{}", id.index()),
        }
    }
}

fn check_right_side(right_side: f64) -> Result<(), SpecError> {
    if right_side.is_finite() {
        Ok(())
    } else {
        Err(SpecError::InvalidRightSide(right_side))
    }
}

fn check_penalties(neg: f64, pos: f64) -> Result<(), SpecError> {
    let valid = |p: f64| p.is_finite() && p >= 0.0;
    if valid(neg) && valid(pos) {
        Ok(())
    } else {
        Err(SpecError::InvalidPenalty { neg, pos })
    }
}

impl fmt::Display for LinearSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Variables:")?;
        for (id, var) in self.variables() {
            writeln!(
                f,
                "  {} = {} in [{}, {}]",
                self.variable_name(id),
                var.value,
                var.min,
                var.max
            )?;
        }

        writeln!(f, "Constraints:")?;
        for (id, c) in self.constraints() {
            write!(f, "  ")?;
            if let Some(label) = c.label() {
                write!(f, "{}: ", label)?;
            }
            for (i, s) in c.left_side.iter().enumerate() {
                if i > 0 {
                    write!(f, " + ")?;
                }
                write!(f, "{}*{}", s.coeff, self.variable_name(s.var))?;
            }
            write!(f, " {} {}", c.op, c.right_side)?;
            if c.is_soft() {
                write!(f, " (penalties {}, {})", c.penalty_neg, c.penalty_pos)?;
            }
            if c.suspended {
                write!(f, " [suspended]")?;
            }
            writeln!(f, "  #{}", id.index())?;
        }

        write!(f, "Result: {}", self.result)
    }
}
