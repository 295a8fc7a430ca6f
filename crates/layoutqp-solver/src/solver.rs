//! Solve orchestration: model to dense problem, feasible start, active-set
//! refinement, and the min/max size queries built on top of it.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, warn};

use crate::equation::EquationSystem;
use crate::feasibility::PhaseOne;
use crate::linalg::EPSILON;
use crate::linear_spec::{LinearSpec, SpecError};
use crate::model::{Constraint, ConstraintId, ConstraintRole, Summand, VariableId};
use crate::optimizer::{ActiveSetOptimizer, DEFAULT_MAX_ITERATIONS};
use crate::problem::{ConstraintOp, QpProblem, SoftRow};
use crate::solution::{ResultCode, Size, SolveError};

/// Tunables of a [`LinearSpec`]. The comparison tolerance is fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Bound on active-set iterations and phase one pivots
    max_iterations: usize,
    /// Penalty of the pins added by the size queries
    size_penalty: f64,
    /// Target `max_size` pulls towards
    max_size_sentinel: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            size_penalty: 5.0,
            max_size_sentinel: 32000.0,
        }
    }
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_size_penalty(mut self, penalty: f64) -> Self {
        self.size_penalty = penalty;
        self
    }

    pub fn with_max_size_sentinel(mut self, sentinel: f64) -> Self {
        self.max_size_sentinel = sentinel;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn size_penalty(&self) -> f64 {
        self.size_penalty
    }

    pub fn max_size_sentinel(&self) -> f64 {
        self.max_size_sentinel
    }
}

/// Solve a dense problem: feasible start, then active-set refinement
pub fn solve_problem(problem: &QpProblem, options: &SolverOptions) -> Result<Vec<f64>, SolveError> {
    let variables = problem.variable_count;
    let constraints = problem.num_constraints();
    if variables > constraints {
        return Err(SolveError::TooManyVariables { variables, constraints });
    }

    let start = initial_point(problem, options)?;
    ActiveSetOptimizer::new(problem)
        .with_max_iterations(options.max_iterations)
        .solve(&start)
}

/// Any point satisfying the hard rows: the basic solution of the eliminated
/// system if it holds up, otherwise phase one simplex
fn initial_point(problem: &QpProblem, options: &SolverOptions) -> Result<Vec<f64>, SolveError> {
    match eliminate(problem) {
        Some(x) if problem.is_feasible(&x, EPSILON) => return Ok(x),
        Some(_) => debug!("basic solution violates an inequality, running phase one"),
        None => debug!("elimination found no basic solution, running phase one"),
    }
    PhaseOne::new()
        .with_max_iterations(options.max_iterations)
        .find_feasible_point(problem)
}

/// Gauss-Jordan over the hard rows with one slack column per inequality
fn eliminate(problem: &QpProblem) -> Option<Vec<f64>> {
    let n = problem.variable_count;
    let rows = problem.hard.len();
    let mut system = EquationSystem::new(rows, n + rows);

    let mut slack_index = n;
    for (r, row) in problem.hard.iter().enumerate() {
        system.set_b(r, row.rhs);
        for (c, &coefficient) in row.coefficients.iter().enumerate() {
            system.set_a(r, c, coefficient);
        }
        match row.op {
            ConstraintOp::Le => {
                system.set_a(r, slack_index, 1.0);
                slack_index += 1;
            }
            ConstraintOp::Ge => {
                system.set_a(r, slack_index, -1.0);
                slack_index += 1;
            }
            ConstraintOp::Eq => {}
        }
    }

    system.remove_linearly_dependent_rows();
    system.remove_unused_variables();
    if !system.gauss_jordan() {
        return None;
    }

    let mut results = vec![0.0; n + rows];
    system.results(&mut results);
    results.truncate(n);
    Some(results)
}

impl LinearSpec {
    /// Solve the specification and write the values back to its variables
    pub fn solve(&mut self) -> ResultCode {
        let started = Instant::now();
        let (problem, columns) = self.build_problem();
        debug!(
            "solving {} variables, {} hard and {} soft rows",
            problem.variable_count,
            problem.hard.len(),
            problem.soft.len()
        );

        self.result = match solve_problem(&problem, &self.options) {
            Ok(x) => {
                for (&id, &value) in columns.iter().zip(&x) {
                    if let Some(var) = self.variables.get_mut(id.0) {
                        var.value = value;
                    }
                }
                ResultCode::Optimal
            }
            Err(e) => {
                debug!("solve failed: {}", e);
                e.result_code()
            }
        };
        self.solving_time = started.elapsed();
        debug!("solve finished: {} in {:?}", self.result, self.solving_time);
        self.result
    }

    /// Smallest `(width, height)` the hard constraints allow
    pub fn min_size(&mut self, width: VariableId, height: VariableId) -> Result<Size, SpecError> {
        self.size_query(width, height, 0.0, Size::ZERO)
    }

    /// Largest `(width, height)` the hard constraints allow
    pub fn max_size(&mut self, width: VariableId, height: VariableId) -> Result<Size, SpecError> {
        let sentinel = self.options.max_size_sentinel;
        self.size_query(width, height, sentinel, Size::UNBOUNDED)
    }

    /// Solve with every soft constraint suspended and `width`/`height` pinned
    /// towards `target`, then restore the model
    fn size_query(
        &mut self,
        width: VariableId,
        height: VariableId,
        target: f64,
        unbounded: Size,
    ) -> Result<Size, SpecError> {
        for id in [width, height] {
            if self.variable(id).is_none() {
                return Err(SpecError::InvalidVariable(id));
            }
        }

        let suspended = self.suspend_soft_constraints();
        let penalty = self.options.size_penalty;
        let pins = [height, width].map(|id| {
            let pin = Constraint::new(
                vec![Summand::new(1.0, id)],
                ConstraintOp::Eq,
                target,
                penalty,
                penalty,
                ConstraintRole::User,
            );
            self.register(pin)
        });

        let result = self.solve();

        for pin in pins {
            self.drop_constraint(pin);
        }
        for id in suspended {
            self.set_suspended(id, false);
        }

        if result == ResultCode::Unbounded {
            return Ok(unbounded);
        }
        if result != ResultCode::Optimal {
            warn!("could not solve the layout specification ({})", result);
        }

        let value = |id: VariableId| self.value(id).unwrap_or(f64::NAN);
        Ok(Size::new(value(width), value(height)))
    }

    fn suspend_soft_constraints(&mut self) -> Vec<ConstraintId> {
        let soft: Vec<ConstraintId> = self
            .constraints()
            .filter(|(_, c)| c.role() == ConstraintRole::User && c.is_soft() && !c.is_suspended())
            .map(|(id, _)| id)
            .collect();
        for &id in &soft {
            self.set_suspended(id, true);
        }
        debug!("suspended {} soft constraints", soft.len());
        soft
    }

    /// Suspend or resume a constraint together with its slack penalty and
    /// slack bounds
    fn set_suspended(&mut self, id: ConstraintId, suspended: bool) {
        let elastic = match self.constraints.get_mut(id.0) {
            Some(c) => {
                c.suspended = suspended;
                c.elastic
            }
            None => return,
        };
        let Some(elastic) = elastic else {
            return;
        };

        let bounds = self
            .variables
            .get(elastic.slack.0)
            .map(|v| [v.lower_bound, v.upper_bound]);
        let owned = bounds.into_iter().flatten().flatten();
        for owned in std::iter::once(elastic.penalty).chain(owned) {
            if let Some(c) = self.constraints.get_mut(owned.0) {
                c.suspended = suspended;
            }
        }
    }

    /// Dense problem over the variables referenced by live constraints.
    ///
    /// Returns the problem and the variable behind each column.
    pub(crate) fn build_problem(&self) -> (QpProblem, Vec<VariableId>) {
        let active: Vec<&Constraint> = self
            .constraints
            .iter()
            .map(|(_, c)| c)
            .filter(|c| !c.suspended)
            .collect();

        let mut column_of: BTreeMap<VariableId, usize> = active
            .iter()
            .flat_map(|c| c.left_side.iter().map(|s| (s.var, 0)))
            .collect();
        for (column, index) in column_of.values_mut().enumerate() {
            *index = column;
        }
        let columns: Vec<VariableId> = column_of.keys().copied().collect();

        let mut problem = QpProblem::new(columns.len());
        for c in active {
            let mut coefficients = vec![0.0; columns.len()];
            for s in &c.left_side {
                if let Some(&column) = column_of.get(&s.var) {
                    coefficients[column] += s.coeff;
                }
            }
            if c.is_objective_term() {
                let weight = SoftRow::weight_for(c.penalty_neg, c.penalty_pos);
                problem.add_soft(coefficients, c.right_side, weight);
            } else {
                problem.add_hard(coefficients, c.op, c.right_side);
            }
        }
        (problem, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn assert_close(actual: f64, expected: f64, what: &str) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "{} = {} (expected {})",
            what,
            actual,
            expected
        );
    }

    fn value(spec: &LinearSpec, id: VariableId) -> f64 {
        spec.value(id).expect("live variable")
    }

    /// `x1 = 0, x1 <= x2 <= x3, x3 - x1 = 20` with soft gaps of 10 and 5
    fn scenario_b() -> (LinearSpec, [VariableId; 3], ConstraintId) {
        let mut spec = LinearSpec::new();
        let x1 = spec.add_named_variable("x1");
        let x2 = spec.add_named_variable("x2");
        let x3 = spec.add_named_variable("x3");
        spec.add_constraint(&[1.0], &[x1], ConstraintOp::Eq, 0.0).expect("valid");
        spec.is_smaller_or_equal(x1, x2).expect("valid");
        spec.is_smaller_or_equal(x2, x3).expect("valid");
        spec.add_constraint(&[1.0, -1.0], &[x3, x1], ConstraintOp::Eq, 20.0).expect("valid");
        let gap = spec
            .add_soft_constraint(&[1.0, -1.0], &[x2, x1], ConstraintOp::Eq, 10.0, 5.0, 5.0)
            .expect("valid");
        spec.add_soft_constraint(&[1.0, -1.0], &[x3, x2], ConstraintOp::Eq, 5.0, 5.0, 5.0)
            .expect("valid");
        (spec, [x1, x2, x3], gap)
    }

    #[test]
    fn test_scenario_a_bounds_only() {
        init_logger();
        let mut spec = LinearSpec::new();
        let x1 = spec.add_variable();
        let x2 = spec.add_variable();
        spec.add_constraint(&[1.0], &[x1], ConstraintOp::Le, 108.0).expect("valid");
        spec.add_constraint(&[1.0], &[x2], ConstraintOp::Ge, 113.0).expect("valid");

        assert_eq!(spec.solve(), ResultCode::Optimal);
        assert_close(value(&spec, x1), 108.0, "x1");
        assert_close(value(&spec, x2), 113.0, "x2");
    }

    #[test]
    fn test_scenario_b_soft_targets() {
        init_logger();
        let (mut spec, [x1, x2, x3], _) = scenario_b();

        assert_eq!(spec.solve(), ResultCode::Optimal);
        assert_close(value(&spec, x1), 0.0, "x1");
        assert_close(value(&spec, x2), 12.5, "x2");
        assert_close(value(&spec, x3), 20.0, "x3");
        assert_eq!(spec.result(), ResultCode::Optimal);
    }

    #[test]
    fn test_unique_point_is_reproduced() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        let y = spec.add_variable();
        spec.add_constraint(&[1.0, 1.0], &[x, y], ConstraintOp::Eq, 10.0).expect("valid");
        spec.add_constraint(&[1.0, -1.0], &[x, y], ConstraintOp::Eq, 2.0).expect("valid");

        assert_eq!(spec.solve(), ResultCode::Optimal);
        assert_close(value(&spec, x), 6.0, "x");
        assert_close(value(&spec, y), 4.0, "y");
    }

    #[test]
    fn test_more_variables_than_constraints_is_infeasible() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        let y = spec.add_variable();
        spec.add_constraint(&[1.0, 1.0], &[x, y], ConstraintOp::Eq, 5.0).expect("valid");

        assert_eq!(spec.solve(), ResultCode::Infeasible);
        assert!(value(&spec, x).is_nan(), "no values are written");
    }

    #[test]
    fn test_contradictory_bounds_are_infeasible() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        spec.add_constraint(&[1.0], &[x], ConstraintOp::Ge, 5.0).expect("valid");
        spec.add_constraint(&[1.0], &[x], ConstraintOp::Le, 3.0).expect("valid");

        assert_eq!(spec.solve(), ResultCode::Infeasible);
    }

    #[test]
    fn test_remove_and_readd_is_idempotent() {
        let (mut spec, [x1, x2, x3], gap) = scenario_b();
        assert_eq!(spec.solve(), ResultCode::Optimal);
        let before = [value(&spec, x1), value(&spec, x2), value(&spec, x3)];

        assert!(spec.remove_constraint(gap));
        spec.add_soft_constraint(&[1.0, -1.0], &[x2, x1], ConstraintOp::Eq, 10.0, 5.0, 5.0)
            .expect("valid");
        assert_eq!(spec.solve(), ResultCode::Optimal);
        let after = [value(&spec, x1), value(&spec, x2), value(&spec, x3)];

        for (a, b) in before.iter().zip(&after) {
            assert_close(*b, *a, "re-solved value");
        }
    }

    #[test]
    fn test_higher_penalty_never_increases_violation() {
        init_logger();
        let mut last_violation = f64::INFINITY;
        for penalty in [0.5, 1.0, 2.0, 4.0, 8.0] {
            let mut spec = LinearSpec::new();
            let x = spec.add_variable();
            // x should stay below 100 but is pulled towards 150
            spec.add_soft_constraint(&[1.0], &[x], ConstraintOp::Le, 100.0, penalty, 0.0)
                .expect("valid");
            spec.add_soft_constraint(&[1.0], &[x], ConstraintOp::Eq, 150.0, 1.0, 1.0)
                .expect("valid");

            assert_eq!(spec.solve(), ResultCode::Optimal, "penalty {}", penalty);
            let violation = value(&spec, x) - 100.0;
            let expected = 50.0 / (1.0 + penalty * penalty);
            assert_close(violation, expected, "violation");
            assert!(
                violation <= last_violation + 1e-6,
                "penalty {} increased the violation",
                penalty
            );
            last_violation = violation;
        }
    }

    #[test]
    fn test_soft_inequality_yields_to_hard_bound() {
        init_logger();
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        spec.set_min(x, 150.0).expect("valid");
        let c = spec
            .add_soft_constraint(&[1.0], &[x], ConstraintOp::Le, 100.0, 5.0, 0.0)
            .expect("valid");

        assert_eq!(spec.solve(), ResultCode::Optimal);
        assert_close(value(&spec, x), 150.0, "x");
        let slack = spec.constraint(c).and_then(Constraint::elastic).expect("elastic").slack;
        assert_close(value(&spec, slack), 50.0, "slack");
    }

    #[test]
    fn test_scenario_c_size_queries() {
        init_logger();
        let mut spec = LinearSpec::new();
        let w = spec.add_named_variable("width");
        let h = spec.add_named_variable("height");
        spec.set_range(w, 10.0, 500.0).expect("valid");
        spec.set_range(h, 20.0, 300.0).expect("valid");
        let prefer_w = spec
            .add_soft_constraint(&[1.0], &[w], ConstraintOp::Eq, 100.0, 5.0, 5.0)
            .expect("valid");
        spec.add_soft_constraint(&[1.0], &[h], ConstraintOp::Eq, 150.0, 5.0, 5.0)
            .expect("valid");
        let constraints = spec.constraint_count();

        let min = spec.min_size(w, h).expect("live variables");
        assert_close(min.width, 10.0, "min width");
        assert_close(min.height, 20.0, "min height");

        let max = spec.max_size(w, h).expect("live variables");
        assert_close(max.width, 500.0, "max width");
        assert_close(max.height, 300.0, "max height");

        assert_eq!(spec.constraint_count(), constraints, "pins are removed");
        assert!(!spec.constraint(prefer_w).expect("live").is_suspended());

        assert_eq!(spec.solve(), ResultCode::Optimal);
        assert_close(value(&spec, w), 100.0, "preferred width");
        assert_close(value(&spec, h), 150.0, "preferred height");
    }

    #[test]
    fn test_size_query_suspends_elastic_constraints() {
        let mut spec = LinearSpec::new();
        let w = spec.add_variable();
        let h = spec.add_variable();
        spec.set_range(w, 0.0, 400.0).expect("valid");
        spec.set_range(h, 0.0, 400.0).expect("valid");
        let c = spec
            .add_soft_constraint(&[1.0], &[w], ConstraintOp::Ge, 50.0, 0.0, 2.0)
            .expect("valid");

        let min = spec.min_size(w, h).expect("live variables");
        assert_close(min.width, 0.0, "min width ignores the soft minimum");
        assert_close(min.height, 0.0, "min height");

        let elastic = *spec.constraint(c).and_then(Constraint::elastic).expect("elastic");
        assert!(!spec.constraint(elastic.penalty).expect("penalty").is_suspended());
    }

    #[test]
    fn test_size_query_rejects_stale_variable() {
        let mut spec = LinearSpec::new();
        let w = spec.add_variable();
        let h = spec.add_variable();
        assert!(spec.remove_variable(h));
        assert_eq!(spec.min_size(w, h), Err(SpecError::InvalidVariable(h)));
    }

    #[test]
    fn test_iteration_limit_is_degenerate() {
        let mut spec = LinearSpec::with_options(SolverOptions::new().with_max_iterations(1));
        let x = spec.add_variable();
        spec.add_constraint(&[1.0], &[x], ConstraintOp::Le, 5.0).expect("valid");
        spec.add_soft_constraint(&[1.0], &[x], ConstraintOp::Eq, 2.0, 1.0, 1.0)
            .expect("valid");

        assert_eq!(spec.solve(), ResultCode::Degenerate);
    }

    #[test]
    fn test_snapshot_reports_user_variables() {
        let (mut spec, _, _) = scenario_b();
        spec.solve();
        let snapshot = spec.snapshot();
        assert_eq!(snapshot.result, ResultCode::Optimal);
        assert_eq!(snapshot.variables.len(), 3);
        assert_eq!(snapshot.variables[1].label.as_deref(), Some("x2"));
        assert_close(snapshot.variables[1].value, 12.5, "x2");
        assert!(snapshot.solving_time_ms >= 0.0);
    }

    #[test]
    fn test_build_problem_skips_suspended_rows() {
        let (mut spec, _, gap) = scenario_b();
        let (problem, columns) = spec.build_problem();
        assert_eq!(columns.len(), 3);
        assert_eq!(problem.hard.len(), 4);
        assert_eq!(problem.soft.len(), 2);

        spec.set_suspended(gap, true);
        let (problem, _) = spec.build_problem();
        assert_eq!(problem.soft.len(), 1);
    }
}
