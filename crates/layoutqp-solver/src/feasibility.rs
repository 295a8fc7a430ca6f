use log::{debug, trace};

use crate::linalg::EPSILON;
use crate::optimizer::DEFAULT_MAX_ITERATIONS;
use crate::problem::{ConstraintOp, QpProblem};
use crate::solution::SolveError;

/// Phase-one simplex over the hard rows of a [`QpProblem`].
///
/// Used when the basic solution from elimination violates an inequality.
/// Variables are free, so each column is split into `x+ - x-`.
pub struct PhaseOne {
    /// Maximum pivots before giving up
    max_iterations: usize,
}

impl Default for PhaseOne {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl PhaseOne {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Find any point satisfying every hard row of `problem`
    pub fn find_feasible_point(&self, problem: &QpProblem) -> Result<Vec<f64>, SolveError> {
        let mut tableau = Tableau::build(problem);

        let mut pivots = 0;
        while let Some(pivot_col) = tableau.find_pivot_column() {
            if pivots == self.max_iterations {
                debug!("phase one stopped after {} pivots", pivots);
                return Err(SolveError::IterationLimit(self.max_iterations));
            }
            let Some(pivot_row) = tableau.find_pivot_row(pivot_col) else {
                // the phase one objective is bounded, so this is numerical noise
                return Err(SolveError::NoFeasiblePoint);
            };
            trace!("phase one pivot {}: row {}, column {}", pivots, pivot_row, pivot_col);
            tableau.pivot(pivot_row, pivot_col);
            pivots += 1;
        }

        let infeasibility = tableau.infeasibility();
        debug!("phase one finished after {} pivots, infeasibility {:.6}", pivots, infeasibility);
        if infeasibility > EPSILON {
            return Err(SolveError::NoFeasiblePoint);
        }
        Ok(tableau.point())
    }
}

/// Columns: `x+` (n), `x-` (n), slack/surplus per inequality, artificials, rhs.
/// The last row holds the phase one objective.
struct Tableau {
    data: Vec<Vec<f64>>,
    basic_vars: Vec<usize>,
    n_vars: usize,
    artificial_start: usize,
}

impl Tableau {
    fn build(problem: &QpProblem) -> Self {
        let n_vars = problem.variable_count;
        let n_constraints = problem.hard.len();

        // rows are flipped to get a non-negative rhs; a slack with a +1
        // coefficient after flipping can start in the basis
        let slack_coefficients: Vec<Option<f64>> = problem
            .hard
            .iter()
            .map(|row| {
                let flip = if row.rhs < 0.0 { -1.0 } else { 1.0 };
                match row.op {
                    ConstraintOp::Le => Some(flip),
                    ConstraintOp::Ge => Some(-flip),
                    ConstraintOp::Eq => None,
                }
            })
            .collect();

        let n_slack = slack_coefficients.iter().flatten().count();
        let n_artificial = slack_coefficients
            .iter()
            .filter(|c| !matches!(c, Some(v) if *v > 0.0))
            .count();

        let slack_start = 2 * n_vars;
        let artificial_start = slack_start + n_slack;
        let rhs_col = artificial_start + n_artificial;

        let mut data = vec![vec![0.0; rhs_col + 1]; n_constraints + 1];
        let mut basic_vars = vec![0; n_constraints];

        let mut slack_idx = slack_start;
        let mut artificial_idx = artificial_start;

        for (i, (row, slack)) in problem.hard.iter().zip(&slack_coefficients).enumerate() {
            let flip = if row.rhs < 0.0 { -1.0 } else { 1.0 };
            for (j, &coef) in row.coefficients.iter().enumerate() {
                data[i][j] = flip * coef;
                data[i][n_vars + j] = -flip * coef;
            }
            data[i][rhs_col] = flip * row.rhs;

            match *slack {
                Some(coef) if coef > 0.0 => {
                    data[i][slack_idx] = coef;
                    basic_vars[i] = slack_idx;
                    slack_idx += 1;
                }
                Some(coef) => {
                    data[i][slack_idx] = coef; // surplus
                    slack_idx += 1;
                    data[i][artificial_idx] = 1.0;
                    basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
                None => {
                    data[i][artificial_idx] = 1.0;
                    basic_vars[i] = artificial_idx;
                    artificial_idx += 1;
                }
            }
        }

        // maximize -sum(artificials), priced out against the basic artificials
        let obj_row = n_constraints;
        for j in artificial_start..rhs_col {
            data[obj_row][j] = -1.0;
        }
        for i in 0..n_constraints {
            if basic_vars[i] >= artificial_start {
                for j in 0..=rhs_col {
                    data[obj_row][j] += data[i][j];
                }
            }
        }

        Self {
            data,
            basic_vars,
            n_vars,
            artificial_start,
        }
    }

    fn rhs_col(&self) -> usize {
        self.data[0].len() - 1
    }

    /// Column with the most positive reduced cost
    fn find_pivot_column(&self) -> Option<usize> {
        let obj_row = self.data.len() - 1;
        let mut max_val = EPSILON;
        let mut max_col = None;
        for j in 0..self.rhs_col() {
            if self.data[obj_row][j] > max_val {
                max_val = self.data[obj_row][j];
                max_col = Some(j);
            }
        }
        max_col
    }

    fn find_pivot_row(&self, col: usize) -> Option<usize> {
        let n_constraints = self.data.len() - 1;
        let rhs_col = self.rhs_col();

        let mut min_ratio = f64::INFINITY;
        let mut min_row = None;
        for i in 0..n_constraints {
            let val = self.data[i][col];
            if val > EPSILON {
                let ratio = self.data[i][rhs_col] / val;
                if ratio >= 0.0 && ratio < min_ratio {
                    min_ratio = ratio;
                    min_row = Some(i);
                }
            }
        }
        min_row
    }

    fn pivot(&mut self, row: usize, col: usize) {
        self.basic_vars[row] = col;

        let pivot_val = self.data[row][col];
        for value in self.data[row].iter_mut() {
            *value /= pivot_val;
        }

        let pivot_row = self.data[row].clone();
        for (i, other) in self.data.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = other[col];
            if factor == 0.0 {
                continue;
            }
            for (value, p) in other.iter_mut().zip(&pivot_row) {
                *value -= factor * p;
            }
        }
    }

    /// Total value of the artificials still in the basis
    fn infeasibility(&self) -> f64 {
        let rhs_col = self.rhs_col();
        self.basic_vars
            .iter()
            .enumerate()
            .filter(|&(_, &basic)| basic >= self.artificial_start)
            .map(|(i, _)| self.data[i][rhs_col].abs())
            .sum()
    }

    fn point(&self) -> Vec<f64> {
        let rhs_col = self.rhs_col();
        let mut values = vec![0.0; self.n_vars];
        for (i, &basic) in self.basic_vars.iter().enumerate() {
            if basic < self.n_vars {
                values[basic] += self.data[i][rhs_col];
            } else if basic < 2 * self.n_vars {
                values[basic - self.n_vars] -= self.data[i][rhs_col];
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::ResultCode;

    #[test]
    fn test_equalities() {
        // x + y = 4, x - y = 2
        let mut problem = QpProblem::new(2);
        problem.add_hard(vec![1.0, 1.0], ConstraintOp::Eq, 4.0);
        problem.add_hard(vec![1.0, -1.0], ConstraintOp::Eq, 2.0);

        let x = PhaseOne::new().find_feasible_point(&problem).expect("feasible");
        assert!((x[0] - 3.0).abs() < 1e-6, "x = {} (expected 3)", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-6, "y = {} (expected 1)", x[1]);
    }

    #[test]
    fn test_slack_absorbs_violation() {
        // x - s <= 100, s >= 0, x >= 150: elimination alone would set s = 0
        let mut problem = QpProblem::new(2);
        problem.add_hard(vec![1.0, -1.0], ConstraintOp::Le, 100.0);
        problem.add_hard(vec![0.0, 1.0], ConstraintOp::Ge, 0.0);
        problem.add_hard(vec![1.0, 0.0], ConstraintOp::Ge, 150.0);

        let x = PhaseOne::new().find_feasible_point(&problem).expect("feasible");
        assert!(problem.is_feasible(&x, 1e-6), "point {:?} violates a row", x);
    }

    #[test]
    fn test_negative_range() {
        let mut problem = QpProblem::new(1);
        problem.add_hard(vec![1.0], ConstraintOp::Le, -10.0);
        problem.add_hard(vec![1.0], ConstraintOp::Ge, -20.0);

        let x = PhaseOne::new().find_feasible_point(&problem).expect("feasible");
        assert!(problem.is_feasible(&x, 1e-6), "point {:?} violates a row", x);
        assert!(x[0] < 0.0);
    }

    #[test]
    fn test_infeasible() {
        let mut problem = QpProblem::new(1);
        problem.add_hard(vec![1.0], ConstraintOp::Ge, 5.0);
        problem.add_hard(vec![1.0], ConstraintOp::Le, 3.0);

        let result = PhaseOne::new().find_feasible_point(&problem);
        assert_eq!(result, Err(SolveError::NoFeasiblePoint));
    }

    #[test]
    fn test_pivot_limit_is_not_infeasibility() {
        let mut problem = QpProblem::new(2);
        problem.add_hard(vec![1.0, 1.0], ConstraintOp::Eq, 4.0);
        problem.add_hard(vec![1.0, -1.0], ConstraintOp::Eq, 2.0);

        let result = PhaseOne::new().with_max_iterations(1).find_feasible_point(&problem);
        assert_eq!(result, Err(SolveError::IterationLimit(1)));
        assert_eq!(result.map_err(|e| e.result_code()), Err(ResultCode::Degenerate));
    }
}
