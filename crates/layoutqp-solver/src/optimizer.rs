//! Primal active-set method for convex quadratic programs.
//!
//! The program is
//!
//! ```text
//!     minimize    1/2 x' G x + d' x
//!     subject to  a_i' x  = b_i,  i in E
//!                 a_i' x >= b_i,  i in I
//! ```
//!
//! where `G = W' W` and `d = -W' r` come from the weighted soft rows, so the
//! objective is `1/2 |W x - r|^2` up to a constant. `<=` rows are negated into
//! `>=` form everywhere. Each iteration solves the equality-constrained
//! subproblem on the current working set with the null-space method, then
//! either takes a (possibly blocked) step or drops the constraint with the most
//! negative Lagrange multiplier.

use log::{debug, trace};

use crate::linalg::{self, Matrix, fuzzy_equals, is_zero};
use crate::problem::QpProblem;
use crate::solution::SolveError;

/// Default bound on active-set iterations before reporting cycling
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

pub struct ActiveSetOptimizer<'a> {
    problem: &'a QpProblem,
    /// Quadratic term `W' W`
    g: Matrix,
    /// Linear term `-W' r`
    d: Vec<f64>,
    max_iterations: usize,
}

impl<'a> ActiveSetOptimizer<'a> {
    pub fn new(problem: &'a QpProblem) -> Self {
        let n = problem.variable_count;
        let m = problem.soft.len();

        let mut w = Matrix::zeros(m, n);
        let mut weighted_rhs = vec![0.0; m];
        for (c, row) in problem.soft.iter().enumerate() {
            for (j, &coefficient) in row.coefficients.iter().enumerate() {
                w[(c, j)] = coefficient * row.weight;
            }
            weighted_rhs[c] = row.rhs * row.weight;
        }

        let wt = w.transpose();
        let g = wt.multiply(&w);
        let d = wt.multiply_vector(&weighted_rhs).into_iter().map(|v| -v).collect();

        Self {
            problem,
            g,
            d,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn quadratic_term(&self) -> &Matrix {
        &self.g
    }

    pub fn linear_term(&self) -> &[f64] {
        &self.d
    }

    /// `1/2 x' G x + d' x`
    pub fn objective(&self, x: &[f64]) -> f64 {
        let gx = self.g.multiply_vector(x);
        let quadratic: f64 = gx.iter().zip(x).map(|(a, b)| a * b).sum();
        let linear: f64 = self.d.iter().zip(x).map(|(a, b)| a * b).sum();
        0.5 * quadratic + linear
    }

    /// `G x + d`
    pub fn gradient(&self, x: &[f64]) -> Vec<f64> {
        let mut gradient = self.g.multiply_vector(x);
        for (gi, di) in gradient.iter_mut().zip(&self.d) {
            *gi += di;
        }
        gradient
    }

    /// Refine the feasible point `start` to the constrained optimum.
    pub fn solve(&self, start: &[f64]) -> Result<Vec<f64>, SolveError> {
        let n = self.problem.variable_count;
        debug_assert_eq!(start.len(), n, "start point has wrong dimension");

        let mut x = start.to_vec();

        // equalities always bind; inequalities bind if tight at the start
        let mut active: Vec<usize> = self
            .problem
            .hard
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                row.is_equality() || fuzzy_equals(row.signed_value(&x), row.signed_rhs())
            })
            .map(|(i, _)| i)
            .collect();

        debug!(
            "active set start: {} variables, {} hard rows, {} soft rows, {} initially active",
            n,
            self.problem.hard.len(),
            self.problem.soft.len(),
            active.len()
        );

        for iteration in 0..self.max_iterations {
            let mut a = self.active_matrix(&active);
            let independent = linalg::remove_linearly_dependent_rows(&mut a);

            let gradient = self.gradient(&x);
            let p = self.solve_subproblem(&a, &gradient)?;

            if is_zero(&p) {
                let lambda = self.lagrange_multipliers(&a, &gradient)?;

                // equality multipliers are free in sign and never dropped
                let mut min_lambda = 0.0;
                let mut min_index = None;
                let independent_slots =
                    active.iter().enumerate().filter(|(slot, _)| independent[*slot]);
                for ((slot, &row), &value) in independent_slots.zip(&lambda) {
                    if self.problem.hard[row].is_equality() {
                        continue;
                    }
                    if value < min_lambda {
                        min_lambda = value;
                        min_index = Some(slot);
                    }
                }

                match min_index {
                    Some(slot) if !fuzzy_equals(min_lambda, 0.0) => {
                        trace!(
                            "iteration {}: dropping row {} (lambda {:.6})",
                            iteration, active[slot], min_lambda
                        );
                        active.remove(slot);
                    }
                    _ => {
                        debug!("active set converged after {} iterations", iteration + 1);
                        return Ok(x);
                    }
                }
            } else {
                let (alpha, blocking) = self.step_length(&x, &p, &active);
                if let Some(row) = blocking {
                    trace!("iteration {}: step {:.6} blocked by row {}", iteration, alpha, row);
                    active.push(row);
                } else {
                    trace!("iteration {}: full step", iteration);
                }
                for (xi, pi) in x.iter_mut().zip(&p) {
                    *xi += alpha * pi;
                }
            }
        }

        Err(SolveError::IterationLimit(self.max_iterations))
    }

    /// Rows of the working set in `>=` form
    fn active_matrix(&self, active: &[usize]) -> Matrix {
        let n = self.problem.variable_count;
        let mut a = Matrix::zeros(active.len(), n);
        for (i, &index) in active.iter().enumerate() {
            let row = &self.problem.hard[index];
            let sign = row.op.sign();
            for (j, &coefficient) in row.coefficients.iter().enumerate() {
                a[(i, j)] = sign * coefficient;
            }
        }
        a
    }

    /// Solve `min 1/2 p' G p + g' p  s.t.  A p = 0` for a full row rank `A`.
    ///
    /// With `A' = Q R`, the trailing `n - m` columns of `Q` form a basis `Z`
    /// of the null space of `A`, and `(Z' G Z) p_z = -Z' g`, `p = Z p_z`.
    fn solve_subproblem(&self, a: &Matrix, gradient: &[f64]) -> Result<Vec<f64>, SolveError> {
        let n = self.problem.variable_count;
        let rank = a.rows();

        if rank == n {
            return Ok(vec![0.0; n]);
        }
        let qr = linalg::qr_decomposition(a.transpose())?;

        let z = qr.q.columns_from(rank);
        let zt = z.transpose();

        let rhs: Vec<f64> = zt.multiply_vector(gradient).into_iter().map(|v| -v).collect();
        let reduced_hessian = zt.multiply(&self.g.multiply(&z));

        let pz = linalg::solve(reduced_hessian, rhs)?;
        Ok(z.multiply_vector(&pz))
    }

    /// Solve `A' lambda = g` on the independent rows of `A'`
    fn lagrange_multipliers(&self, a: &Matrix, gradient: &[f64]) -> Result<Vec<f64>, SolveError> {
        let expected = a.rows();
        let mut at = a.transpose();
        let independent = linalg::remove_linearly_dependent_rows(&mut at);
        if at.rows() != expected {
            return Err(SolveError::LagrangeRankMismatch {
                rank: at.rows(),
                expected,
            });
        }

        let rhs: Vec<f64> = gradient
            .iter()
            .zip(&independent)
            .filter(|(_, keep)| **keep)
            .map(|(&g, _)| g)
            .collect();

        linalg::solve(at, rhs)
    }

    /// Largest `alpha` in `[0, 1]` keeping every inactive inequality satisfied
    /// along `p`, and the row that blocks it if `alpha < 1`
    fn step_length(&self, x: &[f64], p: &[f64], active: &[usize]) -> (f64, Option<usize>) {
        let mut alpha = 1.0;
        let mut blocking = None;

        for (i, row) in self.problem.hard.iter().enumerate() {
            if row.is_equality() || active.contains(&i) {
                continue;
            }

            let divider = row.signed_value(p);
            if divider > 0.0 || fuzzy_equals(divider, 0.0) {
                continue;
            }

            // (b_i - a_i' x) / a_i' p
            let alpha_i = (row.signed_rhs() - row.signed_value(x)) / divider;
            if alpha_i < alpha {
                alpha = alpha_i;
                blocking = Some(i);
            }
        }

        (alpha.max(0.0), blocking)
    }
}
