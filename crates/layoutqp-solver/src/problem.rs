/// Dense quadratic program handed from the model to the numerical layers.
///
/// Column `j` of every row is the `j`-th used variable.
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Number of columns (used variables)
    pub variable_count: usize,
    /// Rows that must hold exactly: hard constraints and elastic inequalities
    pub hard: Vec<HardRow>,
    /// Soft equalities making up the quadratic penalty
    pub soft: Vec<SoftRow>,
}

/// A constraint that must hold at every accepted point
#[derive(Debug, Clone)]
pub struct HardRow {
    /// Coefficient per variable column
    pub coefficients: Vec<f64>,
    /// Comparison operator
    pub op: ConstraintOp,
    /// Right-hand side value
    pub rhs: f64,
}

/// A soft equality `coefficients . x = rhs` penalized quadratically
#[derive(Debug, Clone)]
pub struct SoftRow {
    /// Coefficient per variable column
    pub coefficients: Vec<f64>,
    /// Target value
    pub rhs: f64,
    /// Effective weight derived from the two penalties
    pub weight: f64,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOp {
    /// Less than or equal (<=)
    #[cfg_attr(feature = "serde", serde(alias = "<="))]
    Le,
    /// Greater than or equal (>=)
    #[cfg_attr(feature = "serde", serde(alias = ">="))]
    Ge,
    /// Equal (=)
    #[cfg_attr(feature = "serde", serde(alias = "="))]
    Eq,
}

impl ConstraintOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ConstraintOp::Le => "<=",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Eq => "=",
        }
    }

    /// Factor that turns a row into `>=` form: `Le` rows are negated
    pub fn sign(self) -> f64 {
        match self {
            ConstraintOp::Le => -1.0,
            ConstraintOp::Ge | ConstraintOp::Eq => 1.0,
        }
    }
}

impl std::fmt::Display for ConstraintOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl HardRow {
    pub fn is_equality(&self) -> bool {
        self.op == ConstraintOp::Eq
    }

    /// Left-hand side at `x`
    pub fn value(&self, x: &[f64]) -> f64 {
        self.coefficients.iter().zip(x).map(|(a, b)| a * b).sum()
    }

    /// Left-hand side at `x` in `>=` form
    pub fn signed_value(&self, x: &[f64]) -> f64 {
        self.op.sign() * self.value(x)
    }

    /// Right-hand side in `>=` form
    pub fn signed_rhs(&self) -> f64 {
        self.op.sign() * self.rhs
    }

    /// Whether `x` satisfies the row within `tolerance`
    pub fn is_satisfied(&self, x: &[f64], tolerance: f64) -> bool {
        let slack = self.signed_value(x) - self.signed_rhs();
        match self.op {
            ConstraintOp::Eq => slack.abs() < tolerance,
            ConstraintOp::Le | ConstraintOp::Ge => slack > -tolerance,
        }
    }
}

impl SoftRow {
    /// Combine the two directional penalties into one weight: their sum,
    /// halved when both are active.
    pub fn weight_for(penalty_neg: f64, penalty_pos: f64) -> f64 {
        let mut weight = 0.0;
        if penalty_neg > 0.0 {
            weight += penalty_neg;
        }
        if penalty_pos > 0.0 {
            weight += penalty_pos;
        }
        if penalty_neg > 0.0 && penalty_pos > 0.0 {
            weight /= 2.0;
        }
        weight
    }
}

impl QpProblem {
    pub fn new(variable_count: usize) -> Self {
        Self {
            variable_count,
            hard: Vec::new(),
            soft: Vec::new(),
        }
    }

    pub fn add_hard(&mut self, coefficients: Vec<f64>, op: ConstraintOp, rhs: f64) {
        self.hard.push(HardRow { coefficients, op, rhs });
    }

    pub fn add_soft(&mut self, coefficients: Vec<f64>, rhs: f64, weight: f64) {
        self.soft.push(SoftRow { coefficients, rhs, weight });
    }

    pub fn num_constraints(&self) -> usize {
        self.hard.len() + self.soft.len()
    }

    /// Whether `x` satisfies every hard row within `tolerance`
    pub fn is_feasible(&self, x: &[f64], tolerance: f64) -> bool {
        self.hard.iter().all(|row| row.is_satisfied(x, tolerance))
    }
}
