mod arena;
mod elastic;
mod equation;
mod feasibility;
mod linalg;
mod linear_spec;
mod model;
mod optimizer;
mod problem;
mod solution;
mod solver;

pub use elastic::SLACK_MAX;
pub use equation::EquationSystem;
pub use feasibility::PhaseOne;
pub use linalg::{EPSILON, Matrix, QrDecomposition, fuzzy_equals, qr_decomposition};
pub use linear_spec::{LinearSpec, SpecError};
pub use model::{
    Constraint, ConstraintId, ConstraintRole, DEFAULT_MAX, DEFAULT_MIN, ElasticSlack, Summand,
    Variable, VariableId,
};
pub use optimizer::{ActiveSetOptimizer, DEFAULT_MAX_ITERATIONS};
pub use problem::{ConstraintOp, HardRow, QpProblem, SoftRow};
pub use solution::{ResultCode, Size, Snapshot, SolveError, VariableSnapshot};
pub use solver::{SolverOptions, solve_problem};
