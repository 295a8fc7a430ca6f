use thiserror::Error;

/// Outcome of a solve, as reported by [`LinearSpec::solve`](crate::LinearSpec::solve)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// All hard constraints hold and the penalty is minimal
    Optimal,
    /// A feasible but not provably optimal point was returned
    SubOptimal,
    /// No assignment satisfies the hard constraints
    Infeasible,
    /// The relaxed problem has no finite optimum
    Unbounded,
    /// The active-set iteration did not settle (cycling)
    Degenerate,
    /// Numerical breakdown: singular reduced Hessian, failed QR, rank mismatch
    NumFailure,
    /// Nothing has been solved yet, or the model is unusable
    Error,
    /// Allocation failure
    NoMemory,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Optimal | ResultCode::SubOptimal)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultCode::Optimal => "Optimal",
            ResultCode::SubOptimal => "SubOptimal",
            ResultCode::Infeasible => "Infeasible",
            ResultCode::Unbounded => "Unbounded",
            ResultCode::Degenerate => "Degenerate",
            ResultCode::NumFailure => "NumFailure",
            ResultCode::Error => "Error",
            ResultCode::NoMemory => "NoMemory",
        };
        f.write_str(name)
    }
}

/// Failure inside a single solve. Never retried; mapped to a [`ResultCode`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("more variables ({variables}) than constraints ({constraints})")]
    TooManyVariables { variables: usize, constraints: usize },
    #[error("no point satisfies all hard constraints")]
    NoFeasiblePoint,
    #[error("linear system is singular")]
    SingularSystem,
    #[error("QR decomposition failed: matrix is rank deficient or has fewer rows than columns")]
    QrDecomposition,
    #[error("Lagrange system has rank {rank}, expected {expected}")]
    LagrangeRankMismatch { rank: usize, expected: usize },
    #[error("active set did not converge within {0} iterations")]
    IterationLimit(usize),
}

impl SolveError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            SolveError::TooManyVariables { .. } | SolveError::NoFeasiblePoint => {
                ResultCode::Infeasible
            }
            SolveError::SingularSystem
            | SolveError::QrDecomposition
            | SolveError::LagrangeRankMismatch { .. } => ResultCode::NumFailure,
            SolveError::IterationLimit(_) => ResultCode::Degenerate,
        }
    }
}

/// Width/height pair returned by the size queries
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Size = Size { width: 0.0, height: 0.0 };
    pub const UNBOUNDED: Size = Size { width: f64::MAX, height: f64::MAX };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Value of one variable after a solve
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSnapshot {
    /// Variable label, if one was set
    pub label: Option<String>,
    /// Solved value (NaN before the first successful solve)
    pub value: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

/// Report of the last solve over every user-visible variable
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub result: ResultCode,
    pub solving_time_ms: f64,
    pub variables: Vec<VariableSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_errors_are_not_infeasible() {
        let numerical = [
            SolveError::SingularSystem,
            SolveError::QrDecomposition,
            SolveError::LagrangeRankMismatch { rank: 1, expected: 2 },
        ];
        for e in numerical {
            assert_eq!(e.result_code(), ResultCode::NumFailure, "{}", e);
        }
        assert_eq!(SolveError::NoFeasiblePoint.result_code(), ResultCode::Infeasible);
        assert_eq!(
            SolveError::TooManyVariables { variables: 3, constraints: 2 }.result_code(),
            ResultCode::Infeasible
        );
        assert_eq!(SolveError::IterationLimit(10).result_code(), ResultCode::Degenerate);
    }

    #[test]
    fn test_success_codes() {
        assert!(ResultCode::Optimal.is_success());
        assert!(ResultCode::SubOptimal.is_success());
        assert!(!ResultCode::Infeasible.is_success());
        assert!(!ResultCode::Error.is_success());
    }
}
