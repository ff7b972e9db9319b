use thiserror::Error;

/// Failure taxonomy of the power flow engine.
///
/// Exhausting an iteration budget is not an error: the solvers return
/// `converged == false` together with the best voltages found, and leave
/// the accept/reject decision to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PowerFlowError {
    /// The island topology cannot be solved by any method, e.g. it has no
    /// slack bus. Fatal for the island, never retried.
    #[error("structural error: {0}")]
    Structural(String),

    /// The iteration produced a non-finite step, the linear solve failed,
    /// or no backtracking step reduced the mismatch.
    #[error("numeric divergence: {0}")]
    NumericDivergence(String),

    /// Invalid option combination. Rejected before any island is touched.
    #[error("configuration error: {0}")]
    Configuration(String),
}
