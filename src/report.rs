use std::fmt;
use std::time::Duration;

use crate::options::Method;

/// Outcome of one solver attempt on one island.
#[derive(Clone, Debug)]
pub struct SolverAttempt {
    /// Index of the island in the decomposition order.
    pub island: usize,
    pub method: Method,
    pub converged: bool,
    pub iterations: usize,
    /// Final infinity norm of the reduced mismatch vector (p.u.).
    pub norm_f: f64,
    pub elapsed: Duration,
}

/// Record of every solver attempt made during a run, across all islands
/// and retries, in completion order.
#[derive(Clone, Debug, Default)]
pub struct ConvergenceReport {
    pub attempts: Vec<SolverAttempt>,
}

impl ConvergenceReport {
    pub fn add(&mut self, attempt: SolverAttempt) {
        self.attempts.push(attempt);
    }

    /// Attempts made on one island, in the order they were tried.
    pub fn island(&self, island: usize) -> Vec<&SolverAttempt> {
        self.attempts.iter().filter(|a| a.island == island).collect()
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "island  method  converged  iterations  norm_f        elapsed")?;
        for a in &self.attempts {
            writeln!(
                f,
                "{:<6}  {:<6}  {:<9}  {:<10}  {:<12.5e}  {:?}",
                a.island, a.method, a.converged, a.iterations, a.norm_f, a.elapsed
            )?;
        }
        Ok(())
    }
}
