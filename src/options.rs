use std::fmt;

use clap::ValueEnum;
use derive_builder::Builder;
use num_complex::Complex64;

use crate::error::PowerFlowError;

/// Numerical power flow method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// Full Newton-Raphson with a backtracking line search.
    NR,
    /// Levenberg-Marquardt with adaptive damping.
    LM,
}

impl Method {
    /// The method tried next when this one fails and retries are enabled.
    pub(crate) fn fallback(&self) -> Self {
        match self {
            Method::NR => Method::LM,
            Method::LM => Method::NR,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Method::NR => write!(f, "NR"),
            Method::LM => write!(f, "LM"),
        }
    }
}

/// Power flow run configuration.
#[derive(Clone, Debug, Builder)]
#[builder(default, build_fn(validate = "Self::validate"))]
pub struct PowerFlowOptions {
    /// Method used on the first attempt at each island.
    pub method: Method,
    /// Convergence tolerance on the infinity norm of the reduced
    /// mismatch vector (p.u.).
    pub tolerance: f64,
    /// Iteration budget of a single solver attempt.
    pub max_iterations: usize,
    /// Bound on the control adjustment rounds wrapped around the
    /// inner solves of each island.
    pub max_outer_loops: usize,
    /// Enforce generator reactive limits by switching PV buses to PQ.
    pub control_q: bool,
    /// Adjust the tap modules of voltage controlling transformers.
    pub control_taps_modules: bool,
    /// Adjust the tap angles of power controlling phase shifters.
    pub control_taps_phase: bool,
    /// Spread the scheduled slack power over the generation buses in
    /// proportion to installed capacity and solve a second pass.
    pub distributed_slack: bool,
    /// On failure of the primary method, restart the island from the
    /// initial voltages with the other method.
    pub retry_with_other_methods: bool,
    /// Skip islands made of a single bus instead of rejecting the
    /// slackless ones. Skipped buses keep zero solution entries.
    pub ignore_single_node_islands: bool,
    /// Starting voltages for every bus of the network. Buses start flat
    /// from their set-points when not given.
    pub initial_voltage: Option<Vec<Complex64>>,
}

impl Default for PowerFlowOptions {
    fn default() -> Self {
        Self {
            method: Method::NR,
            tolerance: 1e-8,
            max_iterations: 25,
            max_outer_loops: 10,
            control_q: true,
            control_taps_modules: false,
            control_taps_phase: false,
            distributed_slack: false,
            retry_with_other_methods: true,
            ignore_single_node_islands: false,
            initial_voltage: None,
        }
    }
}

impl PowerFlowOptions {
    pub fn builder() -> PowerFlowOptionsBuilder {
        PowerFlowOptionsBuilder::default()
    }

    /// Full validation against a concrete network size. Called by the
    /// driver before any island is solved.
    pub(crate) fn check(&self, n_bus: usize) -> Result<(), PowerFlowError> {
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(PowerFlowError::Configuration(format!(
                "tolerance must be positive and finite, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(PowerFlowError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_outer_loops == 0 {
            return Err(PowerFlowError::Configuration(
                "max_outer_loops must be at least 1".to_string(),
            ));
        }
        if let Some(v0) = &self.initial_voltage {
            if v0.len() != n_bus {
                return Err(PowerFlowError::Configuration(format!(
                    "initial voltage has {} entries for {} buses",
                    v0.len(),
                    n_bus
                )));
            }
            for (i, v) in v0.iter().enumerate() {
                if !(v.norm() > 0.0 && v.re.is_finite() && v.im.is_finite()) {
                    return Err(PowerFlowError::Configuration(format!(
                        "initial voltage at bus {} must be finite and non-zero, got {}",
                        i, v
                    )));
                }
            }
        }
        Ok(())
    }
}

impl PowerFlowOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(tolerance) = self.tolerance {
            if !(tolerance > 0.0 && tolerance.is_finite()) {
                return Err(format!(
                    "tolerance must be positive and finite, got {}",
                    tolerance
                ));
            }
        }
        if let Some(0) = self.max_iterations {
            return Err("max_iterations must be at least 1".to_string());
        }
        if let Some(0) = self.max_outer_loops {
            return Err("max_outer_loops must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_bad_budgets() {
        assert!(PowerFlowOptions::builder()
            .tolerance(0.0)
            .build()
            .is_err());
        assert!(PowerFlowOptions::builder()
            .max_iterations(0)
            .build()
            .is_err());
        assert!(PowerFlowOptions::builder()
            .method(Method::LM)
            .tolerance(1e-6)
            .build()
            .is_ok());
    }

    #[test]
    fn check_rejects_mismatched_initial_voltage() {
        let opt = PowerFlowOptions {
            initial_voltage: Some(vec![Complex64::new(1.0, 0.0); 2]),
            ..Default::default()
        };
        assert!(matches!(
            opt.check(3),
            Err(PowerFlowError::Configuration(_))
        ));

        let opt = PowerFlowOptions {
            initial_voltage: Some(vec![
                Complex64::new(1.0, 0.0),
                Complex64::new(0.0, 0.0),
                Complex64::new(1.0, 0.0),
            ]),
            ..Default::default()
        };
        assert!(matches!(
            opt.check(3),
            Err(PowerFlowError::Configuration(_))
        ));
    }
}
