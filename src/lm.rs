use std::iter::zip;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use num_complex::Complex64;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;
use spsolve::Solver;

use crate::debug::{format_f64_vec, format_polar_vec};
use crate::error::PowerFlowError;
use crate::jacobian::make_jacobian;
use crate::newton::{mismatch, norm_mismatch};
use crate::power::SBus;
use crate::solution::NumericSolution;

/// Largest diagonal entry of the normal matrix HᵗH, i.e. the largest
/// squared column norm of H. Seeds the damping parameter.
fn max_diag_normal(h: &CSC<usize, f64>) -> f64 {
    let colptr = h.colptr();
    let values = h.values();

    let mut d_max = 0.0;
    for j in 0..h.cols() {
        let d: f64 = values[colptr[j]..colptr[j + 1]].iter().map(|x| x * x).sum();
        if d > d_max {
            d_max = d;
        }
    }
    d_max
}

/// Solves the power balance equations by a Levenberg-Marquardt
/// iteration on the normal equations (HᵗH + λI)·Δx = Hᵗ·f.
///
/// The damping parameter λ blends between a Newton step and a steepest
/// descent step. A step is applied only when the gain ratio of actual
/// to predicted objective reduction is non-negative, shrinking λ;
/// otherwise λ grows and the Jacobian is reused for the next, more
/// damped attempt. Slower per iteration than Newton-Raphson but tolerant
/// of near-singular Jacobians. Convergence is judged on the same
/// mismatch norm as the Newton-Raphson solver.
#[allow(clippy::too_many_arguments)]
pub fn levenberg_marquardt(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v0: &[Complex64],
    pv: &[usize],
    pq: &[usize],
    tolerance: f64,
    max_iterations: usize,
    solver: &dyn Solver<usize, f64>,
    cancel: Option<&AtomicBool>,
) -> Result<NumericSolution> {
    let start = Instant::now();

    let pv_pq = [pv, pq].concat();
    let n_pv = pv.len();
    let n_pq = pq.len();
    let nn = n_pv + 2 * n_pq;

    let j1 = 0;
    let j2 = n_pv;
    let j3 = j2;
    let j4 = j2 + n_pq;
    let j5 = j4;
    let j6 = j4 + n_pq;

    let mut v = v0.to_vec();
    let mut v_a: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut v_m: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    let mut dz = mismatch(y_bus, s_bus, &v, &v_m, &pv_pq, pq);
    let mut norm_f = norm_mismatch(&dz);
    if !norm_f.is_finite() {
        return Err(PowerFlowError::NumericDivergence(format!(
            "mismatch norm is {} at the starting voltages",
            norm_f
        ))
        .into());
    }
    log::debug!("norm_f = {}", norm_f);

    if norm_f < tolerance {
        log::info!("Converged at the starting voltages.");
        return Ok(NumericSolution {
            v,
            converged: true,
            iterations: 0,
            norm_f,
            elapsed: start.elapsed(),
        });
    }

    let jac = make_jacobian(y_bus, &v, s_bus.d_sbus_d_vm(&v_m), &pv_pq, pq)?;
    let mut lbmda = 1e-3 * max_diag_normal(&jac);
    let mut h = jac.to_csr();
    let mut h2: CSR<usize, f64> = (&h.t() * &h).to_csr();
    let mut update_jacobian = false;

    let mut nu = 2.0;
    let mut f_prev = 1e9;
    let mut converged = false;

    let mut i = 0;
    while !converged && i < max_iterations {
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::Relaxed) {
                log::info!("Levenberg-Marquardt cancelled at iteration {}.", i);
                return Ok(NumericSolution {
                    v,
                    converged: false,
                    iterations: i,
                    norm_f,
                    elapsed: start.elapsed(),
                });
            }
        }
        i += 1;

        if update_jacobian {
            h = make_jacobian(y_bus, &v, s_bus.d_sbus_d_vm(&v_m), &pv_pq, pq)?.to_csr();
            h2 = (&h.t() * &h).to_csr();
        }

        let rhs: Vec<f64> = &h.t() * &dz;

        let a_mat = (&h2 + &CSR::with_diagonal(vec![lbmda; nn]))
            .to_coo()
            .to_csc();
        let mut dx = rhs.clone();
        solver.solve(
            a_mat.cols(),
            a_mat.rowidx(),
            a_mat.colptr(),
            a_mat.values(),
            &mut dx,
            false,
        )?;
        if dx.iter().any(|dx| !dx.is_finite()) {
            return Err(PowerFlowError::NumericDivergence(format!(
                "non-finite damped step at iteration {}",
                i
            ))
            .into());
        }
        log::trace!("dx: {}", format_f64_vec(&dx));

        // Objective and gain ratio of the proposed step.
        let f_obj = 0.5 * dz.iter().map(|dz| dz * dz).sum::<f64>();
        let val = zip(&dx, &rhs)
            .map(|(dx, rhs)| dx * (lbmda * dx + rhs))
            .sum::<f64>();
        let rho = if val > 0.0 {
            (f_prev - f_obj) / (0.5 * val)
        } else {
            -1.0
        };

        if rho >= 0.0 {
            update_jacobian = true;
            lbmda *= (1.0_f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
            nu = 2.0;

            // The residual is Scalc - Ssched, so corrections enter with
            // the opposite sign.
            for (k, j) in (j1..j2).enumerate() {
                v_a[pv[k]] -= dx[j];
            }
            for (k, j) in (j3..j4).enumerate() {
                v_a[pq[k]] -= dx[j];
            }
            for (k, j) in (j5..j6).enumerate() {
                v_m[pq[k]] -= dx[j];
            }

            // Magnitudes wrap to positive when a step overshoots zero.
            v = zip(&v_m, &v_a)
                .map(|(&v_m, &v_a)| Complex64::from_polar(v_m, v_a))
                .collect();
            v_a = v.iter().map(|v| v.arg()).collect();
            v_m = v.iter().map(|v| v.norm()).collect();

            log::debug!("V_{}: {}", i, format_polar_vec(&v));

            dz = mismatch(y_bus, s_bus, &v, &v_m, &pv_pq, pq);
            norm_f = norm_mismatch(&dz);
            if !norm_f.is_finite() {
                return Err(PowerFlowError::NumericDivergence(format!(
                    "mismatch norm is {} at iteration {}",
                    norm_f, i
                ))
                .into());
            }
            converged = norm_f < tolerance;
        } else {
            update_jacobian = false;
            lbmda *= nu;
            nu *= 2.0;
        }

        f_prev = f_obj;
        log::debug!(
            "iteration {}: norm_f = {}, lambda = {}, rho = {}",
            i,
            norm_f,
            lbmda,
            rho
        );
    }

    if converged {
        log::info!("Levenberg-Marquardt converged in {} iterations.", i);
    } else {
        log::info!(
            "Levenberg-Marquardt did not converge in {} iterations (norm_f = {}).",
            i,
            norm_f
        );
    }

    Ok(NumericSolution {
        v,
        converged,
        iterations: i,
        norm_f,
        elapsed: start.elapsed(),
    })
}
