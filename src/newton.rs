use std::iter::zip;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use full::slice::norm_inf;
use num_complex::Complex64;
use sparsetools::csr::CSR;
use spsolve::Solver;

use crate::debug::{format_f64_vec, format_polar_vec, format_rect_vec};
use crate::error::PowerFlowError;
use crate::jacobian::make_jacobian;
use crate::power::SBus;
use crate::solution::NumericSolution;

/// Bound on the step halvings of one backtracking line search.
const MAX_BACKTRACKS: usize = 10;

/// Power mismatch at the given voltages, stacked in the order of the
/// reduced system: active power at PV and PQ buses, then reactive power
/// at PQ buses. All quantities in per unit.
pub(crate) fn mismatch(
    y_bus: &CSR<usize, Complex64>,
    s_bus: &dyn SBus,
    v: &Vec<Complex64>,
    v_m: &[f64],
    pv_pq: &[usize],
    pq: &[usize],
) -> Vec<f64> {
    let i_bus: Vec<Complex64> = y_bus * v;
    let s_sched = s_bus.s_bus(v_m);
    let mis: Vec<Complex64> = zip(v, zip(&i_bus, &s_sched))
        .map(|(v, (i_bus, s_sched))| v * i_bus.conj() - s_sched)
        .collect();

    [
        pv_pq.iter().map(|&i| mis[i].re).collect::<Vec<f64>>(),
        pq.iter().map(|&i| mis[i].im).collect::<Vec<f64>>(),
    ]
    .concat()
}

pub(crate) fn norm_mismatch(f: &[f64]) -> f64 {
    if f.is_empty() {
        0.0
    } else {
        norm_inf(f)
    }
}

/// Solves the power balance equations in polar form by a full
/// Newton-Raphson iteration guarded by a backtracking line search.
///
/// Corrects voltage angles at PV and PQ buses and magnitudes at PQ
/// buses until the infinity norm of the mismatch drops below the
/// tolerance or the iteration budget runs out. Each Newton step is
/// scaled back by halves, restarting from the current point, until the
/// mismatch norm strictly decreases; a step that cannot be made to
/// decrease it is a divergence error, as is a non-finite solve result.
#[allow(clippy::too_many_arguments)]
pub fn newton_raphson(
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

    // Layout of the correction vector: angles at PV buses, angles at
    // PQ buses, magnitudes at PQ buses.
    let j1 = 0;
    let j2 = n_pv;
    let j3 = j2;
    let j4 = j2 + n_pq;
    let j5 = j4;
    let j6 = j4 + n_pq;

    let mut v = v0.to_vec();
    let mut v_a: Vec<f64> = v.iter().map(|v| v.arg()).collect();
    let mut v_m: Vec<f64> = v.iter().map(|v| v.norm()).collect();

    log::trace!("Sbus0: {}", format_rect_vec(&s_bus.s_bus(&v_m)));

    let mut f = mismatch(y_bus, s_bus, &v, &v_m, &pv_pq, pq);
    let mut norm_f = norm_mismatch(&f);
    if !norm_f.is_finite() {
        return Err(PowerFlowError::NumericDivergence(format!(
            "mismatch norm is {} at the starting voltages",
            norm_f
        ))
        .into());
    }
    log::debug!("norm_f = {}", norm_f);

    let mut converged = norm_f < tolerance;
    if converged {
        log::info!("Converged at the starting voltages.");
    }

    let mut i = 0;
    while !converged && i < max_iterations {
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::Relaxed) {
                log::info!("Newton-Raphson cancelled at iteration {}.", i);
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

        let jac = make_jacobian(y_bus, &v, s_bus.d_sbus_d_vm(&v_m), &pv_pq, pq)?;

        let mut neg_f: Vec<f64> = f.iter().map(|f| -f).collect();
        log::trace!("-F: {}", format_f64_vec(&neg_f));
        solver.solve(
            jac.cols(),
            jac.rowidx(),
            jac.colptr(),
            jac.values(),
            &mut neg_f,
            false,
        )?;
        let dx = neg_f;
        if dx.iter().any(|dx| !dx.is_finite()) {
            return Err(PowerFlowError::NumericDivergence(format!(
                "non-finite Newton step at iteration {}",
                i
            ))
            .into());
        }
        log::trace!("dx: {}", format_f64_vec(&dx));

        let mut mu = 1.0;
        let mut accepted = false;
        for _ in 0..=MAX_BACKTRACKS {
            let mut v_a_new = v_a.clone();
            let mut v_m_new = v_m.clone();
            for (k, j) in (j1..j2).enumerate() {
                v_a_new[pv[k]] += mu * dx[j];
            }
            for (k, j) in (j3..j4).enumerate() {
                v_a_new[pq[k]] += mu * dx[j];
            }
            for (k, j) in (j5..j6).enumerate() {
                v_m_new[pq[k]] += mu * dx[j];
            }

            let v_new: Vec<Complex64> = zip(&v_m_new, &v_a_new)
                .map(|(&v_m, &v_a)| Complex64::from_polar(v_m, v_a))
                .collect();
            // Magnitudes wrap to positive when a step overshoots zero.
            let v_m_new: Vec<f64> = v_new.iter().map(|v| v.norm()).collect();

            let f_new = mismatch(y_bus, s_bus, &v_new, &v_m_new, &pv_pq, pq);
            let norm_f_new = norm_mismatch(&f_new);

            if norm_f_new.is_finite() && norm_f_new < norm_f {
                if mu < 1.0 {
                    log::debug!("accepted step scaled by {}", mu);
                }
                v = v_new;
                v_a = v.iter().map(|v| v.arg()).collect();
                v_m = v_m_new;
                f = f_new;
                norm_f = norm_f_new;
                accepted = true;
                break;
            }
            mu *= 0.5;
        }
        if !accepted {
            return Err(PowerFlowError::NumericDivergence(format!(
                "mismatch norm {} not reduced by any of {} step halvings at iteration {}",
                norm_f, MAX_BACKTRACKS, i
            ))
            .into());
        }

        log::debug!("V_{}: {}", i, format_polar_vec(&v));
        log::debug!("iteration {}: norm_f = {}", i, norm_f);

        if norm_f < tolerance {
            converged = true;
            log::info!("Newton-Raphson converged in {} iterations.", i);
        }
    }
    if !converged {
        log::info!(
            "Newton-Raphson did not converge in {} iterations (norm_f = {}).",
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
