use std::iter::zip;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use num_complex::Complex64;
use rayon::prelude::*;
use spsolve::Solver;

use crate::admittance::{make_admittances, Admittances};
use crate::bus_types::bus_type_sets;
use crate::circuit::Circuit;
use crate::controls::{adjust_tap_modules, adjust_tap_phases, switch_q_limits};
use crate::debug::format_polar_vec;
use crate::error::PowerFlowError;
use crate::lm::levenberg_marquardt;
use crate::newton::newton_raphson;
use crate::options::{Method, PowerFlowOptions};
use crate::power::CircuitSBus;
use crate::report::SolverAttempt;
use crate::solution::{island_flows, NumericSolution, PowerFlowSolution};
use crate::topology::{find_islands, Island};

/// Everything one island produced: the attempt log and, unless the
/// island failed outright, its best voltages with the admittances they
/// were solved against.
struct IslandRun {
    attempts: Vec<SolverAttempt>,
    outcome: Result<(NumericSolution, Admittances)>,
}

/// Runs a power flow study over a whole circuit.
///
/// The circuit is decomposed into islands which are solved independently,
/// in parallel when there is more than one, and merged back by original
/// bus and branch index. A failed island is logged and leaves zero
/// entries without aborting its siblings; the overall converged flag
/// requires every solved island to converge. The `cancel` flag is polled
/// between iterations, a cancelled run returns the partial state with
/// `converged == false`.
pub fn run_power_flow(
    circuit: &Circuit,
    options: &PowerFlowOptions,
    solver: &(dyn Solver<usize, f64> + Sync),
    cancel: Option<&AtomicBool>,
) -> Result<PowerFlowSolution> {
    let start = Instant::now();

    options.check(circuit.bus.len())?;

    let v0 = match &options.initial_voltage {
        Some(v0) => v0.clone(),
        None => circuit.initial_voltage(),
    };
    log::debug!("V0: {}", format_polar_vec(&v0));

    let mut islands = find_islands(circuit);
    if options.ignore_single_node_islands {
        let before = islands.len();
        islands.retain(|island| island.bus.len() > 1);
        if islands.len() < before {
            log::info!("ignoring {} single bus island(s)", before - islands.len());
        }
    }
    log::info!("solving {} island(s)", islands.len());

    let runs: Vec<IslandRun> = islands
        .par_iter_mut()
        .enumerate()
        .map(|(idx, island)| {
            let v0 = island.sub_voltage(&v0);
            solve_island(idx, island, circuit.base_mva, options, solver, cancel, v0)
        })
        .collect();

    let mut solution = PowerFlowSolution::new(circuit);
    solution.converged = true;

    for (idx, (island, run)) in zip(&islands, runs).enumerate() {
        solution.report.attempts.extend(run.attempts);

        let (numeric, adm) = match run.outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("island {}: {}", idx, err);
                solution.converged = false;
                continue;
            }
        };
        if !numeric.converged {
            solution.converged = false;
        }
        solution.iterations += numeric.iterations;
        solution.norm_f = solution.norm_f.max(numeric.norm_f);

        let flows = island_flows(island, &adm, &numeric.v, circuit.base_mva);
        for (i, &orig) in island.original_bus_idx.iter().enumerate() {
            solution.voltage[orig] = numeric.v[i];
            solution.s_bus[orig] = flows.s_bus[i];
            solution.gen_p[orig] = flows.gen_p[i];
            solution.gen_q[orig] = flows.gen_q[i];
            solution.bus_type[orig] = island.bus[i].bus_type;
        }
        for (k, &orig) in island.original_branch_idx.iter().enumerate() {
            solution.i_from[orig] = flows.i_from[k];
            solution.i_to[orig] = flows.i_to[k];
            solution.s_from[orig] = flows.s_from[k];
            solution.s_to[orig] = flows.s_to[k];
            solution.losses[orig] = flows.losses[k];
            solution.loading[orig] = flows.loading[k];
            solution.tap_module[orig] = island.branch[k].tap();
            solution.tap_angle[orig] = island.branch[k].tap_angle;
        }
    }

    solution.elapsed = start.elapsed();
    log::info!(
        "power flow {} in {} iteration(s), norm_f = {}, elapsed = {:?}",
        if solution.converged {
            "converged"
        } else {
            "did not converge"
        },
        solution.iterations,
        solution.norm_f,
        solution.elapsed
    );
    Ok(solution)
}

/// Solves one island, trying the fallback method on failure when
/// enabled, and keeping the attempt with the smallest mismatch norm.
/// Retries always restart from the island's initial voltages.
#[allow(clippy::too_many_arguments)]
fn solve_island(
    idx: usize,
    island: &mut Island,
    base_mva: f64,
    options: &PowerFlowOptions,
    solver: &dyn Solver<usize, f64>,
    cancel: Option<&AtomicBool>,
    v0: Vec<Complex64>,
) -> IslandRun {
    let mut attempts = Vec::new();

    let (slack, _, _) = bus_type_sets(&island.bus);
    if slack.is_empty() {
        return IslandRun {
            attempts,
            outcome: Err(PowerFlowError::Structural(format!(
                "island {} ({} buses) has no slack bus",
                idx,
                island.bus.len()
            ))
            .into()),
        };
    }

    let methods: Vec<Method> = if options.retry_with_other_methods {
        vec![options.method, options.method.fallback()]
    } else {
        vec![options.method]
    };

    let mut best: Option<(Method, NumericSolution, Admittances)> = None;
    let mut last_err: Option<anyhow::Error> = None;

    for &method in &methods {
        let t = Instant::now();
        match solve_with_method(island, base_mva, options, method, solver, cancel, &v0) {
            Ok((numeric, adm)) => {
                attempts.push(SolverAttempt {
                    island: idx,
                    method,
                    converged: numeric.converged,
                    iterations: numeric.iterations,
                    norm_f: numeric.norm_f,
                    elapsed: numeric.elapsed,
                });
                let converged = numeric.converged;
                let better = match &best {
                    Some((_, b, _)) => numeric.norm_f < b.norm_f,
                    None => true,
                };
                if better {
                    best = Some((method, numeric, adm));
                }
                if converged {
                    break;
                }
                log::info!("island {}: {} did not converge", idx, method);
            }
            Err(err) => {
                attempts.push(SolverAttempt {
                    island: idx,
                    method,
                    converged: false,
                    iterations: 0,
                    norm_f: f64::NAN,
                    elapsed: t.elapsed(),
                });
                let fatal = matches!(
                    err.downcast_ref::<PowerFlowError>(),
                    Some(PowerFlowError::Structural(_)) | Some(PowerFlowError::Configuration(_))
                );
                if fatal {
                    return IslandRun {
                        attempts,
                        outcome: Err(err),
                    };
                }
                log::warn!("island {}: {} failed: {}", idx, method, err);
                last_err = Some(err);
            }
        }
    }

    let (method, mut numeric, mut adm) = match best {
        Some(best) => best,
        None => {
            let err = last_err.unwrap_or_else(|| {
                PowerFlowError::NumericDivergence(format!("island {}: no method succeeded", idx))
                    .into()
            });
            return IslandRun {
                attempts,
                outcome: Err(err),
            };
        }
    };

    // With a converged base point, spread the scheduled slack generation
    // over the other generation buses and solve a correction pass.
    if options.distributed_slack && numeric.converged {
        let slack_sched: f64 = slack.iter().map(|&i| island.bus[i].p_gen).sum();
        let installed: f64 = island
            .bus
            .iter()
            .filter(|b| !b.is_slack())
            .map(|b| b.p_installed.max(0.0))
            .sum();
        if slack_sched != 0.0 && installed > 0.0 {
            log::info!(
                "island {}: distributing {} MW of scheduled slack generation",
                idx,
                slack_sched
            );
            for b in island.bus.iter_mut() {
                if !b.is_slack() && b.p_installed > 0.0 {
                    b.p_gen += slack_sched * b.p_installed / installed;
                }
            }

            let t = Instant::now();
            match solve_with_method(island, base_mva, options, method, solver, cancel, &numeric.v)
            {
                Ok((second, second_adm)) => {
                    attempts.push(SolverAttempt {
                        island: idx,
                        method,
                        converged: second.converged,
                        iterations: second.iterations,
                        norm_f: second.norm_f,
                        elapsed: second.elapsed,
                    });
                    numeric = NumericSolution {
                        v: second.v,
                        converged: second.converged,
                        iterations: numeric.iterations + second.iterations,
                        norm_f: second.norm_f,
                        elapsed: numeric.elapsed + second.elapsed,
                    };
                    adm = second_adm;
                }
                Err(err) => {
                    attempts.push(SolverAttempt {
                        island: idx,
                        method,
                        converged: false,
                        iterations: 0,
                        norm_f: f64::NAN,
                        elapsed: t.elapsed(),
                    });
                    return IslandRun {
                        attempts,
                        outcome: Err(err),
                    };
                }
            }
        }
    }

    IslandRun {
        attempts,
        outcome: Ok((numeric, adm)),
    }
}

/// Solves one island with one method, wrapping the numerical iteration
/// in the control adjustment loop: after each converged solve, enforce
/// reactive limits and move regulating taps, then re-solve from the
/// adjusted state until no control moves or the round budget runs out.
#[allow(clippy::too_many_arguments)]
fn solve_with_method(
    island: &mut Island,
    base_mva: f64,
    options: &PowerFlowOptions,
    method: Method,
    solver: &dyn Solver<usize, f64>,
    cancel: Option<&AtomicBool>,
    v0: &[Complex64],
) -> Result<(NumericSolution, Admittances)> {
    let start = Instant::now();

    let mut v = v0.to_vec();
    let mut adm = make_admittances(base_mva, &island.bus, &island.branch);
    log::trace!("Ybus:\n{}", adm.y_bus.to_table());
    let mut phase_state: Vec<Option<(f64, f64)>> = vec![None; island.branch.len()];

    let mut total_iterations = 0;
    let mut converged;
    let mut norm_f;

    let mut outer = 0;
    loop {
        outer += 1;

        let (_, pv, pq) = bus_type_sets(&island.bus);
        let s_bus = CircuitSBus {
            base_mva,
            bus: &island.bus,
        };
        let numeric = match method {
            Method::NR => newton_raphson(
                &adm.y_bus,
                &s_bus,
                &v,
                &pv,
                &pq,
                options.tolerance,
                options.max_iterations,
                solver,
                cancel,
            )?,
            Method::LM => levenberg_marquardt(
                &adm.y_bus,
                &s_bus,
                &v,
                &pv,
                &pq,
                options.tolerance,
                options.max_iterations,
                solver,
                cancel,
            )?,
        };
        total_iterations += numeric.iterations;
        converged = numeric.converged;
        norm_f = numeric.norm_f;
        v = numeric.v;

        if !converged {
            break;
        }

        let mut changed = false;
        if options.control_q {
            changed |= switch_q_limits(&mut island.bus, base_mva, &adm.y_bus, &v);
        }
        let mut taps_moved = false;
        if options.control_taps_modules {
            let v_m: Vec<f64> = v.iter().map(|v| v.norm()).collect();
            taps_moved |= adjust_tap_modules(&mut island.branch, &v_m);
        }
        if options.control_taps_phase {
            taps_moved |=
                adjust_tap_phases(&mut island.branch, base_mva, &adm.y_from, &v, &mut phase_state);
        }
        if taps_moved {
            adm = make_admittances(base_mva, &island.bus, &island.branch);
        }
        changed |= taps_moved;

        if !changed {
            break;
        }
        if outer >= options.max_outer_loops {
            log::info!("control adjustments not settled after {} rounds", outer);
            break;
        }
        if let Some(cancel) = cancel {
            if cancel.load(Ordering::Relaxed) {
                log::info!("cancelled after control round {}", outer);
                converged = false;
                break;
            }
        }
        log::debug!("control round {}: re-solving", outer);
    }

    Ok((
        NumericSolution {
            v,
            converged,
            iterations: total_iterations,
            norm_f,
            elapsed: start.elapsed(),
        },
        adm,
    ))
}
