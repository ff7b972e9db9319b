use anyhow::{anyhow, Result};
use clap::Parser;
use gridflow::{debug, load_case, run_power_flow, Method, PowerFlowOptions};
use spsolve::rlu::RLU;
use std::path::PathBuf;

/// AC power flow with reactive limit and transformer tap controls.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The input case: a zip archive or a directory of CSV files.
    #[arg(required = true)]
    input: PathBuf,

    /// Write the solution tables to a file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Solver algorithm.
    #[arg(long)]
    method: Option<Method>,

    /// Termination tolerance on per unit P & Q mismatch.
    #[arg(long)]
    tol: Option<f64>,

    /// Maximum number of solver iterations per outer loop.
    #[arg(long)]
    max_it: Option<usize>,

    /// Maximum number of control adjustment rounds.
    #[arg(long)]
    max_outer: Option<usize>,

    /// Do not enforce gen reactive power limits.
    #[arg(long, default_value_t = false)]
    no_qlim: bool,

    /// Adjust tap modules of voltage controlling transformers.
    #[arg(long, default_value_t = false)]
    taps: bool,

    /// Adjust tap angles of power controlling transformers.
    #[arg(long, default_value_t = false)]
    phase: bool,

    /// Share the slack power among generators by installed capacity.
    #[arg(long, default_value_t = false)]
    distributed_slack: bool,

    /// Skip islands made of a single bus.
    #[arg(long, default_value_t = false)]
    ignore_single_node_islands: bool,

    /// Do not retry diverged islands with the other method.
    #[arg(long, default_value_t = false)]
    no_retry: bool,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match execute(&cli) {
        Ok(_) => {
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(2);
        }
    }
}

fn execute(cli: &Cli) -> Result<()> {
    let circuit = load_case(&cli.input)?;

    let mut builder = PowerFlowOptions::builder();
    if let Some(method) = cli.method {
        builder.method(method);
    }
    if let Some(tol) = cli.tol {
        builder.tolerance(tol);
    }
    if let Some(max_it) = cli.max_it {
        builder.max_iterations(max_it);
    }
    if let Some(max_outer) = cli.max_outer {
        builder.max_outer_loops(max_outer);
    }
    builder.control_q(!cli.no_qlim);
    builder.control_taps_modules(cli.taps);
    builder.control_taps_phase(cli.phase);
    builder.distributed_slack(cli.distributed_slack);
    builder.ignore_single_node_islands(cli.ignore_single_node_islands);
    builder.retry_with_other_methods(!cli.no_retry);
    let options = builder.build()?;

    let solver = RLU::default();
    let solution = run_power_flow(&circuit, &options, &solver, None)?;

    let out = format!(
        "{}\n{}\n{}",
        debug::format_bus_table(&solution),
        debug::format_branch_table(&circuit, &solution),
        solution.report
    );
    match &cli.output {
        Some(out_path) => std::fs::write(out_path, &out)?,
        None => print!("{}", out),
    }

    if !solution.converged {
        return Err(anyhow!("power flow did not converge"));
    }
    Ok(())
}
