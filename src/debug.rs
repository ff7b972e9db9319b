use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};
use std::f64::consts::PI;

use crate::circuit::{BusType, Circuit};
use crate::solution::PowerFlowSolution;

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

pub fn format_rect_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_complex).collect();
    format!("[{}]", a.join(", "))
}

fn format_polar(z: &Complex64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(z.norm(), FLOAT_CONFIG),
        dtoa(z.arg() * 180.0 / PI, FLOAT_CONFIG)
    )
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(format_polar).collect();
    format!("[{}]", a.join(", "))
}

/// Per-bus voltage and injection table for a solved case.
pub fn format_bus_table(solution: &PowerFlowSolution) -> String {
    let mut out = format!(
        "{:>5}  {:>5}  {:>12}  {:>12}  {:>12}  {:>12}\n",
        "bus", "type", "vm (pu)", "va (deg)", "P (MW)", "Q (MVAr)"
    );
    for (i, v) in solution.voltage.iter().enumerate() {
        let kind = match solution.bus_type[i] {
            BusType::Slack => "slack",
            BusType::PV => "PV",
            BusType::PQ => "PQ",
        };
        out.push_str(&format!(
            "{:>5}  {:>5}  {:>12}  {:>12}  {:>12}  {:>12}\n",
            i,
            kind,
            dtoa(v.norm(), FLOAT_CONFIG),
            dtoa(v.arg() * 180.0 / PI, FLOAT_CONFIG),
            dtoa(solution.s_bus[i].re, FLOAT_CONFIG),
            dtoa(solution.s_bus[i].im, FLOAT_CONFIG),
        ));
    }
    out
}

/// Per-branch flow, loss and loading table for a solved case.
pub fn format_branch_table(circuit: &Circuit, solution: &PowerFlowSolution) -> String {
    let mut out = format!(
        "{:>5}  {:>5}  {:>5}  {:>12}  {:>12}  {:>12}  {:>12}  {:>10}\n",
        "brch", "from", "to", "Pf (MW)", "Qf (MVAr)", "Ploss (MW)", "Qloss (MVAr)", "loading (%)"
    );
    for (k, br) in circuit.branch.iter().enumerate() {
        out.push_str(&format!(
            "{:>5}  {:>5}  {:>5}  {:>12}  {:>12}  {:>12}  {:>12}  {:>10}\n",
            k,
            br.from_bus,
            br.to_bus,
            dtoa(solution.s_from[k].re, FLOAT_CONFIG),
            dtoa(solution.s_from[k].im, FLOAT_CONFIG),
            dtoa(solution.losses[k].re, FLOAT_CONFIG),
            dtoa(solution.losses[k].im, FLOAT_CONFIG),
            dtoa(solution.loading[k] * 100.0, FLOAT_CONFIG),
        ));
    }
    out
}
