use std::time::Duration;

use num_complex::Complex64;

use crate::admittance::Admittances;
use crate::circuit::{BusType, Circuit};
use crate::report::ConvergenceReport;
use crate::topology::Island;

/// Raw output of a single solver attempt on one island.
#[derive(Clone, Debug)]
pub struct NumericSolution {
    /// Sub-network voltages, one per island bus (p.u.).
    pub v: Vec<Complex64>,
    pub converged: bool,
    /// Iterations spent, counting rejected steps.
    pub iterations: usize,
    /// Infinity norm of the reduced mismatch vector at the final
    /// voltages (p.u.).
    pub norm_f: f64,
    pub elapsed: Duration,
}

/// Result of a power flow run over the whole network.
///
/// All per-bus and per-branch vectors follow the original circuit
/// ordering. Buses and branches outside every solved island keep zero
/// entries.
#[derive(Clone, Debug)]
pub struct PowerFlowSolution {
    /// Bus voltage phasors (p.u.).
    pub voltage: Vec<Complex64>,
    /// Calculated complex bus injections (MVA).
    pub s_bus: Vec<Complex64>,
    /// Active power produced at each bus (MW). Equals the schedule at
    /// non-slack buses once converged.
    pub gen_p: Vec<f64>,
    /// Reactive power produced at each bus (MVAr). Carries the limit
    /// value at buses the reactive control switched to PQ.
    pub gen_q: Vec<f64>,
    /// Bus types after any control switching.
    pub bus_type: Vec<BusType>,
    /// Branch current at the from end (p.u.).
    pub i_from: Vec<Complex64>,
    /// Branch current at the to end (p.u.).
    pub i_to: Vec<Complex64>,
    /// Complex power entering the branch at the from end (MVA).
    pub s_from: Vec<Complex64>,
    /// Complex power entering the branch at the to end (MVA).
    pub s_to: Vec<Complex64>,
    /// Series plus shunt losses per branch (MVA).
    pub losses: Vec<Complex64>,
    /// From end apparent power over the branch rating.
    pub loading: Vec<f64>,
    /// Tap modules after any module regulation.
    pub tap_module: Vec<f64>,
    /// Tap angles after any phase regulation (radians).
    pub tap_angle: Vec<f64>,
    /// True when every island attempted converged.
    pub converged: bool,
    /// Worst final mismatch norm across islands (p.u.).
    pub norm_f: f64,
    /// Iterations of the accepted attempts summed over islands.
    pub iterations: usize,
    pub elapsed: Duration,
    pub report: ConvergenceReport,
}

impl PowerFlowSolution {
    /// Preallocates a solution for `circuit`, to be filled island by
    /// island. Tap positions and bus types start at the circuit values.
    pub(crate) fn new(circuit: &Circuit) -> Self {
        let n_bus = circuit.bus.len();
        let n_branch = circuit.branch.len();
        Self {
            voltage: vec![Complex64::default(); n_bus],
            s_bus: vec![Complex64::default(); n_bus],
            gen_p: vec![0.0; n_bus],
            gen_q: vec![0.0; n_bus],
            bus_type: circuit.bus.iter().map(|b| b.bus_type).collect(),
            i_from: vec![Complex64::default(); n_branch],
            i_to: vec![Complex64::default(); n_branch],
            s_from: vec![Complex64::default(); n_branch],
            s_to: vec![Complex64::default(); n_branch],
            losses: vec![Complex64::default(); n_branch],
            loading: vec![0.0; n_branch],
            tap_module: circuit.branch.iter().map(|br| br.tap()).collect(),
            tap_angle: circuit.branch.iter().map(|br| br.tap_angle).collect(),
            converged: false,
            norm_f: 0.0,
            iterations: 0,
            elapsed: Duration::default(),
            report: ConvergenceReport::default(),
        }
    }
}

/// Flows and injections of one island, derived from its final voltages.
pub(crate) struct IslandFlows {
    /// Calculated bus injections (MVA).
    pub s_bus: Vec<Complex64>,
    /// Power produced per bus (MW, MVAr), injection plus the voltage
    /// dependent load.
    pub gen_p: Vec<f64>,
    pub gen_q: Vec<f64>,
    pub i_from: Vec<Complex64>,
    pub i_to: Vec<Complex64>,
    pub s_from: Vec<Complex64>,
    pub s_to: Vec<Complex64>,
    pub losses: Vec<Complex64>,
    pub loading: Vec<f64>,
}

/// Computes branch flows, losses, loadings and bus injections of an
/// island from its solved voltages.
pub(crate) fn island_flows(
    island: &Island,
    adm: &Admittances,
    v: &[Complex64],
    base_mva: f64,
) -> IslandFlows {
    let v = v.to_vec();

    let i_bus: Vec<Complex64> = &adm.y_bus * &v;
    let s_bus: Vec<Complex64> = v
        .iter()
        .zip(&i_bus)
        .map(|(v, i)| v * i.conj() * base_mva)
        .collect();

    let mut gen_p = vec![0.0; island.bus.len()];
    let mut gen_q = vec![0.0; island.bus.len()];
    for (i, bus) in island.bus.iter().enumerate() {
        let v_m = v[i].norm();
        let s_load = bus.load_s + bus.load_i * v_m + bus.load_y * (v_m * v_m);
        gen_p[i] = s_bus[i].re + s_load.re;
        gen_q[i] = s_bus[i].im + s_load.im;
    }

    let i_from: Vec<Complex64> = &adm.y_from * &v;
    let i_to: Vec<Complex64> = &adm.y_to * &v;

    let mut s_from = vec![Complex64::default(); island.branch.len()];
    let mut s_to = vec![Complex64::default(); island.branch.len()];
    let mut losses = vec![Complex64::default(); island.branch.len()];
    let mut loading = vec![0.0; island.branch.len()];
    for (k, br) in island.branch.iter().enumerate() {
        s_from[k] = v[br.from_bus] * i_from[k].conj() * base_mva;
        s_to[k] = v[br.to_bus] * i_to[k].conj() * base_mva;
        losses[k] = s_from[k] + s_to[k];
        loading[k] = s_from[k].norm() / (br.rate + 1e-9);
    }

    IslandFlows {
        s_bus,
        gen_p,
        gen_q,
        i_from,
        i_to,
        s_from,
        s_to,
        losses,
        loading,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use std::iter::zip;

    use super::*;
    use crate::admittance::make_admittances;
    use crate::tests::cases;
    use crate::topology::find_islands;

    #[test]
    fn losses_vanish_on_a_lossless_branch() -> Result<()> {
        let mut circuit = cases::three_bus();
        for br in circuit.branch.iter_mut() {
            br.r = 0.0;
            br.g = 0.0;
        }
        let islands = find_islands(&circuit);
        let island = &islands[0];
        let adm = make_admittances(circuit.base_mva, &island.bus, &island.branch);

        // Any voltage profile will do, flows are a function of it.
        let v = vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(0.98, -0.02),
            Complex64::from_polar(0.95, -0.05),
        ];
        let flows = island_flows(island, &adm, &v, circuit.base_mva);

        for loss in &flows.losses {
            assert!(loss.re.abs() < 1e-9, "active loss {} on r=0 branch", loss.re);
        }
        Ok(())
    }

    #[test]
    fn injections_match_branch_and_shunt_flows() -> Result<()> {
        let circuit = cases::three_bus();
        let islands = find_islands(&circuit);
        let island = &islands[0];
        let adm = make_admittances(circuit.base_mva, &island.bus, &island.branch);

        let v = vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(0.97, -0.03),
            Complex64::from_polar(0.94, -0.06),
        ];
        let flows = island_flows(island, &adm, &v, circuit.base_mva);

        // The power entering all branches at a bus accounts for the whole
        // bus injection, three_bus has no bus shunts.
        for (i, s_bus) in flows.s_bus.iter().enumerate() {
            let mut s_branches = Complex64::default();
            for (k, br) in island.branch.iter().enumerate() {
                if br.from_bus == i {
                    s_branches += flows.s_from[k];
                }
                if br.to_bus == i {
                    s_branches += flows.s_to[k];
                }
            }
            assert!(
                (s_bus - s_branches).norm() < 1e-9,
                "bus {}: injection {} vs branch sum {}",
                i,
                s_bus,
                s_branches
            );
        }
        Ok(())
    }

    #[test]
    fn produced_power_follows_the_voltage_dependent_load() {
        let circuit = cases::three_bus();
        let islands = find_islands(&circuit);
        let island = &islands[0];
        let adm = make_admittances(circuit.base_mva, &island.bus, &island.branch);

        let v = island.sub_voltage(&circuit.initial_voltage());
        let flows = island_flows(island, &adm, &v, circuit.base_mva);

        for (i, (bus, v)) in zip(&island.bus, &v).enumerate() {
            let v_m = v.norm();
            let s_load = bus.load_s + bus.load_i * v_m + bus.load_y * (v_m * v_m);
            let expected = flows.s_bus[i].re + s_load.re;
            assert!((flows.gen_p[i] - expected).abs() < 1e-12);
        }
    }
}
