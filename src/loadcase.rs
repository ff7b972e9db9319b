use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{bail, Result};
use caseformat::{read_dir, read_zip};
use num_complex::Complex64;

use crate::circuit::{Branch, Bus, BusType, Circuit};

/// Reads a case from a zip archive ("case" extension) or a directory of
/// CSV files and converts it into a [`Circuit`].
///
/// Bus numbers may be arbitrary and are remapped to contiguous indexes in
/// file order. In-service generators are aggregated onto their buses and
/// branch shift angles are converted from degrees to radians. Isolated
/// (type NONE) buses are kept but marked inactive.
pub fn load_case(case_path: &Path) -> Result<Circuit> {
    let is_zip = match case_path.extension() {
        None => false,
        Some(os_str) => os_str.to_str() == Some("case"),
    };

    let (case, bus, gen, branch, _gencost, _dcline, _readme, _license) = if is_zip {
        let file = File::open(case_path)?;
        read_zip(file)?
    } else {
        read_dir(&case_path.to_path_buf())?
    };

    let mut e2i: HashMap<usize, usize> = HashMap::with_capacity(bus.len());
    let mut buses: Vec<Bus> = Vec::with_capacity(bus.len());
    for (i, b) in bus.iter().enumerate() {
        if e2i.insert(b.bus_i, i).is_some() {
            bail!("duplicate bus number {}", b.bus_i);
        }
        let bus_type = if b.is_ref() {
            BusType::Slack
        } else if b.is_pv() {
            BusType::PV
        } else {
            BusType::PQ
        };
        buses.push(Bus {
            bus_type,
            base_kv: b.base_kv,
            v_set: b.vm,
            v_min: b.vmin,
            v_max: b.vmax,
            load_s: Complex64::new(b.pd, b.qd),
            gs: b.gs,
            bs: b.bs,
            active: b.is_pq() || b.is_pv() || b.is_ref(),
            ..Default::default()
        });
    }

    let mut has_gen = vec![false; buses.len()];
    for g in gen.iter().filter(|g| g.is_on()) {
        let i = match e2i.get(&g.gen_bus) {
            Some(&i) => i,
            None => bail!("generator at unknown bus {}", g.gen_bus),
        };
        let b = &mut buses[i];
        if !has_gen[i] {
            has_gen[i] = true;
            b.v_set = g.vg;
            b.q_min = 0.0;
            b.q_max = 0.0;
        }
        b.p_gen += g.pg;
        b.q_gen += g.qg;
        b.q_min += g.qmin;
        b.q_max += g.qmax;
        b.p_installed += g.pmax.max(0.0);
    }

    // A PV bus without an in-service generator cannot hold its voltage.
    for (b, &has) in buses.iter_mut().zip(&has_gen) {
        if b.bus_type == BusType::PV && !has {
            b.bus_type = BusType::PQ;
        }
    }

    let mut branches: Vec<Branch> = Vec::with_capacity(branch.len());
    for br in &branch {
        let f = match e2i.get(&br.f_bus) {
            Some(&f) => f,
            None => bail!("branch from unknown bus {}", br.f_bus),
        };
        let t = match e2i.get(&br.t_bus) {
            Some(&t) => t,
            None => bail!("branch to unknown bus {}", br.t_bus),
        };
        branches.push(Branch {
            from_bus: f,
            to_bus: t,
            r: br.br_r,
            x: br.br_x,
            b: br.br_b,
            tap_module: br.tap,
            tap_angle: br.shift.to_radians(),
            rate: br.rate_a,
            active: br.is_on(),
            ..Default::default()
        });
    }

    Ok(Circuit::new(case.base_mva, buses, branches))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_is_an_error() {
        assert!(load_case(Path::new("no/such/case.case")).is_err());
    }
}
