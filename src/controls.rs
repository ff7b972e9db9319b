use num_complex::Complex64;
use sparsetools::csr::CSR;

use crate::admittance::branch_admittances;
use crate::circuit::{Branch, Bus, BusType, TapControl};

/// Half band around the power set-point inside which a phase shifter
/// holds its angle (MW).
const PHASE_DEADBAND: f64 = 0.05;

/// One round of reactive limit enforcement at the PV buses.
///
/// The generator reactive output implied by the solved voltages is the
/// calculated injection plus the local voltage dependent load. A PV bus
/// whose output violates a limit is switched to PQ with its output
/// clamped at that limit. Switches are one way, a demoted bus stays PQ
/// for the remainder of the solve. Returns true when any bus switched.
pub fn switch_q_limits(
    bus: &mut [Bus],
    base_mva: f64,
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> bool {
    let v = v.to_vec();
    let i_bus: Vec<Complex64> = y_bus * &v;

    let mut changed = false;
    for (i, b) in bus.iter_mut().enumerate() {
        if !b.is_pv() {
            continue;
        }
        let v_m = v[i].norm();
        let s_calc = v[i] * i_bus[i].conj() * base_mva;
        let q_load = (b.load_s + b.load_i * v_m + b.load_y * (v_m * v_m)).im;
        let q_gen = s_calc.im + q_load;

        if q_gen > b.q_max {
            log::debug!(
                "bus {}: {} MVAr above the {} MVAr limit, switching PV to PQ",
                i,
                q_gen,
                b.q_max
            );
            b.bus_type = BusType::PQ;
            b.q_gen = b.q_max;
            changed = true;
        } else if q_gen < b.q_min {
            log::debug!(
                "bus {}: {} MVAr below the {} MVAr limit, switching PV to PQ",
                i,
                q_gen,
                b.q_min
            );
            b.bus_type = BusType::PQ;
            b.q_gen = b.q_min;
            changed = true;
        }
    }
    changed
}

/// One round of tap module regulation for the voltage controlling
/// transformers.
///
/// Each controller steps its module towards the position whose turns
/// ratio maps the regulated to side voltage onto the set-point, clamped
/// to the module range. Transformers without a tap step adjust
/// continuously. Returns true when any tap moved, which invalidates the
/// admittance matrices.
pub fn adjust_tap_modules(branch: &mut [Branch], v_m: &[f64]) -> bool {
    let mut changed = false;
    for (k, br) in branch.iter_mut().enumerate() {
        if !br.active || br.control != TapControl::VoltageControl {
            continue;
        }
        let v_reg = v_m[br.to_bus];
        let module = br.tap();

        let deadband = if br.tap_step > 0.0 {
            0.5 * br.tap_step
        } else {
            1e-4
        };
        if (v_reg - br.v_set).abs() < deadband {
            continue;
        }

        let desired = module * v_reg / br.v_set;
        let new_module = if br.tap_step > 0.0 {
            let pos = ((desired - 1.0) / br.tap_step).round();
            1.0 + pos * br.tap_step
        } else {
            desired
        }
        .max(br.tap_module_min)
        .min(br.tap_module_max);

        if (new_module - module).abs() > 1e-12 {
            log::debug!(
                "branch {}: regulated voltage {} for set-point {}, tap module {} -> {}",
                k,
                v_reg,
                br.v_set,
                module,
                new_module
            );
            br.tap_module = new_module;
            changed = true;
        }
    }
    changed
}

/// One round of tap angle regulation for the power controlling phase
/// shifters.
///
/// The from side active power is steered onto the set-point with a
/// secant update over the last two angle moves. The first move, where
/// only one point is known, uses the branch local sensitivity of the
/// from side power to the angle. `prev` carries the previous angle and
/// power sample per branch across rounds. Returns true when any angle
/// moved, which invalidates the admittance matrices.
pub fn adjust_tap_phases(
    branch: &mut [Branch],
    base_mva: f64,
    y_from: &CSR<usize, Complex64>,
    v: &[Complex64],
    prev: &mut [Option<(f64, f64)>],
) -> bool {
    let v = v.to_vec();
    let i_from: Vec<Complex64> = y_from * &v;

    let mut changed = false;
    for (k, br) in branch.iter_mut().enumerate() {
        if !br.active || br.control != TapControl::PowerControl {
            continue;
        }
        let p_from = (v[br.from_bus] * i_from[k].conj()).re * base_mva;
        let err = p_from - br.p_set;
        if err.abs() < PHASE_DEADBAND {
            prev[k] = Some((br.tap_angle, p_from));
            continue;
        }

        let slope = match prev[k] {
            Some((tau_prev, p_prev)) if (br.tap_angle - tau_prev).abs() > 1e-9 => {
                (p_from - p_prev) / (br.tap_angle - tau_prev)
            }
            _ => {
                // d(Pf)/d(tau) with the terminal voltages held fixed.
                let (_, y_ft, _, _) = branch_admittances(br);
                let d_sf = -Complex64::i() * v[br.from_bus] * (y_ft * v[br.to_bus]).conj();
                d_sf.re * base_mva
            }
        };
        if !slope.is_finite() || slope.abs() < 1e-6 {
            log::debug!("branch {}: angle sensitivity {} too small, holding", k, slope);
            continue;
        }

        let tau = (br.tap_angle - err / slope)
            .max(br.tap_angle_min)
            .min(br.tap_angle_max);

        if (tau - br.tap_angle).abs() > 1e-9 {
            log::debug!(
                "branch {}: from power {} MW for set-point {} MW, tap angle {} -> {}",
                k,
                p_from,
                br.p_set,
                br.tap_angle,
                tau
            );
            prev[k] = Some((br.tap_angle, p_from));
            br.tap_angle = tau;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;
    use crate::admittance::make_admittances;
    use crate::tests::cases;

    #[test]
    fn pv_bus_switches_at_an_obviously_violated_limit() {
        let circuit = cases::three_bus();
        let adm = make_admittances(circuit.base_mva, &circuit.bus, &circuit.branch);
        let v = circuit.initial_voltage();

        let mut bus = circuit.bus.clone();
        bus[1].bus_type = BusType::PV;
        bus[1].q_max = -1000.0;
        assert!(switch_q_limits(
            &mut bus,
            circuit.base_mva,
            &adm.y_bus,
            &v
        ));
        assert_eq!(bus[1].bus_type, BusType::PQ);
        assert_eq!(bus[1].q_gen, -1000.0);

        let mut bus = circuit.bus.clone();
        bus[1].bus_type = BusType::PV;
        bus[1].q_min = 1000.0;
        assert!(switch_q_limits(
            &mut bus,
            circuit.base_mva,
            &adm.y_bus,
            &v
        ));
        assert_eq!(bus[1].bus_type, BusType::PQ);
        assert_eq!(bus[1].q_gen, 1000.0);
    }

    #[test]
    fn unlimited_pv_bus_stays_pv() {
        let circuit = cases::three_bus();
        let adm = make_admittances(circuit.base_mva, &circuit.bus, &circuit.branch);
        let v = circuit.initial_voltage();

        let mut bus = circuit.bus.clone();
        bus[1].bus_type = BusType::PV;
        assert!(!switch_q_limits(
            &mut bus,
            circuit.base_mva,
            &adm.y_bus,
            &v
        ));
        assert_eq!(bus[1].bus_type, BusType::PV);
    }

    #[test]
    fn tap_module_steps_to_the_nearest_position() {
        let mut branch = vec![Branch {
            from_bus: 0,
            to_bus: 1,
            x: 0.08,
            control: TapControl::VoltageControl,
            v_set: 1.0,
            tap_step: 0.0125,
            ..Default::default()
        }];

        // 0.97 p.u. regulated voltage asks for a 0.97 ratio, two steps down.
        assert!(adjust_tap_modules(&mut branch, &[1.0, 0.97]));
        assert!((branch[0].tap_module - 0.975).abs() < 1e-12);

        // Inside the half step deadband nothing moves.
        let mut branch = vec![Branch {
            from_bus: 0,
            to_bus: 1,
            x: 0.08,
            control: TapControl::VoltageControl,
            v_set: 1.0,
            tap_step: 0.0125,
            ..Default::default()
        }];
        assert!(!adjust_tap_modules(&mut branch, &[1.0, 0.999]));
    }

    #[test]
    fn tap_module_respects_the_range() {
        let mut branch = vec![Branch {
            from_bus: 0,
            to_bus: 1,
            x: 0.08,
            control: TapControl::VoltageControl,
            v_set: 1.0,
            tap_step: 0.0125,
            tap_module_min: 0.9,
            tap_module_max: 1.1,
            ..Default::default()
        }];
        assert!(adjust_tap_modules(&mut branch, &[1.0, 0.80]));
        assert_eq!(branch[0].tap_module, 0.9);
    }

    #[test]
    fn first_phase_move_uses_the_branch_sensitivity() {
        let bus = vec![
            Bus {
                bus_type: BusType::Slack,
                v_set: 1.0,
                ..Default::default()
            },
            Bus::default(),
        ];
        let mut branch = vec![Branch {
            from_bus: 0,
            to_bus: 1,
            x: 0.1,
            control: TapControl::PowerControl,
            p_set: 10.0,
            tap_angle_min: -0.5 * PI,
            tap_angle_max: 0.5 * PI,
            ..Default::default()
        }];
        let adm = make_admittances(100.0, &bus, &branch);
        let v = vec![Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)];

        // Flat voltages carry no power, the sensitivity is -1000 MW/rad,
        // so a 10 MW target asks for a -0.01 rad angle.
        let mut prev = vec![None];
        assert!(adjust_tap_phases(
            &mut branch,
            100.0,
            &adm.y_from,
            &v,
            &mut prev
        ));
        assert!((branch[0].tap_angle + 0.01).abs() < 1e-9);
        assert!(prev[0].is_some());
    }
}
