use num_complex::Complex64;

use crate::circuit::{Branch, Bus, BusType, Circuit, TapControl};

fn line(from_bus: usize, to_bus: usize, r: f64, x: f64, b: f64) -> Branch {
    Branch {
        from_bus,
        to_bus,
        r,
        x,
        b,
        ..Default::default()
    }
}

/// Three buses in a triangle on a 100 MVA base: a slack and two load buses.
pub fn three_bus() -> Circuit {
    let bus = vec![
        Bus {
            bus_type: BusType::Slack,
            ..Default::default()
        },
        Bus {
            load_s: Complex64::new(15.0, 10.0),
            ..Default::default()
        },
        Bus {
            load_s: Complex64::new(40.0, 32.0),
            ..Default::default()
        },
    ];
    let branch = vec![
        line(0, 1, 0.02, 0.08, 0.02),
        line(0, 2, 0.05, 0.25, 0.02),
        line(1, 2, 0.04, 0.15, 0.02),
    ];
    Circuit::new(100.0, bus, branch)
}

/// The triangle with bus 1 generating: a PV bus whose reactive limit is far
/// below what holding 1.02 pu would take.
pub fn pv_limited() -> Circuit {
    let mut circuit = three_bus();
    circuit.bus[1] = Bus {
        bus_type: BusType::PV,
        v_set: 1.02,
        p_gen: 30.0,
        load_s: Complex64::new(20.0, 40.0),
        q_min: -15.0,
        q_max: 15.0,
        ..Default::default()
    };
    circuit
}

/// The triangle with the 0-1 branch as a transformer that regulates the bus 1
/// voltage magnitude through its tap module.
pub fn tap_transformer() -> Circuit {
    let mut circuit = three_bus();
    circuit.branch[0] = Branch {
        from_bus: 0,
        to_bus: 1,
        r: 0.02,
        x: 0.08,
        tap_module: 1.0,
        tap_module_min: 0.9,
        tap_module_max: 1.1,
        tap_step: 0.0125,
        control: TapControl::VoltageControl,
        v_set: 1.0,
        ..Default::default()
    };
    circuit
}

/// The triangle with the 1-2 branch as a phase shifter that drives its from
/// side active power to -5 MW.
pub fn phase_shifter() -> Circuit {
    let mut circuit = three_bus();
    circuit.branch[2] = Branch {
        from_bus: 1,
        to_bus: 2,
        r: 0.04,
        x: 0.15,
        control: TapControl::PowerControl,
        p_set: -5.0,
        ..Default::default()
    };
    circuit
}

/// The triangle with scheduled slack generation and installed capacities on
/// the load buses, for sharing the slack power among them.
pub fn scheduled_slack() -> Circuit {
    let mut circuit = three_bus();
    circuit.bus[0].p_gen = 20.0;
    circuit.bus[1].p_installed = 60.0;
    circuit.bus[2].p_installed = 40.0;
    circuit
}

/// Two disconnected copies of the triangle in a single circuit.
pub fn twin_islands() -> Circuit {
    let single = three_bus();
    let mut bus = single.bus.clone();
    bus.extend(single.bus.iter().cloned());
    let mut branch = single.branch.clone();
    branch.extend(single.branch.iter().map(|br| {
        let mut br = br.clone();
        br.from_bus += 3;
        br.to_bus += 3;
        br
    }));
    Circuit::new(single.base_mva, bus, branch)
}

/// The triangle plus a fourth, generating bus with no connection to
/// anything.
pub fn stray_bus() -> Circuit {
    let mut circuit = three_bus();
    circuit.bus.push(Bus {
        bus_type: BusType::PV,
        v_set: 1.0,
        p_gen: 5.0,
        ..Default::default()
    });
    circuit
}
