use num_complex::Complex64;

/// Circuit is a compiled numerical network: per-unit bus and branch arrays
/// on a common MVA base, ready to be split into islands and solved.
#[derive(Clone)]
pub struct Circuit {
    /// System MVA base used for converting power into per-unit quantities.
    /// Default value is 100.
    pub base_mva: f64,

    /// Network nodes, including static loads, shunts and the generation
    /// aggregated at each node.
    pub bus: Vec<Bus>,

    /// Transmission lines/cables and two winding transformers.
    pub branch: Vec<Branch>,
}

impl Circuit {
    pub fn new(base_mva: f64, bus: Vec<Bus>, branch: Vec<Branch>) -> Self {
        Self {
            base_mva,
            bus,
            branch,
        }
    }

    /// Builds the starting voltage vector: slack and PV buses at their
    /// set-points, PQ buses flat at 1∠0.
    pub fn initial_voltage(&self) -> Vec<Complex64> {
        self.bus
            .iter()
            .map(|b| match b.bus_type {
                BusType::Slack | BusType::PV => Complex64::new(b.v_set, 0.0),
                BusType::PQ => Complex64::new(1.0, 0.0),
            })
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BusType {
    /// Fixed active and reactive power.
    PQ = 0,
    /// Fixed voltage magnitude and active power.
    PV = 1,
    /// Reference voltage angle. Slack active and reactive power.
    Slack = 2,
}

/// Bus is a node in the network graph. Static loads, shunt devices and
/// generation are aggregated into the bus definition.
#[derive(Clone)]
pub struct Bus {
    pub bus_type: BusType,

    /// Base voltage (kV).
    pub base_kv: f64,

    /// Voltage magnitude set-point (p.u.) held by the local generator.
    /// Used by slack and PV buses.
    pub v_set: f64,

    /// Minimum voltage magnitude (p.u.).
    pub v_min: f64,

    /// Maximum voltage magnitude (p.u.).
    pub v_max: f64,

    /// Constant-power load (MVA).
    pub load_s: Complex64,

    /// Constant-current load (MVA at V = 1.0 p.u.).
    pub load_i: Complex64,

    /// Constant-impedance load (MVA at V = 1.0 p.u.).
    pub load_y: Complex64,

    /// Shunt conductance (MW at V = 1.0 p.u.).
    pub gs: f64,

    /// Shunt susceptance (MVAr at V = 1.0 p.u.).
    pub bs: f64,

    /// Generator real power output (MW).
    pub p_gen: f64,

    /// Generator reactive power output (MVAr).
    pub q_gen: f64,

    /// Minimum generator reactive power output (MVAr).
    pub q_min: f64,

    /// Maximum generator reactive power output (MVAr).
    pub q_max: f64,

    /// Installed generation capacity (MW). Weight for distributed slack.
    pub p_installed: f64,

    /// In-service flag.
    pub active: bool,
}

impl Bus {
    pub fn is_slack(&self) -> bool {
        self.bus_type == BusType::Slack
    }

    pub fn is_pv(&self) -> bool {
        self.bus_type == BusType::PV
    }

    pub fn is_pq(&self) -> bool {
        self.bus_type == BusType::PQ
    }

    pub(crate) fn y_sh(&self, base_mva: f64) -> Complex64 {
        Complex64::new(self.gs, self.bs) / Complex64::new(base_mva, 0.0)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            bus_type: BusType::PQ,
            base_kv: 0.0,
            v_set: 1.0,
            v_min: 0.0,
            v_max: f64::INFINITY,
            load_s: Complex64::new(0.0, 0.0),
            load_i: Complex64::new(0.0, 0.0),
            load_y: Complex64::new(0.0, 0.0),
            gs: 0.0,
            bs: 0.0,
            p_gen: 0.0,
            q_gen: 0.0,
            q_min: f64::NEG_INFINITY,
            q_max: f64::INFINITY,
            p_installed: 0.0,
            active: true,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum TapControl {
    /// Tap fixed at its present position.
    Fixed,
    /// Tap module regulates the "to" bus voltage magnitude to `v_set`.
    VoltageControl,
    /// Tap angle regulates the "from" side active power to `p_set`.
    PowerControl,
}

/// Branch represents either a transmission line/cable or a two winding
/// transformer.
#[derive(Clone)]
pub struct Branch {
    /// From bus index.
    pub from_bus: usize,

    /// To bus index.
    pub to_bus: usize,

    /// Resistance (p.u.).
    pub r: f64,

    /// Reactance (p.u.).
    pub x: f64,

    /// Total shunt conductance (p.u.).
    pub g: f64,

    /// Total line charging susceptance (p.u.).
    pub b: f64,

    /// Transformer off nominal tap ratio. Zero means 1.0.
    pub tap_module: f64,

    /// Minimum tap ratio.
    pub tap_module_min: f64,

    /// Maximum tap ratio.
    pub tap_module_max: f64,

    /// Discrete tap step size. Zero for a continuously variable tap.
    pub tap_step: f64,

    /// Transformer phase shift angle (radians).
    pub tap_angle: f64,

    /// Minimum phase shift angle (radians).
    pub tap_angle_min: f64,

    /// Maximum phase shift angle (radians).
    pub tap_angle_max: f64,

    /// Virtual tap at the from end, from the ratio of the transformer
    /// winding rating to the bus nominal voltage.
    pub vtap_f: f64,

    /// Virtual tap at the to end.
    pub vtap_t: f64,

    /// Tap control mode.
    pub control: TapControl,

    /// Regulated voltage set-point at the "to" bus (p.u.).
    pub v_set: f64,

    /// Regulated active power set-point at the "from" side (MW).
    pub p_set: f64,

    /// MVA rating.
    pub rate: f64,

    /// In-service flag.
    pub active: bool,
}

impl Branch {
    /// Series admittance. Zero for an out-of-service branch.
    pub(crate) fn y_s(&self) -> Complex64 {
        if !self.active {
            Complex64::new(0.0, 0.0)
        } else {
            Complex64::new(1.0, 0.0) / Complex64::new(self.r, self.x)
        }
    }

    /// Half of the total shunt admittance, placed at each end.
    pub(crate) fn y_sh2(&self) -> Complex64 {
        Complex64::new(self.g, self.b) / Complex64::new(2.0, 0.0)
    }

    /// Effective tap ratio.
    pub(crate) fn tap(&self) -> f64 {
        if self.tap_module == 0.0 {
            1.0
        } else {
            self.tap_module
        }
    }
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            from_bus: 0,
            to_bus: 0,
            r: 0.0,
            x: 0.0,
            g: 0.0,
            b: 0.0,
            tap_module: 0.0,
            tap_module_min: 0.9,
            tap_module_max: 1.1,
            tap_step: 0.0,
            tap_angle: 0.0,
            tap_angle_min: -std::f64::consts::PI,
            tap_angle_max: std::f64::consts::PI,
            vtap_f: 1.0,
            vtap_t: 1.0,
            control: TapControl::Fixed,
            v_set: 1.0,
            p_set: 0.0,
            rate: 0.0,
            active: true,
        }
    }
}
