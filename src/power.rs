use num_complex::Complex64;
use sparsetools::csr::{CCSR, CSR};

use crate::circuit::Bus;

/// Specified complex bus power injection and its voltage dependence.
///
/// The solvers only see this trait, so the injection model (here the ZIP
/// load aggregate) can be swapped without touching the iteration loops.
pub trait SBus {
    /// Net specified injection in per unit, generation minus load,
    /// evaluated at the given voltage magnitudes.
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64>;

    /// Derivative of the specified injection w.r.t. voltage magnitude,
    /// negated (the Jacobian subtracts it from dScalc/dVm).
    fn d_sbus_d_vm(&self, v_m: &[f64]) -> CSR<usize, Complex64>;
}

/// Injection model over the per-bus aggregates of a circuit or island:
/// generator output minus ZIP load.
pub struct CircuitSBus<'a> {
    pub base_mva: f64,
    pub bus: &'a [Bus],
}

impl<'a> SBus for CircuitSBus<'a> {
    fn s_bus(&self, v_m: &[f64]) -> Vec<Complex64> {
        let base_mva = Complex64::new(self.base_mva, 0.0);

        self.bus
            .iter()
            .zip(v_m)
            .map(|(b, &vm_i)| {
                let s_gen = Complex64::new(b.p_gen, b.q_gen) / base_mva;

                let sd_p = b.load_s / base_mva;
                let sd_i = b.load_i / base_mva;
                let sd_z = b.load_y / base_mva;
                let vm_i = Complex64::new(vm_i, 0.0);

                s_gen - (sd_p + sd_i * vm_i + sd_z * (vm_i * vm_i))
            })
            .collect()
    }

    fn d_sbus_d_vm(&self, v_m: &[f64]) -> CSR<usize, Complex64> {
        const TWO: Complex64 = Complex64 { re: 2.0, im: 0.0 };
        let base_mva = Complex64::new(self.base_mva, 0.0);

        let diag: Vec<Complex64> = self
            .bus
            .iter()
            .zip(v_m)
            .map(|(b, &vm_i)| {
                if b.load_i != Complex64::default() || b.load_y != Complex64::default() {
                    let sd_i = b.load_i / base_mva;
                    let sd_z = b.load_y / base_mva;
                    let vm_i = Complex64::new(vm_i, 0.0);

                    -(sd_i + TWO * vm_i * sd_z)
                } else {
                    Complex64::default()
                }
            })
            .collect();

        CSR::with_diagonal(diag)
    }
}

/// Computes partial derivatives of calculated power injection w.r.t.
/// voltage angle and magnitude (polar coordinates).
pub fn d_sbus_d_v(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> (CSR<usize, Complex64>, CSR<usize, Complex64>) {
    let i_bus = y_bus * v;

    let diag_v = CSR::<usize, Complex64>::with_diagonal(v.to_vec());
    let diag_i_bus = CSR::<usize, Complex64>::with_diagonal(i_bus);

    let v_norm = v
        .iter()
        .map(|v| v / Complex64::new(v.norm(), 0.0))
        .collect();
    let diag_v_norm = CSR::<usize, Complex64>::with_diagonal(v_norm);

    // dSbus/dVa = 1j * diagV * conj(diagIbus - Ybus * diagV)
    // dSbus/dVm = diagV * conj(Ybus * diagVnorm) + conj(diagIbus) * diagVnorm

    let mut d_sbus_d_va = &diag_v * (&diag_i_bus - y_bus * &diag_v).conj() * Complex64::i();
    let d_sbus_d_vm = &diag_v * (y_bus * &diag_v_norm).conj() + diag_i_bus.conj() * &diag_v_norm;

    d_sbus_d_va.sort_indexes();

    (d_sbus_d_va, d_sbus_d_vm)
}

/// Computes partial derivatives of the branch currents `y_br * v` w.r.t.
/// voltage angle and magnitude. `y_br` is either the from-end or the
/// to-end branch admittance matrix.
pub fn d_ibr_d_v(
    y_br: &CSR<usize, Complex64>,
    v: &[Complex64],
) -> (CSR<usize, Complex64>, CSR<usize, Complex64>) {
    let diag_v = CSR::<usize, Complex64>::with_diagonal(v.to_vec());

    let v_norm = v
        .iter()
        .map(|v| v / Complex64::new(v.norm(), 0.0))
        .collect();
    let diag_v_norm = CSR::<usize, Complex64>::with_diagonal(v_norm);

    // dIbr/dVa = Ybr * 1j * diagV
    // dIbr/dVm = Ybr * diagVnorm

    let d_ibr_d_va = y_br * &diag_v * Complex64::i();
    let d_ibr_d_vm = y_br * &diag_v_norm;

    (d_ibr_d_va, d_ibr_d_vm)
}
