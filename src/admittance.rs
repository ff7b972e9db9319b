use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csr::CSR;

use crate::circuit::Branch;
use crate::circuit::Bus;

/// Sparse admittance matrices of one network or island.
pub struct Admittances {
    /// Bus admittance matrix (nbus x nbus).
    pub y_bus: CSR<usize, Complex64>,

    /// From-end branch admittance matrix (nbranch x nbus), such that
    /// `y_from * v` is the vector of complex currents injected at each
    /// branch's from bus.
    pub y_from: CSR<usize, Complex64>,

    /// To-end branch admittance matrix (nbranch x nbus).
    pub y_to: CSR<usize, Complex64>,
}

/// Two-port admittance of a single branch:
///
///      | If |   | Yff  Yft |   | Vf |
///      |    | = |          | * |    |
///      | It |   | Ytf  Ytt |   | Vt |
///
/// An out-of-service branch is all zeros.
pub(crate) fn branch_admittances(br: &Branch) -> (Complex64, Complex64, Complex64, Complex64) {
    let y_s = br.y_s();
    let y_sh2 = if br.active {
        br.y_sh2()
    } else {
        Complex64::default()
    };
    // complex tap ratio, virtual taps from winding/bus nominal voltage mismatch
    let tap = Complex64::from_polar(br.tap(), br.tap_angle);
    let (vf, vt) = (br.vtap_f, br.vtap_t);

    let y_ff = (y_s + y_sh2) / (tap * tap.conj() * vf * vf);
    let y_ft = -y_s / (tap.conj() * vf * vt);
    let y_tf = -y_s / (tap * vt * vf);
    let y_tt = (y_s + y_sh2) / (vt * vt);

    (y_ff, y_ft, y_tf, y_tt)
}

/// Builds the bus admittance matrix and the branch admittance matrices.
///
/// Bus shunt devices are folded onto the Ybus diagonal in per-unit.
/// Out-of-service branches contribute nothing, so a bus connected only to
/// out-of-service branches yields a structurally singular row. That state
/// is legal here and is resolved by the island decomposition.
pub fn make_admittances(base_mva: f64, bus: &[Bus], branch: &[Branch]) -> Admittances {
    let nb = bus.len();
    let nl = branch.len();

    let mut y_bus = Coo::with_size(nb, nb);
    let mut y_f = Coo::with_size(nl, nb);
    let mut y_t = Coo::with_size(nl, nb);

    for (i, br) in branch.iter().enumerate() {
        let (y_ff, y_ft, y_tf, y_tt) = branch_admittances(br);

        let (f, t) = (br.from_bus, br.to_bus);

        y_f.push(i, f, y_ff);
        y_f.push(i, t, y_ft);

        y_t.push(i, f, y_tf);
        y_t.push(i, t, y_tt);

        y_bus.push(f, f, y_ff);
        y_bus.push(f, t, y_ft);
        y_bus.push(t, f, y_tf);
        y_bus.push(t, t, y_tt);
    }

    for (i, b) in bus.iter().enumerate() {
        y_bus.push(i, i, b.y_sh(base_mva));
    }

    Admittances {
        y_bus: y_bus.to_csr(),
        y_from: y_f.to_csr(),
        y_to: y_t.to_csr(),
    }
}
