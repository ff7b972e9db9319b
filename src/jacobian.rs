use anyhow::Result;
use num_complex::Complex64;
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::{CCSR, CSR};

use crate::power::d_sbus_d_v;

/// Forms the reduced power flow Jacobian for the current PV/PQ partition:
///
/// ```text
///         pv∪pq angles   pq magnitudes
/// pv∪pq  [    J11      |     J12      ]
/// pq     [    J21      |     J22      ]
/// ```
///
/// `neg_d_sd_d_vm` is the voltage dependence of the specified injection
/// (zero for constant-power loads); it lands on the dVm diagonal so that
/// ZIP loads are linearized together with the network equations.
///
/// The sparsity pattern depends on the partition, so the matrix must be
/// rebuilt whenever the supervisor reclassifies a bus, as well as at every
/// new voltage iterate. Units are per unit and radians.
pub fn make_jacobian(
    y_bus: &CSR<usize, Complex64>,
    v: &[Complex64],
    neg_d_sd_d_vm: CSR<usize, Complex64>,
    pv_pq: &[usize],
    pq: &[usize],
) -> Result<CSC<usize, f64>> {
    let (d_sbus_d_va, d_sbus_d_vm) = d_sbus_d_v(y_bus, v);
    let d_sbus_d_vm = d_sbus_d_vm - neg_d_sd_d_vm;

    let j11 = d_sbus_d_va.select(Some(pv_pq), Some(pv_pq))?.real();
    let j12 = d_sbus_d_vm.select(Some(pv_pq), Some(pq))?.real();
    let j21 = d_sbus_d_va.select(Some(pq), Some(pv_pq))?.imag();
    let j22 = d_sbus_d_vm.select(Some(pq), Some(pq))?.imag();

    let jac = Coo::compose([
        [&j11.to_coo(), &j12.to_coo()],
        [&j21.to_coo(), &j22.to_coo()],
    ])?
    .to_csc();
    log::trace!("J:\n{}", jac.to_csr().to_table());

    Ok(jac)
}
