use crate::circuit::Bus;

/// Builds index lists for each type of bus (slack, PV, PQ).
///
/// The lists partition the bus array: every bus lands in exactly one list
/// according to its current type. The control supervisor may demote PV
/// buses to PQ between solves, so the lists must be rebuilt whenever the
/// type array changes.
pub fn bus_type_sets(bus: &[Bus]) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let slack = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_slack())
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    let pv = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_pv())
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();
    let pq = bus
        .iter()
        .enumerate()
        .filter(|(_, b)| b.is_pq())
        .map(|(i, _)| i)
        .collect::<Vec<usize>>();

    (slack, pv, pq)
}
