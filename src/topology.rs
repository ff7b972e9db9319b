use std::collections::HashMap;

use num_complex::Complex64;

use crate::circuit::{Branch, Bus, Circuit};

/// A maximal connected subnetwork under the current active topology.
///
/// An island owns local bus and branch arrays, reindexed from zero, plus
/// one-way index arrays mapping every local element back to the full
/// network. The full network never references island objects.
pub struct Island {
    pub bus: Vec<Bus>,
    pub branch: Vec<Branch>,

    /// Full-network index of each island bus.
    pub original_bus_idx: Vec<usize>,

    /// Full-network index of each island branch.
    pub original_branch_idx: Vec<usize>,
}

impl Island {
    /// Slice of a full-network per-bus vector restricted to this island.
    pub fn sub_voltage(&self, v: &[Complex64]) -> Vec<Complex64> {
        self.original_bus_idx.iter().map(|&i| v[i]).collect()
    }
}

/// Splits the network into islands by connected components of the
/// bus adjacency graph restricted to in-service branches between
/// in-service buses.
///
/// Components are returned in ascending order of their first bus index
/// with bus and branch index arrays sorted. A branch belongs to an island
/// when both of its end buses do, whether or not it is in service; an
/// out-of-service branch simply contributes no admittance. Out-of-service
/// buses belong to no island.
pub fn find_islands(circuit: &Circuit) -> Vec<Island> {
    let nb = circuit.bus.len();

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); nb];
    for br in &circuit.branch {
        if !br.active {
            continue;
        }
        if !circuit.bus[br.from_bus].active || !circuit.bus[br.to_bus].active {
            continue;
        }
        adj[br.from_bus].push(br.to_bus);
        adj[br.to_bus].push(br.from_bus);
    }

    let mut visited = vec![false; nb];
    let mut components: Vec<Vec<usize>> = Vec::new();

    for root in 0..nb {
        if visited[root] || !circuit.bus[root].active {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![root];
        visited[root] = true;
        while let Some(i) = stack.pop() {
            component.push(i);
            for &j in &adj[i] {
                if !visited[j] {
                    visited[j] = true;
                    stack.push(j);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
        .into_iter()
        .map(|bus_idx| {
            let mut local = vec![usize::MAX; nb];
            for (li, &gi) in bus_idx.iter().enumerate() {
                local[gi] = li;
            }

            let mut branch_idx = Vec::new();
            let mut branch = Vec::new();
            for (k, br) in circuit.branch.iter().enumerate() {
                if local[br.from_bus] != usize::MAX && local[br.to_bus] != usize::MAX {
                    let mut b = br.clone();
                    b.from_bus = local[br.from_bus];
                    b.to_bus = local[br.to_bus];
                    branch_idx.push(k);
                    branch.push(b);
                }
            }

            let bus = bus_idx.iter().map(|&i| circuit.bus[i].clone()).collect();

            Island {
                bus,
                branch,
                original_bus_idx: bus_idx,
                original_branch_idx: branch_idx,
            }
        })
        .collect()
}

/// One distinct activity profile of a time series and the time steps
/// sharing it.
#[derive(Clone)]
pub struct TopologyState {
    pub bus_active: Vec<bool>,
    pub branch_active: Vec<bool>,

    /// Time steps with exactly this profile, in ascending order.
    pub time_steps: Vec<usize>,
}

impl TopologyState {
    /// Overwrites the circuit's active flags with this profile.
    pub fn apply(&self, circuit: &mut Circuit) {
        for (b, &active) in circuit.bus.iter_mut().zip(&self.bus_active) {
            b.active = active;
        }
        for (br, &active) in circuit.branch.iter_mut().zip(&self.branch_active) {
            br.active = active;
        }
    }
}

/// Groups time steps by identical bus/branch activity so the island split
/// is computed once per distinct state and reused for every step in the
/// group. Grouping never changes the per-step result, it only avoids
/// repeated decompositions.
pub fn find_island_states(
    bus_active: &[Vec<bool>],
    branch_active: &[Vec<bool>],
) -> Vec<TopologyState> {
    let nt = bus_active.len().min(branch_active.len());

    let mut states: Vec<TopologyState> = Vec::new();
    let mut index: HashMap<(Vec<bool>, Vec<bool>), usize> = HashMap::new();

    for t in 0..nt {
        let key = (bus_active[t].clone(), branch_active[t].clone());
        match index.get(&key) {
            Some(&s) => states[s].time_steps.push(t),
            None => {
                index.insert(key, states.len());
                states.push(TopologyState {
                    bus_active: bus_active[t].clone(),
                    branch_active: branch_active[t].clone(),
                    time_steps: vec![t],
                });
            }
        }
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Branch, Bus, BusType};
    use anyhow::{format_err, Result};

    fn bus(bus_type: BusType) -> Bus {
        Bus {
            bus_type,
            ..Default::default()
        }
    }

    fn line(from_bus: usize, to_bus: usize, active: bool) -> Branch {
        Branch {
            from_bus,
            to_bus,
            r: 0.01,
            x: 0.1,
            active,
            ..Default::default()
        }
    }

    #[test]
    fn two_components_and_isolated_bus() -> Result<()> {
        let circuit = Circuit::new(
            100.0,
            vec![
                bus(BusType::Slack),
                bus(BusType::PQ),
                bus(BusType::Slack),
                bus(BusType::PQ),
                bus(BusType::PQ),
            ],
            vec![
                line(0, 1, true),
                line(2, 3, true),
                line(1, 4, false), // out of service, must not join bus 4
            ],
        );
        let islands = find_islands(&circuit);

        if islands.len() != 3 {
            return Err(format_err!("expected 3 islands, got {}", islands.len()));
        }
        assert_eq!(islands[0].original_bus_idx, vec![0, 1]);
        assert_eq!(islands[1].original_bus_idx, vec![2, 3]);
        assert_eq!(islands[2].original_bus_idx, vec![4]);

        assert_eq!(islands[0].original_branch_idx, vec![0]);
        assert_eq!(islands[1].original_branch_idx, vec![1]);
        assert!(islands[2].original_branch_idx.is_empty());

        // local reindexing
        assert_eq!(islands[1].branch[0].from_bus, 0);
        assert_eq!(islands[1].branch[0].to_bus, 1);
        Ok(())
    }

    #[test]
    fn inactive_bus_detaches_its_branches() -> Result<()> {
        let mut circuit = Circuit::new(
            100.0,
            vec![bus(BusType::Slack), bus(BusType::PQ), bus(BusType::PQ)],
            vec![line(0, 1, true), line(1, 2, true)],
        );
        circuit.bus[1].active = false;

        let islands = find_islands(&circuit);
        if islands.len() != 2 {
            return Err(format_err!("expected 2 islands, got {}", islands.len()));
        }
        assert_eq!(islands[0].original_bus_idx, vec![0]);
        assert_eq!(islands[1].original_bus_idx, vec![2]);
        // both branches touch the dead bus
        assert!(islands[0].original_branch_idx.is_empty());
        assert!(islands[1].original_branch_idx.is_empty());
        Ok(())
    }

    #[test]
    fn states_grouped_by_identical_profiles() -> Result<()> {
        let bus_active = vec![
            vec![true, true],
            vec![true, true],
            vec![true, false],
            vec![true, true],
        ];
        let branch_active = vec![vec![true], vec![true], vec![true], vec![false]];

        let states = find_island_states(&bus_active, &branch_active);
        if states.len() != 3 {
            return Err(format_err!("expected 3 states, got {}", states.len()));
        }
        assert_eq!(states[0].time_steps, vec![0, 1]);
        assert_eq!(states[1].time_steps, vec![2]);
        assert_eq!(states[2].time_steps, vec![3]);
        Ok(())
    }
}
