//! Turning physical adjacency into power edges.
//!
//! Structures report that their surroundings changed; the grid then looks
//! at every power port of the structure, follows whatever wiring the port
//! faces to the structure at the other end of the run, and adds, repoints
//! or removes the edge at that port so the graph matches the world.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use voltaic_core::id::{PortIndex, Placement, VertexId};
use voltaic_core::vertex::VertexStore;

use crate::edge::{Endpoint, PowerEdge, TransportStrength};
use crate::grid::Grid;

/// Errors that can occur while resolving adjacency.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectivityError {
    #[error("vertex not in store: {0:?}")]
    UnknownVertex(VertexId),
    #[error("vertex has no placement in the layout: {0:?}")]
    NotPlaced(VertexId),
}

// ---------------------------------------------------------------------------
// World layout
// ---------------------------------------------------------------------------

/// Wiring that can occupy a cell between structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wiring {
    /// Low-tier cable.
    Cable,
    /// Placeholder cell of a high-tier pole line.
    PoleGhost,
}

impl Wiring {
    pub fn strength(self) -> TransportStrength {
        match self {
            Wiring::Cable => TransportStrength::Low,
            Wiring::PoleGhost => TransportStrength::High,
        }
    }
}

/// Where a power port sits and which cell it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSite {
    pub port: PortIndex,
    pub cell: Placement,
    pub facing: Placement,
}

/// The world as seen by the connectivity protocol. Supplied by the host
/// simulation.
pub trait PowerLayout {
    /// Power ports of `vertex`, or `None` if it is not placed.
    fn port_sites(&self, vertex: VertexId) -> Option<Vec<PortSite>>;

    /// Wiring occupying `cell`.
    fn wiring_at(&self, cell: Placement) -> Option<Wiring>;

    /// Cells the wiring on `cell` continues into.
    fn wiring_links(&self, cell: Placement) -> Vec<Placement>;

    /// The structure port on `cell` that faces `from`, if any.
    fn port_facing(&self, cell: Placement, from: Placement) -> Option<Endpoint>;
}

/// Edge changes made by one adjacency report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub added: Vec<PowerEdge>,
    pub spliced: Vec<PowerEdge>,
    pub removed: Vec<PowerEdge>,
}

impl ConnectivityReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.spliced.is_empty() && self.removed.is_empty()
    }
}

/// Follow the run starting at `site` to the first structure port at its far
/// end. Runs are walked breadth-first; loops in the wiring terminate.
fn trace_run<L: PowerLayout + ?Sized>(
    layout: &L,
    vertex: VertexId,
    site: &PortSite,
) -> Option<(Endpoint, TransportStrength)> {
    let Some(wiring) = layout.wiring_at(site.facing) else {
        // Structures sitting port to port connect at the Low tier.
        return layout
            .port_facing(site.facing, site.cell)
            .filter(|far| far.vertex != vertex)
            .map(|far| (far, TransportStrength::Low));
    };

    let mut visited = BTreeSet::from([site.cell, site.facing]);
    let mut queue = VecDeque::from([site.facing]);
    while let Some(cell) = queue.pop_front() {
        for next in layout.wiring_links(cell) {
            if visited.contains(&next) {
                continue;
            }
            if layout.wiring_at(next) == Some(wiring) {
                visited.insert(next);
                queue.push_back(next);
            } else if let Some(far) = layout.port_facing(next, cell) {
                if far.vertex != vertex {
                    return Some((far, wiring.strength()));
                }
            }
        }
    }
    None
}

/// A local port and the far endpoint its run reaches.
type Target = (PortIndex, Endpoint, TransportStrength);

/// An existing edge to be rewired in place rather than replaced.
struct Repoint {
    edge: PowerEdge,
    keep: VertexId,
    end: Endpoint,
    claim: Target,
}

impl Grid {
    /// Register a newly placed structure in a singleton network.
    ///
    /// Returns `Ok(false)` if it was already registered.
    pub fn register_power_vertex<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        vertex: VertexId,
    ) -> Result<bool, ConnectivityError> {
        let profile = store
            .vertex(vertex)
            .ok_or(ConnectivityError::UnknownVertex(vertex))?
            .profile();
        Ok(self.add_vertex(vertex, &profile))
    }

    /// Drop a destroyed structure. Neighbours left without edges become
    /// islands.
    pub fn unregister_power_vertex(&mut self, vertex: VertexId) -> bool {
        self.remove_vertex(vertex, true)
    }

    /// Bring the edges at every power port of `vertex` in line with the
    /// wiring around it.
    ///
    /// Ports are resolved together rather than one at a time, so a rotated
    /// structure keeps its links:
    ///
    /// 1. Edges that already lead to the traced structure are left alone.
    /// 2. An edge whose far end is now traced from another local port moves
    ///    to that port. Otherwise an edge whose own port traces somewhere
    ///    new at the same tier is repointed at its far end. Any other edge
    ///    is stale.
    /// 3. Stale edges are removed, then repoints are applied until none
    ///    make progress. Repoints that cannot be applied (a cross-network
    ///    target, or ports swapping places) are replaced by a fresh edge.
    /// 4. Traced targets that are still unclaimed get new edges.
    pub fn report_adjacency_changed<S, L>(
        &mut self,
        store: &S,
        layout: &L,
        vertex: VertexId,
    ) -> Result<ConnectivityReport, ConnectivityError>
    where
        S: VertexStore + ?Sized,
        L: PowerLayout + ?Sized,
    {
        self.register_power_vertex(store, vertex)?;
        let sites = layout
            .port_sites(vertex)
            .ok_or(ConnectivityError::NotPlaced(vertex))?;

        let mut unmet: Vec<Target> = Vec::new();
        let mut pending: Vec<(PortIndex, PowerEdge)> = Vec::new();
        for site in &sites {
            let current = self.edge_at(Endpoint::new(vertex, site.port));
            let target = trace_run(layout, vertex, site);
            if let (Some(edge), Some((far, strength))) = (current, target) {
                if edge.other(vertex) == Some(far) && edge.strength() == strength {
                    continue;
                }
            }
            if let Some(edge) = current {
                pending.push((site.port, edge));
            }
            if let Some((far, strength)) = target {
                unmet.push((site.port, far, strength));
            }
        }

        let mut repoints: Vec<Repoint> = Vec::new();
        let mut stale: Vec<PowerEdge> = Vec::new();
        for (port, edge) in pending {
            let far_now = edge.other(vertex);
            let moved = unmet
                .iter()
                .position(|(_, far, strength)| Some(*far) == far_now && *strength == edge.strength());
            if let Some(i) = moved {
                let claim = unmet.swap_remove(i);
                repoints.push(Repoint {
                    edge,
                    keep: claim.1.vertex,
                    end: Endpoint::new(vertex, claim.0),
                    claim,
                });
                continue;
            }
            let retarget = unmet
                .iter()
                .position(|(p, _, strength)| *p == port && *strength == edge.strength());
            match retarget {
                Some(i) => {
                    let claim = unmet.swap_remove(i);
                    repoints.push(Repoint { edge, keep: vertex, end: claim.1, claim });
                }
                None => stale.push(edge),
            }
        }

        let mut report = ConnectivityReport::default();
        for edge in stale {
            if self.remove_edge(&edge, true) {
                report.removed.push(edge);
            }
        }

        // A repoint may wait on a slot another repoint vacates.
        loop {
            let before = repoints.len();
            repoints.retain(|r| match self.splice_edge(&r.edge, r.keep, r.end) {
                Some(spliced) => {
                    report.spliced.push(spliced);
                    false
                }
                None => true,
            });
            if repoints.is_empty() || repoints.len() == before {
                break;
            }
        }
        for r in repoints {
            if self.remove_edge(&r.edge, true) {
                report.removed.push(r.edge);
            }
            unmet.push(r.claim);
        }

        for (port, far, strength) in unmet {
            if let Some(added) = self.add_edge(store, vertex, port, far.vertex, far.port, strength) {
                report.added.push(added);
            }
        }

        if !report.is_unchanged() {
            debug!(
                vertex = vertex.0,
                added = report.added.len(),
                spliced = report.spliced.len(),
                removed = report.removed.len(),
                "adjacency resolved"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::grid::GridEvent;
    use voltaic_core::test_utils::*;

    /// Cells with four-way wiring and explicitly placed structure ports.
    #[derive(Default)]
    struct MockLayout {
        sites: BTreeMap<VertexId, Vec<PortSite>>,
        wiring: BTreeMap<Placement, Wiring>,
        facing: BTreeMap<(Placement, Placement), Endpoint>,
    }

    impl MockLayout {
        /// Place a port of `vertex` on `cell` facing `toward`.
        fn port(&mut self, vertex: u32, port: u16, cell: Placement, toward: Placement) {
            self.sites.entry(VertexId(vertex)).or_default().push(PortSite {
                port: PortIndex(port),
                cell,
                facing: toward,
            });
            self.facing
                .insert((cell, toward), Endpoint::new(VertexId(vertex), PortIndex(port)));
        }

        fn lay(&mut self, wiring: Wiring, cells: &[Placement]) {
            for cell in cells {
                self.wiring.insert(*cell, wiring);
            }
        }
    }

    impl PowerLayout for MockLayout {
        fn port_sites(&self, vertex: VertexId) -> Option<Vec<PortSite>> {
            self.sites.get(&vertex).cloned()
        }

        fn wiring_at(&self, cell: Placement) -> Option<Wiring> {
            self.wiring.get(&cell).copied()
        }

        fn wiring_links(&self, cell: Placement) -> Vec<Placement> {
            vec![cell.offset(1, 0), cell.offset(-1, 0), cell.offset(0, 1), cell.offset(0, -1)]
        }

        fn port_facing(&self, cell: Placement, from: Placement) -> Option<Endpoint> {
            self.facing.get(&(cell, from)).copied()
        }
    }

    fn v(id: u32) -> VertexId {
        VertexId(id)
    }

    /// Structure 1 at (0,0) and structure 2 at (4,0), facing each other
    /// across a cable on (1..=3, 0).
    fn cable_pair() -> (TestStore, MockLayout) {
        let store = store_of([(1, generator()), (2, consumer(1, 10.0))]);
        let mut layout = MockLayout::default();
        layout.port(1, 0, at(0, 0), at(1, 0));
        layout.port(2, 0, at(4, 0), at(3, 0));
        layout.lay(Wiring::Cable, &[at(1, 0), at(2, 0), at(3, 0)]);
        (store, layout)
    }

    #[test]
    fn cable_run_connects_structures() {
        let (store, layout) = cable_pair();
        let mut grid = Grid::default();
        grid.register_power_vertex(&store, v(2)).unwrap();
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.added[0].strength(), TransportStrength::Low);
        assert_eq!(report.added[0].other(v(1)), Some(Endpoint::new(v(2), PortIndex(0))));
        assert_eq!(grid.network_count(), 1);
        assert!(grid.is_consistent());
    }

    #[test]
    fn repeated_report_changes_nothing() {
        let (store, layout) = cable_pair();
        let mut grid = Grid::default();
        grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        let again = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert!(again.is_unchanged());
        let from_far_side = grid.report_adjacency_changed(&store, &layout, v(2)).unwrap();
        assert!(from_far_side.is_unchanged());
    }

    #[test]
    fn pole_ghosts_make_high_edges() {
        let store = store_of([(1, pole()), (2, pole())]);
        let mut layout = MockLayout::default();
        layout.port(1, 0, at(0, 0), at(0, 1));
        layout.port(2, 0, at(0, 5), at(0, 4));
        layout.lay(Wiring::PoleGhost, &[at(0, 1), at(0, 2), at(0, 3), at(0, 4)]);
        let mut grid = Grid::default();
        let report = grid.report_adjacency_changed(&store, &layout, v(2)).unwrap();
        assert_eq!(report.added.len(), 1);
        assert!(report.added[0].is_high());
        assert_eq!(grid.connection_strength(v(1), v(2)), Some(TransportStrength::High));
    }

    #[test]
    fn mixed_wiring_does_not_bridge() {
        let (store, mut layout) = cable_pair();
        layout.lay(Wiring::PoleGhost, &[at(2, 0)]);
        let mut grid = Grid::default();
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert!(report.added.is_empty());
    }

    #[test]
    fn adjacent_ports_connect_directly() {
        let store = store_of([(1, generator()), (2, consumer(1, 10.0))]);
        let mut layout = MockLayout::default();
        layout.port(1, 0, at(0, 0), at(1, 0));
        layout.port(2, 3, at(1, 0), at(0, 0));
        let mut grid = Grid::default();
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.added, vec![PowerEdge::new(v(1), PortIndex(0), v(2), PortIndex(3), TransportStrength::Low)]);
    }

    #[test]
    fn broken_cable_removes_edge_and_isolates() {
        let (store, mut layout) = cable_pair();
        let mut grid = Grid::default();
        grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        layout.wiring.remove(&at(2, 0));
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(grid.network_count(), 2);
        assert!(grid.is_consistent());
    }

    #[test]
    fn rerouted_cable_splices_within_network() {
        // 1 feeds 2 over a cable and touches 3 directly; the cable is then
        // rerouted to 3's second port.
        let mut store = store_of([(1, generator()), (2, consumer(1, 10.0)), (3, consumer(1, 10.0))]);
        let (_, mut layout) = cable_pair();
        layout.port(1, 1, at(0, 0), at(0, 1));
        layout.port(3, 0, at(0, 1), at(0, 0));
        let mut grid = Grid::default();
        let first = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(first.added.len(), 2);

        layout.wiring.remove(&at(2, 0));
        layout.wiring.remove(&at(3, 0));
        layout.lay(Wiring::Cable, &[at(1, 1)]);
        layout.port(3, 1, at(0, 1), at(1, 1));
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.spliced.len(), 1);
        assert!(report.added.is_empty() && report.removed.is_empty());
        assert_eq!(report.spliced[0].other(v(1)), Some(Endpoint::new(v(3), PortIndex(1))));

        let events = grid.update(&mut store, fixed(1.0), fixed(1.0));
        assert!(matches!(events.as_slice(), [GridEvent::NetworkSplit { .. }]));
        assert_ne!(grid.network_of(v(2)), grid.network_of(v(1)));
        assert!(grid.is_consistent());
    }

    /// Forget every port of `vertex` so it can be placed again rotated.
    fn unplace(layout: &mut MockLayout, vertex: u32) {
        layout.sites.remove(&v(vertex));
        layout.facing.retain(|_, end| end.vertex != v(vertex));
    }

    #[test]
    fn rotation_moves_edge_to_new_port() {
        let store = store_of([(1, generator()), (2, consumer(1, 10.0))]);
        let mut layout = MockLayout::default();
        layout.port(1, 1, at(0, 0), at(1, 0));
        layout.port(2, 0, at(4, 0), at(3, 0));
        layout.lay(Wiring::Cable, &[at(1, 0), at(2, 0), at(3, 0)]);
        let mut grid = Grid::default();
        grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert!(grid.edge_at(Endpoint::new(v(1), PortIndex(1))).is_some());

        // Quarter turn: port 0 now faces the cable and port 1 faces north.
        unplace(&mut layout, 1);
        layout.port(1, 0, at(0, 0), at(1, 0));
        layout.port(1, 1, at(0, 0), at(0, 1));
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.spliced.len(), 1);
        assert!(report.added.is_empty() && report.removed.is_empty());

        let edge = grid.edge_at(Endpoint::new(v(1), PortIndex(0)));
        assert_eq!(edge.and_then(|e| e.other(v(1))), Some(Endpoint::new(v(2), PortIndex(0))));
        assert!(grid.edge_at(Endpoint::new(v(1), PortIndex(1))).is_none());
        assert_eq!(grid.network_of(v(1)), grid.network_of(v(2)));
        assert!(grid.is_consistent());
    }

    #[test]
    fn swapped_ports_reconnect() {
        // 1 is cabled east to 2 and touches 3 to the north.
        let store = store_of([(1, generator()), (2, consumer(1, 10.0)), (3, consumer(1, 10.0))]);
        let (_, mut layout) = cable_pair();
        layout.port(1, 1, at(0, 0), at(0, 1));
        layout.port(3, 0, at(0, 1), at(0, 0));
        let mut grid = Grid::default();
        assert_eq!(grid.report_adjacency_changed(&store, &layout, v(1)).unwrap().added.len(), 2);

        // Half the ports trade places: 0 faces north and 1 faces east.
        unplace(&mut layout, 1);
        layout.port(1, 0, at(0, 0), at(0, 1));
        layout.port(1, 1, at(0, 0), at(1, 0));
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.added.len(), 2);

        let far = |port: u16| grid.edge_at(Endpoint::new(v(1), PortIndex(port))).and_then(|e| e.other(v(1)));
        assert_eq!(far(0), Some(Endpoint::new(v(3), PortIndex(0))));
        assert_eq!(far(1), Some(Endpoint::new(v(2), PortIndex(0))));
        assert_eq!(grid.network_count(), 1);
        assert!(grid.is_consistent());
    }

    #[test]
    fn retargeting_across_networks_replaces_edge() {
        let mut store = store_of([(1, generator()), (2, consumer(1, 10.0))]);
        store.insert(v(5), consumer(1, 10.0));
        let (_, mut layout) = cable_pair();
        let mut grid = Grid::default();
        grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        grid.register_power_vertex(&store, v(5)).unwrap();

        layout.facing.remove(&(at(4, 0), at(3, 0)));
        layout.port(5, 0, at(4, 0), at(3, 0));
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.added.len(), 1);
        assert_eq!(grid.network_of(v(1)), grid.network_of(v(5)));
        assert_ne!(grid.network_of(v(1)), grid.network_of(v(2)));
        assert!(grid.is_consistent());
    }

    #[test]
    fn wiring_loop_terminates() {
        let store = store_of([(1, generator())]);
        let mut layout = MockLayout::default();
        layout.port(1, 0, at(0, 0), at(1, 0));
        layout.lay(Wiring::Cable, &[at(1, 0), at(2, 0), at(2, 1), at(1, 1)]);
        let mut grid = Grid::default();
        let report = grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert!(report.is_unchanged());
    }

    #[test]
    fn unknown_or_unplaced_vertex_is_an_error() {
        let store = store_of([(1, generator())]);
        let layout = MockLayout::default();
        let mut grid = Grid::default();
        assert_eq!(
            grid.report_adjacency_changed(&store, &layout, v(9)),
            Err(ConnectivityError::UnknownVertex(v(9)))
        );
        assert_eq!(
            grid.report_adjacency_changed(&store, &layout, v(1)),
            Err(ConnectivityError::NotPlaced(v(1)))
        );
    }

    #[test]
    fn unregister_isolates_neighbours() {
        let (store, layout) = cable_pair();
        let mut grid = Grid::default();
        grid.report_adjacency_changed(&store, &layout, v(1)).unwrap();
        assert!(grid.unregister_power_vertex(v(1)));
        assert!(grid.network_of(v(1)).is_none());
        assert_eq!(grid.network_containing(v(2)).map(|n| n.vertex_count()), Some(1));
        assert!(!grid.unregister_power_vertex(v(1)));
    }
}
