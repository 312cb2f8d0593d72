//! Reachability oracle: is there an unbroken chain of High-tier edges
//! between two vertices?
//!
//! Answers are memoized per vertex pair and the whole memo is cleared
//! whenever a High-tier edge is added, removed or spliced anywhere in the
//! network. Partial repair of an all-pairs cache is not attempted.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;
use voltaic_core::id::VertexId;

use crate::edge::TransportStrength;
use crate::network::Network;

/// Memo rows for high-power-capable vertices. A missing row or entry
/// means "unknown" and triggers a fresh search.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReachCache {
    rows: BTreeMap<VertexId, BTreeMap<VertexId, bool>>,
}

impl ReachCache {
    pub(crate) fn allocate_row(&mut self, vertex: VertexId) {
        self.rows.entry(vertex).or_default();
    }

    pub(crate) fn drop_row(&mut self, vertex: VertexId) {
        self.rows.remove(&vertex);
        for row in self.rows.values_mut() {
            row.remove(&vertex);
        }
    }

    pub(crate) fn retain_rows(&mut self, mut keep: impl FnMut(VertexId) -> bool) {
        self.rows.retain(|v, _| keep(*v));
    }

    /// Forget every answer; rows stay allocated.
    pub(crate) fn clear(&mut self) {
        for row in self.rows.values_mut() {
            row.clear();
        }
    }

    pub(crate) fn mark_direct(&mut self, a: VertexId, b: VertexId) {
        self.store(a, b, true);
    }

    pub(crate) fn get(&self, a: VertexId, b: VertexId) -> Option<bool> {
        self.rows.get(&a).and_then(|row| row.get(&b)).copied()
    }

    /// Record an answer for both orders of the pair.
    pub(crate) fn store(&mut self, a: VertexId, b: VertexId, reachable: bool) {
        self.rows.entry(a).or_default().insert(b, reachable);
        self.rows.entry(b).or_default().insert(a, reachable);
    }

    #[cfg(test)]
    pub(crate) fn known_answers(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }
}

impl Network {
    /// Transport tier available between two vertices of this network.
    ///
    /// `High` only if both vertices are high-power capable and a chain of
    /// High-tier edges joins them; otherwise `Low`. Symmetric in `a`, `b`.
    pub fn connection_strength(&mut self, a: VertexId, b: VertexId) -> TransportStrength {
        if !self.high_capable(a) || !self.high_capable(b) {
            return TransportStrength::Low;
        }
        if a == b {
            return TransportStrength::High;
        }
        let reachable = match self.reach.get(a, b) {
            Some(known) => known,
            None => {
                trace!(network = self.id().0, a = a.0, b = b.0, "reachability cache miss");
                let found = self.high_path_exists(a, b);
                self.reach.store(a, b, found);
                found
            }
        };
        if reachable {
            TransportStrength::High
        } else {
            TransportStrength::Low
        }
    }

    fn high_capable(&self, vertex: VertexId) -> bool {
        self.profiles
            .get(&vertex)
            .is_some_and(|p| p.high_power_capable)
    }

    /// High-tier neighbours of `vertex` that can themselves carry high power.
    fn high_neighbors(&self, vertex: VertexId) -> Vec<VertexId> {
        self.neighbors(vertex)
            .filter(|(next, edge)| edge.is_high() && self.high_capable(*next))
            .map(|(next, _)| next)
            .collect()
    }

    /// Depth-first search over High-tier edges. Each call has its own
    /// visited set, so earlier queries never prune this one.
    fn high_path_exists(&self, from: VertexId, to: VertexId) -> bool {
        let mut visited = BTreeSet::new();
        let mut stack = vec![from];
        visited.insert(from);
        while let Some(vertex) = stack.pop() {
            let next = self.high_neighbors(vertex);
            // Adjacent poles are the common case; check them before descending.
            if next.contains(&to) {
                return true;
            }
            for n in next.into_iter().rev() {
                if visited.insert(n) {
                    stack.push(n);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::PowerEdge;
    use voltaic_core::config::PowerConfig;
    use voltaic_core::id::{NetworkId, PortIndex};
    use voltaic_core::test_utils::*;
    use voltaic_core::vertex::PowerVertex;

    fn edge(a: u32, pa: u16, b: u32, pb: u16, strength: TransportStrength) -> PowerEdge {
        PowerEdge::new(VertexId(a), PortIndex(pa), VertexId(b), PortIndex(pb), strength)
    }

    /// 1 =H= 2 =H= 3 -L- 4, all poles; 5 is a low-only consumer on 1.
    fn pole_line() -> Network {
        let mut net = Network::new(NetworkId(0), &PowerConfig::default());
        let p = pole().profile();
        let c = consumer(1, 10.0).profile();
        net.add_edge(edge(1, 0, 2, 0, TransportStrength::High), &p, &p).unwrap();
        net.add_edge(edge(2, 1, 3, 0, TransportStrength::High), &p, &p).unwrap();
        net.add_edge(edge(3, 1, 4, 0, TransportStrength::Low), &p, &p).unwrap();
        net.add_edge(edge(1, 1, 5, 0, TransportStrength::High), &p, &c).unwrap();
        net
    }

    #[test]
    fn chain_of_high_edges_is_high() {
        let mut net = pole_line();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(3)), TransportStrength::High);
        assert_eq!(net.connection_strength(VertexId(3), VertexId(1)), TransportStrength::High);
    }

    #[test]
    fn low_link_breaks_the_chain() {
        let mut net = pole_line();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(4)), TransportStrength::Low);
    }

    #[test]
    fn incapable_vertex_is_always_low() {
        let mut net = pole_line();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(5)), TransportStrength::Low);
        assert_eq!(net.connection_strength(VertexId(5), VertexId(5)), TransportStrength::Low);
    }

    #[test]
    fn answers_are_memoized_symmetrically() {
        let mut net = pole_line();
        net.connection_strength(VertexId(1), VertexId(3));
        assert_eq!(net.reach.get(VertexId(3), VertexId(1)), Some(true));
        net.connection_strength(VertexId(4), VertexId(2));
        assert_eq!(net.reach.get(VertexId(2), VertexId(4)), Some(false));
    }

    #[test]
    fn removing_high_edge_invalidates_memo() {
        let mut net = pole_line();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(3)), TransportStrength::High);
        let link = edge(2, 1, 3, 0, TransportStrength::High);
        net.remove_edge(&link, false);
        assert_eq!(net.reach.known_answers(), 0);
        assert_eq!(net.connection_strength(VertexId(1), VertexId(3)), TransportStrength::Low);
    }

    #[test]
    fn adding_high_edge_invalidates_memo() {
        let mut net = pole_line();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(4)), TransportStrength::Low);
        let p = pole().profile();
        net.add_edge(edge(4, 1, 2, 2, TransportStrength::High), &p, &p).unwrap();
        assert_eq!(net.connection_strength(VertexId(1), VertexId(4)), TransportStrength::High);
    }

    #[test]
    fn missing_rows_fall_back_to_search() {
        let mut net = pole_line();
        net.reach = ReachCache::default();
        assert_eq!(net.connection_strength(VertexId(3), VertexId(1)), TransportStrength::High);
    }
}
