//! Minimum spanning tree for drawing a network's wiring.
//!
//! The cost of an edge is the distance between its vertex indices, ties
//! broken by the lower index. That weight has no physical meaning; it only
//! makes the tree stable from one frame to the next.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

use voltaic_core::id::VertexId;

use crate::edge::PowerEdge;
use crate::network::Network;

type Candidate = Reverse<(u32, u32, PowerEdge)>;

fn candidate(edge: PowerEdge) -> Candidate {
    let (a, b) = (edge.first().vertex.index(), edge.second().vertex.index());
    Reverse((a.abs_diff(b), a.min(b), edge))
}

impl Network {
    /// Edges of a minimum spanning tree, grown from the lowest vertex id.
    ///
    /// Cached until membership or edges change. Edges between different
    /// layers only count when both ends share an `(x, y)` column.
    pub fn minimum_spanning_tree(&mut self) -> &[PowerEdge] {
        if self.mst_dirty {
            self.mst_cache = self.grow_spanning_tree();
            self.mst_dirty = false;
        }
        &self.mst_cache
    }

    fn tree_eligible(&self, edge: &PowerEdge) -> bool {
        let (Some(a), Some(b)) = (
            self.profiles.get(&edge.first().vertex),
            self.profiles.get(&edge.second().vertex),
        ) else {
            return false;
        };
        a.placement.layer == b.placement.layer || a.placement.same_column(&b.placement)
    }

    fn grow_spanning_tree(&self) -> Vec<PowerEdge> {
        let Some(&start) = self.profiles.keys().next() else {
            return Vec::new();
        };
        let mut in_tree: BTreeSet<VertexId> = BTreeSet::new();
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut tree = Vec::with_capacity(self.profiles.len().saturating_sub(1));

        let visit = |vertex: VertexId, in_tree: &mut BTreeSet<VertexId>, frontier: &mut BinaryHeap<Candidate>| {
            in_tree.insert(vertex);
            for (next, edge) in self.neighbors(vertex) {
                if !in_tree.contains(&next) && self.tree_eligible(&edge) {
                    frontier.push(candidate(edge));
                }
            }
        };

        visit(start, &mut in_tree, &mut frontier);
        while let Some(Reverse((_, _, edge))) = frontier.pop() {
            let (a, b) = (edge.first().vertex, edge.second().vertex);
            let next = match (in_tree.contains(&a), in_tree.contains(&b)) {
                (true, false) => b,
                (false, true) => a,
                _ => continue,
            };
            tree.push(edge);
            visit(next, &mut in_tree, &mut frontier);
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::TransportStrength;
    use voltaic_core::config::PowerConfig;
    use voltaic_core::id::{NetworkId, Placement, PortIndex};
    use voltaic_core::test_utils::*;
    use voltaic_core::vertex::{PowerVertex, VertexProfile};

    fn low(a: u32, pa: u16, b: u32, pb: u16) -> PowerEdge {
        PowerEdge::new(VertexId(a), PortIndex(pa), VertexId(b), PortIndex(pb), TransportStrength::Low)
    }

    fn profile_at(placement: Placement) -> VertexProfile {
        consumer(1, 10.0).at(placement).profile()
    }

    /// Square 1-2-3-4-1 with a diagonal 1-3, all on the ground layer.
    fn square() -> Network {
        let mut net = Network::new(NetworkId(0), &PowerConfig::default());
        let p = profile_at(at(0, 0));
        for e in [low(1, 0, 2, 0), low(2, 1, 3, 0), low(3, 1, 4, 0), low(4, 1, 1, 1), low(1, 2, 3, 2)] {
            net.add_edge(e, &p, &p).unwrap();
        }
        net
    }

    #[test]
    fn tree_spans_every_vertex() {
        let mut net = square();
        let tree = net.minimum_spanning_tree().to_vec();
        assert_eq!(tree.len(), 3);
        let touched: BTreeSet<VertexId> = tree
            .iter()
            .flat_map(|e| [e.first().vertex, e.second().vertex])
            .collect();
        assert_eq!(touched.len(), 4);
    }

    #[test]
    fn cheapest_index_gaps_win() {
        let mut net = square();
        let tree = net.minimum_spanning_tree().to_vec();
        assert_eq!(tree, vec![low(1, 0, 2, 0), low(2, 1, 3, 0), low(3, 1, 4, 0)]);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let mut net = square();
        let first = net.minimum_spanning_tree().to_vec();
        let second = net.minimum_spanning_tree().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn edge_change_rebuilds_tree() {
        let mut net = square();
        net.minimum_spanning_tree();
        net.remove_edge(&low(1, 0, 2, 0), false);
        let tree = net.minimum_spanning_tree().to_vec();
        assert!(!tree.contains(&low(1, 0, 2, 0)));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn cross_layer_edge_needs_shared_column() {
        let mut net = Network::new(NetworkId(0), &PowerConfig::default());
        let ground = profile_at(Placement::new(0, 2, 2));
        let shaft = profile_at(Placement::new(1, 2, 2));
        let offset = profile_at(Placement::new(1, 5, 2));
        net.add_edge(low(1, 0, 2, 0), &ground, &shaft).unwrap();
        net.add_edge(low(1, 1, 3, 0), &ground, &offset).unwrap();
        let tree = net.minimum_spanning_tree().to_vec();
        assert_eq!(tree, vec![low(1, 0, 2, 0)]);
    }

    #[test]
    fn empty_network_has_empty_tree() {
        let mut net = Network::new(NetworkId(0), &PowerConfig::default());
        assert!(net.minimum_spanning_tree().is_empty());
    }
}
