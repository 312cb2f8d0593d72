//! Undirected, port-specific connections between two vertices.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use voltaic_core::config::PowerConfig;
use voltaic_core::fixed::Fixed64;
use voltaic_core::id::{PortIndex, VertexId};

// ---------------------------------------------------------------------------
// Transport strength
// ---------------------------------------------------------------------------

/// Transport tier of a connection. Bounds the power a transfer may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransportStrength {
    /// Standard cable wiring.
    Low,
    /// High-tier pole lines.
    High,
}

impl TransportStrength {
    /// Max throughput of this tier in units per second.
    pub fn throughput(self, config: &PowerConfig) -> Fixed64 {
        match self {
            TransportStrength::Low => config.low_throughput,
            TransportStrength::High => config.high_throughput,
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// One side of an edge: a vertex and one of its power docks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub vertex: VertexId,
    pub port: PortIndex,
}

impl Endpoint {
    pub fn new(vertex: VertexId, port: PortIndex) -> Self {
        Self { vertex, port }
    }
}

// ---------------------------------------------------------------------------
// PowerEdge
// ---------------------------------------------------------------------------

/// An undirected connection between two endpoints.
///
/// Identity is the unordered endpoint pair: `edge(a,0,b,1)` and
/// `edge(b,1,a,0)` compare and hash equal. The tier is a tag, not part of
/// the identity; a port slot never holds two edges, so the endpoints alone
/// name an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerEdge {
    first: Endpoint,
    second: Endpoint,
    strength: TransportStrength,
}

impl PowerEdge {
    pub fn new(
        a: VertexId,
        port_a: PortIndex,
        b: VertexId,
        port_b: PortIndex,
        strength: TransportStrength,
    ) -> Self {
        Self {
            first: Endpoint::new(a, port_a),
            second: Endpoint::new(b, port_b),
            strength,
        }
    }

    pub fn first(&self) -> Endpoint {
        self.first
    }

    pub fn second(&self) -> Endpoint {
        self.second
    }

    pub fn strength(&self) -> TransportStrength {
        self.strength
    }

    pub fn is_high(&self) -> bool {
        self.strength == TransportStrength::High
    }

    pub fn endpoints(&self) -> [Endpoint; 2] {
        [self.first, self.second]
    }

    pub fn touches(&self, vertex: VertexId) -> bool {
        self.first.vertex == vertex || self.second.vertex == vertex
    }

    /// The endpoint opposite `vertex`, or `None` if `vertex` is on neither side.
    pub fn other(&self, vertex: VertexId) -> Option<Endpoint> {
        if self.first.vertex == vertex {
            Some(self.second)
        } else if self.second.vertex == vertex {
            Some(self.first)
        } else {
            None
        }
    }

    /// The endpoint belonging to `vertex`.
    pub fn endpoint_of(&self, vertex: VertexId) -> Option<Endpoint> {
        if self.first.vertex == vertex {
            Some(self.first)
        } else if self.second.vertex == vertex {
            Some(self.second)
        } else {
            None
        }
    }

    /// Endpoints in ascending order; the direction-independent key.
    pub fn canonical(&self) -> (Endpoint, Endpoint) {
        if self.first <= self.second {
            (self.first, self.second)
        } else {
            (self.second, self.first)
        }
    }

    /// Rewrite the first endpoint in place when a cable run is extended.
    pub(crate) fn splice_first(&mut self, endpoint: Endpoint) {
        self.first = endpoint;
    }

    /// Rewrite the second endpoint in place when a cable run is extended.
    pub(crate) fn splice_second(&mut self, endpoint: Endpoint) {
        self.second = endpoint;
    }
}

impl PartialEq for PowerEdge {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for PowerEdge {}

impl Hash for PowerEdge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for PowerEdge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PowerEdge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn edge(a: u32, pa: u16, b: u32, pb: u16) -> PowerEdge {
        PowerEdge::new(
            VertexId(a),
            PortIndex(pa),
            VertexId(b),
            PortIndex(pb),
            TransportStrength::Low,
        )
    }

    #[test]
    fn equality_ignores_direction() {
        assert_eq!(edge(1, 0, 2, 1), edge(2, 1, 1, 0));
        assert_ne!(edge(1, 0, 2, 1), edge(1, 1, 2, 0));
    }

    #[test]
    fn hash_ignores_direction() {
        let mut set = HashSet::new();
        set.insert(edge(5, 2, 9, 3));
        assert!(set.contains(&edge(9, 3, 5, 2)));
        assert!(!set.insert(edge(9, 3, 5, 2)));
    }

    #[test]
    fn other_returns_opposite_endpoint() {
        let e = edge(1, 0, 2, 3);
        assert_eq!(e.other(VertexId(1)), Some(Endpoint::new(VertexId(2), PortIndex(3))));
        assert_eq!(e.other(VertexId(2)), Some(Endpoint::new(VertexId(1), PortIndex(0))));
        assert_eq!(e.other(VertexId(7)), None);
    }

    #[test]
    fn splice_rewrites_one_side() {
        let mut e = edge(1, 0, 2, 0);
        e.splice_second(Endpoint::new(VertexId(3), PortIndex(1)));
        assert!(e.touches(VertexId(3)));
        assert!(!e.touches(VertexId(2)));
        assert_eq!(e, edge(3, 1, 1, 0));
    }

    #[test]
    fn throughput_by_tier() {
        let config = PowerConfig::default();
        assert!(TransportStrength::High.throughput(&config) > TransportStrength::Low.throughput(&config));
    }
}
