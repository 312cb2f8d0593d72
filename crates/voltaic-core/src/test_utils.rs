//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use std::collections::BTreeMap;

use crate::fixed::Fixed64;
use crate::id::{Placement, VertexId};
use crate::vertex::PowerNode;

/// The vertex store used throughout the tests.
pub type TestStore = BTreeMap<VertexId, PowerNode>;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Vertex constructors
// ===========================================================================

/// An empty consumer buffer of `capacity` at receiver priority `priority`.
pub fn consumer(priority: u32, capacity: f64) -> PowerNode {
    PowerNode::new(0, priority).with_buffer(fixed(capacity), Fixed64::ZERO)
}

/// A battery: donor and receiver at the same priority, partially charged.
pub fn battery(priority: u32, capacity: f64, level: f64) -> PowerNode {
    PowerNode::new(priority, priority)
        .with_buffer(fixed(capacity), fixed(level))
        .accumulator()
}

/// A neutral generator that only pushes through offered power.
pub fn generator() -> PowerNode {
    PowerNode::new(0, 0)
}

/// A high-tier pole: neutral, high-power capable.
pub fn pole() -> PowerNode {
    PowerNode::new(0, 0).high_power()
}

/// Build a store from `(id, node)` pairs.
pub fn store_of(nodes: impl IntoIterator<Item = (u32, PowerNode)>) -> TestStore {
    nodes
        .into_iter()
        .map(|(id, node)| (VertexId(id), node))
        .collect()
}

/// Shorthand for a ground-layer placement.
pub fn at(x: i32, y: i32) -> Placement {
    Placement::new(0, x, y)
}

/// Level of a vertex in a test store, as f64 for readable assertions.
pub fn level_of(store: &TestStore, id: u32) -> f64 {
    store
        .get(&VertexId(id))
        .map(|n| n.level.to_num::<f64>())
        .unwrap_or(0.0)
}
