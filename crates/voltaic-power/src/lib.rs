//! Power networks for a tile-based factory simulation.
//!
//! Structures with power docks become vertices of a [`Grid`]; wiring
//! between their ports becomes [`PowerEdge`]s. The grid keeps every
//! connected component in its own [`Network`], merging networks when an
//! edge joins them and splitting them lazily when deletions cut them apart.
//! Each tick every network moves energy from donors to receivers by
//! priority, capped per transfer by the transport tier between the two.
//!
//! # Design
//!
//! - Vertices are addressed by [`VertexId`](voltaic_core::id::VertexId); the
//!   structures themselves stay in the host's
//!   [`VertexStore`](voltaic_core::vertex::VertexStore).
//! - The grid owns the networks and the `vertex -> network` index. Networks
//!   never refer back to the grid.
//! - All collections are ordered (`BTreeMap`/`BTreeSet`), so a tick is
//!   deterministic for a given input.
//! - Energy is fixed-point ([`Fixed64`](voltaic_core::fixed::Fixed64)).

pub mod connectivity;
pub mod distribute;
pub mod edge;
pub mod grid;
pub mod mst;
pub mod network;
pub mod reach;
pub mod stats;

pub use connectivity::{ConnectivityError, ConnectivityReport, PortSite, PowerLayout, Wiring};
pub use edge::{Endpoint, PowerEdge, TransportStrength};
pub use grid::{Grid, GridEvent, NetworkIdAllocator};
pub use network::{Fragment, Island, Network, TickOutcome};
pub use stats::{NetworkStats, RollingAverage};
