//! Voltaic Core -- shared vocabulary for the Voltaic power model.
//!
//! This crate holds the pieces every power crate depends on: stable
//! identifiers, deterministic fixed-point energy math, the tunable
//! configuration, and the trait boundary between the power model and the
//! structures it connects.
//!
//! # Key Types
//!
//! - [`id::VertexId`] / [`id::NetworkId`] -- index-based identities; no
//!   pointer identity crosses the power model.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for energy amounts.
//! - [`config::PowerConfig`] -- throughput caps, pass count, thresholds.
//! - [`vertex::PowerVertex`] -- what a structure exposes to the power model.
//! - [`vertex::VertexStore`] -- index-to-structure lookup supplied by the
//!   simulation each tick.

pub mod config;
pub mod fixed;
pub mod id;
pub mod vertex;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
