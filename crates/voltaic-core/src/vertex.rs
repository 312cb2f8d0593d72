//! The boundary between the power model and the structures it connects.
//!
//! A structure participates in the power graph by implementing
//! [`PowerVertex`]. The power model never owns structures: it reaches them
//! by [`VertexId`] through a [`VertexStore`] handed in by the simulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, ratio};
use crate::id::{Placement, VertexId};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Role of a vertex in distribution, derived from its priorities.
///
/// A vertex with both priorities nonzero is both a donor and a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VertexRole {
    pub donor: bool,
    pub receiver: bool,
}

impl VertexRole {
    pub fn from_priorities(donor_priority: u32, receiver_priority: u32) -> Self {
        Self {
            donor: donor_priority > 0,
            receiver: receiver_priority > 0,
        }
    }

    /// Neither donor nor receiver: only ever pushes via offered power.
    pub fn is_neutral(&self) -> bool {
        !self.donor && !self.receiver
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Insertion-time snapshot of the attributes a network needs to route
/// power to a vertex without consulting the structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexProfile {
    pub donor_priority: u32,
    pub receiver_priority: u32,
    /// Number of power-capable ports; sizes the vertex's edge slots.
    pub docks: u16,
    pub high_power_capable: bool,
    pub low_power_capable: bool,
    /// Energy landing here counts as stored rather than delivered.
    pub accumulator_like: bool,
    pub placement: Placement,
}

impl VertexProfile {
    pub fn role(&self) -> VertexRole {
        VertexRole::from_priorities(self.donor_priority, self.receiver_priority)
    }
}

// ---------------------------------------------------------------------------
// PowerVertex
// ---------------------------------------------------------------------------

/// A structure that can hold, take or give power.
pub trait PowerVertex {
    fn donor_priority(&self) -> u32;
    fn receiver_priority(&self) -> u32;
    fn power_capacity(&self) -> Fixed64;
    fn power_level(&self) -> Fixed64;
    fn docks(&self) -> u16;
    fn high_power_capable(&self) -> bool;
    fn low_power_capable(&self) -> bool;
    fn placement(&self) -> Placement;

    fn accumulator_like(&self) -> bool {
        false
    }

    /// Fill level in `[0, 1]`; zero for capacity-less vertices.
    fn power_ratio(&self) -> Fixed64 {
        ratio(self.power_level(), self.power_capacity())
    }

    /// Room left before the vertex is full.
    fn spare_capacity(&self) -> Fixed64 {
        (self.power_capacity() - self.power_level()).max(Fixed64::ZERO)
    }

    /// Take up to `amount`, never more than `budget`. Returns the part that
    /// was NOT accepted.
    fn accept_power(&mut self, amount: Fixed64, budget: Fixed64) -> Fixed64;

    /// Give up to `amount`, never more than `budget`. Returns what was
    /// actually removed.
    fn request_power(&mut self, amount: Fixed64, budget: Fixed64) -> Fixed64;

    /// Put back energy previously granted by `request_power`.
    fn refund_power(&mut self, amount: Fixed64);

    fn profile(&self) -> VertexProfile {
        VertexProfile {
            donor_priority: self.donor_priority(),
            receiver_priority: self.receiver_priority(),
            docks: self.docks(),
            high_power_capable: self.high_power_capable(),
            low_power_capable: self.low_power_capable(),
            accumulator_like: self.accumulator_like(),
            placement: self.placement(),
        }
    }
}

// ---------------------------------------------------------------------------
// VertexStore
// ---------------------------------------------------------------------------

/// Index-based access to the structures behind vertex ids.
pub trait VertexStore {
    fn vertex(&self, id: VertexId) -> Option<&dyn PowerVertex>;
    fn vertex_mut(&mut self, id: VertexId) -> Option<&mut dyn PowerVertex>;
}

impl<V: PowerVertex> VertexStore for BTreeMap<VertexId, V> {
    fn vertex(&self, id: VertexId) -> Option<&dyn PowerVertex> {
        self.get(&id).map(|v| v as &dyn PowerVertex)
    }

    fn vertex_mut(&mut self, id: VertexId) -> Option<&mut dyn PowerVertex> {
        self.get_mut(&id).map(|v| v as &mut dyn PowerVertex)
    }
}

// ---------------------------------------------------------------------------
// PowerNode
// ---------------------------------------------------------------------------

/// A plain buffered vertex: consumers, batteries, generators and poles can
/// all be expressed by choosing priorities, capacity and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerNode {
    pub donor_priority: u32,
    pub receiver_priority: u32,
    pub capacity: Fixed64,
    pub level: Fixed64,
    pub docks: u16,
    pub high_power_capable: bool,
    pub low_power_capable: bool,
    pub accumulator_like: bool,
    pub placement: Placement,
}

impl PowerNode {
    /// A low-tier vertex with the given priorities and no buffer.
    pub fn new(donor_priority: u32, receiver_priority: u32) -> Self {
        Self {
            donor_priority,
            receiver_priority,
            capacity: Fixed64::ZERO,
            level: Fixed64::ZERO,
            docks: 4,
            high_power_capable: false,
            low_power_capable: true,
            accumulator_like: false,
            placement: Placement::default(),
        }
    }

    pub fn with_buffer(mut self, capacity: Fixed64, level: Fixed64) -> Self {
        self.capacity = capacity;
        self.level = level.min(capacity).max(Fixed64::ZERO);
        self
    }

    pub fn with_docks(mut self, docks: u16) -> Self {
        self.docks = docks;
        self
    }

    pub fn high_power(mut self) -> Self {
        self.high_power_capable = true;
        self
    }

    pub fn accumulator(mut self) -> Self {
        self.accumulator_like = true;
        self
    }

    pub fn at(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }
}

impl PowerVertex for PowerNode {
    fn donor_priority(&self) -> u32 {
        self.donor_priority
    }

    fn receiver_priority(&self) -> u32 {
        self.receiver_priority
    }

    fn power_capacity(&self) -> Fixed64 {
        self.capacity
    }

    fn power_level(&self) -> Fixed64 {
        self.level
    }

    fn docks(&self) -> u16 {
        self.docks
    }

    fn high_power_capable(&self) -> bool {
        self.high_power_capable
    }

    fn low_power_capable(&self) -> bool {
        self.low_power_capable
    }

    fn placement(&self) -> Placement {
        self.placement
    }

    fn accumulator_like(&self) -> bool {
        self.accumulator_like
    }

    fn accept_power(&mut self, amount: Fixed64, budget: Fixed64) -> Fixed64 {
        let amount = amount.max(Fixed64::ZERO);
        let taken = amount.min(budget.max(Fixed64::ZERO)).min(self.spare_capacity());
        self.level += taken;
        amount - taken
    }

    fn request_power(&mut self, amount: Fixed64, budget: Fixed64) -> Fixed64 {
        let granted = amount
            .max(Fixed64::ZERO)
            .min(budget.max(Fixed64::ZERO))
            .min(self.level);
        self.level -= granted;
        granted
    }

    fn refund_power(&mut self, amount: Fixed64) {
        self.level += amount.max(Fixed64::ZERO);
    }
}
