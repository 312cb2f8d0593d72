use serde::{Deserialize, Serialize};

/// Identifies a power vertex (a placed structure with power docks).
///
/// Stable within a simulation layer and used as the primary key of every
/// adjacency map. Ordered so that iteration over vertex sets is
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VertexId(pub u32);

impl VertexId {
    /// Raw index, used by the spanning-tree cost function.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Identifies a power network. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

/// Local index of a power dock on a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortIndex(pub u16);

impl PortIndex {
    #[inline]
    pub fn slot(self) -> usize {
        self.0 as usize
    }
}

/// A cell in the world: simulation layer plus planar position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Placement {
    pub layer: i32,
    pub x: i32,
    pub y: i32,
}

impl Placement {
    pub fn new(layer: i32, x: i32, y: i32) -> Self {
        Self { layer, x, y }
    }

    /// Same (x, y) column, regardless of layer.
    pub fn same_column(&self, other: &Placement) -> bool {
        self.x == other.x && self.y == other.y
    }

    /// The neighbouring cell one step away on the same layer.
    pub fn offset(&self, dx: i32, dy: i32) -> Placement {
        Placement::new(self.layer, self.x + dx, self.y + dy)
    }
}
