//! All disjoint power networks of one simulation layer.
//!
//! The grid owns every [`Network`], hands out network ids, and keeps the
//! `vertex -> network` owner index in step with network membership. Pieces
//! that networks cut off themselves (islands, split fragments) come back
//! here to be registered as new networks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use voltaic_core::config::PowerConfig;
use voltaic_core::fixed::Fixed64;
use voltaic_core::id::{NetworkId, PortIndex, VertexId};
use voltaic_core::vertex::{VertexProfile, VertexStore};

use crate::edge::{Endpoint, PowerEdge, TransportStrength};
use crate::network::{Island, Network, TickOutcome};

// ---------------------------------------------------------------------------
// Network ids
// ---------------------------------------------------------------------------

/// Monotonic source of [`NetworkId`]s. Ids are never reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdAllocator {
    next: u32,
}

impl NetworkIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> NetworkId {
        let id = NetworkId(self.next);
        self.next += 1;
        id
    }

    /// The id the next call to [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> NetworkId {
        NetworkId(self.next)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Structural change observed during [`Grid::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridEvent {
    /// An empty network was deregistered.
    NetworkRetired { network: NetworkId },
    /// Split detection moved a disconnected piece of `from` into `into`.
    NetworkSplit { from: NetworkId, into: NetworkId },
}

// ---------------------------------------------------------------------------
// High-power cache
// ---------------------------------------------------------------------------

/// Grid-level memo of connection strengths, layered over the per-network
/// reachability memo. Cleared on any structural change that could move a
/// vertex between networks or alter a High-tier path.
#[derive(Debug, Clone, Default)]
struct HighPowerCache {
    generation: u64,
    answers: BTreeMap<(VertexId, VertexId), TransportStrength>,
}

impl HighPowerCache {
    fn key(a: VertexId, b: VertexId) -> (VertexId, VertexId) {
        if a <= b { (a, b) } else { (b, a) }
    }

    fn get(&self, a: VertexId, b: VertexId) -> Option<TransportStrength> {
        self.answers.get(&Self::key(a, b)).copied()
    }

    fn store(&mut self, a: VertexId, b: VertexId, strength: TransportStrength) {
        self.answers.insert(Self::key(a, b), strength);
    }

    fn invalidate(&mut self) {
        self.answers.clear();
        self.generation = self.generation.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// The set of disjoint networks. Every registered vertex belongs to exactly
/// one network and no two networks share a vertex or an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grid {
    config: PowerConfig,
    networks: BTreeMap<NetworkId, Network>,
    owner: BTreeMap<VertexId, NetworkId>,
    ids: NetworkIdAllocator,
    #[serde(skip)]
    cache: HighPowerCache,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(PowerConfig::default())
    }
}

impl Grid {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            networks: BTreeMap::new(),
            owner: BTreeMap::new(),
            ids: NetworkIdAllocator::new(),
            cache: HighPowerCache::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn network(&self, id: NetworkId) -> Option<&Network> {
        self.networks.get(&id)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> + '_ {
        self.networks.values()
    }

    pub fn network_ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.networks.keys().copied()
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    /// Number of vertices owned by some network.
    pub fn vertex_count(&self) -> usize {
        self.owner.len()
    }

    /// The network that owns `vertex`.
    pub fn network_of(&self, vertex: VertexId) -> Option<NetworkId> {
        self.owner.get(&vertex).copied()
    }

    /// The network that owns `vertex`, by reference.
    pub fn network_containing(&self, vertex: VertexId) -> Option<&Network> {
        self.owner.get(&vertex).and_then(|id| self.networks.get(id))
    }

    /// The edge occupying a port slot, if any.
    pub fn edge_at(&self, endpoint: Endpoint) -> Option<PowerEdge> {
        self.network_containing(endpoint.vertex)?.edge_at(endpoint)
    }

    /// Whether an edge could attach at `endpoint`. Unowned vertices are
    /// judged by the dock count in `profile`.
    pub fn port_free(&self, endpoint: Endpoint, profile: &VertexProfile) -> bool {
        match self.network_containing(endpoint.vertex) {
            Some(network) => network.port_free(endpoint, profile),
            None => endpoint.port.slot() < profile.docks as usize,
        }
    }

    /// Bumped every time the grid-wide high-power cache is invalidated.
    pub fn high_power_generation(&self) -> u64 {
        self.cache.generation
    }

    /// Verify the ownership invariants: every network vertex has exactly one
    /// network, the owner index matches membership, and every edge lies
    /// inside the network that holds it.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        for (id, network) in &self.networks {
            if network.id() != *id {
                return false;
            }
            for vertex in network.vertices() {
                if !seen.insert(vertex) || self.owner.get(&vertex) != Some(id) {
                    return false;
                }
            }
            let edges_inside = network.edges().all(|edge| {
                network.contains_vertex(edge.first().vertex) && network.contains_vertex(edge.second().vertex)
            });
            if !edges_inside {
                return false;
            }
        }
        seen.len() == self.owner.len()
    }

    // -----------------------------------------------------------------------
    // Network registration
    // -----------------------------------------------------------------------

    /// Create an empty network and return its id.
    pub fn create_network(&mut self) -> NetworkId {
        let id = self.ids.allocate();
        self.register(Network::new(id, &self.config))
    }

    /// Register a network built elsewhere under a freshly allocated id.
    ///
    /// Returns `None` if it shares a vertex with a registered network.
    pub fn add_network(&mut self, mut network: Network) -> Option<NetworkId> {
        if network.vertices().any(|v| self.owner.contains_key(&v)) {
            return None;
        }
        network.set_id(self.ids.allocate());
        Some(self.register(network))
    }

    /// Deregister a network. Its vertices lose their owner.
    pub fn remove_network(&mut self, id: NetworkId) -> Option<Network> {
        let network = self.networks.remove(&id)?;
        self.owner.retain(|_, owner| *owner != id);
        self.cache.invalidate();
        Some(network)
    }

    fn register(&mut self, network: Network) -> NetworkId {
        let id = network.id();
        for vertex in network.vertices() {
            self.owner.insert(vertex, id);
        }
        self.networks.insert(id, network);
        self.cache.invalidate();
        id
    }

    fn spawn_islands(&mut self, from: NetworkId, islands: Vec<Island>) {
        for island in islands {
            let id = self.ids.allocate();
            let mut network = Network::new(id, &self.config);
            network.add_vertex(island.vertex, &island.profile);
            debug!(from = from.0, network = id.0, vertex = island.vertex.0, "island network created");
            self.register(network);
        }
    }

    /// Owning network of `vertex`. An owner entry naming a network that no
    /// longer exists is dropped.
    fn owning(&mut self, vertex: VertexId) -> Option<NetworkId> {
        let id = *self.owner.get(&vertex)?;
        if self.networks.contains_key(&id) {
            return Some(id);
        }
        warn!(vertex = vertex.0, network = id.0, "owner entry names a missing network, dropping it");
        self.owner.remove(&vertex);
        None
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Give `vertex` a singleton network. Returns `false` if it already
    /// belongs to one.
    pub fn add_vertex(&mut self, vertex: VertexId, profile: &VertexProfile) -> bool {
        if self.owning(vertex).is_some() {
            return false;
        }
        let id = self.ids.allocate();
        let mut network = Network::new(id, &self.config);
        network.add_vertex(vertex, profile);
        self.register(network);
        true
    }

    /// Remove a vertex and its edges. With `create_islands`, neighbours left
    /// without edges get singleton networks.
    pub fn remove_vertex(&mut self, vertex: VertexId, create_islands: bool) -> bool {
        let Some(id) = self.owning(vertex) else {
            return false;
        };
        let Some(network) = self.networks.get_mut(&id) else {
            return false;
        };
        let touched_high = network.neighbors(vertex).any(|(_, edge)| edge.is_high());
        let Some(islands) = network.remove_vertex(vertex, create_islands) else {
            warn!(vertex = vertex.0, network = id.0, "owner index disagreed with membership");
            self.owner.remove(&vertex);
            return false;
        };
        self.owner.remove(&vertex);
        if touched_high {
            self.cache.invalidate();
        }
        self.spawn_islands(id, islands);
        true
    }

    /// Connect two vertices, merging their networks if needed.
    ///
    /// Unowned vertices are registered from `store`. Rejects self-loops,
    /// unknown vertices and occupied or out-of-range ports; a rejected edge
    /// never merges anything.
    pub fn add_edge<S: VertexStore + ?Sized>(
        &mut self,
        store: &S,
        a: VertexId,
        port_a: PortIndex,
        b: VertexId,
        port_b: PortIndex,
        strength: TransportStrength,
    ) -> Option<PowerEdge> {
        if a == b {
            return None;
        }
        let profile_a = store.vertex(a)?.profile();
        let profile_b = store.vertex(b)?.profile();
        let edge = PowerEdge::new(a, port_a, b, port_b, strength);
        if !self.port_free(edge.first(), &profile_a) || !self.port_free(edge.second(), &profile_b) {
            return None;
        }

        let target = match (self.owning(a), self.owning(b)) {
            (Some(na), Some(nb)) if na == nb => na,
            (Some(na), Some(nb)) => {
                // Fold the smaller network into the larger one.
                let size = |id: NetworkId| self.networks.get(&id).map_or(0, Network::vertex_count);
                let (into, from) = if size(na) >= size(nb) { (na, nb) } else { (nb, na) };
                self.merge_networks(into, from);
                into
            }
            (Some(n), None) | (None, Some(n)) => n,
            (None, None) => self.create_network(),
        };

        let network = self.networks.get_mut(&target)?;
        let added = network.add_edge(edge, &profile_a, &profile_b)?;
        self.owner.insert(a, target);
        self.owner.insert(b, target);
        if added.is_high() {
            self.cache.invalidate();
        }
        Some(added)
    }

    /// Remove an edge. With `create_islands`, endpoints left without edges
    /// get singleton networks right away; other disconnections are found by
    /// the next tick's split detection.
    pub fn remove_edge(&mut self, edge: &PowerEdge, create_islands: bool) -> bool {
        let Some(id) = self.owning(edge.first().vertex) else {
            return false;
        };
        let Some(network) = self.networks.get_mut(&id) else {
            return false;
        };
        let was_high = network.edges.get(edge).is_some_and(PowerEdge::is_high);
        let Some(islands) = network.remove_edge(edge, create_islands) else {
            return false;
        };
        if was_high {
            self.cache.invalidate();
        }
        self.spawn_islands(id, islands);
        true
    }

    /// Repoint the far end of `edge` (the side not on `keep`) to `new_far`,
    /// which must live in the same network.
    pub(crate) fn splice_edge(&mut self, edge: &PowerEdge, keep: VertexId, new_far: Endpoint) -> Option<PowerEdge> {
        let id = self.owning(keep)?;
        if self.owner.get(&new_far.vertex) != Some(&id) {
            return None;
        }
        let spliced = self.networks.get_mut(&id)?.splice_edge(edge, keep, new_far)?;
        if spliced.is_high() {
            self.cache.invalidate();
        }
        Some(spliced)
    }

    /// Move everything in `from` into `into` and deregister `from`.
    ///
    /// Returns whether a merge happened: merging a network with itself or
    /// with an unknown id is a no-op.
    pub fn merge_networks(&mut self, into: NetworkId, from: NetworkId) -> bool {
        if into == from || !self.networks.contains_key(&into) {
            return false;
        }
        let Some(source) = self.networks.remove(&from) else {
            return false;
        };
        let Some(target) = self.networks.get_mut(&into) else {
            return false;
        };
        let moved = target.absorb(source);
        debug!(into = into.0, from = from.0, moved = moved.len(), "networks merged");
        for vertex in moved {
            self.owner.insert(vertex, into);
        }
        self.cache.invalidate();
        true
    }

    // -----------------------------------------------------------------------
    // Simulation
    // -----------------------------------------------------------------------

    /// Advance every network by one tick.
    ///
    /// Networks update independently in id order. Empty networks are
    /// retired and split fragments registered after all networks ran.
    pub fn update<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        delta_time: Fixed64,
        game_speed: Fixed64,
    ) -> Vec<GridEvent> {
        let mut retired = Vec::new();
        let mut fragments = Vec::new();
        for (id, network) in self.networks.iter_mut() {
            match network.update(store, &self.config, delta_time, game_speed) {
                TickOutcome::Retired => retired.push(*id),
                TickOutcome::Ran { fragments: cut } => {
                    fragments.extend(cut.into_iter().map(|fragment| (*id, fragment)));
                }
            }
        }

        let mut events = Vec::new();
        for network in retired {
            self.remove_network(network);
            debug!(network = network.0, "empty network retired");
            events.push(GridEvent::NetworkRetired { network });
        }
        for (from, fragment) in fragments {
            let into = self.ids.allocate();
            let network = Network::from_fragment(into, &self.config, fragment);
            debug!(from = from.0, into = into.0, vertices = network.vertex_count(), "split fragment registered");
            self.register(network);
            events.push(GridEvent::NetworkSplit { from, into });
        }
        events
    }

    /// Push power from `donor` into its network. Returns what could not be
    /// placed (everything, if the donor has no network).
    pub fn offer_power<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        donor: VertexId,
        delta_time: Fixed64,
        game_speed: Fixed64,
        amount: Fixed64,
    ) -> Fixed64 {
        let Some(id) = self.owning(donor) else {
            return amount;
        };
        match self.networks.get_mut(&id) {
            Some(network) => network.offer_power(store, &self.config, donor, delta_time, game_speed, amount),
            None => amount,
        }
    }

    /// Transport tier between two vertices, or `None` if they are not in
    /// the same network.
    pub fn connection_strength(&mut self, a: VertexId, b: VertexId) -> Option<TransportStrength> {
        let na = self.owning(a)?;
        if self.owning(b)? != na {
            return None;
        }
        if let Some(known) = self.cache.get(a, b) {
            return Some(known);
        }
        let strength = self.networks.get_mut(&na)?.connection_strength(a, b);
        self.cache.store(a, b, strength);
        Some(strength)
    }

    /// Spanning tree of one network, for drawing.
    pub fn minimum_spanning_tree(&mut self, id: NetworkId) -> Option<&[PowerEdge]> {
        self.networks
            .get_mut(&id)
            .map(|network| network.minimum_spanning_tree())
    }
}
