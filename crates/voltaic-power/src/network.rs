//! A single connected electrical grid: membership, edge slots, and the
//! lazy split detection that keeps it connected.
//!
//! Distribution lives in [`crate::distribute`], the reachability oracle in
//! [`crate::reach`] and the spanning tree in [`crate::mst`]; all of them
//! are `impl Network` blocks over the state defined here.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;
use voltaic_core::config::PowerConfig;
use voltaic_core::fixed::Fixed64;
use voltaic_core::id::{NetworkId, PortIndex, VertexId};
use voltaic_core::vertex::{VertexProfile, VertexStore};

use crate::edge::{Endpoint, PowerEdge};
use crate::reach::ReachCache;
use crate::stats::NetworkStats;

// ---------------------------------------------------------------------------
// Outcomes handed back to the grid
// ---------------------------------------------------------------------------

/// A vertex pulled out of a network because it lost its last edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Island {
    pub vertex: VertexId,
    pub profile: VertexProfile,
}

/// A connected piece cut off from a network by split detection.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub profiles: BTreeMap<VertexId, VertexProfile>,
    pub edges: Vec<PowerEdge>,
}

/// What a network's tick asks the grid to do.
#[derive(Debug)]
pub enum TickOutcome {
    /// The network has no vertices left and must be deregistered.
    Retired,
    /// The network ran; any fragments must be registered as new networks.
    Ran { fragments: Vec<Fragment> },
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// A connected set of vertices and edges forming one electrical grid.
///
/// Every vertex is in `profiles`; donors and receivers are additionally
/// indexed by role (a vertex may be both), vertices with neither role are
/// neutral. Each vertex owns one edge slot per power dock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    id: NetworkId,
    pub(crate) profiles: BTreeMap<VertexId, VertexProfile>,
    pub(crate) donors: BTreeSet<VertexId>,
    pub(crate) receivers: BTreeSet<VertexId>,
    pub(crate) neutrals: BTreeSet<VertexId>,
    pub(crate) edges: BTreeSet<PowerEdge>,
    pub(crate) slots: BTreeMap<VertexId, Vec<Option<PowerEdge>>>,
    /// Memoized High-tier reachability. Rebuilt on demand after load.
    #[serde(skip)]
    pub(crate) reach: ReachCache,
    /// Low-tier power offered this tick, distributed in one batch.
    pub(crate) accumulated_offered: Fixed64,
    pub(crate) stats: NetworkStats,
    /// Set by edge removal; consumed by the next tick's split detection.
    pub(crate) had_edge_deletion: bool,
    #[serde(skip, default = "default_dirty")]
    pub(crate) mst_dirty: bool,
    #[serde(skip)]
    pub(crate) mst_cache: Vec<PowerEdge>,
}

fn default_dirty() -> bool {
    true
}

impl Network {
    /// Create an empty network.
    pub fn new(id: NetworkId, config: &PowerConfig) -> Self {
        Self {
            id,
            profiles: BTreeMap::new(),
            donors: BTreeSet::new(),
            receivers: BTreeSet::new(),
            neutrals: BTreeSet::new(),
            edges: BTreeSet::new(),
            slots: BTreeMap::new(),
            reach: ReachCache::default(),
            accumulated_offered: Fixed64::ZERO,
            stats: NetworkStats::new(config.stats_window),
            had_edge_deletion: false,
            mst_dirty: true,
            mst_cache: Vec::new(),
        }
    }

    /// Build a network from a fragment cut off another network.
    pub(crate) fn from_fragment(id: NetworkId, config: &PowerConfig, fragment: Fragment) -> Self {
        let mut network = Network::new(id, config);
        for (vertex, profile) in &fragment.profiles {
            network.add_vertex(*vertex, profile);
        }
        for edge in fragment.edges {
            network.insert_edge(edge);
        }
        // A fragment is one BFS component, but re-check in case the caller
        // handed over an unsplit remainder.
        network.had_edge_deletion = network.profiles.len() > 1;
        network
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: NetworkId) {
        self.id = id;
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_vertex(&self, vertex: VertexId) -> bool {
        self.profiles.contains_key(&vertex)
    }

    pub fn contains_edge(&self, edge: &PowerEdge) -> bool {
        self.edges.contains(edge)
    }

    pub fn vertices(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.profiles.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = &PowerEdge> + '_ {
        self.edges.iter()
    }

    pub fn donors(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.donors.iter().copied()
    }

    pub fn receivers(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.receivers.iter().copied()
    }

    pub fn neutrals(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.neutrals.iter().copied()
    }

    pub fn profile(&self, vertex: VertexId) -> Option<&VertexProfile> {
        self.profiles.get(&vertex)
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Low-tier power offered so far this tick and not yet distributed.
    pub fn accumulated_offered_power(&self) -> Fixed64 {
        self.accumulated_offered
    }

    /// Whether an edge was removed since the last connectivity check.
    pub fn pending_connectivity_check(&self) -> bool {
        self.had_edge_deletion
    }

    /// The edge occupying a port slot, if any.
    pub fn edge_at(&self, endpoint: Endpoint) -> Option<PowerEdge> {
        self.slots
            .get(&endpoint.vertex)
            .and_then(|slots| slots.get(endpoint.port.slot()))
            .copied()
            .flatten()
    }

    /// Number of edges currently attached to a vertex.
    pub fn degree(&self, vertex: VertexId) -> usize {
        self.slots
            .get(&vertex)
            .map(|slots| slots.iter().filter(|s| s.is_some()).count())
            .unwrap_or(0)
    }

    /// Whether an edge could attach at `endpoint`. Unregistered vertices
    /// are judged by the dock count in `profile`.
    pub fn port_free(&self, endpoint: Endpoint, profile: &VertexProfile) -> bool {
        match self.slots.get(&endpoint.vertex) {
            Some(slots) => matches!(slots.get(endpoint.port.slot()), Some(None)),
            None => endpoint.port.slot() < profile.docks as usize,
        }
    }

    /// Vertices joined to `vertex` by an edge, in port order.
    pub(crate) fn neighbors(&self, vertex: VertexId) -> impl Iterator<Item = (VertexId, PowerEdge)> + '_ {
        self.slots
            .get(&vertex)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(move |edge| edge.other(vertex).map(|end| (end.vertex, *edge)))
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Register a vertex. Returns `false` if it was already present.
    pub fn add_vertex(&mut self, vertex: VertexId, profile: &VertexProfile) -> bool {
        if self.profiles.contains_key(&vertex) {
            return false;
        }
        let role = profile.role();
        if role.donor {
            self.donors.insert(vertex);
        }
        if role.receiver {
            self.receivers.insert(vertex);
        }
        if role.is_neutral() {
            self.neutrals.insert(vertex);
        }
        self.slots.insert(vertex, vec![None; profile.docks as usize]);
        if profile.high_power_capable {
            self.reach.allocate_row(vertex);
        }
        self.profiles.insert(vertex, profile.clone());
        self.mst_dirty = true;
        true
    }

    /// Connect two endpoints.
    ///
    /// Rejects self-loops, ports outside a vertex's docks, and ports that
    /// already hold an edge. Unregistered endpoints are registered with the
    /// given profiles first.
    pub fn add_edge(
        &mut self,
        edge: PowerEdge,
        profile_first: &VertexProfile,
        profile_second: &VertexProfile,
    ) -> Option<PowerEdge> {
        let (a, b) = (edge.first(), edge.second());
        if a.vertex == b.vertex {
            return None;
        }
        if !self.port_free(a, profile_first) || !self.port_free(b, profile_second) {
            return None;
        }
        self.add_vertex(a.vertex, profile_first);
        self.add_vertex(b.vertex, profile_second);
        self.insert_edge(edge)
    }

    /// Place an edge between two registered vertices.
    fn insert_edge(&mut self, edge: PowerEdge) -> Option<PowerEdge> {
        let (a, b) = (edge.first(), edge.second());
        if a.vertex == b.vertex || self.edges.contains(&edge) {
            return None;
        }
        if !matches!(self.slot(a), Some(None)) || !matches!(self.slot(b), Some(None)) {
            return None;
        }
        self.set_slot(a, Some(edge));
        self.set_slot(b, Some(edge));
        self.edges.insert(edge);
        if edge.is_high() {
            self.reach.clear();
            self.reach.mark_direct(a.vertex, b.vertex);
        }
        self.mst_dirty = true;
        Some(edge)
    }

    /// Remove a vertex and every edge attached to it.
    ///
    /// Returns `None` if the vertex was not present, otherwise the islands
    /// created (only when `create_islands` is set).
    pub fn remove_vertex(&mut self, vertex: VertexId, create_islands: bool) -> Option<Vec<Island>> {
        self.profiles.remove(&vertex)?;
        self.donors.remove(&vertex);
        self.receivers.remove(&vertex);
        self.neutrals.remove(&vertex);
        self.reach.drop_row(vertex);

        let incident: Vec<PowerEdge> = self.neighbors(vertex).map(|(_, edge)| edge).collect();
        let mut islands = Vec::new();
        for edge in incident {
            if let Some(mut extracted) = self.remove_edge(&edge, create_islands) {
                islands.append(&mut extracted);
            }
        }
        self.slots.remove(&vertex);
        self.mst_dirty = true;
        Some(islands)
    }

    /// Remove an edge.
    ///
    /// With `create_islands`, an endpoint that stays in this network with no
    /// edges left is extracted and returned so the grid can give it a
    /// singleton network. The last vertex of a network is never extracted.
    pub fn remove_edge(&mut self, edge: &PowerEdge, create_islands: bool) -> Option<Vec<Island>> {
        let stored = self.edges.take(edge)?;
        for end in stored.endpoints() {
            if self.slot(end) == Some(Some(stored)) {
                self.set_slot(end, None);
            }
        }
        if stored.is_high() {
            self.reach.clear();
        }
        self.had_edge_deletion = true;
        self.mst_dirty = true;

        let mut islands = Vec::new();
        if create_islands {
            for end in stored.endpoints() {
                let vertex = end.vertex;
                if self.profiles.len() > 1
                    && self.contains_vertex(vertex)
                    && self.degree(vertex) == 0
                {
                    if let Some(island) = self.extract_vertex(vertex) {
                        islands.push(island);
                    }
                }
            }
        }
        Some(islands)
    }

    /// Move the far side of `edge` (the side not belonging to `keep`) onto
    /// `new_far`, rewriting the edge in place.
    pub(crate) fn splice_edge(
        &mut self,
        edge: &PowerEdge,
        keep: VertexId,
        new_far: Endpoint,
    ) -> Option<PowerEdge> {
        let current = *self.edges.get(edge)?;
        let old_far = current.other(keep)?;
        if new_far.vertex == keep || !self.contains_vertex(new_far.vertex) {
            return None;
        }
        if self.slot(new_far) != Some(None) {
            return None;
        }
        let mut spliced = current;
        if current.first().vertex == keep {
            spliced.splice_second(new_far);
        } else {
            spliced.splice_first(new_far);
        }

        self.edges.remove(&current);
        self.set_slot(old_far, None);
        if let Some(kept) = current.endpoint_of(keep) {
            self.set_slot(kept, Some(spliced));
        }
        self.set_slot(new_far, Some(spliced));
        self.edges.insert(spliced);

        if spliced.is_high() {
            self.reach.clear();
            self.reach.mark_direct(keep, new_far.vertex);
        }
        // The old far vertex lost an edge and may now be cut off.
        self.had_edge_deletion = true;
        self.mst_dirty = true;
        Some(spliced)
    }

    /// Drop a vertex that has no edges and hand back its profile.
    fn extract_vertex(&mut self, vertex: VertexId) -> Option<Island> {
        let profile = self.profiles.remove(&vertex)?;
        self.donors.remove(&vertex);
        self.receivers.remove(&vertex);
        self.neutrals.remove(&vertex);
        self.slots.remove(&vertex);
        self.reach.drop_row(vertex);
        self.mst_dirty = true;
        debug!(network = self.id.0, vertex = vertex.0, "vertex lost its last edge, extracting island");
        Some(Island { vertex, profile })
    }

    fn slot(&self, endpoint: Endpoint) -> Option<Option<PowerEdge>> {
        self.slots
            .get(&endpoint.vertex)
            .and_then(|slots| slots.get(endpoint.port.slot()))
            .copied()
    }

    fn set_slot(&mut self, endpoint: Endpoint, value: Option<PowerEdge>) {
        if let Some(slot) = self
            .slots
            .get_mut(&endpoint.vertex)
            .and_then(|slots| slots.get_mut(endpoint.port.slot()))
        {
            *slot = value;
        }
    }

    /// Take everything `other` holds. Returns the vertices that moved.
    pub(crate) fn absorb(&mut self, other: Network) -> Vec<VertexId> {
        let moved: Vec<VertexId> = other.profiles.keys().copied().collect();
        if other.edges.is_empty() {
            for (vertex, profile) in &other.profiles {
                self.add_vertex(*vertex, profile);
            }
        } else {
            for edge in &other.edges {
                let (a, b) = (edge.first().vertex, edge.second().vertex);
                if let (Some(pa), Some(pb)) = (other.profiles.get(&a), other.profiles.get(&b)) {
                    if self.add_edge(*edge, pa, pb).is_none() {
                        tracing::warn!(
                            network = self.id.0,
                            from = other.id.0,
                            "edge collided with an occupied port during merge"
                        );
                    }
                }
            }
            // Vertices the edges did not pull in (only after a deferred split).
            for (vertex, profile) in &other.profiles {
                self.add_vertex(*vertex, profile);
            }
        }
        self.accumulated_offered = self.accumulated_offered.saturating_add(other.accumulated_offered);
        self.stats.absorb(&other.stats);
        self.had_edge_deletion |= other.had_edge_deletion;
        self.mst_dirty = true;
        moved
    }

    // -----------------------------------------------------------------------
    // Split detection
    // -----------------------------------------------------------------------

    /// Vertices reachable from `start` over any edge.
    fn reachable_from(&self, start: VertexId, within: &BTreeSet<VertexId>) -> BTreeSet<VertexId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(start);
        queue.push_back(start);
        while let Some(v) = queue.pop_front() {
            for (next, _) in self.neighbors(v) {
                if within.contains(&next) && seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Whether every vertex can reach every other over the edge set.
    pub fn is_connected(&self) -> bool {
        let Some(&start) = self.profiles.keys().next() else {
            return true;
        };
        let all: BTreeSet<VertexId> = self.profiles.keys().copied().collect();
        self.reachable_from(start, &all).len() == all.len()
    }

    /// Breadth-first connectivity check. Every component not reachable from
    /// the first vertex is cut out and returned as a fragment.
    pub(crate) fn split_disconnected(&mut self) -> Vec<Fragment> {
        let Some(&start) = self.profiles.keys().next() else {
            return Vec::new();
        };
        let all: BTreeSet<VertexId> = self.profiles.keys().copied().collect();
        let kept = self.reachable_from(start, &all);
        if kept.len() == all.len() {
            return Vec::new();
        }

        let mut unreached: BTreeSet<VertexId> = all.difference(&kept).copied().collect();
        let mut fragments = Vec::new();
        while let Some(&seed) = unreached.iter().next() {
            let component = self.reachable_from(seed, &unreached);
            let mut fragment = Fragment::default();
            for vertex in &component {
                unreached.remove(vertex);
                if let Some(profile) = self.profiles.get(vertex) {
                    fragment.profiles.insert(*vertex, profile.clone());
                }
                for (_, edge) in self.neighbors(*vertex) {
                    if !fragment.edges.contains(&edge) {
                        fragment.edges.push(edge);
                    }
                }
            }
            fragments.push(fragment);
        }

        for fragment in &fragments {
            for edge in &fragment.edges {
                self.edges.remove(edge);
            }
            for vertex in fragment.profiles.keys() {
                self.profiles.remove(vertex);
                self.donors.remove(vertex);
                self.receivers.remove(vertex);
                self.neutrals.remove(vertex);
                self.slots.remove(vertex);
            }
        }
        self.reach.clear();
        self.reach.retain_rows(|v| self.profiles.contains_key(&v));
        self.mst_dirty = true;
        debug!(
            network = self.id.0,
            kept = kept.len(),
            fragments = fragments.len(),
            "network split after edge deletion"
        );
        fragments
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance this network by one tick.
    ///
    /// 1. An empty network retires.
    /// 2. If an edge was removed since the last tick, split detection runs.
    /// 3. Paused ticks (`game_speed == 0`) skip distribution.
    /// 4. Pooled low-tier offered power is distributed.
    /// 5. Stored power moves from donors to receivers.
    /// 6. Telemetry is recorded and per-tick counters reset.
    pub fn update<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        config: &PowerConfig,
        delta_time: Fixed64,
        game_speed: Fixed64,
    ) -> TickOutcome {
        if self.profiles.is_empty() {
            return TickOutcome::Retired;
        }

        let fragments = if self.had_edge_deletion {
            self.had_edge_deletion = false;
            self.split_disconnected()
        } else {
            Vec::new()
        };

        if game_speed > Fixed64::ZERO {
            self.distribute_offered_low_power(store, config, delta_time, game_speed);
            self.distribute_stored_power(store, config, delta_time, game_speed);
        }

        self.accumulated_offered = Fixed64::ZERO;
        self.stats.finish_tick(delta_time);
        TickOutcome::Ran { fragments }
    }

    /// Ports of `vertex` that hold no edge.
    pub fn free_ports(&self, vertex: VertexId) -> Vec<PortIndex> {
        self.slots
            .get(&vertex)
            .map(|slots| {
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.is_none())
                    .map(|(i, _)| PortIndex(i as u16))
                    .collect()
            })
            .unwrap_or_default()
    }
}
