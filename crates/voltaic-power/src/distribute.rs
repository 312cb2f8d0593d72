//! Per-tick power distribution.
//!
//! Two sources feed receivers each tick, always in this order:
//!
//! 1. **Offered power** pushed by donors such as generators. High-power
//!    donors are distributed immediately (their own reachability decides
//!    the tier of each transfer); everything else is pooled and distributed
//!    once per tick at the Low tier.
//! 2. **Stored power** pulled from storage-capable donors into receivers
//!    with spare capacity.
//!
//! Offered power is handed out tier by tier: receivers of equal priority
//! form a tier, higher tiers are served first, and inside a tier each pass
//! gives every receiver a share proportional to its priority. Remainders
//! flow back into the pool for the next pass; the last pass sweeps the whole
//! remaining pool greedily so a tier never leaks power downward while a
//! member could still take it.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use tracing::trace;
use voltaic_core::config::PowerConfig;
use voltaic_core::fixed::{Fixed64, tick_budget, weight_fraction};
use voltaic_core::id::VertexId;
use voltaic_core::vertex::VertexStore;

use crate::edge::TransportStrength;
use crate::network::Network;

/// Offer rank of a donor. Neutral donors (priority 0) and the pooled
/// low-tier offer outrank every storage donor.
fn offer_rank(donor_priority: u32) -> u32 {
    if donor_priority == 0 {
        u32::MAX
    } else {
        donor_priority
    }
}

/// A receiver eligible for offered power.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    vertex: VertexId,
    priority: u32,
}

/// Where a batch of offered power comes from.
#[derive(Debug, Clone, Copy)]
enum OfferSource {
    /// A single high-power donor; tier looked up per receiver.
    Donor(VertexId),
    /// The pooled low-tier offers of the tick.
    Pool,
}

impl Network {
    /// Push `amount` of power from `donor` into the network.
    ///
    /// High-power donors are distributed immediately and the unplaced
    /// remainder is returned. Other donors add to the tick's low-tier pool
    /// (returning zero). Paused ticks and unknown donors place nothing.
    pub fn offer_power<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        config: &PowerConfig,
        donor: VertexId,
        delta_time: Fixed64,
        game_speed: Fixed64,
        amount: Fixed64,
    ) -> Fixed64 {
        if amount <= Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        if game_speed <= Fixed64::ZERO {
            return amount;
        }
        let Some(profile) = self.profiles.get(&donor) else {
            return amount;
        };
        let high = profile.high_power_capable;
        self.stats.record_offered(amount);

        if high {
            let rank = store
                .vertex(donor)
                .map(|v| offer_rank(v.donor_priority()))
                .unwrap_or(u32::MAX);
            self.distribute_offer(
                store,
                config,
                OfferSource::Donor(donor),
                rank,
                amount,
                delta_time,
                game_speed,
            )
        } else {
            self.accumulated_offered = self.accumulated_offered.saturating_add(amount);
            Fixed64::ZERO
        }
    }

    /// Hand the tick's pooled low-tier offers to receivers. Whatever no
    /// receiver takes is dropped.
    pub(crate) fn distribute_offered_low_power<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        config: &PowerConfig,
        delta_time: Fixed64,
        game_speed: Fixed64,
    ) {
        let pool = std::mem::replace(&mut self.accumulated_offered, Fixed64::ZERO);
        if pool <= Fixed64::ZERO {
            return;
        }
        let dropped = self.distribute_offer(
            store,
            config,
            OfferSource::Pool,
            u32::MAX,
            pool,
            delta_time,
            game_speed,
        );
        if dropped > Fixed64::ZERO {
            trace!(network = self.id().0, dropped = %dropped, "pooled offer not fully placed");
        }
    }

    /// Receivers that may take offered power, ordered by priority (highest
    /// first), then by fill ratio (emptiest first), then by id.
    fn ranked_receivers<S: VertexStore + ?Sized>(
        &self,
        store: &S,
        exclude: Option<VertexId>,
        rank: u32,
    ) -> Vec<Candidate> {
        let mut ranked: Vec<(Candidate, Fixed64)> = self
            .receivers
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| {
                let v = store.vertex(*id)?;
                let priority = v.receiver_priority();
                if priority == 0 || v.donor_priority() > rank || v.spare_capacity() <= Fixed64::ZERO {
                    return None;
                }
                Some((Candidate { vertex: *id, priority }, v.power_ratio()))
            })
            .collect();
        ranked.sort_by_key(|(c, ratio)| (Reverse(c.priority), *ratio, c.vertex));
        ranked.into_iter().map(|(c, _)| c).collect()
    }

    /// Proportional-share distribution of `pool`. Returns the unplaced rest.
    #[allow(clippy::too_many_arguments)]
    fn distribute_offer<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        config: &PowerConfig,
        source: OfferSource,
        rank: u32,
        mut pool: Fixed64,
        delta_time: Fixed64,
        game_speed: Fixed64,
    ) -> Fixed64 {
        let exclude = match source {
            OfferSource::Donor(donor) => Some(donor),
            OfferSource::Pool => None,
        };
        let ranked = self.ranked_receivers(store, exclude, rank);
        let passes = config.distribution_passes.max(1);

        // Each receiver's throughput budget is spent across passes.
        let mut budgets: BTreeMap<VertexId, Fixed64> = BTreeMap::new();
        for candidate in &ranked {
            let strength = match source {
                OfferSource::Donor(donor) => self.connection_strength(donor, candidate.vertex),
                OfferSource::Pool => TransportStrength::Low,
            };
            let budget = tick_budget(strength.throughput(config), delta_time, game_speed);
            budgets.insert(candidate.vertex, budget);
        }

        let mut start = 0;
        while start < ranked.len() && pool > Fixed64::ZERO {
            let priority = ranked[start].priority;
            let end = ranked[start..]
                .iter()
                .position(|c| c.priority != priority)
                .map_or(ranked.len(), |offset| start + offset);
            let mut hungry: Vec<Candidate> = ranked[start..end].to_vec();
            start = end;

            for pass in 0..passes {
                if pool <= Fixed64::ZERO || hungry.is_empty() {
                    break;
                }
                let sweep = pass + 1 == passes;
                let pass_pool = pool;
                let weight: u64 = hungry.iter().map(|c| u64::from(c.priority)).sum();
                let mut still_hungry = Vec::with_capacity(hungry.len());

                for candidate in hungry {
                    if pool <= Fixed64::ZERO {
                        still_hungry.push(candidate);
                        continue;
                    }
                    let share = if sweep {
                        pool
                    } else {
                        pass_pool
                            .saturating_mul(weight_fraction(u64::from(candidate.priority), weight))
                            .min(pool)
                    };
                    let budget = budgets.get(&candidate.vertex).copied().unwrap_or(Fixed64::ZERO);
                    if share <= Fixed64::ZERO {
                        still_hungry.push(candidate);
                        continue;
                    }
                    let Some(receiver) = store.vertex_mut(candidate.vertex) else {
                        continue;
                    };
                    let leftover = receiver
                        .accept_power(share, budget)
                        .clamp(Fixed64::ZERO, share);
                    let has_room = receiver.spare_capacity() > Fixed64::ZERO;
                    let accepted = share - leftover;
                    pool -= accepted;
                    let budget_left = (budget - accepted).max(Fixed64::ZERO);
                    budgets.insert(candidate.vertex, budget_left);
                    let accumulator = self
                        .profiles
                        .get(&candidate.vertex)
                        .is_some_and(|p| p.accumulator_like);
                    self.stats.record_delivery(accepted, accumulator);
                    // A receiver that handed anything back is full or out of
                    // budget for this tick.
                    if leftover == Fixed64::ZERO && has_room && budget_left > Fixed64::ZERO {
                        still_hungry.push(candidate);
                    }
                }
                hungry = still_hungry;
            }
        }
        pool
    }

    /// Move stored energy from donors to receivers with spare capacity.
    pub(crate) fn distribute_stored_power<S: VertexStore + ?Sized>(
        &mut self,
        store: &mut S,
        config: &PowerConfig,
        delta_time: Fixed64,
        game_speed: Fixed64,
    ) {
        let receivers = self.ranked_receivers(store, None, u32::MAX);
        let mut donors: Vec<(VertexId, u32, Fixed64)> = self
            .donors
            .iter()
            .filter_map(|id| {
                let v = store.vertex(*id)?;
                Some((*id, v.donor_priority(), v.power_ratio()))
            })
            .collect();
        donors.sort_by_key(|(id, priority, ratio)| (Reverse(*priority), Reverse(*ratio), *id));

        for candidate in receivers {
            for &(donor, _, _) in &donors {
                if donor == candidate.vertex {
                    continue;
                }
                let Some((r_priority, r_ratio, r_capacity, spare)) = store.vertex(candidate.vertex).map(|v| {
                    (
                        v.receiver_priority(),
                        v.power_ratio(),
                        v.power_capacity(),
                        v.spare_capacity(),
                    )
                }) else {
                    break;
                };
                if spare <= Fixed64::ZERO {
                    break;
                }
                let Some((d_priority, d_ratio, d_capacity)) = store
                    .vertex(donor)
                    .map(|v| (v.receiver_priority(), v.power_ratio(), v.power_capacity()))
                else {
                    continue;
                };

                // Never drain a donor that matters more as a sink.
                if d_priority > r_priority {
                    continue;
                }
                let mut amount = spare;
                if d_priority == r_priority {
                    if r_ratio >= d_ratio {
                        continue;
                    }
                    amount = amount.min(equalizing_transfer(d_ratio, d_capacity, r_ratio, r_capacity));
                }
                if amount < config.min_transfer {
                    continue;
                }

                let strength = self.connection_strength(donor, candidate.vertex);
                let budget = tick_budget(strength.throughput(config), delta_time, game_speed);
                let amount = amount.min(budget);
                if amount <= Fixed64::ZERO {
                    continue;
                }

                let granted = match store.vertex_mut(donor) {
                    Some(v) => v.request_power(amount, budget).clamp(Fixed64::ZERO, amount),
                    None => continue,
                };
                if granted <= Fixed64::ZERO {
                    continue;
                }
                let leftover = match store.vertex_mut(candidate.vertex) {
                    Some(v) => v.accept_power(granted, budget).clamp(Fixed64::ZERO, granted),
                    None => granted,
                };
                if leftover > Fixed64::ZERO {
                    if let Some(v) = store.vertex_mut(donor) {
                        v.refund_power(leftover);
                    }
                }
                let accumulator = self
                    .profiles
                    .get(&candidate.vertex)
                    .is_some_and(|p| p.accumulator_like);
                self.stats.record_delivery(granted - leftover, accumulator);
            }
        }
    }
}

/// Energy that brings two equal-priority peers to the same fill ratio:
/// half the ratio gap, weighted by both capacities. Damps oscillation
/// between peers.
fn equalizing_transfer(
    donor_ratio: Fixed64,
    donor_capacity: Fixed64,
    receiver_ratio: Fixed64,
    receiver_capacity: Fixed64,
) -> Fixed64 {
    let total = donor_capacity.saturating_add(receiver_capacity);
    if total <= Fixed64::ZERO {
        return Fixed64::ZERO;
    }
    let gap = (donor_ratio - receiver_ratio).max(Fixed64::ZERO);
    let donor_share = voltaic_core::fixed::ratio(donor_capacity, total);
    gap.saturating_mul(receiver_capacity).saturating_mul(donor_share)
}
