//! Per-network energy telemetry for UI display.
//!
//! Counters accumulate during a tick and are folded into short rolling
//! averages by [`NetworkStats::finish_tick`]. Nothing in distribution reads
//! these values back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use voltaic_core::fixed::Fixed64;

// ---------------------------------------------------------------------------
// RollingAverage
// ---------------------------------------------------------------------------

/// Fixed-length window of samples with a running sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAverage {
    window: usize,
    samples: VecDeque<Fixed64>,
    sum: Fixed64,
}

impl RollingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            sum: Fixed64::ZERO,
        }
    }

    pub fn push(&mut self, sample: Fixed64) {
        if self.samples.len() == self.window {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum = self.sum.saturating_sub(oldest);
            }
        }
        self.samples.push_back(sample);
        self.sum = self.sum.saturating_add(sample);
    }

    /// Mean of the samples in the window; zero before the first sample.
    pub fn average(&self) -> Fixed64 {
        if self.samples.is_empty() {
            return Fixed64::ZERO;
        }
        self.sum / Fixed64::saturating_from_num(self.samples.len())
    }

    /// Add `other`'s samples onto this window, newest aligned with newest.
    /// Ticks only one side recorded count as zero for the other.
    pub fn fold_sum(&mut self, other: &RollingAverage) {
        let theirs = other.samples.len().min(self.window);
        while self.samples.len() < theirs {
            self.samples.push_front(Fixed64::ZERO);
        }
        let len = self.samples.len();
        for (age, sample) in other.samples.iter().rev().take(theirs).enumerate() {
            if let Some(slot) = self.samples.get_mut(len - 1 - age) {
                *slot = slot.saturating_add(*sample);
            }
        }
        self.resum();
    }

    /// Keep whichever of the two histories is longer.
    pub fn fold_longest(&mut self, other: &RollingAverage) {
        if other.samples.len() <= self.samples.len() {
            return;
        }
        let skip = other.samples.len().saturating_sub(self.window);
        self.samples = other.samples.iter().skip(skip).copied().collect();
        self.resum();
    }

    fn resum(&mut self) {
        self.sum = self
            .samples
            .iter()
            .fold(Fixed64::ZERO, |acc, s| acc.saturating_add(*s));
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// NetworkStats
// ---------------------------------------------------------------------------

/// Energy flowing through one network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Offered by donors this tick.
    pub offered_in: Fixed64,
    /// Accepted by ordinary receivers this tick.
    pub delivered_out: Fixed64,
    /// Accepted by accumulator-like receivers this tick.
    pub stored_in: Fixed64,
    offered: RollingAverage,
    delivered: RollingAverage,
    stored: RollingAverage,
    tick_duration: RollingAverage,
}

impl NetworkStats {
    pub fn new(window: usize) -> Self {
        Self {
            offered_in: Fixed64::ZERO,
            delivered_out: Fixed64::ZERO,
            stored_in: Fixed64::ZERO,
            offered: RollingAverage::new(window),
            delivered: RollingAverage::new(window),
            stored: RollingAverage::new(window),
            tick_duration: RollingAverage::new(window),
        }
    }

    pub fn record_offered(&mut self, amount: Fixed64) {
        self.offered_in = self.offered_in.saturating_add(amount);
    }

    pub fn record_delivery(&mut self, amount: Fixed64, accumulator_like: bool) {
        if accumulator_like {
            self.stored_in = self.stored_in.saturating_add(amount);
        } else {
            self.delivered_out = self.delivered_out.saturating_add(amount);
        }
    }

    /// Push this tick's counters into the averages and reset them.
    pub fn finish_tick(&mut self, delta_time: Fixed64) {
        self.offered.push(self.offered_in);
        self.delivered.push(self.delivered_out);
        self.stored.push(self.stored_in);
        self.tick_duration.push(delta_time);
        self.offered_in = Fixed64::ZERO;
        self.delivered_out = Fixed64::ZERO;
        self.stored_in = Fixed64::ZERO;
    }

    /// Fold another network's history into this one after a merge.
    ///
    /// Energy windows are summed tick by tick; both networks ran the same
    /// ticks, so the longer duration history is kept as is.
    pub(crate) fn absorb(&mut self, other: &NetworkStats) {
        self.offered_in = self.offered_in.saturating_add(other.offered_in);
        self.delivered_out = self.delivered_out.saturating_add(other.delivered_out);
        self.stored_in = self.stored_in.saturating_add(other.stored_in);
        self.offered.fold_sum(&other.offered);
        self.delivered.fold_sum(&other.delivered);
        self.stored.fold_sum(&other.stored);
        self.tick_duration.fold_longest(&other.tick_duration);
    }

    pub fn average_offered(&self) -> Fixed64 {
        self.offered.average()
    }

    pub fn average_delivered(&self) -> Fixed64 {
        self.delivered.average()
    }

    pub fn average_stored(&self) -> Fixed64 {
        self.stored.average()
    }

    pub fn average_tick_duration(&self) -> Fixed64 {
        self.tick_duration.average()
    }

    /// Average delivered energy per second of simulated time.
    pub fn delivered_per_second(&self) -> Fixed64 {
        voltaic_core::fixed::ratio(self.average_delivered(), self.average_tick_duration())
    }

    /// Ticks recorded so far, capped at the window length.
    pub fn samples(&self) -> usize {
        self.tick_duration.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(v: f64) -> Fixed64 {
        Fixed64::from_num(v)
    }

    #[test]
    fn rolling_average_drops_oldest() {
        let mut avg = RollingAverage::new(2);
        avg.push(fixed(10.0));
        avg.push(fixed(20.0));
        assert_eq!(avg.average(), fixed(15.0));
        avg.push(fixed(40.0));
        assert_eq!(avg.average(), fixed(30.0));
        assert_eq!(avg.len(), 2);
    }

    #[test]
    fn empty_average_is_zero() {
        let avg = RollingAverage::new(5);
        assert!(avg.is_empty());
        assert_eq!(avg.average(), Fixed64::ZERO);
    }

    #[test]
    fn accumulator_energy_counts_as_stored() {
        let mut stats = NetworkStats::new(4);
        stats.record_delivery(fixed(5.0), false);
        stats.record_delivery(fixed(3.0), true);
        assert_eq!(stats.delivered_out, fixed(5.0));
        assert_eq!(stats.stored_in, fixed(3.0));
    }

    #[test]
    fn fold_sum_aligns_newest_samples() {
        let mut short = RollingAverage::new(4);
        short.push(fixed(6.0));
        let mut long = RollingAverage::new(4);
        for _ in 0..3 {
            long.push(fixed(3.0));
        }
        short.fold_sum(&long);
        assert_eq!(short.len(), 3);
        // [3, 3, 3 + 6]
        assert_eq!(short.average(), fixed(5.0));
    }

    #[test]
    fn absorb_keeps_merged_history() {
        let mut into = NetworkStats::new(4);
        let mut from = NetworkStats::new(4);
        for _ in 0..2 {
            into.record_delivery(fixed(10.0), false);
            into.finish_tick(fixed(1.0));
            from.record_delivery(fixed(6.0), false);
            from.record_offered(fixed(8.0));
            from.finish_tick(fixed(1.0));
        }
        into.absorb(&from);
        assert_eq!(into.average_delivered(), fixed(16.0));
        assert_eq!(into.average_offered(), fixed(8.0));
        assert_eq!(into.samples(), 2);
        assert_eq!(into.delivered_per_second(), fixed(16.0));
    }

    #[test]
    fn absorb_adopts_longer_duration_history() {
        let mut fresh = NetworkStats::new(4);
        let mut old = NetworkStats::new(4);
        for _ in 0..3 {
            old.finish_tick(fixed(0.5));
        }
        fresh.absorb(&old);
        assert_eq!(fresh.samples(), 3);
        assert_eq!(fresh.average_tick_duration(), fixed(0.5));
    }

    #[test]
    fn finish_tick_resets_counters() {
        let mut stats = NetworkStats::new(4);
        stats.record_offered(fixed(8.0));
        stats.record_delivery(fixed(6.0), false);
        stats.finish_tick(fixed(0.5));
        assert_eq!(stats.offered_in, Fixed64::ZERO);
        assert_eq!(stats.average_offered(), fixed(8.0));
        assert_eq!(stats.average_delivered(), fixed(6.0));
        assert_eq!(stats.delivered_per_second(), fixed(12.0));
        assert_eq!(stats.samples(), 1);
    }
}
