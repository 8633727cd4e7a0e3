//! Pause-time prediction.
//!
//! The cost of a pause is modelled as
//!
//! ```text
//! V(cs) = U * d + Y * eden(cs) + C * survivors(cs) + sum over old r in cs of (S * rsSize(r) + C * liveBytes(r))
//! ```
//!
//! - `d` is the number of dirty cards still pending when the pause starts and `U` the cost of
//!   scanning one of them;
//! - `Y` is the fixed cost of collecting one eden region;
//! - `S` is the cost of scanning one remembered-set card and `rsSize(r)` the size of `r`'s set;
//! - `C` is the cost of copying one live byte.
//!
//! Every parameter is a decaying average over the pauses seen so far.

use crate::policy::region::Region;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Weight of the history in a decaying average.
const DECAY: f64 = 0.7;

#[derive(Clone, Copy, Debug, Default)]
struct DecayingAverage {
    value: f64,
    samples: usize,
}

impl DecayingAverage {
    fn add(&mut self, sample: f64) {
        self.value = if self.samples == 0 {
            sample
        } else {
            DECAY * self.value + (1.0 - DECAY) * sample
        };
        self.samples += 1;
    }

    fn get(&self) -> f64 {
        self.value
    }

    fn get_or(&self, default: f64) -> f64 {
        if self.samples == 0 {
            default
        } else {
            self.value
        }
    }
}

fn micros(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1000.0
}

/// What a young or mixed pause measured about itself.
#[derive(Clone, Debug)]
pub struct PauseSample {
    pub start: Instant,
    pub end: Instant,
    pub young_regions: usize,
    /// Remembered-set cards plus pending dirty cards scanned.
    pub scanned_cards: usize,
    pub dirty_cards: usize,
    pub scan_time: Duration,
    pub copied_bytes: usize,
    pub copy_time: Duration,
    pub young_allocated_bytes: usize,
    pub young_survived_bytes: usize,
}

pub struct G1Analytics {
    region_size: usize,
    young_time_per_region: DecayingAverage,
    remset_card_scan_cost: DecayingAverage,
    dirty_card_scan_cost: DecayingAverage,
    dirty_cards: DecayingAverage,
    copy_cost_per_byte: DecayingAverage,
    survived_ratio: DecayingAverage,
    /// Bytes per millisecond.
    allocation_rate: DecayingAverage,
    last_pause_end: Option<Instant>,
}

impl G1Analytics {
    pub fn new(region_size: usize) -> Self {
        G1Analytics {
            region_size,
            young_time_per_region: DecayingAverage::default(),
            remset_card_scan_cost: DecayingAverage::default(),
            dirty_card_scan_cost: DecayingAverage::default(),
            dirty_cards: DecayingAverage::default(),
            copy_cost_per_byte: DecayingAverage::default(),
            survived_ratio: DecayingAverage::default(),
            allocation_rate: DecayingAverage::default(),
            last_pause_end: None,
        }
    }

    pub fn update(&mut self, sample: &PauseSample) {
        let total = micros(sample.end.saturating_duration_since(sample.start));
        let scan = micros(sample.scan_time);
        let copy = micros(sample.copy_time);
        if sample.scanned_cards > 0 {
            let cost = scan / sample.scanned_cards as f64;
            self.remset_card_scan_cost.add(cost);
            if sample.dirty_cards > 0 {
                self.dirty_card_scan_cost.add(cost);
            }
        }
        self.dirty_cards.add(sample.dirty_cards as f64);
        if sample.copied_bytes > 0 {
            self.copy_cost_per_byte
                .add(copy / sample.copied_bytes as f64);
        }
        if sample.young_regions > 0 {
            let other = (total - scan - copy).max(0.0);
            self.young_time_per_region
                .add(other / sample.young_regions as f64);
        }
        if sample.young_allocated_bytes > 0 {
            self.survived_ratio.add(
                sample.young_survived_bytes as f64 / sample.young_allocated_bytes as f64,
            );
        }
        if let Some(last) = self.last_pause_end {
            let millis = sample.start.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if millis > 0.0 {
                self.allocation_rate
                    .add(sample.young_allocated_bytes as f64 / millis);
            }
        }
        self.last_pause_end = Some(sample.end);
        trace!(
            "Analytics: young/region={:.1}us card={:.3}us copy/byte={:.5}us survived={:.2} alloc={:.0}B/ms",
            self.young_time_per_region.get(),
            self.remset_card_scan_cost.get(),
            self.copy_cost_per_byte.get(),
            self.survived_ratio.get(),
            self.allocation_rate.get()
        );
    }

    /// Predicted pause time for a young collection of `eden_length` regions.
    pub fn predict_young_collection_time_us(&self, eden_length: usize) -> f64 {
        let survivors =
            (eden_length * self.region_size) as f64 * self.predict_survived_bytes_ratio();
        self.dirty_cards.get() * self.dirty_card_scan_cost.get()
            + eden_length as f64 * self.young_time_per_region.get()
            + survivors * self.copy_cost_per_byte.get()
    }

    /// Predicted extra pause time for collecting `region` in a mixed pause.
    pub fn predict_old_collection_time_us(&self, region: &Region) -> f64 {
        region.remset().size() as f64 * self.remset_card_scan_cost.get()
            + region.live_bytes() as f64 * self.copy_cost_per_byte.get()
    }

    /// Fraction of eden bytes that survive a young collection. Assumes everything survives
    /// until the first sample.
    pub fn predict_survived_bytes_ratio(&self) -> f64 {
        self.survived_ratio.get_or(1.0)
    }

    pub fn predict_allocation_rate(&self) -> f64 {
        self.allocation_rate.get()
    }
}

/// Recent pause times, for keeping the pause-time goal: at most `max_pause` of pause time in
/// any window of `interval`.
pub struct G1PauseTracker {
    pauses: VecDeque<(Instant, Instant)>,
    interval: Duration,
    max_pause: Duration,
}

impl G1PauseTracker {
    pub fn new(interval: Duration, max_pause: Duration) -> Self {
        assert!(
            max_pause <= interval,
            "pause goal {:?} exceeds its interval {:?}",
            max_pause,
            interval
        );
        G1PauseTracker {
            pauses: VecDeque::new(),
            interval,
            max_pause,
        }
    }

    pub fn add_pause(&mut self, start: Instant, end: Instant) {
        self.pauses.push_back((start, end));
        // Anything ending a whole interval before the newest pause can no longer share a window
        // with a future pause.
        while let Some((_, old_end)) = self.pauses.front() {
            if *old_end + self.interval < end {
                self.pauses.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait from `now` until a pause of `pause` fits the window.
    pub fn min_delay_before_pause(&self, now: Instant, pause: Duration) -> Duration {
        let budget = self.max_pause.saturating_sub(pause);
        let mut used = Duration::ZERO;
        for (start, end) in self.pauses.iter().rev() {
            let length = end.saturating_duration_since(*start);
            if used + length > budget {
                // The window must start no earlier than the point where the remaining budget
                // covers the tail of this pause.
                let cut = *end - (budget - used);
                return (cut + self.interval).saturating_duration_since(now + pause);
            }
            used += length;
        }
        Duration::ZERO
    }

    pub fn min_delay_before_max_pause(&self, now: Instant) -> Duration {
        self.min_delay_before_pause(now, self.max_pause)
    }

    pub fn len(&self) -> usize {
        self.pauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pauses.is_empty()
    }
}

/// The largest eden length in `[min_length, max_length]` whose predicted young pause fits
/// `max_pause`. Returns `min_length` if none does.
pub fn calculate_desired_eden_length_by_pause_duration(
    analytics: &G1Analytics,
    max_pause: Duration,
    min_length: usize,
    max_length: usize,
) -> usize {
    let budget = micros(max_pause);
    let fits = |length: usize| analytics.predict_young_collection_time_us(length) <= budget;
    if fits(max_length) {
        return max_length;
    }
    let (mut low, mut high) = (min_length, max_length);
    // Invariant: `high` does not fit; `low` fits or is the minimum.
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if fits(mid) {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn pause_tracker_delays_until_window_has_room() {
        let base = Instant::now();
        let mut tracker = G1PauseTracker::new(20 * MS, 10 * MS);
        tracker.add_pause(base, base + 8 * MS);
        let now = base + 8 * MS;
        // A full-length pause must wait until the previous one leaves the window.
        assert_eq!(tracker.min_delay_before_max_pause(now), 10 * MS);
        // A short one fits right away.
        assert_eq!(tracker.min_delay_before_pause(now, 2 * MS), Duration::ZERO);
        assert_eq!(tracker.min_delay_before_pause(now, 3 * MS), 10 * MS);
        // Long after, nothing is in the way.
        assert_eq!(
            tracker.min_delay_before_max_pause(base + 100 * MS),
            Duration::ZERO
        );
    }

    #[test]
    fn pause_tracker_forgets_old_pauses() {
        let base = Instant::now();
        let mut tracker = G1PauseTracker::new(20 * MS, 10 * MS);
        tracker.add_pause(base, base + MS);
        tracker.add_pause(base + 50 * MS, base + 51 * MS);
        assert_eq!(tracker.len(), 1);
    }

    fn sample(young_regions: usize, total: Duration) -> PauseSample {
        let start = Instant::now();
        PauseSample {
            start,
            end: start + total,
            young_regions,
            scanned_cards: 0,
            dirty_cards: 0,
            scan_time: Duration::ZERO,
            copied_bytes: 0,
            copy_time: Duration::ZERO,
            young_allocated_bytes: 1000,
            young_survived_bytes: 0,
        }
    }

    #[test]
    fn eden_length_fits_pause_goal() {
        let mut analytics = G1Analytics::new(4096);
        // One millisecond per region, nothing survives.
        analytics.update(&sample(4, 4 * MS));
        let prediction = analytics.predict_young_collection_time_us(3);
        assert!((prediction - 3000.0).abs() < 1.0, "{}", prediction);
        assert_eq!(
            calculate_desired_eden_length_by_pause_duration(&analytics, 10 * MS, 1, 64),
            10
        );
        assert_eq!(
            calculate_desired_eden_length_by_pause_duration(&analytics, 100 * MS, 1, 64),
            64
        );
        assert_eq!(
            calculate_desired_eden_length_by_pause_duration(&analytics, MS / 2, 1, 64),
            1
        );
    }

    #[test]
    fn survival_defaults_to_everything() {
        let analytics = G1Analytics::new(4096);
        assert_eq!(analytics.predict_survived_bytes_ratio(), 1.0);
        assert_eq!(analytics.predict_young_collection_time_us(8), 0.0);
    }
}
