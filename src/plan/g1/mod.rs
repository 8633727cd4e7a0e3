//! A region-based, generational, mostly-concurrent collector.
//!
//! Young collections evacuate the eden regions, mixed collections add the old regions with the
//! most garbage, and a full collection compacts the whole heap when evacuation runs out of space.
//! Liveness of old regions is computed by concurrent marking with a snapshot-at-the-beginning
//! barrier. Cross-region references are tracked by a card table and per-region remembered sets,
//! which the [`update_remset`] worker keeps current between pauses.

mod collection_set;
mod evacuation;
mod full_gc;
mod global;
mod marking;
mod predictor;
mod stats;
pub mod update_remset;

pub use self::collection_set::CollectionSet;
pub use self::global::{GCPhase, GCTaskCause, G1};
pub use self::predictor::{
    calculate_desired_eden_length_by_pause_duration, G1Analytics, G1PauseTracker, PauseSample,
};
pub use self::stats::{GCKind, GCStats};
