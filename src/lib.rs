//! A region-based, mostly-concurrent garbage collector.
//!
//! The heap is split into equally sized regions. New objects are bump-allocated into eden
//! regions; young collections evacuate the live ones into old regions. Concurrent marking finds
//! the old regions with the most garbage, which mixed collections then evacuate together with
//! eden. References between regions are tracked through a card table and one remembered set per
//! region, kept current by a background worker.
//!
//! A runtime embeds the collector by implementing [`vm::VMBinding`] and talks to it through
//! [`memory_manager`].

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate lazy_static;

pub mod memory_manager;
pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;

#[cfg(test)]
mod tests;

pub use crate::plan::g1::G1;
pub use crate::plan::{AllocationSemantics, Mutator};
