//! The collector and the mutator-side interface to it.
//!
//! * [`g1`] holds the collector: its phases, evacuation, marking and the remembered-set worker.
//! * [`mutator_context`] holds the per-thread allocation state and the registry of mutators.
//! * [`barriers`] holds the write barriers shared by all mutators.

pub mod barriers;
pub mod g1;
pub mod mutator_context;

pub use self::mutator_context::AllocationSemantics;
pub use self::mutator_context::Mutator;
