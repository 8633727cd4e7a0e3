//! A small work-stealing scheduler for collector works.

#[allow(clippy::module_inception)]
mod scheduler;
pub use scheduler::GCWorkScheduler;

mod work;
pub use work::GCWork;

mod worker;
pub use worker::GCWorker;

mod worker_monitor;
