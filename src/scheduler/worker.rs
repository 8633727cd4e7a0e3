use super::scheduler::GCWorkScheduler;
use super::work::GCWork;
use std::sync::Arc;

/// Returned by `WorkerMonitor::park_and_wait` when the worker must terminate.
#[derive(Debug)]
pub(crate) struct WorkerShouldExit;

/// A GC worker.  Owned by a worker thread, or created on the fly for the pause thread when it
/// helps executing works.
pub struct GCWorker {
    pub ordinal: usize,
    scheduler: Arc<GCWorkScheduler>,
    is_pause_thread: bool,
}

impl GCWorker {
    pub(crate) fn new(
        ordinal: usize,
        scheduler: Arc<GCWorkScheduler>,
        is_pause_thread: bool,
    ) -> Self {
        Self {
            ordinal,
            scheduler,
            is_pause_thread,
        }
    }

    pub fn scheduler(&self) -> &Arc<GCWorkScheduler> {
        &self.scheduler
    }

    /// True if this worker is the thread running the pause rather than a pool thread.
    pub fn is_pause_thread(&self) -> bool {
        self.is_pause_thread
    }

    /// Add a work belonging to the current pause.
    pub fn add_work(&mut self, work: impl GCWork) {
        self.scheduler.add_pause_work(work);
    }

    /// Run the worker loop until the scheduler shuts down.
    pub(crate) fn run(&mut self) {
        let scheduler = self.scheduler.clone();
        debug!("Worker {} started", self.ordinal);
        loop {
            scheduler.schedule_due_works();
            if let Some(work) = scheduler.poll() {
                scheduler.execute(work, self);
                continue;
            }
            let timeout = scheduler.time_to_next_delayed_work();
            if scheduler
                .worker_monitor
                .park_and_wait(self.ordinal, timeout, || scheduler.has_ready_work())
                .is_err()
            {
                break;
            }
        }
        debug!("Worker {} exited", self.ordinal);
    }
}
