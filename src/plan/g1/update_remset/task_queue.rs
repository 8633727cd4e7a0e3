use super::{UpdateRemsetBackend, UpdateRemsetCore, UpdateRemsetState};
use crate::scheduler::{GCWork, GCWorkScheduler, GCWorker};
use crate::vm::VMBinding;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long a starved pass waits on the scheduler's wait-list before running again.
const STARVED_WAIT: Duration = Duration::from_millis(1);

/// Runs the worker as a background work that resubmits itself after every pass.
pub(super) struct TaskQueueBackend {
    scheduler: Arc<GCWorkScheduler>,
    /// True while a `ProcessCardsWork` is queued, waiting or running. At most one is.
    scheduled: Arc<AtomicBool>,
}

impl TaskQueueBackend {
    pub fn new(scheduler: Arc<GCWorkScheduler>) -> Self {
        TaskQueueBackend {
            scheduler,
            scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn submit<VM: VMBinding>(&self, core: &Arc<UpdateRemsetCore<VM>>) {
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.scheduler.add_work(ProcessCardsWork {
                core: core.clone(),
                scheduled: self.scheduled.clone(),
            });
        }
    }
}

impl<VM: VMBinding> UpdateRemsetBackend<VM> for TaskQueueBackend {
    fn create_worker(&self, core: &Arc<UpdateRemsetCore<VM>>) {
        if self.scheduler.num_workers() == 0 {
            warn!("No GC worker threads: dirty cards are only processed during pauses");
            return;
        }
        self.submit(core);
    }

    fn destroy_worker(&self) {
        // A queued work sees `StopWorker` and does not resubmit. The scheduler drops whatever
        // is still queued when it shuts down.
    }

    fn continue_process_cards(&self, core: &Arc<UpdateRemsetCore<VM>>) {
        if self.scheduler.num_workers() > 0 {
            self.submit(core);
        }
    }
}

/// One pass over the dirty cards.
struct ProcessCardsWork<VM: VMBinding> {
    core: Arc<UpdateRemsetCore<VM>>,
    scheduled: Arc<AtomicBool>,
}

impl<VM: VMBinding> ProcessCardsWork<VM> {
    fn resubmit(&self, scheduler: &GCWorkScheduler, delay: Option<Duration>) {
        let work = ProcessCardsWork {
            core: self.core.clone(),
            scheduled: self.scheduled.clone(),
        };
        match delay {
            Some(delay) => scheduler.add_work_after(work, delay),
            None => scheduler.add_work(work),
        }
    }
}

impl<VM: VMBinding> GCWork for ProcessCardsWork<VM> {
    fn do_work(&mut self, worker: &mut GCWorker) {
        if self.core.state() != UpdateRemsetState::ProcessCards {
            self.scheduled.store(false, Ordering::Release);
            // The collector may have resumed us between the check and the store; it saw
            // `scheduled` still set and did not submit.
            if self.core.state() == UpdateRemsetState::ProcessCards
                && self
                    .scheduled
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.resubmit(worker.scheduler(), None);
            }
            return;
        }
        let processed = self.core.process_all_cards();
        if processed < self.core.min_concurrent_cards_to_process() {
            self.resubmit(worker.scheduler(), Some(STARVED_WAIT));
        } else {
            self.resubmit(worker.scheduler(), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::plan::g1::update_remset::UpdateRemsetState;
    use crate::util::options::UpdateRemsetStrategy;
    use crate::util::test_util::fixtures::MutatorFixture;
    use crate::util::test_util::panic_after;
    use crate::AllocationSemantics;
    use std::time::Duration;

    #[test]
    fn task_drains_cards_on_workers() {
        panic_after(10_000, || {
            let mut f = MutatorFixture::with(16, |o| {
                o.threads = 2;
                o.concurrent_update_remset = true;
                o.update_remset_strategy = UpdateRemsetStrategy::TaskQueue;
            });
            let a = f.new_object_with(1, 0, AllocationSemantics::NonMoving);
            let b = f.new_object_with(0, 0, AllocationSemantics::Large);
            f.write(a, 0, Some(b));
            let space = f.g1.space().clone();
            while !space
                .region_of_object(b)
                .remset()
                .contains(&space, a.to_raw_address())
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            // A pause suspends the task and resumes it afterwards.
            f.g1.collect(crate::plan::g1::GCTaskCause::YoungGc);
            let core = f.g1.update_remset().core().clone();
            let before = core.processed_cards();
            f.write(a, 0, None);
            f.write(a, 0, Some(b));
            while core.processed_cards() == before {
                std::thread::sleep(Duration::from_millis(1));
            }
            drop(f);
            assert_eq!(core.state(), UpdateRemsetState::StopWorker);
        });
    }
}
