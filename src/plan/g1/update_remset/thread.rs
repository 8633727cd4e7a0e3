use super::{UpdateRemsetBackend, UpdateRemsetCore, UpdateRemsetState};
use crate::vm::VMBinding;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How long the thread sleeps when a pass found too few cards.
const STARVED_WAIT: Duration = Duration::from_millis(1);

/// Runs the worker loop on a dedicated thread.
pub(super) struct ThreadBackend {
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Wakes the thread when its state changes. Always notified with the mutex held.
    monitor: Arc<(Mutex<()>, Condvar)>,
}

impl ThreadBackend {
    pub fn new() -> Self {
        ThreadBackend {
            handle: Mutex::new(None),
            monitor: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    fn notify(&self) {
        let (lock, cvar) = &*self.monitor;
        let _guard = lock.lock().unwrap();
        cvar.notify_all();
    }

    fn run<VM: VMBinding>(core: Arc<UpdateRemsetCore<VM>>, monitor: Arc<(Mutex<()>, Condvar)>) {
        let (lock, cvar) = &*monitor;
        loop {
            match core.state() {
                UpdateRemsetState::StopWorker => break,
                UpdateRemsetState::PausedByGc | UpdateRemsetState::InvalidateRegions => {
                    let guard = lock.lock().unwrap();
                    let _guard = cvar
                        .wait_while(guard, |_| {
                            matches!(
                                core.state(),
                                UpdateRemsetState::PausedByGc
                                    | UpdateRemsetState::InvalidateRegions
                            )
                        })
                        .unwrap();
                }
                UpdateRemsetState::ProcessCards => {
                    let processed = core.process_all_cards();
                    if processed < core.min_concurrent_cards_to_process() {
                        let guard = lock.lock().unwrap();
                        if core.state() == UpdateRemsetState::ProcessCards {
                            let _ = cvar.wait_timeout(guard, STARVED_WAIT).unwrap();
                        }
                    }
                }
            }
        }
        debug!("Update remset thread exited");
    }
}

impl<VM: VMBinding> UpdateRemsetBackend<VM> for ThreadBackend {
    fn create_worker(&self, core: &Arc<UpdateRemsetCore<VM>>) {
        let mut handle = self.handle.lock().unwrap();
        assert!(handle.is_none(), "update remset thread created twice");
        let core = core.clone();
        let monitor = self.monitor.clone();
        *handle = Some(
            std::thread::Builder::new()
                .name("regiongc-update-remset".to_string())
                .spawn(move || Self::run(core, monitor))
                .unwrap_or_else(|e| panic!("failed to spawn the update remset thread: {}", e)),
        );
        debug!("Update remset thread started");
    }

    fn destroy_worker(&self) {
        self.notify();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("The update remset thread panicked");
            }
        }
    }

    fn continue_process_cards(&self, _core: &Arc<UpdateRemsetCore<VM>>) {
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use crate::plan::g1::update_remset::UpdateRemsetState;
    use crate::util::options::UpdateRemsetStrategy;
    use crate::util::test_util::fixtures::MutatorFixture;
    use crate::util::test_util::panic_after;
    use std::time::Duration;

    #[test]
    fn thread_drains_cards_and_stops() {
        panic_after(10_000, || {
            let mut f = MutatorFixture::with(16, |o| {
                o.concurrent_update_remset = true;
                o.update_remset_strategy = UpdateRemsetStrategy::Thread;
            });
            let a = f.new_object_with(1, 0, crate::AllocationSemantics::NonMoving);
            let b = f.new_object_with(0, 0, crate::AllocationSemantics::Large);
            f.write(a, 0, Some(b));
            let space = f.g1.space().clone();
            let core = f.g1.update_remset().core().clone();
            while !space
                .region_of_object(b)
                .remset()
                .contains(&space, a.to_raw_address())
            {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert!(core.processed_cards() >= 1);
            drop(f);
            assert_eq!(core.state(), UpdateRemsetState::StopWorker);
        });
    }
}
