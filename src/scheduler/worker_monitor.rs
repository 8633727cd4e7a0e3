//! This module contains `WorkerMonitor`.  Its purposes include:
//!
//! -   allowing workers to park, with an optional timeout for delayed works,
//! -   letting the pause thread wait until the works of a pause are done, and
//! -   letting the scheduler wake workers when works are added or when it shuts down.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use super::worker::WorkerShouldExit;

/// A data structure for synchronizing workers with each other and with the pause thread.
pub(crate) struct WorkerMonitor {
    /// The synchronized part.
    sync: Mutex<WorkerMonitorSync>,
    /// Workers wait on this when idle.  Notified when works are added or on shutdown.
    workers_have_anything_to_do: Condvar,
    /// The pause thread waits on this until the outstanding pause works reach zero.
    pause_works_done: Condvar,
}

/// The synchronized part of `WorkerMonitor`.
struct WorkerMonitorSync {
    worker_count: usize,
    parked_workers: usize,
    should_exit: bool,
}

impl WorkerMonitor {
    pub fn new(worker_count: usize) -> Self {
        Self {
            sync: Mutex::new(WorkerMonitorSync {
                worker_count,
                parked_workers: 0,
                should_exit: false,
            }),
            workers_have_anything_to_do: Default::default(),
            pause_works_done: Default::default(),
        }
    }

    /// Wake up workers when more works are made available.
    pub fn notify_work_available(&self) {
        // Taking the lock orders this notification after any worker that has just checked for
        // work and is about to wait.
        let _sync = self.sync.lock().unwrap();
        self.workers_have_anything_to_do.notify_one();
    }

    /// Park a worker until it is notified or `timeout` elapses.
    ///
    /// `has_work` is evaluated while holding the monitor lock; if it reports work the worker does
    /// not park at all.
    ///
    /// This function returns `Ok(())` if the current worker should continue working,
    /// or `Err(WorkerShouldExit)` if the current worker should exit now.
    pub fn park_and_wait<F>(
        &self,
        ordinal: usize,
        timeout: Option<Duration>,
        has_work: F,
    ) -> Result<(), WorkerShouldExit>
    where
        F: Fn() -> bool,
    {
        let mut sync = self.sync.lock().unwrap();
        if sync.should_exit {
            return Err(WorkerShouldExit);
        }
        if has_work() {
            return Ok(());
        }
        sync.parked_workers += 1;
        debug_assert!(sync.parked_workers <= sync.worker_count);
        trace!(
            "Worker {} parked.  parked/total: {}/{}",
            ordinal,
            sync.parked_workers,
            sync.worker_count
        );
        sync = match timeout {
            Some(timeout) => {
                self.workers_have_anything_to_do
                    .wait_timeout(sync, timeout)
                    .unwrap()
                    .0
            }
            None => self.workers_have_anything_to_do.wait(sync).unwrap(),
        };
        sync.parked_workers -= 1;
        trace!("Worker {} unparked.", ordinal);
        if sync.should_exit {
            Err(WorkerShouldExit)
        } else {
            Ok(())
        }
    }

    /// Called when the last outstanding pause work finishes.
    pub fn notify_pause_works_done(&self) {
        let _sync = self.sync.lock().unwrap();
        self.pause_works_done.notify_all();
    }

    /// Block the pause thread until `done` holds, re-checking at least every `interval` so that
    /// newly added works can be picked up by the caller.
    pub fn wait_for_pause_works<F: Fn() -> bool>(&self, interval: Duration, done: F) {
        let sync = self.sync.lock().unwrap();
        if done() {
            return;
        }
        let _ = self.pause_works_done.wait_timeout(sync, interval).unwrap();
    }

    /// Tell every worker to exit.
    pub fn shutdown(&self) {
        let mut sync = self.sync.lock().unwrap();
        sync.should_exit = true;
        self.workers_have_anything_to_do.notify_all();
    }
}
