use super::work::GCWork;
use super::worker::GCWorker;
use super::worker_monitor::WorkerMonitor;
use crossbeam::deque::{Injector, Steal};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the pause thread re-checks the queue while waiting for pause works.
const PAUSE_WAIT_INTERVAL: Duration = Duration::from_millis(1);

/// A queued work plus whether it belongs to the current pause.
pub(crate) struct Queued {
    work: Box<dyn GCWork>,
    pause_work: bool,
}

/// Executes `GCWork`s on a pool of worker threads.
///
/// Pause works are counted: the pause thread blocks in `wait_for_pause_works` until every pause
/// work, including the ones added by other pause works, has finished. Background works (such as
/// the task-queue remembered-set update) are not counted and are never run by the pause thread.
pub struct GCWorkScheduler {
    pause_queue: Injector<Queued>,
    background_queue: Injector<Queued>,
    /// Works that become runnable at a deadline.
    delayed: Mutex<Vec<(Instant, Box<dyn GCWork>)>>,
    pending_pause_works: AtomicUsize,
    pub(crate) worker_monitor: WorkerMonitor,
    num_workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GCWorkScheduler {
    pub fn new(num_workers: usize) -> Arc<Self> {
        Arc::new(Self {
            pause_queue: Injector::new(),
            background_queue: Injector::new(),
            delayed: Mutex::new(vec![]),
            pending_pause_works: AtomicUsize::new(0),
            worker_monitor: WorkerMonitor::new(num_workers),
            num_workers,
            handles: Mutex::new(vec![]),
        })
    }

    /// Spawn the worker threads.
    pub fn spawn_gc_threads(self: &Arc<Self>) {
        let mut handles = self.handles.lock().unwrap();
        assert!(handles.is_empty(), "GC workers spawned twice");
        for ordinal in 0..self.num_workers {
            let scheduler = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("regiongc-worker-{}", ordinal))
                .spawn(move || {
                    let mut worker = GCWorker::new(ordinal, scheduler, false);
                    worker.run();
                })
                .unwrap_or_else(|e| panic!("failed to spawn GC worker {}: {}", ordinal, e));
            handles.push(handle);
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn steal(queue: &Injector<Queued>) -> Option<Queued> {
        std::iter::repeat_with(|| queue.steal())
            .find(|s| !s.is_retry())
            .and_then(Steal::success)
    }

    pub(crate) fn poll(&self) -> Option<Queued> {
        Self::steal(&self.pause_queue).or_else(|| Self::steal(&self.background_queue))
    }

    pub(crate) fn has_ready_work(&self) -> bool {
        !self.pause_queue.is_empty() || !self.background_queue.is_empty()
    }

    pub(crate) fn execute(&self, queued: Queued, worker: &mut GCWorker) {
        let Queued {
            mut work,
            pause_work,
        } = queued;
        trace!("Worker {} runs {}", worker.ordinal, work.name());
        work.do_work(worker);
        // Whatever the work holds is released before the pause thread may move on.
        drop(work);
        if pause_work && self.pending_pause_works.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.worker_monitor.notify_pause_works_done();
        }
    }

    /// Add a work of the current pause.
    pub fn add_pause_work(&self, work: impl GCWork) {
        self.add_pause_work_boxed(Box::new(work));
    }

    pub fn add_pause_work_boxed(&self, work: Box<dyn GCWork>) {
        self.pending_pause_works.fetch_add(1, Ordering::AcqRel);
        self.pause_queue.push(Queued {
            work,
            pause_work: true,
        });
        if self.num_workers > 0 {
            self.worker_monitor.notify_work_available();
        }
    }

    /// Add a background work. It only ever runs on the worker threads.
    pub fn add_work(&self, work: impl GCWork) {
        self.add_work_boxed(Box::new(work));
    }

    pub fn add_work_boxed(&self, work: Box<dyn GCWork>) {
        self.background_queue.push(Queued {
            work,
            pause_work: false,
        });
        if self.num_workers > 0 {
            self.worker_monitor.notify_work_available();
        }
    }

    /// Add a background work that becomes runnable after `delay`.
    pub fn add_work_after(&self, work: impl GCWork, delay: Duration) {
        self.delayed
            .lock()
            .unwrap()
            .push((Instant::now() + delay, Box::new(work)));
        if self.num_workers > 0 {
            self.worker_monitor.notify_work_available();
        }
    }

    /// Move the delayed works whose deadline has passed to the background queue.
    pub(crate) fn schedule_due_works(&self) {
        let now = Instant::now();
        let due: Vec<Box<dyn GCWork>> = {
            let mut delayed = self.delayed.lock().unwrap();
            if delayed.is_empty() {
                return;
            }
            let (due, waiting): (Vec<_>, Vec<_>) =
                delayed.drain(..).partition(|(deadline, _)| *deadline <= now);
            *delayed = waiting;
            due.into_iter().map(|(_, work)| work).collect()
        };
        for work in due {
            self.background_queue.push(Queued {
                work,
                pause_work: false,
            });
        }
    }

    pub(crate) fn time_to_next_delayed_work(&self) -> Option<Duration> {
        let now = Instant::now();
        self.delayed
            .lock()
            .unwrap()
            .iter()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
            .min()
    }

    pub fn pending_pause_works(&self) -> usize {
        self.pending_pause_works.load(Ordering::Acquire)
    }

    /// Run pause works on the calling thread until all of them, including works added while
    /// waiting, are finished. Works that other workers are executing are waited for.
    pub fn wait_for_pause_works(self: &Arc<Self>) {
        let mut worker = GCWorker::new(self.num_workers, self.clone(), true);
        loop {
            while let Some(queued) = Self::steal(&self.pause_queue) {
                self.execute(queued, &mut worker);
            }
            if self.pending_pause_works() == 0 {
                break;
            }
            self.worker_monitor
                .wait_for_pause_works(PAUSE_WAIT_INTERVAL, || {
                    self.pending_pause_works() == 0 || !self.pause_queue.is_empty()
                });
        }
    }

    /// Run `works` as pause works and wait for them and everything they spawn.
    pub fn run_pause_works(self: &Arc<Self>, works: Vec<Box<dyn GCWork>>) {
        for work in works {
            self.add_pause_work_boxed(work);
        }
        self.wait_for_pause_works();
    }

    /// Stop and join the worker threads. Queued background works are dropped.
    pub fn shutdown(&self) {
        self.worker_monitor.shutdown();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            if handle.join().is_err() {
                warn!("A GC worker panicked");
            }
        }
        while Self::steal(&self.background_queue).is_some() {}
        self.delayed.lock().unwrap().clear();
    }
}
