//! Marking: the stop-the-world closures used by young, mixed and full pauses, and the
//! concurrent snapshot-at-the-beginning cycle over the whole heap.
//!
//! A concurrent cycle is an initial-mark pause that snapshots the roots and installs the SATB
//! pre-barrier, a concurrent trace that can be interrupted at every step, a remark pause that
//! drains the SATB buffers and turns the marks into live bitmaps and live-byte counts, and a
//! concurrent sweep of the old regions found completely dead.

use super::global::{GCPhase, G1};
use crate::plan::barriers::PreBarrierEntry;
use crate::policy::region::{RegionId, RegionSpace};
use crate::scheduler::{GCWork, GCWorker};
use crate::util::ObjectReference;
use crate::vm::{Collection, ObjectModel, Scanning, Slot, VMBinding};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Whether a pause trace follows `target`. A restricted trace stays inside the collection set.
fn should_trace(space: &RegionSpace, target: ObjectReference, restrict_to_cset: bool) -> bool {
    let addr = target.to_raw_address();
    if !space.in_heap(addr) {
        return false;
    }
    let region = space.region_of(addr);
    !region.is_free() && (!restrict_to_cset || region.is_in_collection_set())
}

/// Mark `object` and add its size to the live bytes of its region. Returns true if it was not
/// marked yet.
pub(super) fn mark_live<VM: VMBinding>(space: &RegionSpace, object: ObjectReference) -> bool {
    let region = space.region_of_object(object);
    if !region.mark_bitmap().mark(object) {
        return false;
    }
    region.add_live_bytes(VM::VMObjectModel::get_current_size(object));
    true
}

/// Mark everything reachable from the objects on `stack`, which are marked already. Whenever
/// the stack grows past `chunk`, half of it is handed to `split`.
fn trace<VM: VMBinding, S: FnMut(Vec<ObjectReference>)>(
    space: &RegionSpace,
    stack: &mut Vec<ObjectReference>,
    restrict_to_cset: bool,
    chunk: usize,
    mut split: S,
) {
    while let Some(object) = stack.pop() {
        VM::VMObjectModel::scan_object(
            object,
            &mut |_: ObjectReference, slot: Slot, _: usize, _: bool| {
                if let Some(target) = slot.load() {
                    if should_trace(space, target, restrict_to_cset)
                        && mark_live::<VM>(space, target)
                    {
                        stack.push(target);
                    }
                }
            },
        );
        if stack.len() > chunk {
            let half = stack.split_off(stack.len() / 2);
            split(half);
        }
    }
}

/// A piece of a parallel pause trace. Holds the space rather than the collector so that a
/// worker never ends up dropping the last reference to it.
pub(super) struct MarkingWork<VM: VMBinding> {
    space: Arc<RegionSpace>,
    objects: Vec<ObjectReference>,
    restrict_to_cset: bool,
    chunk: usize,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> MarkingWork<VM> {
    fn new(
        space: Arc<RegionSpace>,
        objects: Vec<ObjectReference>,
        restrict_to_cset: bool,
        chunk: usize,
    ) -> Self {
        MarkingWork {
            space,
            objects,
            restrict_to_cset,
            chunk,
            _vm: PhantomData,
        }
    }
}

impl<VM: VMBinding> GCWork for MarkingWork<VM> {
    fn do_work(&mut self, worker: &mut GCWorker) {
        let mut stack = std::mem::take(&mut self.objects);
        let space = self.space.clone();
        let (restrict, chunk) = (self.restrict_to_cset, self.chunk);
        trace::<VM, _>(&space, &mut stack, restrict, chunk, |half| {
            worker.add_work(MarkingWork::<VM>::new(space.clone(), half, restrict, chunk))
        });
    }
}

impl<VM: VMBinding> G1<VM> {
    /// Trace from `roots`, which are marked already, during a pause.
    pub(super) fn mark_from(&self, roots: Vec<ObjectReference>, restrict_to_cset: bool) {
        if roots.is_empty() {
            return;
        }
        let chunk = self.options.marking_chunk_size;
        if self.options.parallel_marking {
            let works: Vec<Box<dyn GCWork>> = roots
                .chunks(chunk)
                .map(|objects| {
                    Box::new(MarkingWork::<VM>::new(
                        self.space.clone(),
                        objects.to_vec(),
                        restrict_to_cset,
                        chunk,
                    )) as Box<dyn GCWork>
                })
                .collect();
            self.scheduler.run_pause_works(works);
        } else {
            let mut stack = roots;
            trace::<VM, _>(&self.space, &mut stack, restrict_to_cset, usize::MAX, |_| {});
        }
    }

    /// Set the mark bit of `object`.
    pub fn mark_object(&self, object: ObjectReference) {
        self.space.region_of_object(object).mark_bitmap().mark(object);
    }

    /// Set the mark bit of `object`. Returns false if it was set already.
    pub fn mark_object_if_not_marked(&self, object: ObjectReference) -> bool {
        self.space.region_of_object(object).mark_bitmap().mark(object)
    }

    /// Whether `object` lies in a region the current pause evacuates.
    pub fn in_gc_sweep_range(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        self.space.in_heap(addr) && self.space.region_of(addr).is_in_collection_set()
    }

    pub fn mark_stack_len(&self) -> usize {
        self.mark_stack.lock().unwrap().len()
    }

    /// Push `object` if it is a heap object not marked yet.
    fn grey(&self, object: ObjectReference, stack: &mut Vec<ObjectReference>) {
        if should_trace(&self.space, object, false) && self.mark_object_if_not_marked(object) {
            stack.push(object);
        }
    }

    // The concurrent cycle

    /// Initial mark, concurrent mark, remark and sweep. Runs on the thread that ran the
    /// preceding pause, with the mutators running between the pauses.
    pub(super) fn run_concurrent_cycle(&self) {
        if self.options.enable_pause_time_goal {
            let delay = self
                .pause_tracker
                .lock()
                .unwrap()
                .min_delay_before_max_pause(Instant::now());
            if !delay.is_zero() {
                debug!("Initial mark waits {:?} for the pause goal", delay);
                std::thread::sleep(delay);
            }
        }
        self.initial_mark_pause();
        if !self.concurrent_mark() {
            self.abandon_concurrent_mark();
            self.set_phase(GCPhase::Idle);
            return;
        }
        let dead = self.remark_pause();
        self.concurrent_sweep(dead);
    }

    /// Clear the mark bitmaps, snapshot the roots and start recording overwritten references.
    pub(crate) fn initial_mark_pause(&self) {
        let start = Instant::now();
        self.update_remset.suspend_worker_for_gc_pause();
        VM::VMCollection::stop_all_mutators();
        self.set_phase(GCPhase::InitialMark);
        for region in self.space.used_regions() {
            region.mark_bitmap().clear_all();
        }
        let mut stack = vec![];
        VM::VMScanning::scan_roots(&mut |slot: Slot| {
            if let Some(object) = slot.load() {
                self.grey(object, &mut stack);
            }
        });
        debug!("Initial mark: {} roots", stack.len());
        *self.mark_stack.lock().unwrap() = stack;
        self.mutators
            .install_pre_barrier(&self.barrier_set, PreBarrierEntry::StoreInBuffToMark);
        self.marking_active.store(true, Ordering::Release);
        VM::VMCollection::resume_mutators();
        self.update_remset.resume_worker_after_gc_pause();
        self.record_pause(start, Instant::now());
        self.set_phase(GCPhase::ConcurrentMark);
    }

    /// Drain the mark stack while the mutators run. Returns false if a collection request
    /// interrupted it.
    pub(crate) fn concurrent_mark(&self) -> bool {
        self.drain_mark_stack(true)
    }

    fn drain_mark_stack(&self, interruptible: bool) -> bool {
        let mut found = vec![];
        loop {
            if interruptible && self.interrupt_concurrent.load(Ordering::Acquire) {
                debug!("Concurrent marking interrupted");
                return false;
            }
            let Some(object) = self.mark_stack.lock().unwrap().pop() else {
                return true;
            };
            VM::VMObjectModel::scan_object(
                object,
                &mut |_: ObjectReference, slot: Slot, _: usize, _: bool| {
                    if let Some(target) = slot.load() {
                        self.grey(target, &mut found);
                    }
                },
            );
            if !found.is_empty() {
                self.mark_stack.lock().unwrap().append(&mut found);
            }
        }
    }

    /// Throw away the state of an interrupted cycle. The marks left behind are cleared by the
    /// next initial mark; live bytes were not touched.
    pub(crate) fn abandon_concurrent_mark(&self) {
        self.mutators
            .install_pre_barrier(&self.barrier_set, PreBarrierEntry::Disabled);
        self.mark_stack.lock().unwrap().clear();
        self.mutators.for_each(|mutator| mutator.clear_satb_buffer());
        self.satb_buffers.lock().unwrap().clear();
        self.newobj_buffer.lock().unwrap().clear();
        self.marking_active.store(false, Ordering::Release);
    }

    /// Finish marking, make the marks the live bitmaps of the old regions and pick the regions
    /// for mixed collections. Returns the old regions with nothing live.
    pub(crate) fn remark_pause(&self) -> Vec<RegionId> {
        let start = Instant::now();
        self.update_remset.suspend_worker_for_gc_pause();
        VM::VMCollection::stop_all_mutators();
        self.set_phase(GCPhase::Remark);
        self.mutators
            .install_pre_barrier(&self.barrier_set, PreBarrierEntry::Disabled);

        let mut stack = vec![];
        let mut buffers = std::mem::take(&mut *self.satb_buffers.lock().unwrap());
        self.mutators
            .for_each(|mutator| buffers.push(mutator.take_satb_buffer()));
        buffers.push(std::mem::take(&mut *self.newobj_buffer.lock().unwrap()));
        for object in buffers.into_iter().flatten() {
            self.grey(object, &mut stack);
        }
        self.mark_stack.lock().unwrap().append(&mut stack);
        self.drain_mark_stack(false);
        self.marking_active.store(false, Ordering::Release);

        for region in self.space.used_regions().filter(|r| r.is_tenured()) {
            region.swap_mark_bitmap();
            let mut live = 0;
            region.iterate_over_objects(|object| {
                live += VM::VMObjectModel::get_current_size(object)
            });
            region.set_live_bytes(live);
        }
        self.update_remset.gc_process_cards();

        let dead: Vec<RegionId> = self
            .space
            .used_regions()
            .filter(|r| {
                r.is_tenured()
                    && r.live_bytes() == 0
                    && !r.has_pinned_objects()
                    && !self.space.is_non_movable_alloc_region(r.id())
            })
            .map(|r| r.id())
            .collect();
        let threshold = self.region_garbage_rate_threshold() * self.space.region_size() / 100;
        let candidates: std::collections::VecDeque<RegionId> = self
            .space
            .get_top_garbage_regions(threshold)
            .into_iter()
            .filter(|id| !dead.contains(id))
            .collect();
        debug!(
            "Remark: {} dead old regions, {} mixed collection candidates",
            dead.len(),
            candidates.len()
        );
        self.is_mixed_gc_required
            .store(!candidates.is_empty(), Ordering::Release);
        *self.top_garbage_regions.lock().unwrap() = candidates;

        VM::VMCollection::resume_mutators();
        self.update_remset.resume_worker_after_gc_pause();
        self.record_pause(start, Instant::now());
        self.set_phase(GCPhase::Cleanup);
        dead
    }

    /// Free the old regions remark found dead while the mutators run.
    pub(crate) fn concurrent_sweep(&self, dead: Vec<RegionId>) {
        if !dead.is_empty() {
            self.update_remset.invalidate_regions(&dead);
            let mut stats = self.stats.lock().unwrap();
            for id in &dead {
                let region = self.space.region(*id);
                // The mark bitmap holds the previous live bitmap: everything that was allocated.
                let mut objects = 0;
                region.iterate_over_marked_objects(|_| objects += 1);
                stats.record_freed(false, region.allocated_bytes(), objects);
                self.space.free_region(*id);
            }
            debug!("Swept {} old regions", dead.len());
        }
        self.set_phase(GCPhase::Idle);
    }
}
