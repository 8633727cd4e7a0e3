use super::collection_set::CollectionSet;
use super::predictor::{self, G1Analytics, G1PauseTracker, PauseSample};
use super::stats::{GCKind, GCStats};
use super::update_remset::{UpdateRemsetCore, UpdateRemsetWorker};
use crate::plan::barriers::BarrierSet;
use crate::plan::mutator_context::{MutatorRegistry, MutatorShared};
use crate::policy::region::{CardIndex, Region, RegionId, RegionSpace};
use crate::scheduler::GCWorkScheduler;
use crate::util::conversions;
use crate::util::options::Options;
use crate::util::ObjectReference;
use crate::vm::{Collection, ObjectModel, Scanning, Slot, VMBinding};
use atomic::Atomic;
use bytemuck::NoUninit;
use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

/// Why a collection was requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GCTaskCause {
    /// Eden is exhausted.
    YoungGc,
    /// Heap occupancy crossed the marking threshold. A young pause followed by concurrent marking.
    HeapUsageThreshold,
    /// Requested by the binding.
    Explicit,
    /// An allocation failed even after a young collection.
    Oom,
    /// A mixed collection was put off for lack of free regions.
    MixedRetry,
}

impl GCTaskCause {
    fn is_full(self) -> bool {
        matches!(self, GCTaskCause::Explicit | GCTaskCause::Oom)
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub enum GCPhase {
    Idle,
    InitialMark,
    ConcurrentMark,
    Remark,
    YoungCollection,
    MixedCollection,
    FullCollection,
    Cleanup,
}

/// The region-based collector: young and mixed evacuation pauses, concurrent marking of the
/// old generation and a compacting full collection as the last resort.
pub struct G1<VM: VMBinding> {
    pub(super) options: Options,
    pub(super) space: Arc<RegionSpace>,
    pub(super) barrier_set: Arc<BarrierSet>,
    pub(super) mutators: Arc<MutatorRegistry>,
    pub(super) update_remset: UpdateRemsetWorker<VM>,
    pub(super) scheduler: Arc<GCWorkScheduler>,
    /// Held for a whole collection, concurrent marking included.
    gc_lock: Mutex<()>,
    phase: Atomic<GCPhase>,
    pub(super) interrupt_concurrent: AtomicBool,
    pub(super) marking_active: AtomicBool,
    pub(super) is_mixed_gc_required: AtomicBool,
    /// Old regions worth evacuating, most garbage first. Filled at remark.
    pub(super) top_garbage_regions: Mutex<VecDeque<RegionId>>,
    pub(super) mark_stack: Mutex<Vec<ObjectReference>>,
    /// SATB buffers of mutators that terminated while marking.
    pub(super) satb_buffers: Mutex<Vec<Vec<ObjectReference>>>,
    /// Objects allocated outside eden while marking.
    pub(super) newobj_buffer: Mutex<Vec<ObjectReference>>,
    pub(super) analytics: Mutex<G1Analytics>,
    pub(super) pause_tracker: Mutex<G1PauseTracker>,
    max_pause: Duration,
    pub(super) stats: Mutex<GCStats>,
    gc_count: AtomicUsize,
    postponed: AtomicBool,
    region_garbage_rate_threshold: AtomicUsize,
    promotion_region_alive_rate: AtomicUsize,
    pub(super) single_pass_active: AtomicBool,
    /// Regions that `evacuate_starting_with` could not empty during the running evacuation.
    pub(super) evacuation_failures: Mutex<Vec<RegionId>>,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> G1<VM> {
    pub fn new(options: Options) -> std::io::Result<Arc<Self>> {
        let space = Arc::new(RegionSpace::new(&options)?);
        let barrier_set = Arc::new(BarrierSet::new(space.clone()));
        let mutators = Arc::new(MutatorRegistry::new(options.post_barrier_buffer_size));
        let scheduler = GCWorkScheduler::new(options.threads);
        let core = Arc::new(UpdateRemsetCore::new(
            space.clone(),
            barrier_set.clone(),
            mutators.clone(),
            &options,
        ));
        let update_remset =
            UpdateRemsetWorker::new(core, options.update_remset_strategy, &scheduler);

        let interval = Duration::from_millis(options.gc_pause_interval_millis);
        let mut max_pause = Duration::from_millis(options.max_gc_pause_millis);
        if max_pause > interval {
            warn!(
                "Max GC pause {:?} exceeds the pause interval {:?}, using the interval",
                max_pause, interval
            );
            max_pause = interval;
        }

        let g1 = Arc::new(G1 {
            update_remset,
            scheduler,
            gc_lock: Mutex::new(()),
            phase: Atomic::new(GCPhase::Idle),
            interrupt_concurrent: AtomicBool::new(false),
            marking_active: AtomicBool::new(false),
            is_mixed_gc_required: AtomicBool::new(false),
            top_garbage_regions: Mutex::new(VecDeque::new()),
            mark_stack: Mutex::new(vec![]),
            satb_buffers: Mutex::new(vec![]),
            newobj_buffer: Mutex::new(vec![]),
            analytics: Mutex::new(G1Analytics::new(space.region_size())),
            pause_tracker: Mutex::new(G1PauseTracker::new(interval, max_pause)),
            max_pause,
            stats: Mutex::new(GCStats::default()),
            gc_count: AtomicUsize::new(0),
            postponed: AtomicBool::new(false),
            region_garbage_rate_threshold: AtomicUsize::new(options.region_garbage_rate_threshold),
            promotion_region_alive_rate: AtomicUsize::new(options.promotion_region_alive_rate),
            single_pass_active: AtomicBool::new(false),
            evacuation_failures: Mutex::new(vec![]),
            space,
            barrier_set,
            mutators,
            options,
            _vm: PhantomData,
        });
        g1.scheduler.spawn_gc_threads();
        g1.update_remset.create_worker();
        info!(
            "Initialized a heap of {} regions of {} bytes, eden up to {} regions",
            g1.space.region_count(),
            g1.space.region_size(),
            g1.space.max_eden_length()
        );
        Ok(g1)
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn space(&self) -> &Arc<RegionSpace> {
        &self.space
    }

    pub fn barrier_set(&self) -> &Arc<BarrierSet> {
        &self.barrier_set
    }

    pub fn mutators(&self) -> &Arc<MutatorRegistry> {
        &self.mutators
    }

    pub fn update_remset(&self) -> &UpdateRemsetWorker<VM> {
        &self.update_remset
    }

    pub fn phase(&self) -> GCPhase {
        self.phase.load(Ordering::Acquire)
    }

    pub(super) fn set_phase(&self, phase: GCPhase) {
        trace!("GC phase {:?}", phase);
        self.phase.store(phase, Ordering::Release);
    }

    pub fn stats(&self) -> GCStats {
        self.stats.lock().unwrap().clone()
    }

    /// Number of finished pauses that were not marking pauses.
    pub fn gc_count(&self) -> usize {
        self.gc_count.load(Ordering::Acquire)
    }

    pub fn is_mixed_gc_required(&self) -> bool {
        self.is_mixed_gc_required.load(Ordering::Acquire)
    }

    pub fn top_garbage_regions(&self) -> Vec<RegionId> {
        self.top_garbage_regions.lock().unwrap().iter().copied().collect()
    }

    pub fn is_marking(&self) -> bool {
        self.marking_active.load(Ordering::Acquire)
    }

    pub fn is_postponed(&self) -> bool {
        self.postponed.load(Ordering::Acquire)
    }

    pub(super) fn promotion_region_alive_rate(&self) -> usize {
        self.promotion_region_alive_rate.load(Ordering::Relaxed)
    }

    pub(super) fn region_garbage_rate_threshold(&self) -> usize {
        self.region_garbage_rate_threshold.load(Ordering::Relaxed)
    }

    pub(super) fn record_pause(&self, start: Instant, end: Instant) {
        self.pause_tracker.lock().unwrap().add_pause(start, end);
    }

    // Requests

    /// Ask for a collection. Returns false if it was refused: the pause-time goal allows no pause
    /// right now, or a heap-usage triggered collection arrived while collections are postponed.
    pub fn trigger(&self, cause: GCTaskCause) -> bool {
        if self.options.enable_pause_time_goal {
            let delay = self
                .pause_tracker
                .lock()
                .unwrap()
                .min_delay_before_max_pause(Instant::now());
            if !delay.is_zero() {
                debug!("Refused {:?}: the next pause is {:?} away", cause, delay);
                return false;
            }
        }
        if cause == GCTaskCause::HeapUsageThreshold && self.is_postponed() {
            debug!("Refused {:?}: collections are postponed", cause);
            return false;
        }
        self.collect(cause);
        true
    }

    /// Run a collection now. A collection already running on another thread is waited for, and
    /// its concurrent marking, if any, is asked to stop.
    pub fn collect(&self, cause: GCTaskCause) {
        let seen = self.gc_count();
        let _guard = match self.gc_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.interrupt_concurrent_marking();
                self.gc_lock.lock().unwrap()
            }
            Err(TryLockError::Poisoned(e)) => panic!("a collection panicked: {}", e),
        };
        if cause == GCTaskCause::YoungGc && self.gc_count() != seen {
            debug!("Skip {:?}: another thread just collected", cause);
            return;
        }
        self.run_phases(cause);
    }

    /// Make the running concurrent marking, if any, give up at its next step.
    pub fn interrupt_concurrent_marking(&self) {
        self.interrupt_concurrent.store(true, Ordering::Release);
    }

    fn run_phases(&self, cause: GCTaskCause) {
        let start = Instant::now();
        self.interrupt_concurrent.store(false, Ordering::Release);
        self.space.interrupt_release_pages();
        debug!("GC {} ({:?}) start", self.gc_count(), cause);

        self.update_remset.suspend_worker_for_gc_pause();
        VM::VMCollection::stop_all_mutators();
        self.space.reset_tenured_alloc_region();

        if cause == GCTaskCause::MixedRetry
            && !self.top_garbage_regions.lock().unwrap().is_empty()
        {
            self.is_mixed_gc_required.store(true, Ordering::Release);
        }
        let kind = if cause.is_full() {
            self.full_gc();
            GCKind::Full
        } else {
            match self.run_young_or_mixed(start) {
                Some(kind) => kind,
                None => {
                    self.full_gc();
                    GCKind::Full
                }
            }
        };
        if !self.update_remset.is_concurrent() {
            self.update_remset.gc_process_cards();
        }
        self.stats.lock().unwrap().collections[kind] += 1;
        self.gc_count.fetch_add(1, Ordering::AcqRel);

        if self.options.verify_heap {
            let failures = self.verify_heap();
            assert_eq!(failures, 0, "heap verification failed after a {:?} pause", kind);
        }

        VM::VMCollection::resume_mutators();
        self.update_remset.resume_worker_after_gc_pause();
        let end = Instant::now();
        self.record_pause(start, end);
        self.set_phase(GCPhase::Idle);
        info!(
            "GC {} ({:?}, {:?}) took {:?}, occupancy {}%",
            self.gc_count(),
            kind,
            cause,
            end - start,
            self.space.occupancy()
        );

        if kind != GCKind::Full && self.should_start_concurrent_marking(cause) {
            self.run_concurrent_cycle();
        }
        if self.options.release_free_pages {
            self.space.release_free_pages();
        }
        self.set_phase(GCPhase::Idle);
    }

    fn should_start_concurrent_marking(&self, cause: GCTaskCause) -> bool {
        if !self.options.concurrent_marking || self.is_postponed() {
            return false;
        }
        cause == GCTaskCause::HeapUsageThreshold
            || (!self.is_mixed_gc_required()
                && self.space.occupancy() >= self.options.marking_occupancy_threshold)
    }

    // Young and mixed pauses

    /// Collect eden and, if a mixed collection is due, some old regions. Returns `None` if there
    /// are not enough free regions to evacuate even eden, or if the evacuation ran out of room
    /// halfway. A full collection has to follow either way.
    fn run_young_or_mixed(&self, start: Instant) -> Option<GCKind> {
        let dirty_cards = self.update_remset.drain_all_cards();
        let mut cset = self.build_collection_set();
        if cset.is_mixed() && cset.len() > self.space.free_region_count() {
            info!(
                "{} free regions are too few for a mixed collection of {}, collecting eden only",
                self.space.free_region_count(),
                cset.len()
            );
            let mut candidates = self.top_garbage_regions.lock().unwrap();
            for id in cset.tenured().iter().rev() {
                candidates.push_front(*id);
            }
            self.is_mixed_gc_required.store(true, Ordering::Release);
            let mut young = CollectionSet::new();
            for id in cset.young() {
                young.add_young(*id);
            }
            cset = young;
        }
        if cset.len() > self.space.free_region_count() {
            info!(
                "{} free regions are too few to evacuate {} eden regions",
                self.space.free_region_count(),
                cset.len()
            );
            self.barrier_set.enqueue_cards(dirty_cards);
            return None;
        }

        let kind = if cset.is_mixed() {
            GCKind::Mixed
        } else {
            GCKind::Young
        };
        self.set_phase(if cset.is_mixed() {
            GCPhase::MixedCollection
        } else {
            GCPhase::YoungCollection
        });
        debug!(
            "{:?} collection of {} eden and {} old regions, {} dirty cards",
            kind,
            cset.young().len(),
            cset.tenured().len(),
            dirty_cards.len()
        );
        cset.set_flags(&self.space);
        let young_allocated_bytes: usize = cset
            .young()
            .iter()
            .map(|id| self.space.region(*id).allocated_bytes())
            .sum();

        let outcome = if self.use_single_pass(&cset) {
            self.single_pass_evacuation(&cset, &dirty_cards)
        } else {
            self.mark_and_compact(&cset, &dirty_cards)
        };

        cset.clear_flags(&self.space);
        self.free_collection_set(&cset, &outcome.promoted);
        self.requeue_dirty_cards(&dirty_cards);
        self.space.bump_young_epoch();
        if outcome.evacuation_failed {
            warn!(
                "{:?} evacuation ran out of free regions, finishing with a full collection",
                kind
            );
            return None;
        }

        let sample = PauseSample {
            start,
            end: Instant::now(),
            young_regions: cset.young().len(),
            scanned_cards: outcome.scanned_cards,
            dirty_cards: dirty_cards.len(),
            scan_time: outcome.scan_time,
            copied_bytes: outcome.copied_bytes,
            copy_time: outcome.copy_time,
            young_allocated_bytes,
            young_survived_bytes: outcome.young_survived_bytes,
        };
        self.update_eden_length(&sample);
        Some(kind)
    }

    fn build_collection_set(&self) -> CollectionSet {
        let mut cset = CollectionSet::new();
        for id in self.space.eden_regions() {
            cset.add_young(id);
        }
        if self.is_mixed_gc_required() {
            self.add_tenured_candidates(&mut cset);
        }
        cset
    }

    fn is_collectable_tenured(region: &Region) -> bool {
        !region.is_free()
            && region.is_old()
            && !region.is_non_regular()
            && !region.has_pinned_objects()
    }

    /// Move old regions from the top-garbage list into `cset`: a fixed number of them, or as
    /// many as the pause-time goal leaves room for.
    fn add_tenured_candidates(&self, cset: &mut CollectionSet) {
        let mut candidates = self.top_garbage_regions.lock().unwrap();
        if self.options.enable_pause_time_goal {
            let analytics = self.analytics.lock().unwrap();
            let mut budget = self.max_pause.as_nanos() as f64 / 1000.0
                - analytics.predict_young_collection_time_us(cset.young().len());
            while let Some(&id) = candidates.front() {
                let region = self.space.region(id);
                if !Self::is_collectable_tenured(region) {
                    candidates.pop_front();
                    continue;
                }
                let cost = analytics.predict_old_collection_time_us(region);
                if cost > budget {
                    break;
                }
                budget -= cost;
                candidates.pop_front();
                cset.add_tenured(id);
            }
        } else {
            while cset.tenured().len() < self.options.tenured_regions_at_mixed_collection {
                let Some(id) = candidates.pop_front() else {
                    break;
                };
                if Self::is_collectable_tenured(self.space.region(id)) {
                    cset.add_tenured(id);
                }
            }
        }
        if candidates.is_empty() {
            self.is_mixed_gc_required.store(false, Ordering::Release);
        }
    }

    /// Copying on discovery needs no marking pass but cannot promote regions in place. It only
    /// pays off when few eden bytes are expected to survive.
    fn use_single_pass(&self, cset: &CollectionSet) -> bool {
        let rate = self.promotion_region_alive_rate();
        if !self.options.single_pass_compaction || rate == 0 {
            return false;
        }
        if cset
            .iter()
            .any(|id| self.space.region(id).has_pinned_objects())
        {
            return false;
        }
        let ratio = self.analytics.lock().unwrap().predict_survived_bytes_ratio();
        ratio > 0.0 && ratio * 100.0 < rate as f64
    }

    /// Free the evacuated regions of `cset`. Promoted regions stay as old regions.
    fn free_collection_set(&self, cset: &CollectionSet, promoted: &[RegionId]) {
        let freed: Vec<RegionId> = cset.iter().filter(|id| !promoted.contains(id)).collect();
        let mut stats = self.stats.lock().unwrap();
        for id in &freed {
            let region = self.space.region(*id);
            let (mut bytes, mut objects) = (0, 0);
            region.iterate_over_objects(|object| {
                if !crate::util::object_forwarding::is_forwarded(object) {
                    bytes += VM::VMObjectModel::get_current_size(object);
                    objects += 1;
                }
            });
            stats.record_freed(region.is_eden(), bytes, objects);
        }
        drop(stats);
        self.update_remset.gc_invalidate_regions(&freed);
        for id in freed {
            self.space.free_region(id);
        }
        for id in promoted {
            self.space
                .region(*id)
                .rm_flag(crate::policy::region::RegionFlags::PROMOTED);
        }
    }

    /// Hand the cards drained at the start of the pause back to the update worker. Cards of
    /// regions freed or promoted meanwhile were cleared and are dropped.
    fn requeue_dirty_cards(&self, cards: &[CardIndex]) {
        let table = self.space.card_table();
        let requeued: Vec<CardIndex> = cards
            .iter()
            .copied()
            .filter(|index| {
                let region = self.space.region_of(table.get_card_start_address(*index));
                !region.is_free() && !region.is_eden() && table.card(*index).is_marked()
            })
            .collect();
        trace!("Requeue {} of {} dirty cards", requeued.len(), cards.len());
        self.barrier_set.enqueue_cards(requeued);
    }

    fn update_eden_length(&self, sample: &PauseSample) {
        let mut analytics = self.analytics.lock().unwrap();
        analytics.update(sample);
        if self.options.enable_pause_time_goal {
            let length = predictor::calculate_desired_eden_length_by_pause_duration(
                &analytics,
                self.max_pause,
                1,
                self.space.max_eden_length(),
            );
            self.space.set_desired_eden_length(length);
        }
    }

    // Postponing

    /// Let the binding hold collections back, e.g. while starting up. Until
    /// [`postpone_gc_end`](Self::postpone_gc_end), heap-usage triggers are refused, no marking
    /// starts and every young pause promotes its eden regions in place.
    pub fn postpone_gc_start(&self) {
        self.region_garbage_rate_threshold.store(0, Ordering::Relaxed);
        self.promotion_region_alive_rate.store(0, Ordering::Relaxed);
        self.postponed.store(true, Ordering::Release);
        debug!("Collections postponed");
    }

    pub fn postpone_gc_end(&self) {
        self.region_garbage_rate_threshold
            .store(self.options.region_garbage_rate_threshold, Ordering::Relaxed);
        self.promotion_region_alive_rate
            .store(self.options.promotion_region_alive_rate, Ordering::Relaxed);
        self.postponed.store(false, Ordering::Release);
        debug!("Collections no longer postponed");
    }

    // Pinning

    /// Keep `object` where it is: its region is neither evacuated nor freed until it is unpinned.
    pub fn pin_object(&self, object: ObjectReference) {
        self.space.region_of_object(object).pin_object();
    }

    pub fn unpin_object(&self, object: ObjectReference) {
        self.space.region_of_object(object).unpin_object();
    }

    // Mutators

    /// The thread-terminate hook: keep what the mutator's barriers buffered.
    pub(crate) fn retire_mutator(&self, shared: &MutatorShared) {
        self.mutators.unregister(shared.id());
        let satb = shared.take_satb_buffer();
        if !satb.is_empty() {
            self.satb_buffers.lock().unwrap().push(satb);
        }
        let mut cards = vec![];
        shared.drain_post_buffer(&mut cards);
        self.update_remset.add_post_barrier_buffer(cards);
    }

    /// An object allocated outside eden while marking. It is marked at remark.
    pub(crate) fn record_new_object(&self, object: ObjectReference) {
        self.newobj_buffer.lock().unwrap().push(object);
    }

    // Verification

    /// Walk everything reachable from the roots and count broken invariants: references that
    /// leave the heap or point to free or dead objects, and cross-region references from outside
    /// eden that are neither remembered nor on a dirty card.
    pub fn verify_heap(&self) -> usize {
        let space = &*self.space;
        let mut failures = 0;
        let mut visited = HashSet::new();
        let mut stack = vec![];
        VM::VMScanning::scan_roots(&mut |slot: Slot| {
            if let Some(object) = slot.load() {
                stack.push(object);
            }
        });
        while let Some(object) = stack.pop() {
            if !visited.insert(object) {
                continue;
            }
            if !self.verify_object(object) {
                failures += 1;
                continue;
            }
            let tracked = !space.region_of_object(object).is_eden();
            VM::VMObjectModel::scan_object(
                object,
                &mut |src: ObjectReference, slot: Slot, _: usize, _: bool| {
                    let Some(target) = slot.load() else {
                        return;
                    };
                    stack.push(target);
                    let to = target.to_raw_address();
                    if tracked
                        && space.in_heap(to)
                        && !space.same_region(src.to_raw_address(), to)
                        && !space.region_of(to).is_free()
                        && !self.is_remembered(src, target)
                    {
                        warn!("Unremembered reference {} -> {}", src, target);
                        failures += 1;
                    }
                },
            );
        }
        debug!("Verified {} objects, {} failures", visited.len(), failures);
        failures
    }

    fn verify_object(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        if !self.space.in_heap(addr) {
            warn!("Reference {} outside the heap", object);
            return false;
        }
        let region = self.space.region_of(addr);
        if region.is_free() || region.is_in_collection_set() {
            warn!("Reference {} into {:?}", object, region);
            return false;
        }
        if !region.live_bitmap().is_marked(object) {
            warn!("Reference {} to a dead object in {:?}", object, region);
            return false;
        }
        true
    }

    fn is_remembered(&self, src: ObjectReference, target: ObjectReference) -> bool {
        let from = src.to_raw_address();
        self.space.card_table().is_marked(from)
            || self
                .space
                .region_of_object(target)
                .remset()
                .contains(&self.space, from)
    }

    /// Percentage of `region` that is live.
    pub(super) fn alive_rate(region: &Region) -> usize {
        conversions::percentage(region.live_bytes(), region.size())
    }
}

impl<VM: VMBinding> Drop for G1<VM> {
    fn drop(&mut self) {
        self.update_remset.destroy_worker();
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::region::RegionFlags;
    use crate::util::test_util::fixtures::{self, MutatorFixture};
    use crate::util::test_util::mock_vm::{self, Root};
    use crate::AllocationSemantics;

    #[test]
    fn young_collection_keeps_rooted_objects() {
        let mut f = MutatorFixture::new(16);
        let a = f.new_object(1, 8);
        let b = f.new_object(0, 8);
        f.write(a, 0, Some(b));
        let root = Root::new(Some(a));
        for _ in 0..10 {
            f.new_object(0, 64);
        }
        f.g1.collect(GCTaskCause::YoungGc);
        let a2 = root.get().unwrap();
        assert_ne!(a2, a);
        let region = f.g1.space().region_of_object(a2);
        assert!(region.is_old());
        let b2 = mock_vm::get_field(a2, 0).unwrap();
        assert!(f.g1.space().region_of_object(b2).is_old());
        assert_eq!(f.g1.space().eden_length(), 0);
        let stats = f.g1.stats();
        assert_eq!(stats.collections[GCKind::Young], 1);
        assert_eq!(stats.young_moved_objects, 2);
        assert_eq!(f.g1.gc_count(), 1);
    }

    #[test]
    fn second_collection_copies_on_discovery() {
        let mut f = MutatorFixture::new(16);
        let root = Root::new(None);
        // A first pause with almost nothing surviving teaches the predictor that eden dies young.
        root.set(Some(f.new_object(0, 8)));
        for _ in 0..100 {
            f.new_object(0, 64);
        }
        f.g1.collect(GCTaskCause::YoungGc);
        assert!(f.g1.analytics.lock().unwrap().predict_survived_bytes_ratio() < 0.5);
        let keep = f.new_object(1, 0);
        let next = f.new_object(0, 0);
        f.write(keep, 0, Some(next));
        root.set(Some(keep));
        assert!(f.g1.use_single_pass(&f.g1.build_collection_set()));
        f.g1.collect(GCTaskCause::YoungGc);
        let keep2 = root.get().unwrap();
        assert!(f.g1.space().region_of_object(keep2).is_old());
        assert!(mock_vm::get_field(keep2, 0).is_some());
    }

    #[test]
    fn pinned_eden_region_is_promoted() {
        let mut f = MutatorFixture::new(16);
        let pinned = f.new_object(0, 8);
        let root = Root::new(Some(pinned));
        f.g1.pin_object(pinned);
        f.g1.collect(GCTaskCause::YoungGc);
        assert_eq!(root.get(), Some(pinned));
        let region = f.g1.space().region_of_object(pinned);
        assert!(region.is_old());
        assert!(!region.is_promoted());
        assert!(!region.is_in_collection_set());
        f.g1.unpin_object(pinned);
    }

    #[test]
    fn cross_region_reference_is_updated_after_evacuation() {
        let mut f = MutatorFixture::new(16);
        let holder = f.new_object_with(1, 0, AllocationSemantics::NonMoving);
        let young = f.new_object(0, 16);
        f.write(holder, 0, Some(young));
        let _root = Root::new(Some(holder));
        f.g1.collect(GCTaskCause::YoungGc);
        let moved = mock_vm::get_field(holder, 0).unwrap();
        assert_ne!(moved, young);
        let space = f.g1.space();
        assert!(space
            .region_of_object(moved)
            .remset()
            .contains(space, holder.to_raw_address()));
    }

    #[test]
    fn postponed_collections_promote_everything() {
        let mut f = MutatorFixture::new(16);
        f.g1.postpone_gc_start();
        let object = f.new_object(0, 8);
        let root = Root::new(Some(object));
        f.new_object(0, 64);
        assert!(!f.g1.trigger(GCTaskCause::HeapUsageThreshold));
        f.g1.collect(GCTaskCause::YoungGc);
        assert_eq!(root.get(), Some(object));
        assert!(f.g1.space().region_of_object(object).is_old());
        assert!(!f.g1.is_marking());
        f.g1.postpone_gc_end();
        assert_eq!(f.g1.promotion_region_alive_rate(), f.g1.options().promotion_region_alive_rate);
        assert!(f.g1.trigger(GCTaskCause::YoungGc));
    }

    #[test]
    fn pause_time_goal_refuses_early_trigger() {
        let g1 = fixtures::g1_with(16, |o| {
            o.enable_pause_time_goal = true;
            o.max_gc_pause_millis = 1000;
            o.gc_pause_interval_millis = 2000;
        });
        let now = Instant::now();
        g1.record_pause(now - Duration::from_millis(900), now);
        assert!(!g1.trigger(GCTaskCause::YoungGc));
        assert_eq!(g1.gc_count(), 0);
    }

    #[test]
    fn pause_goal_is_clamped_to_interval() {
        let g1 = fixtures::g1_with(16, |o| {
            o.max_gc_pause_millis = 50;
            o.gc_pause_interval_millis = 20;
        });
        assert_eq!(g1.max_pause, Duration::from_millis(20));
    }

    #[test]
    fn verify_reports_unremembered_reference() {
        let mut f = MutatorFixture::new(16);
        let a = f.new_object_with(1, 0, AllocationSemantics::NonMoving);
        let b = f.new_object_with(0, 0, AllocationSemantics::Large);
        let _root = Root::new(Some(a));
        // A store that bypasses the post-barrier.
        mock_vm::slot(a, 0).store(b);
        assert_eq!(f.g1.verify_heap(), 1);
        f.write(a, 0, Some(b));
        assert_eq!(f.g1.verify_heap(), 0);
    }

    #[test]
    fn hot_card_cools_down_over_young_collections() {
        let mut f = MutatorFixture::with(16, |o| {
            o.concurrent_update_remset = true;
            o.hot_card_threshold = 1;
        });
        let holder = f.new_object_with(1, 0, AllocationSemantics::NonMoving);
        let _root = Root::new(Some(holder));
        let g1 = f.g1.clone();
        let table = g1.space().card_table();
        let index = table.get_card_index(holder.to_raw_address());
        let hot_cards = g1.update_remset().core().hot_cards();
        assert!(hot_cards.update_card_status(table, index));
        table.card(index).set_max_hotness();

        for _ in 0..crate::policy::region::card::MAX_HOTNESS {
            assert!(hot_cards.is_hot(index));
            f.new_object(0, 64);
            g1.collect(GCTaskCause::YoungGc);
        }
        assert!(!hot_cards.is_hot(index));
        assert!(!table.card(index).is_hot());
    }

    #[test]
    fn collection_set_flags_are_cleared() {
        let mut f = MutatorFixture::new(16);
        let _root = Root::new(Some(f.new_object(0, 8)));
        f.g1.collect(GCTaskCause::YoungGc);
        assert!(f
            .g1
            .space()
            .regions()
            .all(|r| !r.has_flag(RegionFlags::COLLECTION_SET) && !r.is_promoted()));
    }
}
