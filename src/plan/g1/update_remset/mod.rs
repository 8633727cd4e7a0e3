//! The remembered-set update worker.
//!
//! Mutators dirty cards through the post-barrier; this worker turns dirty cards into
//! remembered-set entries. The card-draining logic lives in [`UpdateRemsetCore`] and is shared
//! by the two execution strategies: a dedicated thread ([`thread`]) and a self-resubmitting work
//! on the GC scheduler ([`task_queue`]).

mod task_queue;
mod thread;

use crate::plan::barriers::BarrierSet;
use crate::plan::mutator_context::MutatorRegistry;
use crate::policy::region::{CardIndex, HotCards, RegionId, RegionSpace, RemSet};
use crate::scheduler::GCWorkScheduler;
use crate::util::options::{Options, UpdateRemsetStrategy};
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, Slot, VMBinding};
use atomic::Atomic;
use bytemuck::NoUninit;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the worker is allowed to do right now.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum UpdateRemsetState {
    /// Steady state: dirty cards are drained as they come.
    ProcessCards,
    /// A pause is running. The worker must not touch cards or remembered sets.
    PausedByGc,
    /// The collector is freeing regions and tearing down their remembered sets.
    InvalidateRegions,
    /// Terminal.
    StopWorker,
}

/// An execution strategy for the worker. Both strategies call into the same core.
pub(crate) trait UpdateRemsetBackend<VM: VMBinding>: Send + Sync {
    fn create_worker(&self, core: &Arc<UpdateRemsetCore<VM>>);

    /// Stop the worker. The core state is `StopWorker` when this is called.
    fn destroy_worker(&self);

    /// The core went back to `ProcessCards` and the worker should pick up where it stopped.
    fn continue_process_cards(&self, core: &Arc<UpdateRemsetCore<VM>>);
}

/// State and card-draining logic shared by both strategies.
pub struct UpdateRemsetCore<VM: VMBinding> {
    space: Arc<RegionSpace>,
    barrier_set: Arc<BarrierSet>,
    mutators: Arc<MutatorRegistry>,
    hot_cards: HotCards,
    /// Cards taken off the queues and not processed yet.
    cards: Mutex<HashSet<CardIndex>>,
    /// Post-barrier buffers of terminated mutators.
    post_barrier_buffers: Mutex<Vec<Vec<CardIndex>>>,
    state: Atomic<UpdateRemsetState>,
    /// Held while cards are processed or regions are invalidated.
    update_remset_lock: Mutex<()>,
    update_concurrent: AtomicBool,
    min_concurrent_cards_to_process: usize,
    hot_cards_processing_frequency: usize,
    iteration: AtomicUsize,
    processed_cards: AtomicUsize,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> UpdateRemsetCore<VM> {
    pub fn new(
        space: Arc<RegionSpace>,
        barrier_set: Arc<BarrierSet>,
        mutators: Arc<MutatorRegistry>,
        options: &Options,
    ) -> Self {
        UpdateRemsetCore {
            space,
            barrier_set,
            mutators,
            hot_cards: HotCards::new(options.hot_card_threshold),
            cards: Mutex::new(HashSet::new()),
            post_barrier_buffers: Mutex::new(vec![]),
            state: Atomic::new(UpdateRemsetState::ProcessCards),
            update_remset_lock: Mutex::new(()),
            update_concurrent: AtomicBool::new(options.concurrent_update_remset),
            min_concurrent_cards_to_process: options.min_concurrent_cards_to_process,
            hot_cards_processing_frequency: options.hot_cards_processing_frequency,
            iteration: AtomicUsize::new(0),
            processed_cards: AtomicUsize::new(0),
            _vm: PhantomData,
        }
    }

    pub fn state(&self) -> UpdateRemsetState {
        self.state.load(Ordering::Acquire)
    }

    fn set_state(&self, state: UpdateRemsetState) {
        self.state.store(state, Ordering::Release);
    }

    fn transition(&self, from: UpdateRemsetState, to: UpdateRemsetState) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_concurrent(&self) -> bool {
        self.update_concurrent.load(Ordering::Acquire)
    }

    pub(crate) fn min_concurrent_cards_to_process(&self) -> usize {
        self.min_concurrent_cards_to_process
    }

    pub fn hot_cards(&self) -> &HotCards {
        &self.hot_cards
    }

    /// Total number of cards turned into remembered-set entries so far.
    pub fn processed_cards(&self) -> usize {
        self.processed_cards.load(Ordering::Relaxed)
    }

    /// Number of cards taken off the queues and waiting.
    pub fn pending_cards(&self) -> usize {
        self.cards.lock().unwrap().len()
    }

    /// Move the shared queue, every mutator's ring buffer and the buffers of terminated
    /// mutators into `out`.
    fn fill_from_queues(&self, out: &mut HashSet<CardIndex>) {
        out.extend(self.barrier_set.take_updated_refs_queue());
        self.mutators.for_each(|mutator| mutator.drain_post_buffer(out));
        for buffer in std::mem::take(&mut *self.post_barrier_buffers.lock().unwrap()) {
            out.extend(buffer);
        }
    }

    fn take_pending_cards(&self) -> HashSet<CardIndex> {
        let mut cards = self.cards.lock().unwrap();
        self.fill_from_queues(&mut cards);
        std::mem::take(&mut *cards)
    }

    fn return_pending_cards<I: IntoIterator<Item = CardIndex>>(&self, cards: I) {
        self.cards.lock().unwrap().extend(cards);
    }

    /// Record every cross-region reference held by the live objects starting in the card.
    fn process_card(&self, index: CardIndex) {
        let table = self.space.card_table();
        let card = table.card(index);
        let range = table.get_memory_range(index);
        let region = self.space.region_of(range.start);
        // The region was freed, or freed and reused as eden, after the card was queued.
        if region.is_free() || region.is_eden() || card.is_young() {
            return;
        }
        card.unmark();
        // Clear before scan: a store racing with the scan either is seen by it or dirties the
        // card again.
        fence(Ordering::SeqCst);
        let space = &*self.space;
        region.iterate_live_in_range(range, |object| {
            <VM as VMBinding>::VMObjectModel::scan_object(
                object,
                &mut |src: ObjectReference, slot: Slot, offset: usize, _: bool| {
                    record_cross_region_ref(space, src, slot, offset);
                },
            );
        });
        self.processed_cards.fetch_add(1, Ordering::Relaxed);
    }

    /// Drain the queues and process the cards that are not hot. Stops early if the state
    /// leaves `ProcessCards`; unprocessed cards stay pending.
    fn process_common_cards(&self) -> usize {
        let table = self.space.card_table();
        let cards: Vec<CardIndex> = self
            .take_pending_cards()
            .into_iter()
            .filter(|index| !self.hot_cards.update_card_status(table, *index))
            .collect();
        fence(Ordering::SeqCst);
        let mut processed = 0;
        let mut iter = cards.into_iter();
        while let Some(index) = iter.next() {
            if self.state() != UpdateRemsetState::ProcessCards {
                self.return_pending_cards(std::iter::once(index).chain(iter));
                break;
            }
            self.process_card(index);
            processed += 1;
        }
        processed
    }

    fn process_hot_cards(&self) -> usize {
        self.hot_cards.update_cards_status(self.space.card_table());
        let mut processed = 0;
        self.hot_cards.handle_cards(|index| {
            if self.state() != UpdateRemsetState::ProcessCards {
                return false;
            }
            self.process_card(index);
            processed += 1;
            true
        });
        processed
    }

    /// One pass of the concurrent worker. Returns the number of cards processed.
    pub fn process_all_cards(&self) -> usize {
        let _guard = self.update_remset_lock.lock().unwrap();
        if self.state() != UpdateRemsetState::ProcessCards {
            return 0;
        }
        let mut processed = self.process_common_cards();
        let iteration = self.iteration.fetch_add(1, Ordering::Relaxed) + 1;
        if iteration % self.hot_cards_processing_frequency == 0 {
            processed += self.process_hot_cards();
        }
        if processed > 0 {
            trace!("Update remset processed {} cards", processed);
        }
        processed
    }

    /// Process every pending card, hot ones included. Pause only.
    pub fn gc_process_cards(&self) {
        let _guard = self.update_remset_lock.lock().unwrap();
        let mut cards = self.take_pending_cards();
        let table = self.space.card_table();
        self.hot_cards.drain_marked_cards(table, &mut cards);
        let count = cards.len();
        for index in cards {
            self.process_card(index);
        }
        debug!("Processed {} cards in the pause", count);
    }

    /// Take every pending card, hot ones included, without processing them. The cards stay
    /// marked in the card table. Hot cards that stayed clean since the last pause cool down.
    /// Called once at the start of every young, mixed and full pause.
    pub fn drain_all_cards(&self) -> Vec<CardIndex> {
        let _guard = self.update_remset_lock.lock().unwrap();
        let mut cards = self.take_pending_cards();
        let table = self.space.card_table();
        self.hot_cards.drain_marked_cards(table, &mut cards);
        self.hot_cards.decrement_hot_value(table);
        let mut cards: Vec<CardIndex> = cards.into_iter().collect();
        cards.sort();
        cards
    }

    /// Forget every pending card of `regions` and invalidate their remembered sets. The caller
    /// holds the update-remset lock.
    fn invalidate_regions_locked(&self, regions: &[RegionId]) {
        let table = self.space.card_table();
        let mut cards = self.cards.lock().unwrap();
        self.fill_from_queues(&mut cards);
        let ranges: Vec<_> = regions
            .iter()
            .map(|id| {
                let region = self.space.region(*id);
                (table.get_card_index(region.start()), table.get_card_index(region.end() - 1usize))
            })
            .collect();
        cards.retain(|index| !ranges.iter().any(|(first, last)| index >= first && index <= last));
        drop(cards);
        for id in regions {
            let region = self.space.region(*id);
            self.hot_cards.forget_range(table, region.start(), region.end());
            RemSet::invalidate_region(&self.space, *id);
        }
    }

    /// Take over the post-barrier buffer of a terminated mutator.
    pub fn add_post_barrier_buffer(&self, buffer: Vec<CardIndex>) {
        if !buffer.is_empty() {
            self.post_barrier_buffers.lock().unwrap().push(buffer);
        }
    }
}

/// Record `src.slot -> target` in the remembered set of the target's region if it crosses
/// regions.
pub(crate) fn record_cross_region_ref(
    space: &RegionSpace,
    src: ObjectReference,
    slot: Slot,
    offset: usize,
) {
    let Some(target) = slot.load() else {
        return;
    };
    let to = target.to_raw_address();
    if !space.in_heap(to) || space.same_region(src.to_raw_address(), to) {
        return;
    }
    if space.region_of(to).is_free() {
        return;
    }
    RemSet::add_ref_with_addr(space, src, offset, target);
}

/// The worker as the collector sees it: the shared core plus the selected strategy.
pub struct UpdateRemsetWorker<VM: VMBinding> {
    core: Arc<UpdateRemsetCore<VM>>,
    backend: Box<dyn UpdateRemsetBackend<VM>>,
}

impl<VM: VMBinding> UpdateRemsetWorker<VM> {
    pub fn new(
        core: Arc<UpdateRemsetCore<VM>>,
        strategy: UpdateRemsetStrategy,
        scheduler: &Arc<GCWorkScheduler>,
    ) -> Self {
        let backend: Box<dyn UpdateRemsetBackend<VM>> = match strategy {
            UpdateRemsetStrategy::Thread => Box::new(thread::ThreadBackend::new()),
            UpdateRemsetStrategy::TaskQueue => {
                Box::new(task_queue::TaskQueueBackend::new(scheduler.clone()))
            }
        };
        debug!("Update remset worker strategy: {:?}", strategy);
        UpdateRemsetWorker { core, backend }
    }

    pub fn core(&self) -> &Arc<UpdateRemsetCore<VM>> {
        &self.core
    }

    pub fn is_concurrent(&self) -> bool {
        self.core.is_concurrent()
    }

    /// Start the background strategy. Does nothing if the update is not concurrent.
    pub fn create_worker(&self) {
        if self.core.is_concurrent() {
            self.backend.create_worker(&self.core);
        }
    }

    pub fn destroy_worker(&self) {
        if !self.core.is_concurrent() {
            self.core.set_state(UpdateRemsetState::StopWorker);
            return;
        }
        {
            let _guard = self.core.update_remset_lock.lock().unwrap();
            self.core.set_state(UpdateRemsetState::StopWorker);
        }
        self.backend.destroy_worker();
    }

    /// Stop the background processing before a pause and wait for the current pass to end.
    pub fn suspend_worker_for_gc_pause(&self) {
        if !self.core.is_concurrent() {
            return;
        }
        let suspended = self
            .core
            .transition(UpdateRemsetState::ProcessCards, UpdateRemsetState::PausedByGc);
        debug_assert!(suspended, "update remset worker in {:?}", self.core.state());
        // The running pass, if any, sees the state and returns the lock soon.
        drop(self.core.update_remset_lock.lock().unwrap());
    }

    pub fn resume_worker_after_gc_pause(&self) {
        if !self.core.is_concurrent() {
            return;
        }
        if self
            .core
            .transition(UpdateRemsetState::PausedByGc, UpdateRemsetState::ProcessCards)
        {
            self.backend.continue_process_cards(&self.core);
        }
    }

    /// Invalidate the remembered sets of regions about to be freed while mutators run.
    pub fn invalidate_regions(&self, regions: &[RegionId]) {
        if !self.core.is_concurrent() {
            let _guard = self.core.update_remset_lock.lock().unwrap();
            self.core.invalidate_regions_locked(regions);
            return;
        }
        let interrupted = self
            .core
            .transition(UpdateRemsetState::ProcessCards, UpdateRemsetState::InvalidateRegions);
        {
            let _guard = self.core.update_remset_lock.lock().unwrap();
            self.core.invalidate_regions_locked(regions);
        }
        if interrupted
            && self.core.transition(
                UpdateRemsetState::InvalidateRegions,
                UpdateRemsetState::ProcessCards,
            )
        {
            self.backend.continue_process_cards(&self.core);
        }
    }

    /// Invalidate the remembered sets of regions during a pause.
    pub fn gc_invalidate_regions(&self, regions: &[RegionId]) {
        let _guard = self.core.update_remset_lock.lock().unwrap();
        self.core.invalidate_regions_locked(regions);
    }

    pub fn gc_process_cards(&self) {
        self.core.gc_process_cards();
    }

    pub fn drain_all_cards(&self) -> Vec<CardIndex> {
        self.core.drain_all_cards()
    }

    pub fn add_post_barrier_buffer(&self, buffer: Vec<CardIndex>) {
        self.core.add_post_barrier_buffer(buffer);
    }
}
