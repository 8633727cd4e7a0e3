//! Write barriers.
//!
//! Every reference store into the heap goes through [`BarrierSet::pre_barrier`], the store, and
//! [`BarrierSet::post_barrier`]. The pre-barrier keeps the snapshot of concurrent marking alive,
//! the post-barrier dirties the card of the source object so that the remembered set of the
//! target region learns about the new reference.

use super::mutator_context::MutatorShared;
use crate::policy::region::{CardIndex, RegionSpace};
use crate::util::{Address, ObjectReference};
use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex};

/// The pre-barrier entry point installed into every mutator.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum PreBarrierEntry {
    /// Marking is not running. The pre-barrier does nothing.
    Disabled,
    /// Concurrent marking is running. Overwritten references are recorded for the marker.
    StoreInBuffToMark,
}

pub struct BarrierSet {
    space: Arc<RegionSpace>,
    /// The entry point given to mutators created from now on.
    pre_barrier: Atomic<PreBarrierEntry>,
    /// Dirty cards that did not fit into a mutator's ring buffer, and cards queued by the
    /// collector itself.
    updated_refs_queue: Mutex<Vec<CardIndex>>,
}

impl BarrierSet {
    pub fn new(space: Arc<RegionSpace>) -> Self {
        BarrierSet {
            space,
            pre_barrier: Atomic::new(PreBarrierEntry::Disabled),
            updated_refs_queue: Mutex::new(vec![]),
        }
    }

    pub fn pre_barrier_entry(&self) -> PreBarrierEntry {
        self.pre_barrier.load(Ordering::Acquire)
    }

    /// Only called by the mutator registry, which installs the entry into every live mutator
    /// under the same lock.
    pub(crate) fn set_pre_barrier_entry(&self, entry: PreBarrierEntry) {
        self.pre_barrier.store(entry, Ordering::Release);
    }

    /// Called with the value a store is about to overwrite.
    #[inline(always)]
    pub fn pre_barrier(&self, mutator: &MutatorShared, old: Option<ObjectReference>) {
        if mutator.pre_barrier_entry() == PreBarrierEntry::Disabled {
            return;
        }
        if let Some(old) = old {
            mutator.push_satb(old);
        }
    }

    /// Called after `src` was made to refer to `target`.
    #[inline(always)]
    pub fn post_barrier(
        &self,
        mutator: &MutatorShared,
        src: ObjectReference,
        target: Option<ObjectReference>,
    ) {
        let Some(target) = target else {
            return;
        };
        if self
            .space
            .same_region(src.to_raw_address(), target.to_raw_address())
        {
            return;
        }
        // Order the reference store before the card load. Otherwise a card being cleaned by the
        // remembered-set worker could be read as still dirty and the store would be missed.
        fence(Ordering::SeqCst);
        if let Some(index) = self.dirty_card(src.to_raw_address()) {
            self.post_barrier_slow(mutator, index);
        }
    }

    #[cold]
    fn post_barrier_slow(&self, mutator: &MutatorShared, index: CardIndex) {
        if let Err(index) = mutator.post_buffer().push(index) {
            self.enqueue_card(index);
        }
    }

    /// Dirty the card of `addr`. Returns the card if the caller has to queue it: cards of young
    /// regions are never dirtied, a card that was already dirty is already queued, and a hot card
    /// is picked up by the hot card scan instead.
    pub fn dirty_card(&self, addr: Address) -> Option<CardIndex> {
        let table = self.space.card_table();
        let index = table.get_card_index(addr);
        let card = table.card(index);
        if card.is_young() || !card.try_mark() || card.is_hot() {
            return None;
        }
        Some(index)
    }

    /// Queue a dirty card on the shared queue.
    pub fn enqueue_card(&self, index: CardIndex) {
        self.updated_refs_queue.lock().unwrap().push(index);
    }

    pub fn enqueue_cards(&self, cards: Vec<CardIndex>) {
        if cards.is_empty() {
            return;
        }
        let mut queue = self.updated_refs_queue.lock().unwrap();
        if queue.is_empty() {
            *queue = cards;
        } else {
            queue.extend(cards);
        }
    }

    /// Take everything on the shared queue.
    pub fn take_updated_refs_queue(&self) -> Vec<CardIndex> {
        std::mem::take(&mut *self.updated_refs_queue.lock().unwrap())
    }

    pub fn updated_refs_queue_len(&self) -> usize {
        self.updated_refs_queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::mutator_context::MutatorRegistry;
    use crate::policy::region::{RegionFlags, RegionId};
    use crate::util::test_util::fixtures::small_region_space;

    fn setup(buffer: usize) -> (Arc<RegionSpace>, BarrierSet, MutatorRegistry) {
        let space = Arc::new(small_region_space(8));
        let barrier = BarrierSet::new(space.clone());
        let registry = MutatorRegistry::new(buffer);
        (space, barrier, registry)
    }

    fn obj(addr: Address) -> ObjectReference {
        ObjectReference::from_raw_address(addr)
    }

    #[test]
    fn same_region_store_is_not_recorded() {
        let (space, barrier, registry) = setup(4);
        let mutator = registry.register(&barrier);
        let r = space.region(RegionId(1));
        r.add_flag(RegionFlags::OLD);
        barrier.post_barrier(&mutator, obj(r.start()), Some(obj(r.start() + 64usize)));
        assert!(space.card_table().is_clear(r.start()));
        assert!(mutator.post_buffer().is_empty());
    }

    #[test]
    fn cross_region_store_dirties_and_queues_once() {
        let (space, barrier, registry) = setup(4);
        let mutator = registry.register(&barrier);
        let a = space.region(RegionId(1));
        let b = space.region(RegionId(2));
        barrier.post_barrier(&mutator, obj(a.start() + 16usize), Some(obj(b.start())));
        assert!(space.card_table().is_marked(a.start()));
        assert_eq!(mutator.post_buffer().len(), 1);
        // The card is dirty already.
        barrier.post_barrier(&mutator, obj(a.start() + 32usize), Some(obj(b.start())));
        assert_eq!(mutator.post_buffer().len(), 1);
        // Null stores are ignored.
        barrier.post_barrier(&mutator, obj(a.end() - 16usize), None);
        assert_eq!(mutator.post_buffer().len(), 1);
    }

    #[test]
    fn young_and_hot_cards_are_not_queued() {
        let (space, barrier, registry) = setup(4);
        let mutator = registry.register(&barrier);
        let eden = space.allocate_region(RegionFlags::EDEN).unwrap();
        let other = space.region(RegionId(6));
        barrier.post_barrier(&mutator, obj(eden.start()), Some(obj(other.start())));
        assert!(space.card_table().get_card(eden.start()).is_young());

        space.card_table().get_card(other.start()).set_hot();
        barrier.post_barrier(&mutator, obj(other.start()), Some(obj(eden.start())));
        assert!(space.card_table().is_marked(other.start()));
        assert!(mutator.post_buffer().is_empty());
    }

    #[test]
    fn full_ring_buffer_overflows_to_shared_queue() {
        let (space, barrier, registry) = setup(2);
        let mutator = registry.register(&barrier);
        let a = space.region(RegionId(1));
        let b = space.region(RegionId(2));
        for card in 0..4 {
            let src = a.start() + card * crate::util::constants::BYTES_IN_CARD;
            barrier.post_barrier(&mutator, obj(src), Some(obj(b.start())));
        }
        assert_eq!(mutator.post_buffer().len(), 2);
        assert_eq!(barrier.updated_refs_queue_len(), 2);
        assert_eq!(barrier.take_updated_refs_queue().len(), 2);
        assert_eq!(barrier.updated_refs_queue_len(), 0);
    }

    #[test]
    fn pre_barrier_follows_installed_entry() {
        let (_space, barrier, registry) = setup(2);
        let mutator = registry.register(&barrier);
        let old = obj(unsafe { Address::from_usize(0x1000) });
        barrier.pre_barrier(&mutator, Some(old));
        assert!(mutator.take_satb_buffer().is_empty());

        registry.install_pre_barrier(&barrier, PreBarrierEntry::StoreInBuffToMark);
        barrier.pre_barrier(&mutator, Some(old));
        barrier.pre_barrier(&mutator, None);
        assert_eq!(mutator.take_satb_buffer(), vec![old]);

        // Mutators bound later get the current entry.
        let late = registry.register(&barrier);
        assert_eq!(late.pre_barrier_entry(), PreBarrierEntry::StoreInBuffToMark);
        registry.install_pre_barrier(&barrier, PreBarrierEntry::Disabled);
        assert_eq!(late.pre_barrier_entry(), PreBarrierEntry::Disabled);
    }
}
