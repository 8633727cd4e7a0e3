use super::card::CardIndex;
use super::cardtable::CardTable;
use crate::util::Address;
use std::collections::{BTreeSet, HashSet};

/// Cards that are dirtied so often that they are kept out of the barrier queues.
///
/// A card's hotness counter is bumped every time the update-remset worker sees it come through
/// the barrier path. Once the counter reaches the threshold, the card is flagged hot: the
/// post-barrier still marks it but no longer enqueues it, and the worker picks it up from here
/// instead. Hot cards that stay clean cool down and eventually return to normal processing.
pub struct HotCards {
    threshold: u8,
    sets: spin::Mutex<HotCardSets>,
}

#[derive(Default)]
struct HotCardSets {
    hot: HashSet<CardIndex>,
    /// Hot cards found dirty and waiting for the handler.
    unprocessed: BTreeSet<CardIndex>,
}

impl HotCards {
    pub fn new(threshold: u8) -> Self {
        assert!(threshold > 0 && threshold <= super::card::MAX_HOTNESS);
        HotCards {
            threshold,
            sets: spin::Mutex::new(HotCardSets::default()),
        }
    }

    /// Account one more dirtying of `index`. Returns true if the card is hot, in which case the
    /// caller must not handle it through the common path.
    pub fn update_card_status(&self, table: &CardTable, index: CardIndex) -> bool {
        let card = table.card(index);
        if card.is_hot() {
            return true;
        }
        if card.inc_hotness() < self.threshold {
            return false;
        }
        card.set_hot();
        trace!("Card {:?} became hot", index);
        self.sets.lock().hot.insert(index);
        true
    }

    /// Queue every dirty hot card for processing and pin its hotness at the maximum.
    pub fn update_cards_status(&self, table: &CardTable) {
        let mut sets = self.sets.lock();
        let HotCardSets { hot, unprocessed } = &mut *sets;
        for index in hot.iter() {
            let card = table.card(*index);
            if card.is_marked() {
                card.set_max_hotness();
                unprocessed.insert(*index);
            }
        }
    }

    /// Age every hot card that was not dirtied again. Cards whose hotness drops to zero leave
    /// the hot set and lose their hot flag.
    pub fn decrement_hot_value(&self, table: &CardTable) {
        let mut sets = self.sets.lock();
        let HotCardSets { hot, unprocessed } = &mut *sets;
        hot.retain(|index| {
            let card = table.card(*index);
            if card.is_marked() || unprocessed.contains(index) {
                return true;
            }
            if card.dec_hotness() == 0 {
                card.reset_hot();
                trace!("Card {:?} cooled down", index);
                false
            } else {
                true
            }
        });
    }

    /// Pass the queued hot cards to `handler` in card order. Stops at the first card the handler
    /// rejects; that card and the ones after it stay queued. Returns true if the queue was drained.
    pub fn handle_cards<F: FnMut(CardIndex) -> bool>(&self, mut handler: F) -> bool {
        let pending = std::mem::take(&mut self.sets.lock().unprocessed);
        let mut iter = pending.into_iter();
        while let Some(index) = iter.next() {
            if !handler(index) {
                let mut sets = self.sets.lock();
                sets.unprocessed.insert(index);
                sets.unprocessed.extend(iter);
                return false;
            }
        }
        true
    }

    /// Move every dirty hot card, queued or not, into `out`. Used during a pause, when the
    /// cards are processed together with the common ones.
    pub fn drain_marked_cards(&self, table: &CardTable, out: &mut HashSet<CardIndex>) {
        let mut sets = self.sets.lock();
        let HotCardSets { hot, unprocessed } = &mut *sets;
        out.extend(std::mem::take(unprocessed));
        out.extend(hot.iter().copied().filter(|i| table.card(*i).is_marked()));
    }

    /// Forget all hot cards and clear their hot state in the table.
    pub fn clear_hot_cards(&self, table: &CardTable) {
        let mut sets = self.sets.lock();
        for index in sets.hot.drain() {
            table.card(index).reset_hot();
        }
        sets.unprocessed.clear();
    }

    /// Drop hot cards covering `[start, end)`, e.g. because the memory was freed.
    pub fn forget_range(&self, table: &CardTable, start: Address, end: Address) {
        let first = table.get_card_index(start);
        let last = table.get_card_index(end - 1usize);
        let mut sets = self.sets.lock();
        sets.hot.retain(|i| *i < first || *i > last);
        sets.unprocessed.retain(|i| *i < first || *i > last);
    }

    pub fn is_hot(&self, index: CardIndex) -> bool {
        self.sets.lock().hot.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.sets.lock().hot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
