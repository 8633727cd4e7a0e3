use std::sync::atomic::{AtomicU8, Ordering};

/// Index of a card in the card table. Stands in for a card pointer everywhere a card has to be
/// queued or remembered.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CardIndex(pub usize);

/// The two status bits of a card.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CardStatus {
    Clear = 0b00,
    Marked = 0b01,
    Processed = 0b10,
    Young = 0b11,
}

// Bit layout of a card byte:
//   bits 0..2  status
//   bit  2     hot flag
//   bits 3..6  hotness counter
const STATUS_MASK: u8 = 0b11;
const HOT_FLAG: u8 = 0b100;
const HOTNESS_SHIFT: u8 = 3;
const HOTNESS_MASK: u8 = 0b111 << HOTNESS_SHIFT;
/// The largest value the hotness counter can hold.
pub const MAX_HOTNESS: u8 = HOTNESS_MASK >> HOTNESS_SHIFT;

static_assertions::const_assert_eq!(STATUS_MASK & HOT_FLAG, 0);
static_assertions::const_assert_eq!((STATUS_MASK | HOT_FLAG) & HOTNESS_MASK, 0);

/// One byte of write-observation state for a fixed-size chunk of the heap.
///
/// Every accessor is a relaxed atomic operation. Mutators, the remembered-set worker and the
/// collector race on cards freely; the protocol built on top only needs the status bit of a
/// dirty card to be cleared by its consumer before the consumer scans the card.
#[repr(transparent)]
pub struct Card(AtomicU8);

impl Card {
    pub const fn new() -> Self {
        Card(AtomicU8::new(0))
    }

    pub fn value(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    fn update<F: Fn(u8) -> u8>(&self, f: F) -> u8 {
        // The closure always returns Some, so fetch_update cannot fail.
        match self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(f(v)))
        {
            Ok(old) | Err(old) => old,
        }
    }

    pub fn status(&self) -> CardStatus {
        match self.value() & STATUS_MASK {
            0b00 => CardStatus::Clear,
            0b01 => CardStatus::Marked,
            0b10 => CardStatus::Processed,
            _ => CardStatus::Young,
        }
    }

    fn set_status(&self, status: CardStatus) {
        self.update(|v| (v & !STATUS_MASK) | status as u8);
    }

    pub fn is_clear(&self) -> bool {
        self.status() == CardStatus::Clear
    }

    pub fn is_marked(&self) -> bool {
        self.status() == CardStatus::Marked
    }

    pub fn is_processed(&self) -> bool {
        self.status() == CardStatus::Processed
    }

    pub fn is_young(&self) -> bool {
        self.status() == CardStatus::Young
    }

    pub fn mark(&self) {
        self.set_status(CardStatus::Marked)
    }

    /// Mark the card unless it is already marked. Returns true if this call marked it.
    pub fn try_mark(&self) -> bool {
        let old = self.update(|v| {
            if v & STATUS_MASK == CardStatus::Marked as u8 {
                v
            } else {
                (v & !STATUS_MASK) | CardStatus::Marked as u8
            }
        });
        old & STATUS_MASK != CardStatus::Marked as u8
    }

    /// Reset the status to `Clear` but keep the hotness bookkeeping.
    pub fn unmark(&self) {
        self.set_status(CardStatus::Clear)
    }

    pub fn set_processed(&self) {
        self.set_status(CardStatus::Processed)
    }

    pub fn set_young(&self) {
        self.set_status(CardStatus::Young)
    }

    /// Reset the whole byte, hot state included.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed)
    }

    pub fn is_hot(&self) -> bool {
        self.value() & HOT_FLAG != 0
    }

    pub fn set_hot(&self) {
        self.0.fetch_or(HOT_FLAG, Ordering::Relaxed);
    }

    /// Drop the hot flag and zero the hotness counter.
    pub fn reset_hot(&self) {
        self.0.fetch_and(!(HOT_FLAG | HOTNESS_MASK), Ordering::Relaxed);
    }

    pub fn hotness(&self) -> u8 {
        (self.value() & HOTNESS_MASK) >> HOTNESS_SHIFT
    }

    fn with_hotness(v: u8, hotness: u8) -> u8 {
        (v & !HOTNESS_MASK) | (hotness << HOTNESS_SHIFT)
    }

    /// Saturating increment of the hotness counter. Returns the new hotness.
    pub fn inc_hotness(&self) -> u8 {
        let old = self.update(|v| {
            let h = (v & HOTNESS_MASK) >> HOTNESS_SHIFT;
            Self::with_hotness(v, (h + 1).min(MAX_HOTNESS))
        });
        (((old & HOTNESS_MASK) >> HOTNESS_SHIFT) + 1).min(MAX_HOTNESS)
    }

    /// Saturating decrement of the hotness counter. Returns the new hotness.
    pub fn dec_hotness(&self) -> u8 {
        let old = self.update(|v| {
            let h = (v & HOTNESS_MASK) >> HOTNESS_SHIFT;
            Self::with_hotness(v, h.saturating_sub(1))
        });
        ((old & HOTNESS_MASK) >> HOTNESS_SHIFT).saturating_sub(1)
    }

    pub fn set_max_hotness(&self) {
        self.update(|v| Self::with_hotness(v, MAX_HOTNESS));
    }
}

impl Default for Card {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Card {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Card({:?}, hot={}, hotness={})",
            self.status(),
            self.is_hot(),
            self.hotness()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        let card = Card::new();
        assert!(card.is_clear());
        card.mark();
        assert!(card.is_marked());
        card.set_processed();
        assert!(card.is_processed());
        card.set_young();
        assert!(card.is_young());
        card.unmark();
        assert!(card.is_clear());
        assert_eq!(card.value(), 0);
    }

    #[test]
    fn try_mark_only_once() {
        let card = Card::new();
        assert!(card.try_mark());
        assert!(!card.try_mark());
        card.unmark();
        assert!(card.try_mark());
    }

    #[test]
    fn hotness_saturates() {
        let card = Card::new();
        for expected in 1..=MAX_HOTNESS {
            assert_eq!(card.inc_hotness(), expected);
        }
        assert_eq!(card.inc_hotness(), MAX_HOTNESS);
        assert_eq!(card.hotness(), MAX_HOTNESS);
        for expected in (0..MAX_HOTNESS).rev() {
            assert_eq!(card.dec_hotness(), expected);
        }
        assert_eq!(card.dec_hotness(), 0);
    }

    #[test]
    fn status_and_hot_bits_are_independent() {
        let card = Card::new();
        card.set_hot();
        card.set_max_hotness();
        card.mark();
        assert!(card.is_hot());
        assert!(card.is_marked());
        assert_eq!(card.hotness(), MAX_HOTNESS);
        card.unmark();
        assert!(card.is_hot());
        assert_eq!(card.hotness(), MAX_HOTNESS);
        card.reset_hot();
        assert!(!card.is_hot());
        assert_eq!(card.hotness(), 0);
        card.set_hot();
        card.clear();
        assert_eq!(card.value(), 0);
    }
}
