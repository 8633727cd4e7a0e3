use super::card::*;
use crate::util::constants::*;
use crate::util::Address;
use std::ops::{BitOr, Range};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which cards `CardTable::visit_marked` reports, and whether it tags them.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CardVisitFlags(u8);

impl CardVisitFlags {
    pub const VISIT_MARKED: Self = CardVisitFlags(0b001);
    pub const VISIT_PROCESSED: Self = CardVisitFlags(0b010);
    /// Tag every visited card as `Processed` before calling the visitor.
    pub const SET_PROCESSED: Self = CardVisitFlags(0b100);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CardVisitFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        CardVisitFlags(self.0 | rhs.0)
    }
}

/// Below this many cards `fill_ranges` stops bisecting and scans linearly.
const MIN_BISECT_CARDS: usize = 32;

/// One card per `BYTES_IN_CARD` bytes of `[min_address, min_address + size)`.
///
/// The cards are stored in word-sized chunks so that visiting can skip eight (or four) clean
/// cards with a single load.
pub struct CardTable {
    min_address: Address,
    size: usize,
    cards_count: usize,
    storage: Box<[AtomicUsize]>,
}

impl CardTable {
    /// Create an uninitialized table. `initialize` must be called before use.
    pub fn new(min_address: Address, size: usize) -> Self {
        assert!(
            min_address.is_aligned_to(BYTES_IN_CARD),
            "card table base {} is not card aligned",
            min_address
        );
        CardTable {
            min_address,
            size,
            cards_count: size.div_ceil(BYTES_IN_CARD),
            storage: Box::new([]),
        }
    }

    /// Allocate the cards, all clear.
    pub fn initialize(&mut self) {
        assert!(self.storage.is_empty(), "card table initialized twice");
        let words = self.cards_count.div_ceil(BYTES_IN_WORD);
        self.storage = (0..words).map(|_| AtomicUsize::new(0)).collect();
        debug!(
            "Card table covers [{}, {}) with {} cards",
            self.min_address,
            self.min_address + self.size,
            self.cards_count
        );
    }

    fn cards(&self) -> &[Card] {
        debug_assert!(!self.storage.is_empty(), "card table is not initialized");
        // `Card` is a transparent AtomicU8, and the storage holds at least `cards_count` bytes.
        unsafe {
            std::slice::from_raw_parts(self.storage.as_ptr() as *const Card, self.cards_count)
        }
    }

    pub fn min_address(&self) -> Address {
        self.min_address
    }

    pub fn cards_count(&self) -> usize {
        self.cards_count
    }

    pub fn covers(&self, addr: Address) -> bool {
        addr >= self.min_address && addr < self.min_address + self.size
    }

    pub fn get_card_index(&self, addr: Address) -> CardIndex {
        assert!(
            self.covers(addr),
            "{} is outside of the card table [{}, {})",
            addr,
            self.min_address,
            self.min_address + self.size
        );
        CardIndex((addr - self.min_address) >> LOG_BYTES_IN_CARD)
    }

    pub fn card(&self, index: CardIndex) -> &Card {
        &self.cards()[index.0]
    }

    pub fn get_card(&self, addr: Address) -> &Card {
        self.card(self.get_card_index(addr))
    }

    pub fn get_card_start_address(&self, index: CardIndex) -> Address {
        self.min_address + (index.0 << LOG_BYTES_IN_CARD)
    }

    /// The last byte covered by the card (inclusive).
    pub fn get_card_end_address(&self, index: CardIndex) -> Address {
        self.get_card_start_address(index) + (BYTES_IN_CARD - 1)
    }

    /// The memory covered by the card as a half-open range.
    pub fn get_memory_range(&self, index: CardIndex) -> Range<Address> {
        let start = self.get_card_start_address(index);
        start..start + BYTES_IN_CARD
    }

    pub fn mark_card(&self, addr: Address) {
        self.get_card(addr).mark()
    }

    pub fn clear_card(&self, addr: Address) {
        self.get_card(addr).clear()
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        self.get_card(addr).is_marked()
    }

    pub fn is_clear(&self, addr: Address) -> bool {
        self.get_card(addr).is_clear()
    }

    /// Reset every card in the table.
    pub fn clear_all(&self) {
        for word in self.storage.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    fn card_span(&self, begin: Address, end: Address) -> Range<usize> {
        if begin >= end {
            return 0..0;
        }
        let first = self.get_card_index(begin).0;
        let last = self.get_card_index(end - 1usize).0;
        first..last + 1
    }

    /// Reset the cards covering `[begin, end)`.
    pub fn clear_card_range(&self, begin: Address, end: Address) {
        for index in self.card_span(begin, end) {
            self.cards()[index].clear();
        }
    }

    /// Tag the cards covering `[begin, end)` as young. Stores into young regions are not tracked.
    pub fn mark_cards_as_young(&self, begin: Address, end: Address) {
        for index in self.card_span(begin, end) {
            self.cards()[index].set_young();
        }
    }

    /// Visit the memory range of every card selected by `flags`.
    ///
    /// Whole words of clear cards are skipped with a single load before individual cards are
    /// inspected.
    pub fn visit_marked<F: FnMut(Range<Address>)>(&self, mut visitor: F, flags: CardVisitFlags) {
        let visit_marked = flags.contains(CardVisitFlags::VISIT_MARKED);
        let visit_processed = flags.contains(CardVisitFlags::VISIT_PROCESSED);
        let set_processed = flags.contains(CardVisitFlags::SET_PROCESSED);
        let cards = self.cards();
        for (word_index, word) in self.storage.iter().enumerate() {
            if word.load(Ordering::Relaxed) == 0 {
                continue;
            }
            let first = word_index * BYTES_IN_WORD;
            let last = (first + BYTES_IN_WORD).min(self.cards_count);
            for index in first..last {
                let card = &cards[index];
                if (visit_marked && card.is_marked()) || (visit_processed && card.is_processed())
                {
                    if set_processed {
                        card.set_processed();
                    }
                    visitor(self.get_memory_range(CardIndex(index)));
                }
            }
        }
    }

    /// Visit marked cards, coalescing runs of adjacent marked cards into one range each.
    pub fn visit_marked_compact<F: FnMut(Range<Address>)>(&self, mut visitor: F) {
        let mut ranges = vec![];
        self.fill_ranges(0, self.cards_count, &mut ranges);
        for range in ranges {
            visitor(range);
        }
    }

    /// Append the memory ranges of the marked cards in `[begin, end)` (card indices) to `ranges`,
    /// merging with the last range when contiguous. Spans whose card bytes are all zero are
    /// skipped by bisection.
    pub fn fill_ranges(&self, begin: usize, end: usize, ranges: &mut Vec<Range<Address>>) {
        if begin >= end || self.is_span_zero(begin, end) {
            return;
        }
        if end - begin < MIN_BISECT_CARDS {
            for index in begin..end {
                if self.cards()[index].is_marked() {
                    let range = self.get_memory_range(CardIndex(index));
                    match ranges.last_mut() {
                        Some(last) if last.end == range.start => last.end = range.end,
                        _ => ranges.push(range),
                    }
                }
            }
            return;
        }
        let mid = begin + (end - begin) / 2;
        self.fill_ranges(begin, mid, ranges);
        self.fill_ranges(mid, end, ranges);
    }

    fn is_span_zero(&self, begin: usize, end: usize) -> bool {
        let cards = self.cards();
        let mut index = begin;
        while index < end {
            if index % BYTES_IN_WORD == 0 && end - index >= BYTES_IN_WORD {
                if self.storage[index / BYTES_IN_WORD].load(Ordering::Relaxed) != 0 {
                    return false;
                }
                index += BYTES_IN_WORD;
            } else {
                if cards[index].value() != 0 {
                    return false;
                }
                index += 1;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_ADDRESS: usize = 0x2000_0000;

    fn table(cards: usize) -> CardTable {
        let mut table = CardTable::new(
            unsafe { Address::from_usize(MIN_ADDRESS) },
            cards * BYTES_IN_CARD,
        );
        table.initialize();
        table
    }

    fn addr(offset: usize) -> Address {
        unsafe { Address::from_usize(MIN_ADDRESS + offset) }
    }

    #[test]
    fn mark_clear_visit() {
        let table = table(3);
        let a = addr(10);
        assert!(!table.is_marked(a));
        assert!(table.is_clear(a));
        table.mark_card(a);
        assert!(table.is_marked(a));
        table.clear_card(a);
        let mut visits = 0;
        table.visit_marked(|_| visits += 1, CardVisitFlags::VISIT_MARKED);
        assert_eq!(visits, 0);
    }

    #[test]
    fn card_addresses_cover_address() {
        let table = table(16);
        for offset in (0..16 * BYTES_IN_CARD).step_by(509) {
            let a = addr(offset);
            let index = table.get_card_index(a);
            assert!(table.get_card_start_address(index) <= a);
            assert!(a <= table.get_card_end_address(index));
            assert_eq!(index.0, offset / BYTES_IN_CARD);
        }
    }

    #[test]
    #[should_panic]
    fn out_of_range_is_fatal() {
        let table = table(2);
        table.mark_card(addr(2 * BYTES_IN_CARD));
    }

    #[test]
    #[should_panic]
    fn double_initialize_is_fatal() {
        let mut table = table(2);
        table.initialize();
    }

    #[test]
    fn visit_marked_processed_flags() {
        let table = table(20);
        table.mark_card(addr(BYTES_IN_CARD));
        table.mark_card(addr(11 * BYTES_IN_CARD));
        let mut visited = vec![];
        table.visit_marked(
            |r| visited.push(r.start),
            CardVisitFlags::VISIT_MARKED | CardVisitFlags::SET_PROCESSED,
        );
        assert_eq!(visited, vec![addr(BYTES_IN_CARD), addr(11 * BYTES_IN_CARD)]);
        assert!(table.get_card(addr(BYTES_IN_CARD)).is_processed());

        let mut marked = 0;
        table.visit_marked(|_| marked += 1, CardVisitFlags::VISIT_MARKED);
        assert_eq!(marked, 0);
        let mut processed = 0;
        table.visit_marked(|_| processed += 1, CardVisitFlags::VISIT_PROCESSED);
        assert_eq!(processed, 2);
    }

    #[test]
    fn visit_skips_hot_but_clear_cards() {
        let table = table(9);
        table.get_card(addr(3 * BYTES_IN_CARD)).set_hot();
        let mut visits = 0;
        table.visit_marked(|_| visits += 1, CardVisitFlags::VISIT_MARKED);
        assert_eq!(visits, 0);
    }

    #[test]
    fn compact_visit_coalesces() {
        let table = table(200);
        for i in [2, 3, 4, 50, 120, 121] {
            table.mark_card(addr(i * BYTES_IN_CARD));
        }
        // A hot but clear card is not a range.
        table.get_card(addr(90 * BYTES_IN_CARD)).set_hot();
        let mut ranges = vec![];
        table.visit_marked_compact(|r| ranges.push((r.start - addr(0), r.end - addr(0))));
        assert_eq!(
            ranges,
            vec![
                (2 * BYTES_IN_CARD, 5 * BYTES_IN_CARD),
                (50 * BYTES_IN_CARD, 51 * BYTES_IN_CARD),
                (120 * BYTES_IN_CARD, 122 * BYTES_IN_CARD),
            ]
        );
    }

    #[test]
    fn young_and_clear_ranges() {
        let table = table(8);
        table.mark_cards_as_young(addr(BYTES_IN_CARD), addr(3 * BYTES_IN_CARD));
        assert!(!table.get_card(addr(0)).is_young());
        assert!(table.get_card(addr(BYTES_IN_CARD)).is_young());
        assert!(table.get_card(addr(2 * BYTES_IN_CARD + 100)).is_young());
        assert!(!table.get_card(addr(3 * BYTES_IN_CARD)).is_young());
        table.clear_card_range(addr(0), addr(8 * BYTES_IN_CARD));
        let mut visits = 0;
        table.visit_marked(
            |_| visits += 1,
            CardVisitFlags::VISIT_MARKED | CardVisitFlags::VISIT_PROCESSED,
        );
        assert_eq!(visits, 0);
        assert!(table.get_card(addr(BYTES_IN_CARD)).is_clear());
    }
}
