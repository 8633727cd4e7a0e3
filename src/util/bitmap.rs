//! Side bitmaps with one bit per heap word. Regions keep two of them: the live bitmap that
//! describes the objects allocated (or found live by the last finished marking) and the mark
//! bitmap the current marking pass writes into.

use crate::util::constants::*;
use crate::util::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MarkBitmap {
    base: Address,
    words: Box<[AtomicUsize]>,
}

impl MarkBitmap {
    /// Create a bitmap covering `[base, base + bytes)`.
    pub fn new(base: Address, bytes: usize) -> Self {
        debug_assert!(base.is_aligned_to(MIN_OBJECT_ALIGNMENT));
        let bits = bytes >> LOG_MIN_OBJECT_ALIGNMENT;
        let len = bits.div_ceil(BITS_IN_WORD);
        Self {
            base,
            words: (0..len).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    /// The address just past the covered range.
    pub fn end(&self) -> Address {
        self.base + (self.words.len() << (LOG_BITS_IN_WORD + LOG_MIN_OBJECT_ALIGNMENT))
    }

    fn bit_index(&self, addr: Address) -> usize {
        debug_assert!(
            addr >= self.base && addr < self.end(),
            "{} is not covered by the bitmap at {}",
            addr,
            self.base
        );
        (addr - self.base) >> LOG_MIN_OBJECT_ALIGNMENT
    }

    fn entry(&self, addr: Address) -> (&AtomicUsize, usize) {
        let index = self.bit_index(addr);
        (&self.words[index >> LOG_BITS_IN_WORD], 1 << (index & (BITS_IN_WORD - 1)))
    }

    fn address_of(&self, word: usize, bit: usize) -> Address {
        self.base + (((word << LOG_BITS_IN_WORD) + bit) << LOG_MIN_OBJECT_ALIGNMENT)
    }

    pub fn set(&self, addr: Address) {
        let (entry, mask) = self.entry(addr);
        entry.fetch_or(mask, Ordering::Relaxed);
    }

    pub fn clear(&self, addr: Address) {
        let (entry, mask) = self.entry(addr);
        entry.fetch_and(!mask, Ordering::Relaxed);
    }

    pub fn is_set(&self, addr: Address) -> bool {
        let (entry, mask) = self.entry(addr);
        entry.load(Ordering::Relaxed) & mask != 0
    }

    /// Set the bit. Returns true if this call changed it from clear to set.
    pub fn atomic_test_and_set(&self, addr: Address) -> bool {
        let (entry, mask) = self.entry(addr);
        entry.fetch_or(mask, Ordering::AcqRel) & mask == 0
    }

    pub fn mark(&self, object: ObjectReference) -> bool {
        self.atomic_test_and_set(object.to_raw_address())
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.is_set(object.to_raw_address())
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Clear every bit for addresses in `[start, end)`.
    pub fn clear_range(&self, start: Address, end: Address) {
        let mut addr = start;
        while addr < end {
            let index = self.bit_index(addr);
            if index & (BITS_IN_WORD - 1) == 0
                && end - addr >= BITS_IN_WORD * MIN_OBJECT_ALIGNMENT
            {
                self.words[index >> LOG_BITS_IN_WORD].store(0, Ordering::Relaxed);
                addr += BITS_IN_WORD * MIN_OBJECT_ALIGNMENT;
            } else {
                self.clear(addr);
                addr += MIN_OBJECT_ALIGNMENT;
            }
        }
    }

    /// Overwrite this bitmap with the content of `other`, which must cover the same range.
    pub fn copy_from(&self, other: &MarkBitmap) {
        assert_eq!(self.base, other.base);
        assert_eq!(self.words.len(), other.words.len());
        for (dst, src) in self.words.iter().zip(other.words.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Visit the address of every set bit in ascending order.
    pub fn iterate<F: FnMut(Address)>(&self, f: F) {
        self.iterate_range(self.base, self.end(), f)
    }

    /// Visit every set bit whose address lies in `[start, end)`, in ascending order.
    /// Each word is loaded once, so bits set concurrently behind the cursor are not visited.
    pub fn iterate_range<F: FnMut(Address)>(&self, start: Address, end: Address, mut f: F) {
        let start = start.max(self.base);
        let end = end.min(self.end());
        if start >= end {
            return;
        }
        let first = self.bit_index(start);
        let last = (end - self.base) >> LOG_MIN_OBJECT_ALIGNMENT;
        let mut word_index = first >> LOG_BITS_IN_WORD;
        let last_word = (last - 1) >> LOG_BITS_IN_WORD;
        while word_index <= last_word {
            let mut value = self.words[word_index].load(Ordering::Acquire);
            if word_index == first >> LOG_BITS_IN_WORD {
                value &= usize::MAX << (first & (BITS_IN_WORD - 1));
            }
            if word_index == last_word {
                let tail = last - (last_word << LOG_BITS_IN_WORD);
                if tail < BITS_IN_WORD {
                    value &= (1usize << tail) - 1;
                }
            }
            while value != 0 {
                let bit = value.trailing_zeros() as usize;
                f(self.address_of(word_index, bit));
                value &= value - 1;
            }
            word_index += 1;
        }
    }

    /// The object visited first by `iterate_range(start, end, ..)`, if any.
    pub fn find_first(&self, start: Address, end: Address) -> Option<Address> {
        let mut found = None;
        self.iterate_range(start, end, |addr| {
            if found.is_none() {
                found = Some(addr);
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x1000_0000;

    fn bitmap(bytes: usize) -> MarkBitmap {
        MarkBitmap::new(unsafe { Address::from_usize(BASE) }, bytes)
    }

    fn addr(offset: usize) -> Address {
        unsafe { Address::from_usize(BASE + offset) }
    }

    #[test]
    fn set_and_test() {
        let bm = bitmap(4096);
        assert!(!bm.is_set(addr(16)));
        bm.set(addr(16));
        assert!(bm.is_set(addr(16)));
        assert!(!bm.is_set(addr(24)));
        bm.clear(addr(16));
        assert!(bm.is_empty());
    }

    #[test]
    fn test_and_set_reports_first_time_only() {
        let bm = bitmap(4096);
        assert!(bm.atomic_test_and_set(addr(64)));
        assert!(!bm.atomic_test_and_set(addr(64)));
    }

    #[test]
    fn iterate_range_is_bounded() {
        let bm = bitmap(8192);
        for offset in [0, 8, 512, 520, 4096, 8184] {
            bm.set(addr(offset));
        }
        let mut seen = vec![];
        bm.iterate_range(addr(8), addr(4096), |a| seen.push(a - addr(0)));
        assert_eq!(seen, vec![8, 512, 520]);

        let mut all = vec![];
        bm.iterate(|a| all.push(a - addr(0)));
        assert_eq!(all, vec![0, 8, 512, 520, 4096, 8184]);
        assert_eq!(bm.find_first(addr(9), addr(8192)), Some(addr(512)));
    }

    #[test]
    fn clear_range_keeps_outside_bits() {
        let bm = bitmap(8192);
        bm.set(addr(0));
        bm.set(addr(1024));
        bm.set(addr(4000));
        bm.set(addr(6000));
        bm.clear_range(addr(8), addr(6000));
        let mut all = vec![];
        bm.iterate(|a| all.push(a - addr(0)));
        assert_eq!(all, vec![0, 6000]);
    }

    #[test]
    fn copy_from_duplicates() {
        let a = bitmap(4096);
        let b = bitmap(4096);
        a.set(addr(128));
        b.set(addr(256));
        b.copy_from(&a);
        assert!(b.is_set(addr(128)));
        assert!(!b.is_set(addr(256)));
    }
}
