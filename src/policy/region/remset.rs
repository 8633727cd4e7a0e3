use super::region::{Region, RegionId};
use super::regionspace::RegionSpace;
use crate::util::constants::*;
use crate::util::{Address, ObjectReference};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Mutex;

/// One bit per card of a foreign region: "this card holds a pointer into the owning region".
#[derive(Clone)]
pub(crate) struct RemSetBitmap {
    words: Box<[usize]>,
}

impl RemSetBitmap {
    fn new(cards: usize) -> Self {
        RemSetBitmap {
            words: vec![0; cards.div_ceil(BITS_IN_WORD)].into_boxed_slice(),
        }
    }

    fn set(&mut self, card: usize) {
        self.words[card / BITS_IN_WORD] |= 1 << (card % BITS_IN_WORD);
    }

    fn is_set(&self, card: usize) -> bool {
        self.words[card / BITS_IN_WORD] & (1 << (card % BITS_IN_WORD)) != 0
    }

    fn or_with(&mut self, other: &RemSetBitmap) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= *o;
        }
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Runs of set bits as memory ranges of the foreign region starting at `base`.
    fn ranges(&self, base: Address) -> Vec<Range<Address>> {
        let mut ranges: Vec<Range<Address>> = vec![];
        for (i, word) in self.words.iter().enumerate() {
            let mut value = *word;
            while value != 0 {
                let bit = value.trailing_zeros() as usize;
                value &= value - 1;
                let start = base + ((i * BITS_IN_WORD + bit) << LOG_BYTES_IN_CARD);
                let end = start + BYTES_IN_CARD;
                match ranges.last_mut() {
                    Some(last) if last.end == start => last.end = end,
                    _ => ranges.push(start..end),
                }
            }
        }
        ranges
    }
}

#[derive(Default)]
struct RemSetInner {
    /// Foreign region -> cards of that region holding pointers into us.
    bitmaps: HashMap<RegionId, RemSetBitmap>,
    /// Regions whose remembered sets hold entries for cards of this region.
    ref_regions: HashSet<RegionId>,
}

/// The remembered set of one region: which cards of other regions may hold a pointer into it.
///
/// Every operation takes the set's own lock for its duration only. Operations that touch two
/// regions lock them one after the other, never both at once.
pub struct RemSet {
    cards_per_region: usize,
    inner: Mutex<RemSetInner>,
}

impl RemSet {
    pub fn new(cards_per_region: usize) -> Self {
        RemSet {
            cards_per_region,
            inner: Mutex::new(RemSetInner::default()),
        }
    }

    /// Record that the card of `from_addr` (in another region) holds a pointer into this region.
    pub fn add_ref(&self, space: &RegionSpace, from_addr: Address) {
        let from_region = space.region_of(from_addr);
        let card = (from_addr - from_region.start()) >> LOG_BYTES_IN_CARD;
        let mut inner = self.inner.lock().unwrap();
        inner
            .bitmaps
            .entry(from_region.id())
            .or_insert_with(|| RemSetBitmap::new(self.cards_per_region))
            .set(card);
    }

    /// Record the reference stored at `offset` in `from_object` to `to_object`, which lives in
    /// another region. The source card is keyed by the object start.
    pub fn add_ref_with_addr(
        space: &RegionSpace,
        from_object: ObjectReference,
        offset: usize,
        to_object: ObjectReference,
    ) {
        let from = from_object.to_raw_address();
        let from_region = space.region_of(from);
        let to_region = space.region_of(to_object.to_raw_address());
        debug_assert_ne!(from_region.id(), to_region.id());
        trace!(
            "add_ref_with_addr {}+{} -> {} ({:?} -> {:?})",
            from_object,
            offset,
            to_object,
            from_region.id(),
            to_region.id()
        );
        to_region.remset().add_ref(space, from);
        from_region.remset().add_ref_region(to_region.id());
    }

    fn add_ref_region(&self, region: RegionId) {
        self.inner.lock().unwrap().ref_regions.insert(region);
    }

    fn remove_from_region(&self, region: RegionId) {
        self.inner.lock().unwrap().bitmaps.remove(&region);
    }

    fn remove_ref_region(&self, region: RegionId) {
        self.inner.lock().unwrap().ref_regions.remove(&region);
    }

    /// Forget everything about `region`: the entries it contributed to the sets of the regions
    /// it points into, the back-references of the regions that point into it, and its own set.
    pub fn invalidate_region(space: &RegionSpace, region: RegionId) {
        let (ref_regions, from_regions) = {
            let mut inner = space.region(region).remset().inner.lock().unwrap();
            let ref_regions = std::mem::take(&mut inner.ref_regions);
            let from_regions: Vec<RegionId> = inner.bitmaps.drain().map(|(id, _)| id).collect();
            (ref_regions, from_regions)
        };
        for target in ref_regions {
            space.region(target).remset().remove_from_region(region);
        }
        for source in from_regions {
            space.region(source).remset().remove_ref_region(region);
        }
    }

    /// Remove the entries `region` contributed to other regions' sets, keeping its own set.
    pub fn invalidate_refs_from_region(space: &RegionSpace, region: RegionId) {
        let ref_regions =
            std::mem::take(&mut space.region(region).remset().inner.lock().unwrap().ref_regions);
        for target in ref_regions {
            space.region(target).remset().remove_from_region(region);
        }
    }

    /// Union `other` into this set.
    pub fn merge(&self, other: &RemSet) {
        let bitmaps: Vec<(RegionId, RemSetBitmap)> = other
            .inner
            .lock()
            .unwrap()
            .bitmaps
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        let mut inner = self.inner.lock().unwrap();
        for (region, bitmap) in bitmaps {
            match inner.bitmaps.get_mut(&region) {
                Some(existing) => existing.or_with(&bitmap),
                None => {
                    inner.bitmaps.insert(region, bitmap);
                }
            }
        }
    }

    /// Foreign regions with at least one entry.
    pub fn get_dirty_regions(&self) -> HashSet<RegionId> {
        self.inner
            .lock()
            .unwrap()
            .bitmaps
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    /// Regions this region has contributed entries to.
    pub fn get_ref_regions(&self) -> HashSet<RegionId> {
        self.inner.lock().unwrap().ref_regions.clone()
    }

    pub fn contains(&self, space: &RegionSpace, from_addr: Address) -> bool {
        let from_region = space.region_of(from_addr);
        let card = (from_addr - from_region.start()) >> LOG_BYTES_IN_CARD;
        self.inner
            .lock()
            .unwrap()
            .bitmaps
            .get(&from_region.id())
            .is_some_and(|b| b.is_set(card))
    }

    /// Number of remembered cards.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().bitmaps.values().map(|b| b.count()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().bitmaps.values().all(|b| b.is_empty())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.bitmaps.clear();
        inner.ref_regions.clear();
    }

    /// Visit the remembered memory ranges of the foreign regions accepted by `region_pred`.
    /// The ranges are collected under the lock and visited after releasing it.
    pub fn iterate<P, V>(&self, space: &RegionSpace, region_pred: P, mut visitor: V)
    where
        P: Fn(&Region) -> bool,
        V: FnMut(&Region, Range<Address>),
    {
        let ranges: Vec<(RegionId, Vec<Range<Address>>)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .bitmaps
                .iter()
                .filter(|(id, _)| region_pred(space.region(**id)))
                .map(|(id, b)| (*id, b.ranges(space.region(*id).start())))
                .collect()
        };
        for (id, region_ranges) in ranges {
            let region = space.region(id);
            for range in region_ranges {
                visitor(region, range);
            }
        }
    }

    /// Visit the live objects starting in the remembered ranges of the accepted regions.
    pub fn iterate_over_objects<P, V>(&self, space: &RegionSpace, region_pred: P, mut visitor: V)
    where
        P: Fn(&Region) -> bool,
        V: FnMut(ObjectReference),
    {
        self.iterate(space, region_pred, |region, range| {
            region.iterate_live_in_range(range, &mut visitor)
        })
    }
}

/// The remembered sets of a whole collection set merged into one working set for a pause,
/// together with the dirty cards that were not yet turned into remembered-set entries.
pub struct GlobalRemSet {
    cards_per_region: usize,
    bitmaps: HashMap<RegionId, RemSetBitmap>,
}

impl GlobalRemSet {
    pub fn new(cards_per_region: usize) -> Self {
        GlobalRemSet {
            cards_per_region,
            bitmaps: HashMap::new(),
        }
    }

    pub fn merge(&mut self, remset: &RemSet) {
        let inner = remset.inner.lock().unwrap();
        for (region, bitmap) in inner.bitmaps.iter() {
            self.bitmaps
                .entry(*region)
                .or_insert_with(|| RemSetBitmap::new(self.cards_per_region))
                .or_with(bitmap);
        }
    }

    /// Add the card containing `addr`.
    pub fn add_card(&mut self, space: &RegionSpace, addr: Address) {
        let region = space.region_of(addr);
        let card = (addr - region.start()) >> LOG_BYTES_IN_CARD;
        self.bitmaps
            .entry(region.id())
            .or_insert_with(|| RemSetBitmap::new(self.cards_per_region))
            .set(card);
    }

    pub fn contains(&self, space: &RegionSpace, addr: Address) -> bool {
        let region = space.region_of(addr);
        let card = (addr - region.start()) >> LOG_BYTES_IN_CARD;
        self.bitmaps.get(&region.id()).is_some_and(|b| b.is_set(card))
    }

    pub fn get_dirty_regions(&self) -> Vec<RegionId> {
        let mut regions: Vec<RegionId> = self
            .bitmaps
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(id, _)| *id)
            .collect();
        regions.sort();
        regions
    }

    pub fn size(&self) -> usize {
        self.bitmaps.values().map(|b| b.count()).sum()
    }

    /// Visit the remembered ranges of the accepted regions, in region order.
    pub fn iterate<P, V>(&self, space: &RegionSpace, region_pred: P, mut visitor: V)
    where
        P: Fn(&Region) -> bool,
        V: FnMut(&Region, Range<Address>),
    {
        for id in self.get_dirty_regions() {
            let region = space.region(id);
            if !region_pred(region) {
                continue;
            }
            for range in self.bitmaps[&id].ranges(region.start()) {
                visitor(region, range);
            }
        }
    }
}
