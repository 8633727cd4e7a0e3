use super::remset::RemSet;
use crate::util::bitmap::MarkBitmap;
use crate::util::constants::*;
use crate::util::{Address, ObjectReference};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

/// Index of a region in the region space's arena.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegionId(pub usize);

/// Named bits of a region's flag word.
pub struct RegionFlags;

impl RegionFlags {
    pub const EDEN: u32 = 1 << 0;
    pub const OLD: u32 = 1 << 1;
    pub const NONMOVABLE: u32 = 1 << 2;
    pub const LARGE_OBJECT: u32 = 1 << 3;
    pub const COLLECTION_SET: u32 = 1 << 4;
    pub const PROMOTED: u32 = 1 << 5;
    pub const RESERVED: u32 = 1 << 6;

    /// Regions whose objects live until a marking proves them dead.
    pub const TENURED: u32 = Self::OLD | Self::NONMOVABLE | Self::LARGE_OBJECT;
    /// Regions whose memory is in use.
    pub const IN_USE: u32 = Self::EDEN | Self::TENURED;
}

/// A contiguous, region-size aligned chunk of the heap.
///
/// A region carries two bitmaps. The live bitmap lists the objects a scan of the region may
/// visit: set on allocation and on copying, and replaced by the mark bitmap once a marking of
/// the region finishes. The roles of the two are swapped instead of copying where possible.
pub struct Region {
    id: RegionId,
    start: Address,
    end: Address,
    flags: AtomicU32,
    top: AtomicUsize,
    live_bytes: AtomicUsize,
    pinned_objects: AtomicUsize,
    bitmaps: [MarkBitmap; 2],
    live_bitmap_index: AtomicUsize,
    pages_released: AtomicBool,
    remset: RemSet,
}

impl Region {
    pub fn new(id: RegionId, start: Address, size: usize) -> Self {
        Region {
            id,
            start,
            end: start + size,
            flags: AtomicU32::new(0),
            top: AtomicUsize::new(start.as_usize()),
            live_bytes: AtomicUsize::new(0),
            pinned_objects: AtomicUsize::new(0),
            bitmaps: [MarkBitmap::new(start, size), MarkBitmap::new(start, size)],
            live_bitmap_index: AtomicUsize::new(0),
            pages_released: AtomicBool::new(false),
            remset: RemSet::new(size >> LOG_BYTES_IN_CARD),
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn top(&self) -> Address {
        unsafe { Address::from_usize(self.top.load(Ordering::Acquire)) }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.top() - self.start
    }

    pub fn free_bytes(&self) -> usize {
        self.end - self.top()
    }

    // Flags

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags() & flag != 0
    }

    pub fn add_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::AcqRel);
    }

    pub fn rm_flag(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::AcqRel);
    }

    pub fn is_free(&self) -> bool {
        !self.has_flag(RegionFlags::IN_USE)
    }

    pub fn is_eden(&self) -> bool {
        self.has_flag(RegionFlags::EDEN)
    }

    /// A movable old region.
    pub fn is_old(&self) -> bool {
        self.has_flag(RegionFlags::OLD)
    }

    pub fn is_tenured(&self) -> bool {
        self.has_flag(RegionFlags::TENURED)
    }

    pub fn is_non_regular(&self) -> bool {
        self.has_flag(RegionFlags::NONMOVABLE | RegionFlags::LARGE_OBJECT)
    }

    pub fn is_in_collection_set(&self) -> bool {
        self.has_flag(RegionFlags::COLLECTION_SET)
    }

    pub fn is_promoted(&self) -> bool {
        self.has_flag(RegionFlags::PROMOTED)
    }

    // Allocation

    /// Bump-allocate `size` bytes. Safe to call from several threads at once.
    /// The memory is zeroed and its live bit is set.
    pub fn alloc(&self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        let end = self.end.as_usize();
        let result = self
            .top
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                if top + size <= end {
                    Some(top + size)
                } else {
                    None
                }
            });
        match result {
            Ok(old_top) => {
                let addr = unsafe { Address::from_usize(old_top) };
                self.live_bitmap().set(addr);
                Some(addr)
            }
            Err(_) => None,
        }
    }

    // Bitmaps

    pub fn live_bitmap(&self) -> &MarkBitmap {
        &self.bitmaps[self.live_bitmap_index.load(Ordering::Acquire)]
    }

    pub fn mark_bitmap(&self) -> &MarkBitmap {
        &self.bitmaps[1 - self.live_bitmap_index.load(Ordering::Acquire)]
    }

    /// The mark bitmap becomes the live bitmap and the old live bitmap becomes the next mark
    /// bitmap.
    pub fn swap_mark_bitmap(&self) {
        self.live_bitmap_index.fetch_xor(1, Ordering::AcqRel);
    }

    pub fn clone_mark_bitmap_to_live_bitmap(&self) {
        self.live_bitmap().copy_from(self.mark_bitmap());
    }

    pub fn clone_live_bitmap_to_mark_bitmap(&self) {
        self.mark_bitmap().copy_from(self.live_bitmap());
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.mark_bitmap().is_marked(object)
    }

    /// Visit the objects of the live bitmap in address order.
    pub fn iterate_over_objects<F: FnMut(ObjectReference)>(&self, mut f: F) {
        self.live_bitmap()
            .iterate_range(self.start, self.top(), |a| f(ObjectReference::from_raw_address(a)))
    }

    /// Visit the objects of the mark bitmap in address order.
    pub fn iterate_over_marked_objects<F: FnMut(ObjectReference)>(&self, mut f: F) {
        self.mark_bitmap()
            .iterate_range(self.start, self.top(), |a| f(ObjectReference::from_raw_address(a)))
    }

    /// Visit the objects of the live bitmap that start inside `range`.
    pub fn iterate_live_in_range<F: FnMut(ObjectReference)>(
        &self,
        range: Range<Address>,
        mut f: F,
    ) {
        let end = range.end.min(self.top());
        self.live_bitmap()
            .iterate_range(range.start, end, |a| f(ObjectReference::from_raw_address(a)))
    }

    /// Visit the objects of the mark bitmap that start inside `range`.
    pub fn iterate_marked_in_range<F: FnMut(ObjectReference)>(
        &self,
        range: Range<Address>,
        mut f: F,
    ) {
        let end = range.end.min(self.top());
        self.mark_bitmap()
            .iterate_range(range.start, end, |a| f(ObjectReference::from_raw_address(a)))
    }

    // Accounting

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn add_live_bytes(&self, bytes: usize) {
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn garbage_bytes(&self) -> usize {
        self.allocated_bytes().saturating_sub(self.live_bytes())
    }

    pub fn pin_object(&self) {
        self.pinned_objects.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unpin_object(&self) {
        let old = self.pinned_objects.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "unpinning an object in {:?} that has no pinned objects", self.id);
    }

    pub fn has_pinned_objects(&self) -> bool {
        self.pinned_objects.load(Ordering::Acquire) != 0
    }

    pub fn remset(&self) -> &RemSet {
        &self.remset
    }

    pub(crate) fn pages_released(&self) -> bool {
        self.pages_released.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pages_released(&self, released: bool) {
        self.pages_released.store(released, Ordering::Relaxed)
    }

    /// Return the region to its unused state. The remembered set must have been invalidated
    /// already so that no other region still refers to this one.
    pub(crate) fn reset(&self) {
        debug_assert!(!self.has_pinned_objects());
        if !self.pages_released() {
            crate::util::memory::zero(self.start, self.allocated_bytes());
        }
        self.flags.store(0, Ordering::Release);
        self.top.store(self.start.as_usize(), Ordering::Release);
        self.live_bytes.store(0, Ordering::Relaxed);
        self.bitmaps[0].clear_all();
        self.bitmaps[1].clear_all();
        self.live_bitmap_index.store(0, Ordering::Release);
        self.remset.clear();
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region({}, [{}, {}), top={}, flags={:#b}, live={})",
            self.id.0,
            self.start,
            self.end,
            self.top(),
            self.flags(),
            self.live_bytes()
        )
    }
}
