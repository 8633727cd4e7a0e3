use super::cardtable::CardTable;
use super::region::{Region, RegionFlags, RegionId};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::memory;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use atomic::Atomic;
use bytemuck::NoUninit;
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Progress of returning the pages of free regions to the OS.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum ReleasePagesStatus {
    Finished,
    /// A collection wants the releasing thread to stop.
    NeedInterrupt,
    ReleasingPages,
    /// The last release was stopped before it went through all free regions.
    WasInterrupted,
}

/// Sentinel in the current-region slots.
const NO_REGION: usize = usize::MAX;

/// A region that objects are bump-allocated into by several threads at once. The slot is read
/// without locking; the lock is only taken to install a fresh region once the current one is full.
struct SharedAllocRegion {
    current: AtomicUsize,
    lock: Mutex<()>,
    flags: u32,
}

impl SharedAllocRegion {
    fn new(flags: u32) -> Self {
        SharedAllocRegion {
            current: AtomicUsize::new(NO_REGION),
            lock: Mutex::new(()),
            flags,
        }
    }

    fn current(&self) -> Option<RegionId> {
        match self.current.load(Ordering::Acquire) {
            NO_REGION => None,
            id => Some(RegionId(id)),
        }
    }

    fn reset(&self) {
        self.current.store(NO_REGION, Ordering::Release);
    }
}

/// The managed heap: one contiguous reservation divided into equally sized regions.
///
/// Allocation is region-granular: mutators grab whole eden regions and bump-allocate inside
/// them, the collector copies survivors into shared old regions. All region state changes go
/// through here so that the free list, the eden list and the card table stay consistent.
pub struct RegionSpace {
    start: Address,
    extent: usize,
    log_region_size: usize,
    region_size: usize,
    regions: Box<[Region]>,
    card_table: CardTable,
    free_regions: Mutex<BTreeSet<RegionId>>,
    eden_regions: Mutex<Vec<RegionId>>,
    /// Bumped every time the eden regions are taken away from the mutators.
    young_epoch: AtomicUsize,
    desired_eden_length: AtomicUsize,
    max_eden_length: usize,
    tenured_alloc: SharedAllocRegion,
    non_movable_alloc: SharedAllocRegion,
    reserved_region: Mutex<Option<RegionId>>,
    release_pages_status: Atomic<ReleasePagesStatus>,
}

impl RegionSpace {
    /// Reserve the heap and carve it into regions.
    pub fn new(options: &Options) -> std::io::Result<Self> {
        let region_size = options.region_size;
        let log_region_size = options.log_region_size();
        let count = options.heap_size >> log_region_size;
        assert!(
            count >= 4,
            "heap of {} bytes holds fewer than 4 regions of {} bytes",
            options.heap_size,
            region_size
        );
        let extent = count << log_region_size;
        let start = memory::mmap_aligned_noreserve(extent, region_size)?;
        let regions: Box<[Region]> = (0..count)
            .map(|i| Region::new(RegionId(i), start + (i << log_region_size), region_size))
            .collect();
        let mut card_table = CardTable::new(start, extent);
        card_table.initialize();

        let space = RegionSpace {
            start,
            extent,
            log_region_size,
            region_size,
            regions,
            card_table,
            free_regions: Mutex::new((0..count).map(RegionId).collect()),
            eden_regions: Mutex::new(vec![]),
            young_epoch: AtomicUsize::new(0),
            desired_eden_length: AtomicUsize::new(0),
            max_eden_length: (count * options.young_percentage / 100).max(1),
            tenured_alloc: SharedAllocRegion::new(RegionFlags::OLD),
            non_movable_alloc: SharedAllocRegion::new(RegionFlags::NONMOVABLE),
            reserved_region: Mutex::new(None),
            release_pages_status: Atomic::new(ReleasePagesStatus::Finished),
        };
        space.set_desired_eden_length(space.max_eden_length);
        space.reserve_region();
        info!(
            "Region space [{}, {}): {} regions of {} bytes, eden up to {} regions",
            start,
            start + extent,
            count,
            region_size,
            space.max_eden_length
        );
        Ok(space)
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.extent
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn log_region_size(&self) -> usize {
        self.log_region_size
    }

    pub fn cards_per_region(&self) -> usize {
        self.region_size >> LOG_BYTES_IN_CARD
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn in_heap(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.0]
    }

    pub fn region_of(&self, addr: Address) -> &Region {
        assert!(
            self.in_heap(addr),
            "{} is outside of the heap [{}, {})",
            addr,
            self.start,
            self.end()
        );
        &self.regions[(addr - self.start) >> self.log_region_size]
    }

    pub fn region_of_object(&self, object: ObjectReference) -> &Region {
        self.region_of(object.to_raw_address())
    }

    /// True if both addresses lie in the same region. Only arithmetic, no lookup.
    pub fn same_region(&self, a: Address, b: Address) -> bool {
        (a.as_usize() ^ b.as_usize()) >> self.log_region_size == 0
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Regions that hold objects, in address order.
    pub fn used_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| !r.is_free())
    }

    // Region lifecycle

    fn take_free_region(&self) -> Option<RegionId> {
        self.free_regions.lock().unwrap().pop_first()
    }

    /// Take a free region and flag it. An eden region gets its cards tagged young.
    pub fn allocate_region(&self, flags: u32) -> Option<&Region> {
        let id = self.take_free_region()?;
        let region = self.region(id);
        debug_assert!(region.is_free(), "{:?} on the free list is in use", region);
        region.set_pages_released(false);
        region.add_flag(flags);
        if flags & RegionFlags::EDEN != 0 {
            self.card_table.mark_cards_as_young(region.start(), region.end());
            self.eden_regions.lock().unwrap().push(id);
        }
        trace!("Allocated {:?}", region);
        Some(region)
    }

    /// A fresh eden region for a mutator, unless eden has reached its desired length.
    pub fn allocate_eden_region(&self) -> Option<&Region> {
        if self.eden_length() >= self.desired_eden_length() {
            return None;
        }
        self.allocate_region(RegionFlags::EDEN)
    }

    /// Return a region to the free list. Its remembered set must have been invalidated.
    pub fn free_region(&self, id: RegionId) {
        let region = self.region(id);
        assert!(!region.is_free(), "{:?} freed twice", id);
        assert!(
            !region.has_pinned_objects(),
            "{:?} with pinned objects cannot be freed",
            id
        );
        trace!("Free {:?}", region);
        if region.is_eden() {
            self.eden_regions.lock().unwrap().retain(|r| *r != id);
        }
        for alloc in [&self.tenured_alloc, &self.non_movable_alloc] {
            let _ = alloc
                .current
                .compare_exchange(id.0, NO_REGION, Ordering::AcqRel, Ordering::Relaxed);
        }
        self.card_table.clear_card_range(region.start(), region.end());
        region.reset();
        self.free_regions.lock().unwrap().insert(id);
    }

    /// Turn an eden region into an old one in place. Its cards stop being young.
    pub fn promote_region(&self, id: RegionId) {
        let region = self.region(id);
        debug_assert!(region.is_eden());
        self.eden_regions.lock().unwrap().retain(|r| *r != id);
        region.rm_flag(RegionFlags::EDEN);
        region.add_flag(RegionFlags::OLD | RegionFlags::PROMOTED);
        self.card_table.clear_card_range(region.start(), region.end());
    }

    pub fn eden_regions(&self) -> Vec<RegionId> {
        self.eden_regions.lock().unwrap().clone()
    }

    pub fn eden_length(&self) -> usize {
        self.eden_regions.lock().unwrap().len()
    }

    pub fn free_region_count(&self) -> usize {
        self.free_regions.lock().unwrap().len()
    }

    pub fn used_region_count(&self) -> usize {
        self.regions.iter().filter(|r| !r.is_free()).count()
    }

    /// Percentage of the regions in use, the reserved region excluded.
    pub fn occupancy(&self) -> usize {
        let reserved = usize::from(self.reserved_region.lock().unwrap().is_some());
        conversions::percentage(self.used_region_count(), self.region_count() - reserved)
    }

    pub fn young_epoch(&self) -> usize {
        self.young_epoch.load(Ordering::Acquire)
    }

    /// Invalidate every mutator's cached eden region.
    pub fn bump_young_epoch(&self) {
        self.young_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn desired_eden_length(&self) -> usize {
        self.desired_eden_length.load(Ordering::Relaxed)
    }

    pub fn max_eden_length(&self) -> usize {
        self.max_eden_length
    }

    pub fn set_desired_eden_length(&self, length: usize) {
        let length = length.clamp(1, self.max_eden_length);
        debug!("Desired eden length {}", length);
        self.desired_eden_length.store(length, Ordering::Relaxed);
    }

    // Shared allocation regions

    fn alloc_shared(&self, alloc: &SharedAllocRegion, size: usize) -> Option<Address> {
        debug_assert!(size <= self.region_size);
        loop {
            if let Some(id) = alloc.current() {
                if let Some(addr) = self.region(id).alloc(size) {
                    return Some(addr);
                }
            }
            let _guard = alloc.lock.lock().unwrap();
            let seen = alloc.current();
            if let Some(id) = seen {
                // Somebody may have switched regions while we were waiting.
                if let Some(addr) = self.region(id).alloc(size) {
                    return Some(addr);
                }
            }
            let region = self.allocate_region(alloc.flags)?;
            alloc.current.store(region.id().0, Ordering::Release);
        }
    }

    /// Allocate in the shared old region. Used by the collector for survivors.
    pub fn alloc_tenured(&self, size: usize) -> Option<Address> {
        self.alloc_shared(&self.tenured_alloc, size)
    }

    /// Allocate in the shared non-movable region.
    pub fn alloc_non_movable(&self, size: usize) -> Option<Address> {
        self.alloc_shared(&self.non_movable_alloc, size)
    }

    /// Allocate an object in a region of its own.
    pub fn alloc_large(&self, size: usize) -> Option<Address> {
        if size > self.region_size {
            warn!(
                "Object of {} bytes is larger than a region ({} bytes)",
                size, self.region_size
            );
            return None;
        }
        let region = self.allocate_region(RegionFlags::LARGE_OBJECT)?;
        region.alloc(size)
    }

    pub fn is_large_object_size(&self, size: usize) -> bool {
        size > self.region_size / 2
    }

    /// Stop filling the current old region. Survivors of the next collection start a new one.
    pub fn reset_tenured_alloc_region(&self) {
        self.tenured_alloc.reset();
    }

    pub fn is_tenured_alloc_region(&self, id: RegionId) -> bool {
        self.tenured_alloc.current() == Some(id)
    }

    /// Mutators may be allocating into this region right now.
    pub fn is_non_movable_alloc_region(&self, id: RegionId) -> bool {
        self.non_movable_alloc.current() == Some(id)
    }

    // The reserved region

    /// Hold one free region back so that a full collection always has somewhere to copy to.
    pub fn reserve_region(&self) {
        let mut reserved = self.reserved_region.lock().unwrap();
        if reserved.is_some() {
            return;
        }
        if let Some(id) = self.take_free_region() {
            self.region(id).add_flag(RegionFlags::RESERVED);
            *reserved = Some(id);
        }
    }

    /// Put the reserved region back on the free list.
    pub fn release_reserved_region(&self) {
        if let Some(id) = self.reserved_region.lock().unwrap().take() {
            self.region(id).rm_flag(RegionFlags::RESERVED);
            self.free_regions.lock().unwrap().insert(id);
        }
    }

    // Old region statistics

    /// Movable old regions with more garbage than `threshold` bytes, most garbage first.
    pub fn get_top_garbage_regions(&self, threshold: usize) -> Vec<RegionId> {
        self.regions
            .iter()
            .filter(|r| r.is_old() && !r.is_non_regular() && r.garbage_bytes() > threshold)
            .sorted_by_key(|r| (Reverse(r.garbage_bytes()), r.id()))
            .map(|r| r.id())
            .collect()
    }

    /// Bytes allocated in all regions of the given kind.
    pub fn allocated_bytes(&self, flags: u32) -> usize {
        self.regions
            .iter()
            .filter(|r| r.has_flag(flags))
            .map(|r| r.allocated_bytes())
            .sum()
    }

    // Page release

    pub fn release_pages_status(&self) -> ReleasePagesStatus {
        self.release_pages_status.load(Ordering::Acquire)
    }

    /// Ask a running page release to stop and wait until it has. Returns the status found.
    pub fn interrupt_release_pages(&self) -> ReleasePagesStatus {
        let old = self.release_pages_status.compare_exchange(
            ReleasePagesStatus::ReleasingPages,
            ReleasePagesStatus::NeedInterrupt,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match old {
            Ok(_) => {
                while self.release_pages_status() == ReleasePagesStatus::NeedInterrupt {
                    std::thread::yield_now();
                }
                ReleasePagesStatus::WasInterrupted
            }
            Err(status) => status,
        }
    }

    /// Return the pages of the free regions to the OS. Regions are taken off the free list while
    /// their pages are released so allocation never sees a half-released region. Stops early if
    /// `interrupt_release_pages` is called. Returns true if all free regions were visited.
    pub fn release_free_pages(&self) -> bool {
        if self
            .release_pages_status
            .compare_exchange(
                ReleasePagesStatus::Finished,
                ReleasePagesStatus::ReleasingPages,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
            && self
                .release_pages_status
                .compare_exchange(
                    ReleasePagesStatus::WasInterrupted,
                    ReleasePagesStatus::ReleasingPages,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
        {
            return false;
        }
        let candidates: Vec<RegionId> = self
            .free_regions
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|id| !self.region(*id).pages_released())
            .collect();
        let mut released = 0;
        for id in candidates {
            if self.release_pages_status() == ReleasePagesStatus::NeedInterrupt {
                debug!("Page release interrupted after {} regions", released);
                self.release_pages_status
                    .store(ReleasePagesStatus::WasInterrupted, Ordering::Release);
                return false;
            }
            if !self.free_regions.lock().unwrap().remove(&id) {
                continue;
            }
            let region = self.region(id);
            match memory::release_pages(region.start(), self.region_size) {
                Ok(()) => {
                    region.set_pages_released(true);
                    released += 1;
                }
                Err(e) => warn!("Failed to release pages of {:?}: {}", id, e),
            }
            self.free_regions.lock().unwrap().insert(id);
        }
        debug!("Released the pages of {} free regions", released);
        self.release_pages_status
            .store(ReleasePagesStatus::Finished, Ordering::Release);
        true
    }
}

impl Drop for RegionSpace {
    fn drop(&mut self) {
        if let Err(e) = memory::munmap(self.start, self.extent) {
            warn!("Failed to unmap the heap at {}: {}", self.start, e);
        }
    }
}
