//! Evacuation of a young or mixed collection set.
//!
//! Two strategies:
//!
//! - single pass: objects are copied out the moment a root, a remembered card or an already
//!   copied object is found to refer to them. There is no marking, so eden regions cannot be
//!   promoted in place;
//! - mark, then compact: the collection set is marked from the roots and the remembered cards
//!   first. Eden regions that are mostly live or hold pinned objects are promoted in place, the
//!   rest are compacted into old regions and the references to them are updated afterwards.
//!
//! An object that finds no room to be copied into is forwarded to itself and its region stays
//! where it is, as an old region. The pause then ends with a full collection.

use super::global::G1;
use super::marking::mark_live;
use super::update_remset::record_cross_region_ref;
use crate::plan::g1::CollectionSet;
use crate::policy::region::{CardIndex, GlobalRemSet, Region, RegionFlags, RegionId, RegionSpace};
use crate::scheduler::{GCWork, GCWorker};
use crate::util::object_forwarding;
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, Scanning, Slot, VMBinding};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Objects per parallel reference-updating work.
const REF_UPDATE_CHUNK: usize = 1024;

/// What an evacuation reports back to the pause.
pub(super) struct EvacuationOutcome {
    pub scanned_cards: usize,
    pub scan_time: Duration,
    pub copied_bytes: usize,
    pub copy_time: Duration,
    pub young_survived_bytes: usize,
    /// Regions left in place instead of being evacuated: eden promoted on purpose, and every
    /// region some object could not be copied out of.
    pub promoted: Vec<RegionId>,
    pub evacuation_failed: bool,
}

fn in_cset(space: &RegionSpace, object: ObjectReference) -> bool {
    let addr = object.to_raw_address();
    space.in_heap(addr) && space.region_of(addr).is_in_collection_set()
}

/// Copy `object` into an old region. The reserved region is given up if nothing else is left.
/// Returns `None` if there is no room even then.
pub(super) fn copy_object<VM: VMBinding>(
    space: &RegionSpace,
    object: ObjectReference,
) -> Option<ObjectReference> {
    let size = VM::VMObjectModel::get_current_size(object);
    let to = space.alloc_tenured(size).or_else(|| {
        space.release_reserved_region();
        space.alloc_tenured(size)
    })?;
    unsafe {
        std::ptr::copy_nonoverlapping(
            object.to_raw_address().to_ptr::<u8>(),
            to.to_mut_ptr::<u8>(),
            size,
        );
    }
    let new_object = ObjectReference::from_raw_address(to);
    object_forwarding::clear_forwarding_bits(new_object);
    space.region_of(to).add_live_bytes(size);
    Some(new_object)
}

/// Leave `object` where it is after it could not be copied. It is forwarded to itself and its
/// region turns into a promoted old region. Returns the region the first time it fails.
fn fail_to_evacuate(space: &RegionSpace, object: ObjectReference) -> Option<RegionId> {
    object_forwarding::write_forwarding_pointer(object, object);
    let region = space.region_of_object(object);
    if region.is_promoted() {
        return None;
    }
    warn!("No room to copy {} out of {:?}, keeping the region", object, region);
    if region.is_eden() {
        space.promote_region(region.id());
    } else {
        region.add_flag(RegionFlags::PROMOTED);
    }
    Some(region.id())
}

/// Tidy up a region that could not be fully evacuated. Objects that stayed lose their
/// self-forwarding pointer. Objects that were copied leave the region's bitmap, the mark bitmap
/// if `marked` and the live bitmap otherwise. The live bitmap ends up describing the stayers.
pub(super) fn remove_self_forwards<VM: VMBinding>(region: &Region, marked: bool) {
    let mut objects = vec![];
    if marked {
        region.iterate_over_marked_objects(|object| objects.push(object));
    } else {
        region.iterate_over_objects(|object| objects.push(object));
    }
    let bitmap = if marked {
        region.mark_bitmap()
    } else {
        region.live_bitmap()
    };
    let mut live_bytes = 0;
    for object in objects {
        if object_forwarding::is_forwarded(object)
            && object_forwarding::read_forwarding_pointer(object) != object
        {
            bitmap.clear(object.to_raw_address());
            continue;
        }
        object_forwarding::clear_forwarding_bits(object);
        live_bytes += VM::VMObjectModel::get_current_size(object);
    }
    if marked {
        region.clone_mark_bitmap_to_live_bitmap();
    }
    region.set_live_bytes(live_bytes);
    debug!("{:?} keeps {} live bytes after a failed evacuation", region, live_bytes);
}

/// Point `slot` at the copy of its target if the target was moved.
pub(super) fn forward_slot(space: &RegionSpace, slot: Slot) {
    if let Some(target) = slot.load() {
        if in_cset(space, target) {
            let new_target = object_forwarding::get_forwarded_or_self(target);
            debug_assert!(
                new_target != target || space.region_of_object(target).is_promoted(),
                "{} in the collection set was neither copied nor promoted",
                target
            );
            if new_target != target {
                slot.store(new_target);
            }
        }
    }
}

/// Forward every field of `object` and remember the references that cross regions.
fn forward_fields<VM: VMBinding>(space: &RegionSpace, object: ObjectReference) {
    VM::VMObjectModel::scan_object(
        object,
        &mut |src: ObjectReference, slot: Slot, offset: usize, _: bool| {
            forward_slot(space, slot);
            record_cross_region_ref(space, src, slot, offset);
        },
    );
}

/// Merge the remembered sets of the collection set with the dirty cards outside it.
fn build_global_remset(
    space: &RegionSpace,
    cset: &CollectionSet,
    dirty_cards: &[CardIndex],
) -> GlobalRemSet {
    let mut remset = GlobalRemSet::new(space.cards_per_region());
    for id in cset.iter() {
        remset.merge(space.region(id).remset());
    }
    let table = space.card_table();
    for index in dirty_cards {
        let addr = table.get_card_start_address(*index);
        let region = space.region_of(addr);
        if !region.is_free() && !region.is_eden() && !region.is_in_collection_set() {
            remset.add_card(space, addr);
        }
    }
    remset
}

/// Bytes and objects moved, split by the age of the source region.
#[derive(Default)]
pub(super) struct Tally {
    young_bytes: usize,
    young_objects: usize,
    tenured_bytes: usize,
    tenured_objects: usize,
}

impl Tally {
    fn add(&mut self, young: bool, bytes: usize) {
        if young {
            self.young_bytes += bytes;
            self.young_objects += 1;
        } else {
            self.tenured_bytes += bytes;
            self.tenured_objects += 1;
        }
    }

    fn merge(&mut self, other: &Tally) {
        self.young_bytes += other.young_bytes;
        self.young_objects += other.young_objects;
        self.tenured_bytes += other.tenured_bytes;
        self.tenured_objects += other.tenured_objects;
    }

    pub(super) fn flush(&self, stats: &mut super::stats::GCStats) {
        stats.record_moved(true, self.young_bytes, self.young_objects);
        stats.record_moved(false, self.tenured_bytes, self.tenured_objects);
    }
}

/// Copies objects out of the collection set as they are discovered and scans the copies.
struct Evacuator<'a, VM: VMBinding> {
    space: &'a RegionSpace,
    stack: Vec<ObjectReference>,
    tally: Tally,
    /// Regions something could not be copied out of.
    failed: Vec<RegionId>,
    _vm: PhantomData<VM>,
}

impl<'a, VM: VMBinding> Evacuator<'a, VM> {
    fn new(space: &'a RegionSpace) -> Self {
        Evacuator {
            space,
            stack: vec![],
            tally: Tally::default(),
            failed: vec![],
            _vm: PhantomData,
        }
    }

    fn evacuate(&mut self, object: ObjectReference) -> ObjectReference {
        let forwarding_bits = object_forwarding::attempt_to_forward(object);
        if object_forwarding::state_is_forwarded_or_being_forwarded(forwarding_bits) {
            return object_forwarding::spin_and_get_forwarded_object(object, forwarding_bits);
        }
        let young = self.space.region_of_object(object).is_eden();
        let Some(new_object) = copy_object::<VM>(self.space, object) else {
            self.failed.extend(fail_to_evacuate(self.space, object));
            // Its fields still need forwarding.
            self.stack.push(object);
            return object;
        };
        object_forwarding::write_forwarding_pointer(object, new_object);
        self.tally
            .add(young, VM::VMObjectModel::get_current_size(new_object));
        self.stack.push(new_object);
        new_object
    }

    /// Evacuate the target of `slot` if it is in the collection set. Returns true if the slot
    /// was updated.
    fn process_slot(&mut self, slot: Slot) -> bool {
        match slot.load() {
            Some(target) if in_cset(self.space, target) => {
                let new_target = self.evacuate(target);
                slot.store(new_target);
                true
            }
            _ => false,
        }
    }

    /// A slot of a remembered object outside the collection set.
    fn process_remembered_slot(&mut self, src: ObjectReference, slot: Slot, offset: usize) {
        if self.process_slot(slot) {
            record_cross_region_ref(self.space, src, slot, offset);
        }
    }

    /// Scan the copies until no new ones turn up.
    fn drain(&mut self) {
        while let Some(object) = self.stack.pop() {
            VM::VMObjectModel::scan_object(
                object,
                &mut |src: ObjectReference, slot: Slot, offset: usize, _: bool| {
                    self.process_slot(slot);
                    record_cross_region_ref(self.space, src, slot, offset);
                },
            );
        }
    }
}

/// What compacting a set of regions produced.
#[derive(Default)]
pub(super) struct Compacted {
    pub copies: Vec<ObjectReference>,
    pub tally: Tally,
    /// Regions some marked object could not be copied out of. They stay in place, promoted.
    pub failed: Vec<RegionId>,
}

impl Compacted {
    fn merge(&mut self, mut other: Compacted) {
        self.copies.append(&mut other.copies);
        self.tally.merge(&other.tally);
        self.failed.append(&mut other.failed);
    }
}

/// Compacts the marked objects of whole regions of the collection set.
struct CompactionWork<VM: VMBinding> {
    space: Arc<RegionSpace>,
    region: RegionId,
    result: Arc<Mutex<Compacted>>,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> GCWork for CompactionWork<VM> {
    fn do_work(&mut self, _worker: &mut GCWorker) {
        let mut compacted = Compacted::default();
        compact_region::<VM>(&self.space, self.region, &mut compacted);
        self.result.lock().unwrap().merge(compacted);
    }
}

fn compact_region<VM: VMBinding>(space: &RegionSpace, id: RegionId, out: &mut Compacted) {
    let region = space.region(id);
    let young = region.is_eden();
    region.iterate_over_marked_objects(|object| match copy_object::<VM>(space, object) {
        Some(new_object) => {
            object_forwarding::write_forwarding_pointer(object, new_object);
            out.tally
                .add(young, VM::VMObjectModel::get_current_size(new_object));
            out.copies.push(new_object);
        }
        None => out.failed.extend(fail_to_evacuate(space, object)),
    });
}

/// Forwards the fields of a batch of objects outside the collection set.
struct RefUpdateWork<VM: VMBinding> {
    space: Arc<RegionSpace>,
    objects: Vec<ObjectReference>,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> GCWork for RefUpdateWork<VM> {
    fn do_work(&mut self, _worker: &mut GCWorker) {
        for object in &self.objects {
            forward_fields::<VM>(&self.space, *object);
        }
    }
}

impl<VM: VMBinding> G1<VM> {
    /// Copy-on-discovery evacuation of `cset`.
    pub(super) fn single_pass_evacuation(
        &self,
        cset: &CollectionSet,
        dirty_cards: &[CardIndex],
    ) -> EvacuationOutcome {
        self.single_pass_active.store(true, Ordering::Release);
        let space = &*self.space;
        let scan_start = Instant::now();
        let remset = build_global_remset(space, cset, dirty_cards);
        let mut evacuator = Evacuator::<VM>::new(space);
        VM::VMScanning::scan_roots(&mut |slot: Slot| {
            evacuator.process_slot(slot);
        });
        remset.iterate(
            space,
            |region| !region.is_in_collection_set() && !region.is_free(),
            |region, range| {
                region.iterate_live_in_range(range, |object| {
                    VM::VMObjectModel::scan_object(
                        object,
                        &mut |src: ObjectReference, slot: Slot, offset: usize, _: bool| {
                            evacuator.process_remembered_slot(src, slot, offset)
                        },
                    );
                });
            },
        );
        let scan_time = scan_start.elapsed();
        let copy_start = Instant::now();
        evacuator.drain();
        let mut failed = std::mem::take(&mut *self.evacuation_failures.lock().unwrap());
        failed.append(&mut evacuator.failed);
        for id in &failed {
            remove_self_forwards::<VM>(space.region(*id), false);
        }
        let copy_time = copy_start.elapsed();
        self.single_pass_active.store(false, Ordering::Release);

        let tally = evacuator.tally;
        tally.flush(&mut self.stats.lock().unwrap());
        debug!(
            "Single-pass evacuation copied {} young and {} old objects",
            tally.young_objects, tally.tenured_objects
        );
        EvacuationOutcome {
            scanned_cards: remset.size(),
            scan_time,
            copied_bytes: tally.young_bytes + tally.tenured_bytes,
            copy_time,
            young_survived_bytes: tally.young_bytes,
            evacuation_failed: !failed.is_empty(),
            promoted: failed,
        }
    }

    /// Evacuate the transitive closure of `object` during a single-pass evacuation and return
    /// where `object` lives now.
    pub fn evacuate_starting_with(&self, object: ObjectReference) -> ObjectReference {
        assert!(
            self.single_pass_active.load(Ordering::Acquire),
            "evacuate_starting_with called outside a single-pass evacuation"
        );
        let mut evacuator = Evacuator::<VM>::new(&self.space);
        let new_object = if in_cset(&self.space, object) {
            evacuator.evacuate(object)
        } else {
            object
        };
        evacuator.drain();
        evacuator.tally.flush(&mut self.stats.lock().unwrap());
        self.evacuation_failures
            .lock()
            .unwrap()
            .append(&mut evacuator.failed);
        new_object
    }

    /// Mark `cset` from the roots and the remembered cards, promote or compact each region and
    /// update the references to the moved objects.
    pub(super) fn mark_and_compact(
        &self,
        cset: &CollectionSet,
        dirty_cards: &[CardIndex],
    ) -> EvacuationOutcome {
        let space = &*self.space;
        for id in cset.iter() {
            let region = space.region(id);
            region.mark_bitmap().clear_all();
            region.set_live_bytes(0);
        }

        let scan_start = Instant::now();
        let mut roots = vec![];
        let mut root_slots = vec![];
        VM::VMScanning::scan_roots(&mut |slot: Slot| {
            if let Some(target) = slot.load() {
                if in_cset(space, target) {
                    root_slots.push(slot);
                    if mark_live::<VM>(space, target) {
                        roots.push(target);
                    }
                }
            }
        });
        let remset = build_global_remset(space, cset, dirty_cards);
        let mut remembered_slots = vec![];
        remset.iterate(
            space,
            |region| !region.is_in_collection_set() && !region.is_free(),
            |region, range| {
                region.iterate_live_in_range(range, |object| {
                    VM::VMObjectModel::scan_object(
                        object,
                        &mut |src: ObjectReference, slot: Slot, offset: usize, _: bool| {
                            if let Some(target) = slot.load() {
                                if in_cset(space, target) {
                                    remembered_slots.push((src, slot, offset));
                                    if mark_live::<VM>(space, target) {
                                        roots.push(target);
                                    }
                                }
                            }
                        },
                    );
                });
            },
        );
        self.mark_from(roots, true);
        let scan_time = scan_start.elapsed();

        let rate = self.promotion_region_alive_rate();
        let (mut promoted, compacted): (Vec<RegionId>, Vec<RegionId>) =
            cset.iter().partition(|id| {
                let region = space.region(*id);
                region.is_eden()
                    && (region.has_pinned_objects() || Self::alive_rate(region) >= rate)
            });
        let mut young_survived_bytes = 0;
        for id in &promoted {
            let region = space.region(*id);
            young_survived_bytes += region.live_bytes();
            space.promote_region(*id);
            region.clone_mark_bitmap_to_live_bitmap();
        }

        let copy_start = Instant::now();
        let Compacted {
            copies,
            tally,
            failed,
        } = self.compact_regions(&compacted);
        young_survived_bytes += tally.young_bytes;
        for id in &failed {
            remove_self_forwards::<VM>(space.region(*id), true);
        }
        let promoted_on_purpose = promoted.len();
        promoted.extend_from_slice(&failed);

        for slot in root_slots {
            forward_slot(space, slot);
        }
        for (src, slot, offset) in remembered_slots {
            forward_slot(space, slot);
            record_cross_region_ref(space, src, slot, offset);
        }
        let mut updated = copies;
        for id in &promoted {
            space.region(*id).iterate_over_objects(|object| updated.push(object));
        }
        self.update_refs(updated);
        let copy_time = copy_start.elapsed();

        tally.flush(&mut self.stats.lock().unwrap());
        debug!(
            "Marked collection: {} regions promoted, {} young and {} old objects copied",
            promoted_on_purpose,
            tally.young_objects,
            tally.tenured_objects
        );
        EvacuationOutcome {
            scanned_cards: remset.size(),
            scan_time,
            copied_bytes: tally.young_bytes + tally.tenured_bytes,
            copy_time,
            young_survived_bytes,
            evacuation_failed: !failed.is_empty(),
            promoted,
        }
    }

    /// Copy the marked objects of `regions` into old regions.
    pub(super) fn compact_regions(&self, regions: &[RegionId]) -> Compacted {
        if self.options.parallel_compacting {
            let result = Arc::new(Mutex::new(Compacted::default()));
            let works: Vec<Box<dyn GCWork>> = regions
                .iter()
                .map(|id| {
                    Box::new(CompactionWork::<VM> {
                        space: self.space.clone(),
                        region: *id,
                        result: result.clone(),
                        _vm: PhantomData,
                    }) as Box<dyn GCWork>
                })
                .collect();
            self.scheduler.run_pause_works(works);
            let mut result = result.lock().unwrap();
            std::mem::take(&mut *result)
        } else {
            let mut compacted = Compacted::default();
            for id in regions {
                compact_region::<VM>(&self.space, *id, &mut compacted);
            }
            compacted
        }
    }

    /// Forward the fields of `objects` and record their cross-region references.
    pub(super) fn update_refs(&self, objects: Vec<ObjectReference>) {
        if self.options.parallel_ref_updating && objects.len() > REF_UPDATE_CHUNK {
            let works: Vec<Box<dyn GCWork>> = objects
                .chunks(REF_UPDATE_CHUNK)
                .map(|chunk| {
                    Box::new(RefUpdateWork::<VM> {
                        space: self.space.clone(),
                        objects: chunk.to_vec(),
                        _vm: PhantomData,
                    }) as Box<dyn GCWork>
                })
                .collect();
            self.scheduler.run_pause_works(works);
        } else {
            for object in objects {
                forward_fields::<VM>(&self.space, object);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::fixtures::MutatorFixture;
    use crate::util::test_util::mock_vm::{self, Root};
    use crate::AllocationSemantics;

    #[test]
    #[should_panic(expected = "outside a single-pass evacuation")]
    fn evacuate_starting_with_needs_an_evacuation() {
        let mut f = MutatorFixture::new(16);
        let object = f.new_object(0, 0);
        f.g1.evacuate_starting_with(object);
    }

    #[test]
    fn evacuate_starting_with_copies_the_closure() {
        let mut f = MutatorFixture::new(16);
        let a = f.new_object(1, 0);
        let b = f.new_object(0, 8);
        f.write(a, 0, Some(b));
        let eden = f.g1.space().region_of_object(a);
        eden.add_flag(RegionFlags::COLLECTION_SET);
        f.g1.single_pass_active.store(true, Ordering::Release);
        let a2 = f.g1.evacuate_starting_with(a);
        f.g1.single_pass_active.store(false, Ordering::Release);
        eden.rm_flag(RegionFlags::COLLECTION_SET);

        assert_ne!(a2, a);
        assert!(f.g1.space().region_of_object(a2).is_old());
        assert_eq!(object_forwarding::read_forwarding_pointer(a), a2);
        let b2 = mock_vm::get_field(a2, 0).unwrap();
        assert_ne!(b2, b);
        assert_eq!(object_forwarding::get_forwarded_or_self(b), b2);
        assert_eq!(f.g1.stats().young_moved_objects, 2);
    }

    #[test]
    fn compaction_without_room_keeps_the_region() {
        let mut f = MutatorFixture::with(16, |o| o.parallel_compacting = false);
        let object = f.new_object(0, 8);
        let _root = Root::new(Some(object));
        let space = f.g1.space().clone();
        let region = space.region_of_object(object);
        region.mark_bitmap().clear_all();
        region.mark_bitmap().mark(object);
        space.release_reserved_region();
        while space.allocate_region(RegionFlags::OLD).is_some() {}

        let compacted = f.g1.compact_regions(&[region.id()]);
        assert!(compacted.copies.is_empty());
        assert_eq!(compacted.failed, vec![region.id()]);
        assert!(region.is_old() && region.is_promoted());
        assert_eq!(object_forwarding::read_forwarding_pointer(object), object);

        remove_self_forwards::<mock_vm::MockVM>(region, true);
        assert!(!object_forwarding::is_forwarded(object));
        assert!(region.live_bitmap().is_marked(object));
        assert_eq!(region.live_bytes(), mock_vm::object_size(0, 8));
    }

    #[test]
    fn mostly_live_eden_region_is_promoted() {
        let mut f = MutatorFixture::with(16, |o| o.promotion_region_alive_rate = 50);
        let root = Root::new(None);
        // Fill most of one eden region with a reachable list.
        let head = f.new_object(1, 0);
        root.set(Some(head));
        let region = f.g1.space().region_of_object(head).id();
        let mut last = head;
        while f.g1.space().region(region).allocated_bytes() < f.g1.space().region_size() * 3 / 4 {
            let next = f.new_object(1, 64);
            if f.g1.space().region_of_object(next).id() != region {
                break;
            }
            f.write(last, 0, Some(next));
            last = next;
        }
        f.g1.collect(crate::plan::g1::GCTaskCause::YoungGc);
        assert_eq!(root.get(), Some(head));
        assert!(f.g1.space().region(region).is_old());
        assert_eq!(f.g1.stats().young_moved_objects, 0);
    }

    #[test]
    fn old_to_young_references_survive_both_strategies() {
        for single_pass in [false, true] {
            let mut f = MutatorFixture::with(16, |o| {
                o.single_pass_compaction = single_pass;
                o.parallel_compacting = false;
            });
            let holder = f.new_object_with(2, 0, AllocationSemantics::NonMoving);
            let _root = Root::new(Some(holder));
            // Teach the predictor that little of eden survives.
            let _keep = Root::new(Some(f.new_object(0, 8)));
            for _ in 0..100 {
                f.new_object(0, 64);
            }
            f.g1.collect(crate::plan::g1::GCTaskCause::YoungGc);
            let young = f.new_object(1, 0);
            let leaf = f.new_object(0, 8);
            f.write(young, 0, Some(leaf));
            f.write(holder, 0, Some(young));
            f.write(holder, 1, Some(leaf));
            f.g1.collect(crate::plan::g1::GCTaskCause::YoungGc);
            let young2 = mock_vm::get_field(holder, 0).unwrap();
            let leaf2 = mock_vm::get_field(holder, 1).unwrap();
            assert!(f.g1.space().region_of_object(young2).is_old());
            assert_eq!(mock_vm::get_field(young2, 0), Some(leaf2));
            assert_eq!(f.g1.verify_heap(), 0, "single_pass = {}", single_pass);
        }
    }
}
