use super::evacuation::{forward_slot, remove_self_forwards};
use super::global::{GCPhase, G1};
use super::marking::mark_live;
use crate::policy::region::{RegionFlags, RegionId};
use crate::util::conversions;
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, Scanning, Slot, VMBinding};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;

impl<VM: VMBinding> G1<VM> {
    /// Mark the whole heap, free what is empty and compact what is fragmented. Remembered sets
    /// are dropped at the start and rebuilt at the end.
    pub(super) fn full_gc(&self) {
        self.set_phase(GCPhase::FullCollection);
        let space = &*self.space;
        let table = space.card_table();

        // A young pause that ran out of room may have left its old region half full. Compacted
        // objects must not land in a region that is itself being compacted.
        space.reset_tenured_alloc_region();
        drop(self.update_remset.drain_all_cards());
        self.update_remset.core().hot_cards().clear_hot_cards(table);
        self.top_garbage_regions.lock().unwrap().clear();
        self.is_mixed_gc_required.store(false, Ordering::Release);
        for region in space.used_regions() {
            if !region.is_eden() {
                table.clear_card_range(region.start(), region.end());
            }
            region.remset().clear();
            region.mark_bitmap().clear_all();
            region.set_live_bytes(0);
        }

        let mut roots = vec![];
        VM::VMScanning::scan_roots(&mut |slot: Slot| {
            if let Some(object) = slot.load() {
                if space.in_heap(object.to_raw_address()) && mark_live::<VM>(space, object) {
                    roots.push(object);
                }
            }
        });
        self.mark_from(roots, false);

        let mut stats = self.stats.lock().unwrap();
        for region in space.used_regions() {
            let (mut bytes, mut objects) = (0, 0);
            region.iterate_over_objects(|object| {
                if !region.is_marked(object) {
                    bytes += VM::VMObjectModel::get_current_size(object);
                    objects += 1;
                }
            });
            stats.record_freed(region.is_eden(), bytes, objects);
            region.clone_mark_bitmap_to_live_bitmap();
        }
        drop(stats);

        let empty: Vec<RegionId> = space
            .used_regions()
            .filter(|r| r.live_bytes() == 0 && !r.has_pinned_objects())
            .map(|r| r.id())
            .collect();
        for id in &empty {
            space.free_region(*id);
        }
        space.release_reserved_region();

        let rate = self.options.full_gc_region_fragmentation_rate;
        let mut candidates: VecDeque<RegionId> = space
            .used_regions()
            .filter(|r| {
                r.is_old()
                    && !r.is_non_regular()
                    && !r.has_pinned_objects()
                    && conversions::percentage(r.size() - r.live_bytes(), r.size()) >= rate
            })
            .map(|r| r.id())
            .collect();
        let old_candidates = candidates.len();
        candidates.extend(
            space
                .used_regions()
                .filter(|r| r.is_eden() && !r.has_pinned_objects())
                .map(|r| r.id()),
        );
        let mut batches = 0;
        while let Some(batch) = self.next_compaction_batch(&mut candidates) {
            batches += 1;
            if !self.compact_batch(&batch) {
                warn!("Full collection ran out of room while compacting, stopping early");
                break;
            }
        }
        let skipped_old = candidates.iter().filter(|id| !space.region(**id).is_eden()).count();

        // Eden regions that could not be compacted, or hold pinned objects, become old in place.
        for id in space.eden_regions() {
            space.promote_region(id);
            space.region(id).rm_flag(RegionFlags::PROMOTED);
        }

        let mut live = vec![];
        for region in space.used_regions() {
            region.iterate_over_objects(|object| live.push(object));
        }
        self.update_refs(live);

        space.reserve_region();
        space.bump_young_epoch();
        debug!(
            "Full collection: {} empty regions freed, {} of {} fragmented old regions \
             compacted in {} batches",
            empty.len(),
            old_candidates.saturating_sub(skipped_old),
            old_candidates,
            batches
        );
    }

    /// Take regions off `candidates` for as long as their live bytes fit into the free regions,
    /// keeping one region of slack for the packing.
    fn next_compaction_batch(&self, candidates: &mut VecDeque<RegionId>) -> Option<Vec<RegionId>> {
        let region_size = self.space.region_size();
        let free = self.space.free_region_count();
        let mut bytes = 0;
        let mut batch = vec![];
        while let Some(&id) = candidates.front() {
            let total = bytes + self.space.region(id).live_bytes();
            if conversions::raw_align_up(total, region_size) / region_size + 1 > free {
                break;
            }
            bytes = total;
            batch.push(id);
            candidates.pop_front();
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    /// Copy the live objects of `batch` out, point every live reference at the copies and free
    /// the batch. Returns false if some region of the batch could not be emptied. It is kept.
    fn compact_batch(&self, batch: &[RegionId]) -> bool {
        let space = &*self.space;
        for id in batch {
            space.region(*id).add_flag(RegionFlags::COLLECTION_SET);
        }
        let compacted = self.compact_regions(batch);
        compacted.tally.flush(&mut self.stats.lock().unwrap());
        for id in &compacted.failed {
            remove_self_forwards::<VM>(space.region(*id), true);
        }

        VM::VMScanning::scan_roots(&mut |slot: Slot| forward_slot(space, slot));
        for region in space
            .used_regions()
            .filter(|r| !r.is_in_collection_set() || r.is_promoted())
        {
            region.iterate_over_objects(|object: ObjectReference| {
                VM::VMObjectModel::scan_object(
                    object,
                    &mut |_: ObjectReference, slot: Slot, _: usize, _: bool| {
                        forward_slot(space, slot)
                    },
                );
            });
        }
        for id in batch {
            let region = space.region(*id);
            region.rm_flag(RegionFlags::COLLECTION_SET);
            if compacted.failed.contains(id) {
                region.rm_flag(RegionFlags::PROMOTED);
            } else {
                space.free_region(*id);
            }
        }
        trace!("Compacted {} regions", batch.len());
        compacted.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::g1::{GCKind, GCTaskCause};
    use crate::util::test_util::fixtures::MutatorFixture;
    use crate::util::test_util::mock_vm::{self, Root};
    use crate::AllocationSemantics;

    #[test]
    fn full_collection_compacts_fragmented_old_regions() {
        let mut f = MutatorFixture::with(32, |o| o.concurrent_marking = false);
        let roots: Vec<Root> = (0..6)
            .map(|_| Root::new(None))
            .collect();
        // Six old regions, each holding one small survivor.
        for root in &roots {
            let survivor = f.new_object(0, 64);
            root.set(Some(survivor));
            f.g1.collect(GCTaskCause::YoungGc);
        }
        let old = |f: &MutatorFixture| f.g1.space().used_regions().filter(|r| r.is_old()).count();
        assert!(old(&f) >= 1);
        f.g1.collect(GCTaskCause::Explicit);
        assert_eq!(old(&f), 1);
        for root in &roots {
            let object = root.get().unwrap();
            assert!(f.g1.space().region_of_object(object).live_bitmap().is_marked(object));
        }
        assert_eq!(f.g1.stats().collections[GCKind::Full], 1);
    }

    #[test]
    fn full_collection_frees_dead_regions_and_rebuilds_remsets() {
        let mut f = MutatorFixture::new(16);
        let holder = f.new_object_with(1, 0, AllocationSemantics::NonMoving);
        let target = f.new_object(0, 8);
        f.write(holder, 0, Some(target));
        let _root = Root::new(Some(holder));
        let garbage = f.new_object_with(0, 0, AllocationSemantics::Large);
        let garbage_region = f.g1.space().region_of_object(garbage).id();
        f.g1.collect(GCTaskCause::Explicit);

        let space = f.g1.space();
        assert!(space.region(garbage_region).is_free());
        assert_eq!(space.eden_length(), 0);
        let moved = mock_vm::get_field(holder, 0).unwrap();
        assert!(space.region_of_object(moved).is_old());
        assert!(space
            .region_of_object(moved)
            .remset()
            .contains(space, holder.to_raw_address()));
        assert!(!f.g1.is_mixed_gc_required());
    }

    #[test]
    fn pinned_eden_survives_full_collection_in_place() {
        let mut f = MutatorFixture::new(16);
        let pinned = f.new_object(0, 8);
        let root = Root::new(Some(pinned));
        f.g1.pin_object(pinned);
        f.g1.collect(GCTaskCause::Explicit);
        assert_eq!(root.get(), Some(pinned));
        assert!(f.g1.space().region_of_object(pinned).is_old());
        f.g1.unpin_object(pinned);
    }
}
