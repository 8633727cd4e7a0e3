use super::mock_test_prelude::*;
use crate::util::options::{Options, UpdateRemsetStrategy};

const HOLDERS: usize = 8;
const SLOTS: usize = 4;

/// Old holders point at young objects only through barriered writes. After every young pause
/// each field must still reach the object with the tag it was given, so no write may be missed
/// by the card processing, wherever it happens.
fn young_targets_of_old_holders<F: FnOnce(&mut Options)>(configure: F) {
    let mut fixture = MutatorFixture::with(32, |o| {
        o.concurrent_marking = false;
        configure(o);
    });
    let holders: Vec<Root> = (0..HOLDERS)
        .map(|i| {
            let holder =
                new_tagged_with(&mut fixture, SLOTS, i, AllocationSemantics::NonMoving);
            Root::new(Some(holder))
        })
        .collect();
    for round in 0..4 {
        for (h, holder) in holders.iter().enumerate() {
            for slot in 0..SLOTS {
                let id = (round * HOLDERS + h) * SLOTS + slot;
                let target = new_tagged(&mut fixture, 0, id);
                let holder = holder.get().unwrap();
                fixture.write(holder, slot, Some(target));
            }
        }
        fixture.g1.collect(GCTaskCause::YoungGc);
        assert_eq!(fixture.g1.space().eden_length(), 0);
        for (h, holder) in holders.iter().enumerate() {
            let holder = holder.get().unwrap();
            assert_eq!(tag(holder), h);
            for slot in 0..SLOTS {
                let target = get_field(holder, slot).unwrap();
                let region = fixture.g1.space().region_of_object(target);
                assert!(!region.is_free() && !region.is_eden());
                assert_eq!(tag(target), (round * HOLDERS + h) * SLOTS + slot);
            }
        }
    }
    assert_eq!(fixture.g1.verify_heap(), 0);
}

macro_rules! cross_region_write_tests {
    ($($name: ident: $configure: expr,)*) => {
        paste::paste! {
            $(
                #[test]
                fn [<no_missed_write_ $name>]() {
                    panic_after(20_000, || young_targets_of_old_holders($configure));
                }
            )*
        }
    };
}

cross_region_write_tests! {
    processed_in_pauses: |o: &mut Options| o.concurrent_update_remset = false,
    thread_worker: |o: &mut Options| {
        o.concurrent_update_remset = true;
        o.update_remset_strategy = UpdateRemsetStrategy::Thread;
    },
    task_queue_worker: |o: &mut Options| {
        o.threads = 2;
        o.concurrent_update_remset = true;
        o.update_remset_strategy = UpdateRemsetStrategy::TaskQueue;
    },
}

#[test]
fn overwritten_references_are_not_kept_alive() {
    let mut fixture = MutatorFixture::with(16, |o| o.concurrent_marking = false);
    let holder = new_tagged_with(&mut fixture, 1, 0, AllocationSemantics::NonMoving);
    let _root = Root::new(Some(holder));
    let first = new_tagged(&mut fixture, 0, 1);
    fixture.write(holder, 0, Some(first));
    let second = new_tagged(&mut fixture, 0, 2);
    fixture.write(holder, 0, Some(second));
    let freed_before = fixture.g1.stats().young_freed_objects;
    fixture.g1.collect(GCTaskCause::YoungGc);
    assert_eq!(tag(get_field(holder, 0).unwrap()), 2);
    // `first` is only reachable through a dirty card that no longer points at it.
    assert_eq!(fixture.g1.stats().young_freed_objects, freed_before + 1);
}
