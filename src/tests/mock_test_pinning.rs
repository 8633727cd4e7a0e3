use super::mock_test_prelude::*;

#[test]
fn pinned_object_stays_put_through_every_kind_of_collection() {
    let mut fixture = MutatorFixture::new(32);
    let pinned = new_tagged(&mut fixture, 1, 42);
    let root = Root::new(Some(pinned));
    memory_manager::pin_object(&fixture.g1, pinned);
    let neighbour = new_tagged(&mut fixture, 0, 43);
    fixture.write(pinned, 0, Some(neighbour));

    for cause in [
        GCTaskCause::YoungGc,
        GCTaskCause::HeapUsageThreshold,
        GCTaskCause::MixedRetry,
        GCTaskCause::Explicit,
    ] {
        fixture.g1.collect(cause);
        assert_eq!(root.get(), Some(pinned));
        assert_eq!(tag(pinned), 42);
        assert_eq!(tag(get_field(pinned, 0).unwrap()), 43);
    }
    let region = fixture.g1.space().region_of_object(pinned).id();
    memory_manager::unpin_object(&fixture.g1, pinned);
    assert!(!fixture.g1.space().region(region).has_pinned_objects());

    // Once unpinned, the region can be reclaimed.
    root.set(None);
    fixture.g1.collect(GCTaskCause::Explicit);
    assert!(fixture.g1.space().region(region).is_free());
}
