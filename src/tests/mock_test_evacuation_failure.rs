use super::mock_test_prelude::*;

/// Just under half a region. Two fit into one region, three do not.
const LARGE_PAYLOAD: usize = 7520;
/// Two of these plus two `LARGE_PAYLOAD` objects overflow a region.
const SMALL_PAYLOAD: usize = 1624;

fn new_with_payload(
    fixture: &mut MutatorFixture,
    payload_bytes: usize,
    id: usize,
) -> ObjectReference {
    let object = fixture.new_object(0, payload_bytes);
    unsafe { payload(object).store::<usize>(id) };
    object
}

#[test]
pub fn young_collection_out_of_room_finishes_as_full_collection() {
    let mut fixture = MutatorFixture::with(16, |o| {
        o.concurrent_marking = false;
        o.single_pass_compaction = true;
        o.parallel_compacting = false;
    });
    // A first pause where almost nothing survives makes the next one copy on discovery.
    let _survivor = Root::new(Some(new_tagged(&mut fixture, 0, 100)));
    for _ in 0..100 {
        fixture.new_object(0, 64);
    }
    fixture.g1.collect(GCTaskCause::YoungGc);
    assert_eq!(fixture.g1.stats().collections[GCKind::Young], 1);

    // Leave exactly three free regions besides the reserved one.
    let region_size = fixture.g1.space().region_size();
    let mut large = vec![];
    while fixture.g1.space().free_region_count() > 6 {
        let object = fixture.new_object(0, region_size - 16);
        large.push(Root::new(Some(object)));
    }

    // Three eden regions: [L0 L1] [L2 L3] [L4 S0 S1 S2 S3].
    let larges: Vec<ObjectReference> = (0..5)
        .map(|i| new_with_payload(&mut fixture, LARGE_PAYLOAD, i))
        .collect();
    let smalls: Vec<ObjectReference> = (0..4)
        .map(|i| new_with_payload(&mut fixture, SMALL_PAYLOAD, 10 + i))
        .collect();
    assert_eq!(fixture.g1.space().eden_length(), 3);
    assert_eq!(fixture.g1.space().free_region_count(), 3);

    // Discovered as L S L S L S L S L, the copies take one region per L. The fifth does not fit.
    let mut roots = vec![];
    for (i, object) in larges.iter().enumerate() {
        roots.push((i, Root::new(Some(*object))));
        if let Some(small) = smalls.get(i) {
            roots.push((10 + i, Root::new(Some(*small))));
        }
    }
    fixture.g1.collect(GCTaskCause::YoungGc);

    let stats = fixture.g1.stats();
    assert_eq!(stats.collections[GCKind::Young], 1);
    assert_eq!(stats.collections[GCKind::Full], 1);
    for (id, root) in &roots {
        let object = root.get().unwrap();
        assert_eq!(tag(object), *id);
        assert!(!crate::util::object_forwarding::is_forwarded(object));
    }
    assert!(fixture
        .g1
        .space()
        .regions()
        .all(|r| !r.is_promoted() && !r.is_in_collection_set()));
    assert_eq!(fixture.g1.verify_heap(), 0);
}
