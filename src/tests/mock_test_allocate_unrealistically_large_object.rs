use super::mock_test_prelude::*;

#[test]
pub fn allocate_larger_than_a_region() {
    let mut fixture = MutatorFixture::new(16);
    let size = TEST_REGION_SIZE * 2;
    let addr = memory_manager::alloc(&mut fixture.mutator, size, AllocationSemantics::Default);
    assert!(addr.is_none());
    // The failed request was retried after a young and after a full collection.
    let stats = fixture.g1.stats();
    assert_eq!(stats.collections[GCKind::Full], 1);
    assert_eq!(stats.total_collections(), 2);
    // Ordinary allocation still works afterwards.
    assert!(
        memory_manager::alloc(&mut fixture.mutator, 64, AllocationSemantics::Default).is_some()
    );
}
