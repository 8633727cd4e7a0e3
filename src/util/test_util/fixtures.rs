// Not every test module uses every fixture.
#![allow(dead_code)]

use crate::memory_manager;
use crate::plan::g1::G1;
use crate::plan::Mutator;
use crate::policy::region::RegionSpace;
use crate::util::constants::*;
use crate::util::options::Options;
use crate::util::test_util::mock_vm::{self, MockVM};
use crate::util::ObjectReference;
use crate::AllocationSemantics;
use std::sync::Arc;

/// The smallest region the options accept.
pub const TEST_REGION_SIZE: usize = 4 * BYTES_IN_CARD;

/// Options for a heap of `regions` small regions with no GC worker threads and no background
/// remembered-set update, so that every collection is deterministic.
pub fn test_options(regions: usize) -> Options {
    let mut options = Options::without_env();
    options.region_size = TEST_REGION_SIZE;
    options.heap_size = regions * TEST_REGION_SIZE;
    options.threads = 0;
    options.concurrent_update_remset = false;
    options.release_free_pages = false;
    options.verify_heap = true;
    options
}

pub fn small_region_space(regions: usize) -> RegionSpace {
    RegionSpace::new(&test_options(regions)).unwrap()
}

/// A collector over `regions` small regions, configured further by `configure`.
pub fn g1_with<F: FnOnce(&mut Options)>(regions: usize, configure: F) -> Arc<G1<MockVM>> {
    let mut options = test_options(regions);
    configure(&mut options);
    memory_manager::g1_init::<MockVM>(options).unwrap()
}

pub fn g1(regions: usize) -> Arc<G1<MockVM>> {
    g1_with(regions, |_| {})
}

/// A collector plus one bound mutator.
pub struct MutatorFixture {
    pub g1: Arc<G1<MockVM>>,
    pub mutator: Box<Mutator<MockVM>>,
}

impl MutatorFixture {
    pub fn new(regions: usize) -> Self {
        Self::with(regions, |_| {})
    }

    pub fn with<F: FnOnce(&mut Options)>(regions: usize, configure: F) -> Self {
        mock_vm::clear_roots();
        let g1 = g1_with(regions, configure);
        let mutator = memory_manager::bind_mutator(&g1);
        MutatorFixture { g1, mutator }
    }

    /// Allocate and initialize an object with `slots` reference fields.
    pub fn new_object(&mut self, slots: usize, payload: usize) -> ObjectReference {
        self.new_object_with(slots, payload, AllocationSemantics::Default)
    }

    pub fn new_object_with(
        &mut self,
        slots: usize,
        payload: usize,
        semantics: AllocationSemantics,
    ) -> ObjectReference {
        self.try_new_object_with(slots, payload, semantics)
            .expect("out of memory in a test")
    }

    pub fn try_new_object_with(
        &mut self,
        slots: usize,
        payload: usize,
        semantics: AllocationSemantics,
    ) -> Option<ObjectReference> {
        let size = mock_vm::object_size(slots, payload);
        let addr = memory_manager::alloc(&mut self.mutator, size, semantics)?;
        Some(mock_vm::init_object(addr, slots, payload))
    }

    /// Store `target` into field `index` of `object` through the write barriers.
    pub fn write(
        &mut self,
        object: ObjectReference,
        index: usize,
        target: Option<ObjectReference>,
    ) {
        memory_manager::object_reference_write(
            &mut self.mutator,
            object,
            mock_vm::slot(object, index),
            target,
        );
    }
}

impl Drop for MutatorFixture {
    fn drop(&mut self) {
        mock_vm::clear_roots();
    }
}
