// Scenarios that drive a whole collector through the mock binding.
//
// Every test creates its own collector. Roots of the mock binding are thread-local, so tests
// running in parallel never see each other's objects. Tests that spawn threads create the
// collector and all of its objects on one thread.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::memory_manager;
    pub use crate::plan::g1::{GCKind, GCPhase, GCTaskCause};
    pub use crate::util::test_util::fixtures::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::test_util::panic_after;
    pub use crate::util::ObjectReference;
    pub use crate::vm::*;
    pub use crate::AllocationSemantics;

    /// Allocate an object with `slots` fields and a one-word payload holding `id`.
    pub fn new_tagged(fixture: &mut MutatorFixture, slots: usize, id: usize) -> ObjectReference {
        new_tagged_with(fixture, slots, id, AllocationSemantics::Default)
    }

    pub fn new_tagged_with(
        fixture: &mut MutatorFixture,
        slots: usize,
        id: usize,
        semantics: AllocationSemantics,
    ) -> ObjectReference {
        let object = fixture.new_object_with(slots, 8, semantics);
        unsafe { payload(object).store::<usize>(id) };
        object
    }

    pub fn tag(object: ObjectReference) -> usize {
        unsafe { payload(object).load::<usize>() }
    }

}

mod mock_test_allocate_unrealistically_large_object;
mod mock_test_cross_region_writes;
mod mock_test_evacuation_failure;
mod mock_test_pause_time_goal;
mod mock_test_pinning;
