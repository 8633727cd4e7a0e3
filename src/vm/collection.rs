use crate::vm::VMBinding;

/// The thread-enumeration facility the collector uses around its pauses.
pub trait Collection<VM: VMBinding> {
    /// Stop every mutator thread at a safepoint. Returns once all of them are parked.
    fn stop_all_mutators();

    /// Resume the mutators stopped by `stop_all_mutators`.
    fn resume_mutators();
}
