use crate::util::ObjectReference;
use crate::vm::{Slot, VMBinding};

/// Callback of object scanning. Called as `visit_slot(object, slot, offset, is_volatile)`.
pub trait SlotVisitor {
    fn visit_slot(&mut self, object: ObjectReference, slot: Slot, offset: usize, is_volatile: bool);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(ObjectReference, Slot, usize, bool)> SlotVisitor for F {
    fn visit_slot(
        &mut self,
        object: ObjectReference,
        slot: Slot,
        offset: usize,
        is_volatile: bool,
    ) {
        self(object, slot, offset, is_volatile)
    }
}

pub trait Scanning<VM: VMBinding> {
    /// Report every non-heap root slot (thread stacks, globals, handles).
    /// The collector may overwrite a reported slot when the object it refers to moves.
    fn scan_roots(visitor: &mut dyn FnMut(Slot));
}
