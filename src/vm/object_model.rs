use crate::util::ObjectReference;
use crate::vm::{SlotVisitor, VMBinding};

/// VM-specific object layout knowledge.
///
/// The collector owns the first word of every object (see
/// [`GC_HEADER_BYTES`](crate::util::constants::GC_HEADER_BYTES)) and copies objects bytewise, so
/// everything it needs from the binding is the object's size and its reference fields.
pub trait ObjectModel<VM: VMBinding> {
    /// Size of the object in bytes, including the collector-owned header word.
    fn get_current_size(object: ObjectReference) -> usize;

    /// Call `visitor` for every reference field of `object`, with the field's byte offset from
    /// the object start and whether the field is volatile.
    fn scan_object<SV: SlotVisitor>(object: ObjectReference, visitor: &mut SV);
}
