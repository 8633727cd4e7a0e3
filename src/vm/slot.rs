use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::{Address, ObjectReference};

/// The address of a word holding an object reference, in an object or in a root.
/// A zero word is the null reference.
///
/// Loads and stores are atomic because mutators and the background remembered-set worker
/// may read a field while another thread writes it.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Slot(Address);

impl Slot {
    pub fn from_address(address: Address) -> Self {
        debug_assert!(address.is_aligned_to(std::mem::size_of::<usize>()));
        Slot(address)
    }

    pub fn as_address(&self) -> Address {
        self.0
    }

    fn word(&self) -> &AtomicUsize {
        unsafe { &*self.0.to_ptr::<AtomicUsize>() }
    }

    /// Load the reference, or `None` for null.
    pub fn load(&self) -> Option<ObjectReference> {
        let raw = self.word().load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(ObjectReference::from_raw_address(unsafe {
                Address::from_usize(raw)
            }))
        }
    }

    pub fn store(&self, object: ObjectReference) {
        self.word().store(object.value(), Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.word().store(0, Ordering::Relaxed)
    }
}
