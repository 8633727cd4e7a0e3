//! Forwarding state kept in the collector-owned header word of every object.
//!
//! The two low bits of the word hold the state, the rest holds the forwarding pointer
//! once the state is `FORWARDED`. A word of zero means the object was never forwarded.

use crate::util::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

const FORWARDING_NOT_TRIGGERED_YET: u8 = 0b00;
const BEING_FORWARDED: u8 = 0b10;
const FORWARDED: u8 = 0b11;
const FORWARDING_MASK: usize = 0b11;
const FORWARDING_POINTER_MASK: usize = !FORWARDING_MASK;

fn header(object: ObjectReference) -> &'static AtomicUsize {
    unsafe { &*object.to_raw_address().to_ptr::<AtomicUsize>() }
}

/// Attempt to become the worker thread who will forward the object.
/// The successful worker will set the object forwarding bits to BEING_FORWARDED, preventing
/// other workers from forwarding the same object.
pub fn attempt_to_forward(object: ObjectReference) -> u8 {
    loop {
        let old_value = get_forwarding_status(object);
        if old_value != FORWARDING_NOT_TRIGGERED_YET
            || header(object)
                .compare_exchange(
                    FORWARDING_NOT_TRIGGERED_YET as usize,
                    BEING_FORWARDED as usize,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            return old_value;
        }
    }
}

/// Spin-wait for the object's forwarding to become complete and then read the forwarding
/// pointer to the new object.
///
/// # Arguments:
///
/// * `object`: the forwarded/being_forwarded object.
/// * `forwarding_bits`: the last state of the forwarding bits before calling this function.
///
/// Returns a reference to the new object.
pub fn spin_and_get_forwarded_object(
    object: ObjectReference,
    forwarding_bits: u8,
) -> ObjectReference {
    let mut forwarding_bits = forwarding_bits;
    while forwarding_bits == BEING_FORWARDED {
        std::hint::spin_loop();
        forwarding_bits = get_forwarding_status(object);
    }

    if forwarding_bits == FORWARDED {
        read_forwarding_pointer(object)
    } else {
        debug_assert!(
            forwarding_bits == FORWARDING_NOT_TRIGGERED_YET,
            "Invalid/Corrupted forwarding word {:x} for object {}",
            forwarding_bits,
            object,
        );
        object
    }
}

/// Publish the new location of `object`. Called by the worker that won `attempt_to_forward`,
/// or by a single-threaded compactor that owns the source region.
pub fn write_forwarding_pointer(object: ObjectReference, new_object: ObjectReference) {
    debug_assert!(new_object.value() & FORWARDING_MASK == 0);
    trace!("write_forwarding_pointer({}, {})", object, new_object);
    header(object).store(new_object.value() | FORWARDED as usize, Ordering::SeqCst);
}

/// Return the forwarding bits for a given `ObjectReference`.
pub fn get_forwarding_status(object: ObjectReference) -> u8 {
    (header(object).load(Ordering::SeqCst) & FORWARDING_MASK) as u8
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    get_forwarding_status(object) == FORWARDED
}

pub fn state_is_forwarded_or_being_forwarded(forwarding_bits: u8) -> bool {
    forwarding_bits != FORWARDING_NOT_TRIGGERED_YET
}

/// The object a reference should point to now: the forwarded copy if there is one.
pub fn get_forwarded_or_self(object: ObjectReference) -> ObjectReference {
    if is_forwarded(object) {
        read_forwarding_pointer(object)
    } else {
        object
    }
}

/// Zero the header word of an object.
/// This function is used on new objects and on fresh copies.
pub fn clear_forwarding_bits(object: ObjectReference) {
    header(object).store(0, Ordering::SeqCst)
}

/// Read the forwarding pointer of an object.
/// This function is called on forwarded objects.
pub fn read_forwarding_pointer(object: ObjectReference) -> ObjectReference {
    debug_assert!(
        is_forwarded(object),
        "read_forwarding_pointer called for object {:?} that has not been forwarded!",
        object,
    );
    let raw = header(object).load(Ordering::SeqCst) & FORWARDING_POINTER_MASK;
    ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_object(storage: &mut [usize; 2]) -> ObjectReference {
        ObjectReference::from_raw_address(Address::from_mut_ptr(storage.as_mut_ptr()))
    }

    #[test]
    fn forward_once() {
        let mut from = [0usize; 2];
        let mut to = [0usize; 2];
        let object = fake_object(&mut from);
        let new_object = fake_object(&mut to);

        assert_eq!(attempt_to_forward(object), FORWARDING_NOT_TRIGGERED_YET);
        // A second attempt observes the first one.
        let state = attempt_to_forward(object);
        assert!(state_is_forwarded_or_being_forwarded(state));
        write_forwarding_pointer(object, new_object);
        assert!(is_forwarded(object));
        assert_eq!(spin_and_get_forwarded_object(object, state), new_object);
        assert_eq!(get_forwarded_or_self(object), new_object);
        assert_eq!(get_forwarded_or_self(new_object), new_object);
    }

    #[test]
    fn clear_resets_state() {
        let mut from = [0usize; 2];
        let mut to = [0usize; 2];
        let object = fake_object(&mut from);
        write_forwarding_pointer(object, fake_object(&mut to));
        clear_forwarding_bits(object);
        assert_eq!(get_forwarding_status(object), FORWARDING_NOT_TRIGGERED_YET);
    }
}
