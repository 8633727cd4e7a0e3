//! A binding used by the collector tests.
//!
//! Object layout, in words:
//!
//! ```text
//! [ GC header | slots (low 32 bits), payload bytes (high 32 bits) | slot 0 .. slot n-1 | payload ]
//! ```
//!
//! Roots are per-thread cells, so tests running in parallel on different threads never see each
//! other's roots.

use crate::util::constants::*;
use crate::util::conversions::raw_align_up;
use crate::util::{Address, ObjectReference};
use crate::vm::*;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockObjectModel;
    type VMScanning = MockScanning;
    type VMCollection = MockCollection;
}

const HEADER_WORDS: usize = 2;

/// Size in bytes of an object with `slots` reference fields and `payload` other bytes.
pub fn object_size(slots: usize, payload: usize) -> usize {
    (HEADER_WORDS + slots) * BYTES_IN_WORD + raw_align_up(payload, BYTES_IN_WORD)
}

/// Write the header of a fresh, zeroed object.
pub fn init_object(addr: Address, slots: usize, payload: usize) -> ObjectReference {
    debug_assert!(slots <= u32::MAX as usize && payload <= u32::MAX as usize);
    unsafe { (addr + BYTES_IN_WORD).store::<usize>(slots | (payload << 32)) };
    ObjectReference::from_raw_address(addr)
}

fn shape(object: ObjectReference) -> (usize, usize) {
    let word = unsafe { (object.to_raw_address() + BYTES_IN_WORD).load::<usize>() };
    (word & 0xffff_ffff, word >> 32)
}

pub fn num_slots(object: ObjectReference) -> usize {
    shape(object).0
}

pub fn slot(object: ObjectReference, index: usize) -> Slot {
    debug_assert!(index < num_slots(object));
    Slot::from_address(object.to_raw_address() + (HEADER_WORDS + index) * BYTES_IN_WORD)
}

pub fn get_field(object: ObjectReference, index: usize) -> Option<ObjectReference> {
    slot(object, index).load()
}

/// Start of the non-reference payload.
pub fn payload(object: ObjectReference) -> Address {
    object.to_raw_address() + (HEADER_WORDS + num_slots(object)) * BYTES_IN_WORD
}

pub struct MockObjectModel;

impl ObjectModel<MockVM> for MockObjectModel {
    fn get_current_size(object: ObjectReference) -> usize {
        let (slots, payload) = shape(object);
        object_size(slots, payload)
    }

    fn scan_object<SV: SlotVisitor>(object: ObjectReference, visitor: &mut SV) {
        for i in 0..num_slots(object) {
            let offset = (HEADER_WORDS + i) * BYTES_IN_WORD;
            visitor.visit_slot(object, slot(object, i), offset, false);
        }
    }
}

thread_local! {
    static ROOTS: RefCell<Vec<Box<AtomicUsize>>> = const { RefCell::new(vec![]) };
    static PAUSES: RefCell<usize> = const { RefCell::new(0) };
}

/// Index of a root cell of the current thread.
#[derive(Copy, Clone, Debug)]
pub struct Root(usize);

impl Root {
    pub fn new(object: Option<ObjectReference>) -> Root {
        ROOTS.with(|roots| {
            let mut roots = roots.borrow_mut();
            roots.push(Box::new(AtomicUsize::new(object.map_or(0, |o| o.value()))));
            Root(roots.len() - 1)
        })
    }

    pub fn get(self) -> Option<ObjectReference> {
        self.slot().load()
    }

    pub fn set(self, object: Option<ObjectReference>) {
        match object {
            Some(o) => self.slot().store(o),
            None => self.slot().clear(),
        }
    }

    pub fn slot(self) -> Slot {
        ROOTS.with(|roots| Slot::from_address(Address::from_ref(&*roots.borrow()[self.0])))
    }
}

/// Drop every root of the current thread.
pub fn clear_roots() {
    ROOTS.with(|roots| roots.borrow_mut().clear());
}

/// Number of pauses that stopped the mutators of the current thread.
pub fn pauses() -> usize {
    PAUSES.with(|p| *p.borrow())
}

pub struct MockScanning;

impl Scanning<MockVM> for MockScanning {
    fn scan_roots(visitor: &mut dyn FnMut(Slot)) {
        let slots: Vec<Slot> = ROOTS.with(|roots| {
            roots
                .borrow()
                .iter()
                .map(|cell| Slot::from_address(Address::from_ref(&**cell)))
                .collect()
        });
        for slot in slots {
            visitor(slot);
        }
    }
}

pub struct MockCollection;

static STOPPED: AtomicUsize = AtomicUsize::new(0);

impl Collection<MockVM> for MockCollection {
    fn stop_all_mutators() {
        STOPPED.fetch_add(1, Ordering::SeqCst);
        PAUSES.with(|p| *p.borrow_mut() += 1);
    }

    fn resume_mutators() {
        STOPPED.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_layout() {
        let mut memory = [0usize; 8];
        let addr = Address::from_mut_ptr(memory.as_mut_ptr());
        let object = init_object(addr, 2, 12);
        assert_eq!(num_slots(object), 2);
        assert_eq!(MockObjectModel::get_current_size(object), 16 + 16 + 16);
        assert_eq!(payload(object), addr + 32usize);
        let mut offsets = vec![];
        MockObjectModel::scan_object(
            object,
            &mut |_: ObjectReference, _: Slot, offset: usize, _: bool| offsets.push(offset),
        );
        assert_eq!(offsets, vec![16, 24]);
    }

    #[test]
    fn roots_are_visited() {
        clear_roots();
        let target = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000) });
        let root = Root::new(Some(target));
        let _empty = Root::new(None);
        let mut seen = vec![];
        MockScanning::scan_roots(&mut |slot| seen.push(slot.load()));
        assert_eq!(seen, vec![Some(target), None]);
        root.set(None);
        assert_eq!(root.get(), None);
        clear_roots();
    }
}
