//! Runtime-to-collector interface: safe Rust APIs.
//!
//! A runtime creates one collector with [`g1_init`], binds one [`Mutator`] per thread with
//! [`bind_mutator`], allocates through [`alloc`] and performs every reference store into the heap
//! through [`object_reference_write`] (or through the pre and post halves of it when the store
//! itself is done by generated code).
//!
//! For mutators, this API hands out a `Box<Mutator>` and requires a `&mut Mutator` for allocation
//! and barriers. A runtime may turn the box into a raw pointer for its own thread structures, as
//! long as it keeps the pointer to a single thread and hands the box back to [`destroy_mutator`].

use crate::plan::g1::{GCTaskCause, G1};
use crate::plan::{AllocationSemantics, Mutator};
use crate::policy::region::RegionFlags;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::{Slot, VMBinding};
use std::io;
use std::sync::Arc;

/// Create a collector over a heap described by `options`, with its worker threads and its
/// remembered-set update worker running.
///
/// Note that this method will attempt to initialize a logger. If the runtime would like to use
/// its own logger, it should initialize the logger before calling this method.
pub fn g1_init<VM: VMBinding>(options: Options) -> io::Result<Arc<G1<VM>>> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("regiongc initialized the logger."),
        Err(_) => debug!(
            "regiongc failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    let g1 = G1::new(options)?;
    info!(
        "Initialized a heap of {} regions of {} bytes",
        g1.space().region_count(),
        g1.space().region_size()
    );
    Ok(g1)
}

/// Request a mutator context for the current thread.
pub fn bind_mutator<VM: VMBinding>(g1: &Arc<G1<VM>>) -> Box<Mutator<VM>> {
    let mutator = Box::new(Mutator::new(g1.clone()));
    debug!("Bound mutator {}", mutator.id());
    mutator
}

/// The thread of `mutator` terminates. Its barrier buffers are handed over to the collector.
pub fn destroy_mutator<VM: VMBinding>(mutator: Box<Mutator<VM>>) {
    debug!("Destroying mutator {}", mutator.id());
    drop(mutator);
}

/// Allocate `size` bytes of zeroed memory. This may trigger a collection. `None` means the heap
/// is exhausted even after a full collection.
pub fn alloc<VM: VMBinding>(
    mutator: &mut Mutator<VM>,
    size: usize,
    semantics: AllocationSemantics,
) -> Option<Address> {
    mutator.alloc(size, semantics)
}

/// Store `target` into `slot` of `src`, wrapped in both write barriers.
pub fn object_reference_write<VM: VMBinding>(
    mutator: &mut Mutator<VM>,
    src: ObjectReference,
    slot: Slot,
    target: Option<ObjectReference>,
) {
    object_reference_write_pre(mutator, src, slot, target);
    match target {
        Some(target) => slot.store(target),
        None => slot.clear(),
    }
    object_reference_write_post(mutator, src, slot, target);
}

/// The barrier before a reference store. `slot` must still hold the value being overwritten.
pub fn object_reference_write_pre<VM: VMBinding>(
    mutator: &mut Mutator<VM>,
    _src: ObjectReference,
    slot: Slot,
    _target: Option<ObjectReference>,
) {
    mutator
        .plan
        .barrier_set()
        .pre_barrier(&mutator.shared, slot.load());
}

/// The barrier after a reference store.
pub fn object_reference_write_post<VM: VMBinding>(
    mutator: &mut Mutator<VM>,
    src: ObjectReference,
    _slot: Slot,
    target: Option<ObjectReference>,
) {
    mutator
        .plan
        .barrier_set()
        .post_barrier(&mutator.shared, src, target);
}

/// Keep `object` where it is until [`unpin_object`] is called. Its whole region stays in place.
pub fn pin_object<VM: VMBinding>(g1: &G1<VM>, object: ObjectReference) {
    g1.pin_object(object);
}

pub fn unpin_object<VM: VMBinding>(g1: &G1<VM>, object: ObjectReference) {
    g1.unpin_object(object);
}

/// Postpone collections: until [`postpone_gc_end`], every collection promotes its survivors in
/// place and no concurrent marking is started.
pub fn postpone_gc_start<VM: VMBinding>(g1: &G1<VM>) {
    g1.postpone_gc_start();
}

pub fn postpone_gc_end<VM: VMBinding>(g1: &G1<VM>) {
    g1.postpone_gc_end();
}

/// The runtime requests a full collection, for example for `System.gc()`.
pub fn handle_user_collection_request<VM: VMBinding>(g1: &G1<VM>) {
    g1.collect(GCTaskCause::Explicit);
}

/// Is `object` inside the collected heap?
pub fn is_in_heap<VM: VMBinding>(g1: &G1<VM>, object: ObjectReference) -> bool {
    g1.space().in_heap(object.to_raw_address())
}

/// Bytes handed out to live or dead objects in regions that are not free.
pub fn used_bytes<VM: VMBinding>(g1: &G1<VM>) -> usize {
    g1.space().allocated_bytes(RegionFlags::IN_USE)
}

pub fn total_bytes<VM: VMBinding>(g1: &G1<VM>) -> usize {
    g1.space().region_count() * g1.space().region_size()
}
