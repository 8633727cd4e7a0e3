//! Per-thread mutator contexts and the registry the collector enumerates them through.

use super::barriers::{BarrierSet, PreBarrierEntry};
use super::g1::{G1, GCTaskCause};
use crate::policy::region::{CardIndex, RegionId};
use crate::util::conversions::align_object_size;
use crate::util::constants::MIN_OBJECT_SIZE;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;
use atomic::Atomic;
use crossbeam::queue::ArrayQueue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Allocation request types.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocationSemantics {
    /// Bump allocation into the mutator's eden region. Objects larger than half a region are
    /// allocated as large objects instead.
    Default,
    /// Objects that are never moved.
    NonMoving,
    /// An object that gets a region of its own. Never moved.
    Large,
}

/// The part of a mutator context the collector and the remembered-set worker touch.
pub struct MutatorShared {
    id: usize,
    pre_barrier: Atomic<PreBarrierEntry>,
    satb_buffer: spin::Mutex<Vec<ObjectReference>>,
    post_buffer: ArrayQueue<CardIndex>,
}

impl MutatorShared {
    fn new(id: usize, entry: PreBarrierEntry, post_buffer_size: usize) -> Self {
        MutatorShared {
            id,
            pre_barrier: Atomic::new(entry),
            satb_buffer: spin::Mutex::new(vec![]),
            post_buffer: ArrayQueue::new(post_buffer_size),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pre_barrier_entry(&self) -> PreBarrierEntry {
        self.pre_barrier.load(Ordering::Acquire)
    }

    pub fn push_satb(&self, object: ObjectReference) {
        self.satb_buffer.lock().push(object);
    }

    pub fn take_satb_buffer(&self) -> Vec<ObjectReference> {
        std::mem::take(&mut *self.satb_buffer.lock())
    }

    pub fn clear_satb_buffer(&self) {
        self.satb_buffer.lock().clear();
    }

    /// The ring buffer the post-barrier queues dirty cards on.
    pub fn post_buffer(&self) -> &ArrayQueue<CardIndex> {
        &self.post_buffer
    }

    /// Move the queued cards into `out`.
    pub fn drain_post_buffer<E: Extend<CardIndex>>(&self, out: &mut E) {
        out.extend(std::iter::from_fn(|| self.post_buffer.pop()));
    }
}

/// Owns the shared part of every live mutator context, by id.
pub struct MutatorRegistry {
    mutators: Mutex<BTreeMap<usize, Arc<MutatorShared>>>,
    next_id: AtomicUsize,
    post_buffer_size: usize,
}

impl MutatorRegistry {
    pub fn new(post_buffer_size: usize) -> Self {
        MutatorRegistry {
            mutators: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
            post_buffer_size,
        }
    }

    /// The thread-create hook. The new context gets the pre-barrier entry currently installed.
    pub fn register(&self, barrier_set: &BarrierSet) -> Arc<MutatorShared> {
        let mut mutators = self.mutators.lock().unwrap();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(MutatorShared::new(
            id,
            barrier_set.pre_barrier_entry(),
            self.post_buffer_size,
        ));
        mutators.insert(id, shared.clone());
        debug!("Mutator {} registered", id);
        shared
    }

    pub fn unregister(&self, id: usize) -> Option<Arc<MutatorShared>> {
        let removed = self.mutators.lock().unwrap().remove(&id);
        debug!("Mutator {} unregistered", id);
        removed
    }

    /// Call `f` for every live mutator. The registry is locked meanwhile, so `f` must not
    /// register or unregister mutators.
    pub fn for_each<F: FnMut(&MutatorShared)>(&self, mut f: F) {
        for mutator in self.mutators.lock().unwrap().values() {
            f(mutator);
        }
    }

    pub fn len(&self) -> usize {
        self.mutators.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `entry` the pre-barrier of every live mutator and of every mutator registered later.
    pub fn install_pre_barrier(&self, barrier_set: &BarrierSet, entry: PreBarrierEntry) {
        let mutators = self.mutators.lock().unwrap();
        barrier_set.set_pre_barrier_entry(entry);
        for mutator in mutators.values() {
            mutator.pre_barrier.store(entry, Ordering::Release);
        }
        debug!("Installed pre-barrier {:?} in {} mutators", entry, mutators.len());
    }
}

/// A mutator thread's context: its eden allocation region and its barrier buffers.
pub struct Mutator<VM: VMBinding> {
    pub(crate) shared: Arc<MutatorShared>,
    pub(crate) plan: Arc<G1<VM>>,
    eden: Option<RegionId>,
    /// The young epoch `eden` belongs to. Once the epoch moves on, the region is no longer eden.
    eden_epoch: usize,
}

impl<VM: VMBinding> Mutator<VM> {
    pub(crate) fn new(plan: Arc<G1<VM>>) -> Self {
        let shared = plan.mutators().register(plan.barrier_set());
        Mutator {
            shared,
            eden_epoch: plan.space().young_epoch(),
            plan,
            eden: None,
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id()
    }

    pub fn shared(&self) -> &MutatorShared {
        &self.shared
    }

    pub fn plan(&self) -> &Arc<G1<VM>> {
        &self.plan
    }

    /// Allocate `size` bytes of zeroed, word-aligned memory. A failed attempt is followed by a
    /// young collection and then by a full one; `None` means the heap is exhausted.
    pub fn alloc(&mut self, size: usize, semantics: AllocationSemantics) -> Option<Address> {
        let size = align_object_size(size.max(MIN_OBJECT_SIZE));
        let semantics = if self.plan.space().is_large_object_size(size) {
            AllocationSemantics::Large
        } else {
            semantics
        };
        if let Some(addr) = self.try_alloc(size, semantics) {
            return Some(addr);
        }
        for cause in [GCTaskCause::YoungGc, GCTaskCause::Oom] {
            self.plan.collect(cause);
            if let Some(addr) = self.try_alloc(size, semantics) {
                return Some(addr);
            }
        }
        warn!("Out of memory allocating {} bytes ({:?})", size, semantics);
        None
    }

    fn try_alloc(&mut self, size: usize, semantics: AllocationSemantics) -> Option<Address> {
        if semantics == AllocationSemantics::Default {
            return self.alloc_eden(size);
        }
        let space = self.plan.space();
        let addr = if semantics == AllocationSemantics::Large {
            space.alloc_large(size)?
        } else {
            space.alloc_non_movable(size)?
        };
        // Marking only sees what was reachable when it started. Objects allocated outside eden
        // meanwhile are marked at remark.
        if self.plan.is_marking() {
            self.plan
                .record_new_object(ObjectReference::from_raw_address(addr));
        }
        Some(addr)
    }

    fn alloc_eden(&mut self, size: usize) -> Option<Address> {
        let space = self.plan.space();
        let epoch = space.young_epoch();
        if self.eden_epoch != epoch {
            self.eden = None;
            self.eden_epoch = epoch;
        }
        if let Some(id) = self.eden {
            if let Some(addr) = space.region(id).alloc(size) {
                return Some(addr);
            }
        }
        let region = space.allocate_eden_region()?;
        trace!("Mutator {} takes eden {:?}", self.id(), region.id());
        self.eden = Some(region.id());
        region.alloc(size)
    }

    /// Forget the cached eden region. The next allocation takes a fresh one.
    pub fn reset_eden(&mut self) {
        self.eden = None;
    }
}

impl<VM: VMBinding> Drop for Mutator<VM> {
    /// The thread-terminate hook: the buffers are handed over to the collector.
    fn drop(&mut self) {
        self.plan.retire_mutator(&self.shared);
    }
}
