use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bitvec::vec::BitVec;
use crossbeam_utils::Backoff;
use log::{trace, warn};
use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use smallvec::SmallVec;

use super::gpu::GPUBackend;
use super::*;
use crate::{Mutex, RwLock};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Something a command buffer keeps alive until its fence signalled.
pub trait Dependant<B: GPUBackend>: Send + Sync {
    /// Unique, increasing in creation order.
    fn id(&self) -> u64;

    /// Takes a reference on behalf of the recorder's slot unless that slot already holds one,
    /// then does the same for everything this object is composed of.
    fn add_command_buffer_dependencies(self: Arc<Self>, recorder: &mut CommandBufferRecorder<B>);

    fn try_increment_reference_count(&self) -> bool;

    /// Panics if the object was already destroyed.
    fn increment_reference_count(&self) {
        if !self.try_increment_reference_count() {
            panic!("Attempted to revive destroyed resource {}", self.id());
        }
    }

    /// `slot` is the command buffer slot that gives up its reference, `None` for owner references.
    fn decrement_reference_count(&self, slot: Option<usize>);
}

/// Reference counted wrapper around a host API object.
///
/// The creator holds the first reference and gives it up with [`release`](Self::release).
/// Each command buffer slot that uses the object holds one more until the slot's fence
/// signalled. The wrapped value is dropped exactly once, when the count reaches zero.
pub struct ResourceHandle<B: GPUBackend, T: Send + Sync + 'static> {
    id: u64,
    reference_count: AtomicU32,
    value: RwLock<Option<T>>,
    /// Slots holding a reference. The lock also serializes decrements.
    ownership: Mutex<BitVec>,
    released: AtomicBool,
    waitable: Option<Arc<BufferUsageTracker<B>>>,
    composed: SmallVec<[Arc<dyn Dependant<B>>; 2]>,
}

impl<B: GPUBackend, T: Send + Sync + 'static> ResourceHandle<B, T> {
    pub fn new(value: T) -> Arc<Self> {
        Self::composite(value, None, Vec::new())
    }

    pub fn with_waitable(value: T, waitable: Arc<BufferUsageTracker<B>>) -> Arc<Self> {
        Self::composite(value, Some(waitable), Vec::new())
    }

    /// A handle that keeps everything in `composed` alive until it is destroyed itself.
    /// Composed objects have to be alive and created before this one.
    pub fn composite(value: T, waitable: Option<Arc<BufferUsageTracker<B>>>, composed: Vec<Arc<dyn Dependant<B>>>) -> Arc<Self> {
        let id = NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed);
        for dependency in &composed {
            assert!(
                dependency.id() < id,
                "Resource {} may only be composed of older resources, got {}",
                id,
                dependency.id()
            );
            dependency.increment_reference_count();
        }

        Arc::new(Self {
            id,
            reference_count: AtomicU32::new(1),
            value: RwLock::new(Some(value)),
            ownership: Mutex::new(BitVec::new()),
            released: AtomicBool::new(false),
            waitable,
            composed: composed.into_iter().collect(),
        })
    }

    #[inline(always)]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline(always)]
    pub fn reference_count(&self) -> u32 {
        self.reference_count.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_destroyed(&self) -> bool {
        self.reference_count() == 0
    }

    #[inline(always)]
    pub fn waitable(&self) -> Option<&Arc<BufferUsageTracker<B>>> {
        self.waitable.as_ref()
    }

    pub fn is_owned_by(&self, slot: usize) -> bool {
        self.ownership.lock().get(slot).map_or(false, |bit| *bit)
    }

    /// Panics if the value was already destroyed. Destroying the value waits for
    /// outstanding guards, so do not hold one while giving up the last reference.
    pub fn get(&self) -> MappedRwLockReadGuard<'_, T> {
        let id = self.id;
        RwLockReadGuard::map(self.value.read(), |value| match value {
            Some(value) => value,
            None => panic!("Accessed resource {} after it was destroyed", id),
        })
    }

    pub fn try_get(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.value.read(), |value| value.as_ref()).ok()
    }

    /// Makes the recorder's slot keep the resource alive.
    pub fn register_use(self: &Arc<Self>, recorder: &mut CommandBufferRecorder<B>) {
        self.clone().add_command_buffer_dependencies(recorder);
    }

    pub fn get_for(self: &Arc<Self>, recorder: &mut CommandBufferRecorder<B>) -> MappedRwLockReadGuard<'_, T> {
        self.register_use(recorder);
        self.get()
    }

    /// Like [`get_for`](Self::get_for) and also records the buffer range usage in the waitable.
    pub fn get_range_for(self: &Arc<Self>, recorder: &mut CommandBufferRecorder<B>, offset: u64, size: u64, write: bool) -> MappedRwLockReadGuard<'_, T> {
        self.register_use(recorder);
        if let Some(waitable) = &self.waitable {
            waitable.add_use(recorder.index(), offset, size, write);
        }
        self.get()
    }

    /// Gives up the creator's reference. Only the first call does anything.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.decrement_reference_count(None);
        }
    }
}

impl<B: GPUBackend, T: Send + Sync + 'static> Dependant<B> for ResourceHandle<B, T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn add_command_buffer_dependencies(self: Arc<Self>, recorder: &mut CommandBufferRecorder<B>) {
        let slot = recorder.index();
        {
            let mut ownership = self.ownership.lock();
            if ownership.len() <= slot {
                ownership.resize(slot + 1, false);
            }
            if ownership[slot] {
                return;
            }
            self.increment_reference_count();
            ownership.set(slot, true);
        }

        if let Some(waitable) = &self.waitable {
            recorder.add_waitable(waitable);
        }
        for dependency in &self.composed {
            dependency.clone().add_command_buffer_dependencies(recorder);
        }
        recorder.add_dependant(self);
    }

    fn try_increment_reference_count(&self) -> bool {
        let backoff = Backoff::new();
        let mut current = self.reference_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.reference_count.compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    fn decrement_reference_count(&self, slot: Option<usize>) {
        let value = {
            let mut ownership = self.ownership.lock();
            if let Some(slot) = slot {
                if slot < ownership.len() {
                    ownership.set(slot, false);
                }
            }

            let previous = self
                .reference_count
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
                .unwrap_or_else(|_| panic!("Reference count of resource {} dropped below zero", self.id));
            if previous != 1 {
                return;
            }
            self.value.write().take()
        };

        trace!("Destroying resource {}", self.id);
        drop(value);
        for dependency in &self.composed {
            dependency.decrement_reference_count(None);
        }
    }
}

impl<B: GPUBackend, T: Send + Sync + 'static> Drop for ResourceHandle<B, T> {
    fn drop(&mut self) {
        if self.value.get_mut().is_none() {
            return;
        }
        // Nothing can reach the handle anymore, so the remaining references are leaked ones.
        warn!(
            "Resource {} dropped with {} outstanding references",
            self.id,
            self.reference_count.load(Ordering::Acquire)
        );
        for dependency in &self.composed {
            dependency.decrement_reference_count(None);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    use emugpu_null::NullBackend;

    use super::*;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    type Handle = ResourceHandle<NullBackend, DropCounter>;

    #[test]
    fn release_is_idempotent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = Handle::new(DropCounter(drops.clone()));
        assert_eq!(handle.reference_count(), 1);
        handle.release();
        handle.release();
        assert!(handle.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(handle.try_get().is_none());
    }

    #[test]
    #[should_panic(expected = "after it was destroyed")]
    fn access_after_destruction_panics() {
        let handle = ResourceHandle::<NullBackend, u32>::new(7);
        assert_eq!(*handle.get(), 7);
        handle.release();
        let _value = handle.get();
    }

    #[test]
    #[should_panic(expected = "revive")]
    fn destroyed_resources_cannot_be_revived() {
        let handle = ResourceHandle::<NullBackend, u32>::new(7);
        handle.release();
        handle.increment_reference_count();
    }

    #[test]
    fn composite_keeps_its_parts_alive() {
        let drops = Arc::new(AtomicUsize::new(0));
        let part = Handle::new(DropCounter(drops.clone()));
        let whole = ResourceHandle::<NullBackend, u32>::composite(1, None, vec![part.clone() as Arc<dyn Dependant<NullBackend>>]);
        assert_eq!(part.reference_count(), 2);

        part.release();
        assert!(!part.is_destroyed());
        whole.release();
        assert!(part.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "revive")]
    fn composing_destroyed_resources_panics() {
        let part = ResourceHandle::<NullBackend, u32>::new(1);
        part.release();
        let _whole = ResourceHandle::<NullBackend, u32>::composite(2, None, vec![part as Arc<dyn Dependant<NullBackend>>]);
    }

    #[test]
    fn concurrent_decrements_dispose_once() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1000;

        let drops = Arc::new(AtomicUsize::new(0));
        let handle = Handle::new(DropCounter(drops.clone()));
        for _ in 0..THREADS * PER_THREAD {
            handle.increment_reference_count();
        }

        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PER_THREAD {
                        handle.decrement_reference_count(None);
                    }
                });
            }
        });
        assert_eq!(handle.reference_count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        handle.release();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_an_unreleased_composite_releases_its_parts() {
        let part = ResourceHandle::<NullBackend, u32>::new(1);
        let whole = ResourceHandle::<NullBackend, u32>::composite(2, None, vec![part.clone() as Arc<dyn Dependant<NullBackend>>]);
        drop(whole);
        assert_eq!(part.reference_count(), 1);
    }
}
