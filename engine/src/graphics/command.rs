use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::Backoff;
use log::{debug, error, trace, warn};

use super::gpu::{CommandBuffer as _, Device as _, GPUBackend, Queue as _, SemaphoreRef, Submission};
use super::*;
use crate::{Mutex, RwLock};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferSlotState {
    Free,
    Recording,
    Submitted,
}

pub struct CommandBufferSlot<B: GPUBackend> {
    index: usize,
    pool_id: u64,
    inner: Mutex<CommandBufferSlotInner<B>>,
}

struct CommandBufferSlotInner<B: GPUBackend> {
    state: CommandBufferSlotState,
    /// Taken out by the recorder while the slot is recording.
    command_buffer: Option<B::CommandBuffer>,
    fence: Arc<FenceWrapper<B>>,
    dependants: Vec<Arc<dyn Dependant<B>>>,
    waitables: Vec<Arc<BufferUsageTracker<B>>>,
    submission_count: u64,
    abandoned: bool,
}

impl<B: GPUBackend> CommandBufferSlot<B> {
    fn new(device: &B::Device, pool_id: u64, index: usize) -> Result<Self, GraphicsError> {
        let command_buffer = unsafe { device.create_command_buffer() }
            .map_err(|source| GraphicsError::ObjectCreation { object: "command buffer", source })?;
        let fence = FenceWrapper::new(device)?;
        Ok(Self {
            index,
            pool_id,
            inner: Mutex::new(CommandBufferSlotInner {
                state: CommandBufferSlotState::Free,
                command_buffer: Some(command_buffer),
                fence: Arc::new(fence),
                dependants: Vec::new(),
                waitables: Vec::new(),
                submission_count: 0,
                abandoned: false,
            }),
        })
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> CommandBufferSlotState {
        self.inner.lock().state
    }

    pub fn fence(&self) -> Arc<FenceWrapper<B>> {
        self.inner.lock().fence.clone()
    }

    pub fn submission_count(&self) -> u64 {
        self.inner.lock().submission_count
    }

    fn add_waitable(&self, waitable: &Arc<BufferUsageTracker<B>>) {
        let mut inner = self.inner.lock();
        if !inner.waitables.iter().any(|existing| Arc::ptr_eq(existing, waitable)) {
            inner.waitables.push(waitable.clone());
        }
        waitable.associate_fence(self.index, &inner.fence);
    }

    fn release_dependencies(&self, dependants: Vec<Arc<dyn Dependant<B>>>, waitables: Vec<Arc<BufferUsageTracker<B>>>) {
        for waitable in waitables {
            waitable.remove_slot(self.index);
        }
        for dependant in dependants {
            dependant.decrement_reference_count(Some(self.index));
        }
    }

    /// Returns a slot whose fence signalled to the free state.
    fn reclaim(&self, device: &B::Device) {
        let (dependants, waitables) = {
            let mut inner = self.inner.lock();
            assert_eq!(inner.state, CommandBufferSlotState::Submitted, "Reclaimed slot {} was never submitted", self.index);
            (mem::take(&mut inner.dependants), mem::take(&mut inner.waitables))
        };
        self.release_dependencies(dependants, waitables);

        let mut inner = self.inner.lock();
        // Waitables associated while the dependencies were being released.
        for waitable in mem::take(&mut inner.waitables) {
            waitable.remove_slot(self.index);
        }

        // Somebody still holding on to the old fence expects it to stay signalled.
        let replacement = if Arc::get_mut(&mut inner.fence).is_none() {
            match FenceWrapper::new(device) {
                Ok(fence) => Some(fence),
                Err(e) => {
                    warn!("Replacing the fence of command buffer slot {} failed, resetting it in place: {}", self.index, e);
                    None
                }
            }
        } else {
            None
        };
        match replacement {
            Some(fence) => inner.fence = Arc::new(fence),
            None => {
                if let Err(e) = unsafe { inner.fence.reset() } {
                    error!("Resetting the fence of command buffer slot {} failed: {}", self.index, e);
                }
            }
        }

        if let Some(command_buffer) = inner.command_buffer.as_mut() {
            if let Err(e) = unsafe { command_buffer.reset() } {
                error!("Resetting command buffer {} failed: {}", self.index, e);
            }
        }
        inner.state = CommandBufferSlotState::Free;
        trace!("Reclaimed command buffer slot {}", self.index);
    }

    /// Gives up on a submitted slot whose fence could not be waited for.
    ///
    /// Everything it references is leaked, the GPU may still be using it.
    /// The slot stays submitted and is never handed out again.
    fn abandon(&self) {
        let dependants = {
            let mut inner = self.inner.lock();
            inner.abandoned = true;
            mem::take(&mut inner.dependants)
        };
        error!("Abandoning command buffer slot {}, leaking {} dependants", self.index, dependants.len());
        mem::forget(dependants);
    }

    /// Returns a slot that never reached the queue to the free state.
    fn discard(&self, mut command_buffer: B::CommandBuffer) {
        if let Err(e) = unsafe { command_buffer.reset() } {
            error!("Resetting command buffer {} failed: {}", self.index, e);
        }
        let (dependants, waitables) = {
            let mut inner = self.inner.lock();
            (mem::take(&mut inner.dependants), mem::take(&mut inner.waitables))
        };
        self.release_dependencies(dependants, waitables);

        let mut inner = self.inner.lock();
        for waitable in mem::take(&mut inner.waitables) {
            waitable.remove_slot(self.index);
        }
        inner.command_buffer = Some(command_buffer);
        inner.state = CommandBufferSlotState::Free;
        trace!("Discarded command buffer slot {}", self.index);
    }
}

/// Exclusive access to a rented slot while it is recording.
///
/// Hand it back with [`CommandBufferPool::submit`]. Dropping it instead returns
/// the slot to the pool and releases everything it referenced.
pub struct CommandBufferRecorder<B: GPUBackend> {
    slot: Arc<CommandBufferSlot<B>>,
    command_buffer: Option<B::CommandBuffer>,
    fence: Arc<FenceWrapper<B>>,
}

impl<B: GPUBackend> CommandBufferRecorder<B> {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.slot.index
    }

    /// Signals once the work recorded here finished executing.
    #[inline(always)]
    pub fn fence(&self) -> &Arc<FenceWrapper<B>> {
        &self.fence
    }

    pub fn command_buffer(&mut self) -> &mut B::CommandBuffer {
        self.command_buffer
            .as_mut()
            .expect("Recorder lost its command buffer")
    }

    pub fn add_dependant(&mut self, dependant: Arc<dyn Dependant<B>>) {
        self.slot.inner.lock().dependants.push(dependant);
    }

    pub fn add_waitable(&mut self, waitable: &Arc<BufferUsageTracker<B>>) {
        self.slot.add_waitable(waitable);
    }

    fn take_command_buffer(&mut self) -> B::CommandBuffer {
        self.command_buffer
            .take()
            .expect("Recorder lost its command buffer")
    }
}

impl<B: GPUBackend> Drop for CommandBufferRecorder<B> {
    fn drop(&mut self) {
        if let Some(command_buffer) = self.command_buffer.take() {
            debug!("Command buffer slot {} was dropped without being submitted", self.slot.index);
            self.slot.discard(command_buffer);
        }
    }
}

/// Fixed set of command buffers, each paired with a fence, that are rented,
/// submitted and recycled once their fence signalled.
///
/// Submitted slots are tracked in submission order and always reclaimed from
/// the front, the queue signals fences in that same order.
pub struct CommandBufferPool<B: GPUBackend> {
    id: u64,
    device: Arc<B::Device>,
    settings: CommandBufferPoolSettings,
    slots: RwLock<Vec<Arc<CommandBufferSlot<B>>>>,
    next_slot: AtomicUsize,
    pending: Mutex<VecDeque<Arc<CommandBufferSlot<B>>>>,
    queue_lock: Mutex<()>,
}

enum OldestSlot {
    Reclaimed,
    NothingInFlight,
    Failed,
}

impl<B: GPUBackend> CommandBufferPool<B> {
    pub fn new(device: &Arc<B::Device>, settings: &CommandBufferPoolSettings) -> Result<Self, GraphicsError> {
        assert!(settings.max_capacity != 0, "Command buffer pool needs at least one slot");
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let initial_capacity = settings.initial_capacity.clamp(1, settings.max_capacity);
        let mut slots = Vec::with_capacity(initial_capacity);
        for index in 0..initial_capacity {
            slots.push(Arc::new(CommandBufferSlot::new(&**device, id, index)?));
        }

        Ok(Self {
            id,
            device: device.clone(),
            settings: settings.clone(),
            slots: RwLock::new(slots),
            next_slot: AtomicUsize::new(0),
            pending: Mutex::new(VecDeque::new()),
            queue_lock: Mutex::new(()),
        })
    }

    #[inline(always)]
    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }

    /// Number of submitted slots that were not reclaimed yet.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn slot_state(&self, index: usize) -> Option<CommandBufferSlotState> {
        self.slots.read().get(index).map(|slot| slot.state())
    }

    /// Hands out a free slot, reclaiming finished ones first.
    ///
    /// Without a free slot the pool grows up to its ceiling. At the ceiling it blocks on
    /// the oldest submission, or on another thread still reclaiming one, and only fails
    /// if every single slot is recording.
    pub fn rent(&self) -> Result<CommandBufferRecorder<B>, GraphicsError> {
        self.sweep();
        let backoff = Backoff::new();
        loop {
            if let Some(recorder) = self.try_rent_free()? {
                return Ok(recorder);
            }
            if self.grow()? {
                continue;
            }
            match self.wait_for_oldest() {
                OldestSlot::Reclaimed => continue,
                OldestSlot::NothingInFlight => {
                    // Another thread is still reclaiming a slot or submitted one in the meantime.
                    if !self.all_slots_recording() {
                        backoff.snooze();
                        continue;
                    }
                }
                OldestSlot::Failed => {}
            }

            let capacity = self.capacity();
            error!("Command buffer pool exhausted, all {} slots are recording", capacity);
            return Err(GraphicsError::PoolExhausted {
                capacity,
                max_capacity: self.settings.max_capacity,
            });
        }
    }

    fn try_rent_free(&self) -> Result<Option<CommandBufferRecorder<B>>, GraphicsError> {
        let slots = self.slots.read();
        let count = slots.len();
        let start = self.next_slot.load(Ordering::Relaxed) % count;
        for i in 0..count {
            let index = (start + i) % count;
            let slot = &slots[index];
            let mut inner = slot.inner.lock();
            if inner.state != CommandBufferSlotState::Free {
                continue;
            }

            let mut command_buffer = match inner.command_buffer.take() {
                Some(command_buffer) => command_buffer,
                None => panic!("Free command buffer slot {} has no command buffer", index),
            };
            if let Err(source) = unsafe { command_buffer.begin() } {
                inner.command_buffer = Some(command_buffer);
                return Err(GraphicsError::CommandBuffer { operation: "begin", source });
            }
            inner.state = CommandBufferSlotState::Recording;
            let fence = inner.fence.clone();
            drop(inner);

            self.next_slot.store(index + 1, Ordering::Relaxed);
            trace!("Rented command buffer slot {}", index);
            return Ok(Some(CommandBufferRecorder {
                slot: slot.clone(),
                command_buffer: Some(command_buffer),
                fence,
            }));
        }
        Ok(None)
    }

    /// Abandoned slots count as recording, they never come back.
    fn all_slots_recording(&self) -> bool {
        self.slots.read().iter().all(|slot| {
            let inner = slot.inner.lock();
            inner.state == CommandBufferSlotState::Recording || inner.abandoned
        })
    }

    /// Returns false if the pool is at its ceiling.
    fn grow(&self) -> Result<bool, GraphicsError> {
        let mut slots = self.slots.write();
        let current = slots.len();
        if slots.iter().any(|slot| slot.state() == CommandBufferSlotState::Free) {
            // Another thread grew the pool or returned a slot in the meantime.
            return Ok(true);
        }
        if current >= self.settings.max_capacity {
            return Ok(false);
        }

        let new_capacity = current
            .saturating_mul(self.settings.growth_factor.max(2))
            .clamp(current + 1, self.settings.max_capacity);
        for index in current..new_capacity {
            slots.push(Arc::new(CommandBufferSlot::new(&*self.device, self.id, index)?));
        }
        debug!("Grew command buffer pool from {} to {} slots", current, new_capacity);
        Ok(true)
    }

    /// Blocks on the oldest submission and reclaims it.
    fn wait_for_oldest(&self) -> OldestSlot {
        // The fence has to be taken while the slot is still queued, afterwards it may be recycled.
        let (index, fence) = {
            let pending = self.pending.lock();
            match pending.front() {
                Some(oldest) => (oldest.index, oldest.fence()),
                None => return OldestSlot::NothingInFlight,
            }
        };
        trace!("Waiting for command buffer slot {} to become available", index);
        if !fence.wait(None) {
            error!("Waiting for command buffer slot {} failed", index);
            return OldestSlot::Failed;
        }
        self.sweep();
        OldestSlot::Reclaimed
    }

    /// Finishes the command buffer and submits it together with the slot's fence.
    /// Returns the number of submissions the slot made so far.
    pub fn submit(&self, mut recorder: CommandBufferRecorder<B>, wait_semaphores: &[SemaphoreRef<B>], signal_semaphores: &[SemaphoreRef<B>]) -> Result<u64, GraphicsError> {
        assert_eq!(recorder.slot.pool_id, self.id, "Command buffer was rented from a different pool");
        let mut command_buffer = recorder.take_command_buffer();
        let slot = recorder.slot.clone();
        let fence = recorder.fence.clone();
        drop(recorder);

        if let Err(source) = unsafe { command_buffer.finish() } {
            slot.discard(command_buffer);
            return Err(GraphicsError::CommandBuffer { operation: "finish", source });
        }

        let queue_guard = self.queue_lock.lock();
        let result = unsafe {
            self.device.queue().submit(&Submission {
                command_buffers: &[&command_buffer],
                wait_semaphores,
                signal_semaphores,
                fence: Some(fence.handle()),
            })
        };
        if let Err(source) = result {
            drop(queue_guard);
            error!("Submitting command buffer slot {} failed: {}", slot.index, source);
            slot.discard(command_buffer);
            return Err(GraphicsError::Submission { source });
        }
        fence.mark_submitted();

        let submission = {
            let mut inner = slot.inner.lock();
            inner.command_buffer = Some(command_buffer);
            inner.state = CommandBufferSlotState::Submitted;
            inner.submission_count += 1;
            inner.submission_count
        };
        trace!("Submitted command buffer slot {}", slot.index);
        self.pending.lock().push_back(slot);
        Ok(submission)
    }

    /// Reclaims every submitted slot whose fence already signalled without blocking.
    /// Returns the number of reclaimed slots.
    pub fn sweep(&self) -> usize {
        let mut reclaimed = 0;
        loop {
            let slot = {
                let mut pending = self.pending.lock();
                match pending.front() {
                    Some(slot) if slot.fence().is_signalled() => pending.pop_front(),
                    _ => None,
                }
            };
            match slot {
                Some(slot) => {
                    slot.reclaim(&self.device);
                    reclaimed += 1;
                }
                None => break,
            }
        }
        reclaimed
    }

    /// Blocks until every submitted slot finished and reclaims all of them.
    ///
    /// Slots whose fence cannot be waited for are abandoned instead, their
    /// dependants are never released.
    pub fn wait_idle(&self) {
        loop {
            let slot = self.pending.lock().pop_front();
            let slot = match slot {
                Some(slot) => slot,
                None => break,
            };
            if slot.fence().wait(None) {
                slot.reclaim(&self.device);
            } else {
                slot.abandon();
            }
        }
    }

    /// Makes `waitable` wait for every slot that is recording or submitted.
    /// Returns the number of slots it was associated with.
    pub fn associate_in_use(&self, waitable: &Arc<BufferUsageTracker<B>>) -> usize {
        self.associate_where(waitable, |state| state != CommandBufferSlotState::Free)
    }

    /// Makes `waitable` wait for every submitted slot.
    pub fn associate_in_flight(&self, waitable: &Arc<BufferUsageTracker<B>>) -> usize {
        self.associate_where(waitable, |state| state == CommandBufferSlotState::Submitted)
    }

    fn associate_where(&self, waitable: &Arc<BufferUsageTracker<B>>, predicate: impl Fn(CommandBufferSlotState) -> bool) -> usize {
        let slots: Vec<Arc<CommandBufferSlot<B>>> = self.slots.read().clone();
        let mut count = 0;
        for slot in slots {
            let mut inner = slot.inner.lock();
            if !predicate(inner.state) {
                continue;
            }
            if !inner.waitables.iter().any(|existing| Arc::ptr_eq(existing, waitable)) {
                inner.waitables.push(waitable.clone());
            }
            waitable.associate_fence(slot.index, &inner.fence);
            count += 1;
        }
        count
    }
}

impl<B: GPUBackend> Drop for CommandBufferPool<B> {
    fn drop(&mut self) {
        self.wait_idle();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use emugpu_null::{NullBackend, NullDevice};

    use super::super::gpu::DeviceError;
    use super::*;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SlowDrop(Duration, Arc<AtomicUsize>);

    impl Drop for SlowDrop {
        fn drop(&mut self) {
            thread::sleep(self.0);
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(device: &Arc<NullDevice>, initial_capacity: usize, max_capacity: usize) -> CommandBufferPool<NullBackend> {
        let settings = CommandBufferPoolSettings {
            initial_capacity,
            growth_factor: 2,
            max_capacity,
        };
        CommandBufferPool::new(device, &settings).unwrap()
    }

    #[test]
    fn dependants_live_until_the_fence_signalled() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        let drops = Arc::new(AtomicUsize::new(0));
        let resource = ResourceHandle::<NullBackend, _>::new(DropCounter(drops.clone()));

        let mut recorder = pool.rent().unwrap();
        assert_eq!(recorder.index(), 0);
        resource.register_use(&mut recorder);
        resource.register_use(&mut recorder);
        assert_eq!(resource.reference_count(), 2);
        resource.release();

        assert_eq!(pool.submit(recorder, &[], &[]).unwrap(), 1);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Submitted));
        assert_eq!(pool.sweep(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        device.complete_all();
        assert_eq!(pool.sweep(), 1);
        assert!(resource.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Free));
        assert!(!resource.is_owned_by(0));
    }

    #[test]
    fn grows_up_to_the_ceiling() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 3);
        let _a = pool.rent().unwrap();
        let _b = pool.rent().unwrap();
        assert_eq!(pool.capacity(), 2);
        let _c = pool.rent().unwrap();
        assert_eq!(pool.capacity(), 3);

        match pool.rent() {
            Err(GraphicsError::PoolExhausted { capacity, max_capacity }) => {
                assert_eq!(capacity, 3);
                assert_eq!(max_capacity, 3);
            }
            _ => panic!("Expected the pool to be exhausted"),
        }
    }

    #[test]
    fn blocks_on_the_oldest_submission_at_the_ceiling() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        let recorder = pool.rent().unwrap();
        pool.submit(recorder, &[], &[]).unwrap();

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(50));
                device.complete_all();
            });
            let recorder = pool.rent().unwrap();
            assert_eq!(recorder.index(), 0);
        });
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn dropped_recorder_returns_its_slot() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        let drops = Arc::new(AtomicUsize::new(0));
        let resource = ResourceHandle::<NullBackend, _>::new(DropCounter(drops.clone()));

        let mut recorder = pool.rent().unwrap();
        resource.register_use(&mut recorder);
        resource.release();
        drop(recorder);

        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Free));
        assert_eq!(device.submission_count(), 0);
        assert!(pool.rent().is_ok());
    }

    #[test]
    fn failed_submission_returns_the_slot() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        device.fail_next_submits(1);
        let recorder = pool.rent().unwrap();
        match pool.submit(recorder, &[], &[]) {
            Err(GraphicsError::Submission { source }) => assert_eq!(source, DeviceError::DeviceLost),
            _ => panic!("Expected the submission to fail"),
        }
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Free));
    }

    #[test]
    fn waitables_follow_slot_states() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 2, 2);
        let recording = pool.rent().unwrap();
        let submitted = pool.rent().unwrap();
        assert_ne!(recording.index(), submitted.index());
        pool.submit(submitted, &[], &[]).unwrap();

        let in_flight = Arc::new(BufferUsageTracker::<NullBackend>::waitable());
        assert_eq!(pool.associate_in_flight(&in_flight), 1);
        let in_use = Arc::new(BufferUsageTracker::<NullBackend>::waitable());
        assert_eq!(pool.associate_in_use(&in_use), 2);

        device.complete_all();
        assert_eq!(pool.sweep(), 1);
        assert!(!in_flight.has_fences());
        assert!(in_use.has_fences());

        drop(recording);
        assert!(!in_use.has_fences());
    }

    #[test]
    fn wait_idle_reclaims_everything() {
        let device = Arc::new(NullDevice::default());
        device.set_auto_complete(true);
        let pool = pool(&device, 2, 2);
        let first = pool.rent().unwrap();
        let second = pool.rent().unwrap();
        pool.submit(first, &[], &[]).unwrap();
        pool.submit(second, &[], &[]).unwrap();
        assert_eq!(pool.in_flight(), 2);
        pool.wait_idle();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Free));
        assert_eq!(pool.slot_state(1), Some(CommandBufferSlotState::Free));
    }

    #[test]
    fn rent_waits_for_a_slot_another_thread_is_reclaiming() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        let drops = Arc::new(AtomicUsize::new(0));
        let resource = ResourceHandle::<NullBackend, _>::new(SlowDrop(Duration::from_millis(300), drops.clone()));

        let mut recorder = pool.rent().unwrap();
        resource.register_use(&mut recorder);
        resource.release();
        pool.submit(recorder, &[], &[]).unwrap();
        device.complete_all();

        thread::scope(|scope| {
            scope.spawn(|| {
                pool.sweep();
            });
            thread::sleep(Duration::from_millis(50));
            let recorder = pool.rent().unwrap();
            assert_eq!(recorder.index(), 0);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn rent_and_sweep_race_at_the_ceiling() {
        let device = Arc::new(NullDevice::default());
        device.set_auto_complete(true);
        let pool = pool(&device, 1, 2);
        let drops = Arc::new(AtomicUsize::new(0));
        let done = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let resource = ResourceHandle::<NullBackend, _>::new(DropCounter(drops.clone()));
                        let mut recorder = pool.rent().unwrap();
                        resource.register_use(&mut recorder);
                        resource.release();
                        pool.submit(recorder, &[], &[]).unwrap();
                    }
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
            scope.spawn(|| {
                while done.load(Ordering::SeqCst) != 2 {
                    pool.sweep();
                    thread::yield_now();
                }
            });
        });

        pool.wait_idle();
        assert_eq!(pool.capacity(), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn wait_idle_keeps_dependants_of_slots_it_cannot_wait_for() {
        let device = Arc::new(NullDevice::default());
        let pool = pool(&device, 1, 1);
        let drops = Arc::new(AtomicUsize::new(0));
        let resource = ResourceHandle::<NullBackend, _>::new(DropCounter(drops.clone()));

        let mut recorder = pool.rent().unwrap();
        resource.register_use(&mut recorder);
        resource.release();
        pool.submit(recorder, &[], &[]).unwrap();

        device.fail_next_fence_waits(1);
        pool.wait_idle();
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.slot_state(0), Some(CommandBufferSlotState::Submitted));
        assert!(!resource.is_destroyed());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        match pool.rent() {
            Err(GraphicsError::PoolExhausted { capacity, .. }) => assert_eq!(capacity, 1),
            _ => panic!("Expected the abandoned slot to stay unavailable"),
        }
        device.complete_all();
        drop(resource);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }
}
