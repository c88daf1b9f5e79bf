use std::sync::Arc;

use emugpu_core::gpu::*;

use super::*;

#[derive(Debug, Clone)]
pub struct NullDeviceInfo {
    pub supports_timeline_semaphores: bool,
    /// Signal every submission as soon as it is made.
    pub auto_complete: bool,
    pub memory_types: Vec<MemoryTypeInfo>,
}

impl Default for NullDeviceInfo {
    fn default() -> Self {
        Self {
            supports_timeline_semaphores: true,
            auto_complete: false,
            memory_types: vec![
                MemoryTypeInfo {
                    memory_index: 0,
                    memory_kind: MemoryKind::VRAM,
                    is_cached: false,
                    is_cpu_accessible: false,
                    is_coherent: false,
                },
                MemoryTypeInfo {
                    memory_index: 1,
                    memory_kind: MemoryKind::RAM,
                    is_cached: false,
                    is_cpu_accessible: true,
                    is_coherent: true,
                },
                MemoryTypeInfo {
                    memory_index: 2,
                    memory_kind: MemoryKind::RAM,
                    is_cached: true,
                    is_cpu_accessible: true,
                    is_coherent: true,
                },
            ],
        }
    }
}

pub struct NullDevice {
    shared: Arc<NullShared>,
    queue: NullQueue,
    info: NullDeviceInfo,
}

impl NullDevice {
    pub fn new(info: NullDeviceInfo) -> Self {
        let shared = Arc::new(NullShared::new(info.auto_complete));
        Self {
            queue: NullQueue {
                shared: shared.clone(),
            },
            shared,
            info,
        }
    }

    pub fn set_auto_complete(&self, auto_complete: bool) {
        let mut guard = self.shared.state.lock();
        guard.auto_complete = auto_complete;
        if auto_complete {
            while self.shared.complete_front(&mut guard) {}
        }
    }

    /// Finishes the oldest pending submission. Returns false if nothing was pending.
    pub fn complete_next(&self) -> bool {
        let mut guard = self.shared.state.lock();
        self.shared.complete_front(&mut guard)
    }

    /// Finishes every pending submission and returns how many there were.
    pub fn complete_all(&self) -> usize {
        let mut guard = self.shared.state.lock();
        let mut count = 0usize;
        while self.shared.complete_front(&mut guard) {
            count += 1;
        }
        count
    }

    pub fn pending_submissions(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn submission_count(&self) -> u64 {
        self.shared.state.lock().submitted
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.state.lock().completed
    }

    /// Makes the next `count` queue submissions fail with a lost device.
    pub fn fail_next_submits(&self, count: u32) {
        self.shared.state.lock().failing_submits = count;
    }

    /// Makes the next `count` heap allocations fail.
    pub fn fail_next_heap_allocations(&self, count: u32) {
        self.shared.state.lock().failing_heaps = count;
    }

    /// Makes the next `count` blocking fence waits fail with a lost device.
    pub fn fail_next_fence_waits(&self, count: u32) {
        self.shared.state.lock().failing_fence_waits = count;
    }

    /// Upper bound for the sum of all live heap sizes, `None` removes the limit.
    pub fn set_heap_budget(&self, budget: Option<u64>) {
        self.shared.state.lock().heap_budget = budget;
    }

    pub fn allocated_heap_bytes(&self) -> u64 {
        self.shared.state.lock().heap_bytes
    }

    pub fn live_heap_count(&self) -> u32 {
        self.shared.state.lock().live_heaps
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new(NullDeviceInfo::default())
    }
}

impl Device<NullBackend> for NullDevice {
    unsafe fn create_command_buffer(&self) -> Result<NullCommandBuffer, DeviceError> {
        Ok(NullCommandBuffer::new())
    }

    unsafe fn create_fence(&self) -> Result<NullFence, DeviceError> {
        Ok(NullFence::new(&self.shared))
    }

    unsafe fn create_semaphore(&self) -> Result<NullSemaphore, DeviceError> {
        Ok(NullSemaphore {})
    }

    fn supports_timeline_semaphores(&self) -> bool {
        self.info.supports_timeline_semaphores
    }

    unsafe fn create_timeline_semaphore(&self, initial_value: u64) -> Result<NullTimelineSemaphore, DeviceError> {
        if !self.info.supports_timeline_semaphores {
            return Err(DeviceError::Other(-7));
        }
        Ok(NullTimelineSemaphore::new(&self.shared, initial_value))
    }

    fn memory_type_infos(&self) -> &[MemoryTypeInfo] {
        &self.info.memory_types
    }

    unsafe fn create_heap(&self, memory_type_index: u32, size: u64, mapped: bool) -> Result<NullHeap, OutOfMemoryError> {
        let memory_type = self.info.memory_types.get(memory_type_index as usize).ok_or(OutOfMemoryError {})?;
        if mapped && !memory_type.is_cpu_accessible {
            return Err(OutOfMemoryError {});
        }
        NullHeap::new(&self.shared, memory_type_index, size, mapped)
    }

    fn queue(&self) -> &NullQueue {
        &self.queue
    }

    unsafe fn wait_for_idle(&self) {
        let _ = self.queue.wait_for_idle();
    }
}
