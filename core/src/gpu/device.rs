use super::*;

pub trait Device<B: GPUBackend> {
    unsafe fn create_command_buffer(&self) -> Result<B::CommandBuffer, DeviceError>;
    unsafe fn create_fence(&self) -> Result<B::Fence, DeviceError>;
    unsafe fn create_semaphore(&self) -> Result<B::Semaphore, DeviceError>;
    fn supports_timeline_semaphores(&self) -> bool;
    unsafe fn create_timeline_semaphore(&self, initial_value: u64) -> Result<B::TimelineSemaphore, DeviceError>;
    fn memory_type_infos(&self) -> &[MemoryTypeInfo];
    unsafe fn create_heap(&self, memory_type_index: u32, size: u64, mapped: bool) -> Result<B::Heap, OutOfMemoryError>;
    fn queue(&self) -> &B::Queue;
    unsafe fn wait_for_idle(&self);
}
