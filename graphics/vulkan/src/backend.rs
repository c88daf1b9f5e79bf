use emugpu_core::gpu::GPUBackend;

use super::*;

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum VkBackend {}

impl GPUBackend for VkBackend {
    type Device = VkDevice;
    type Queue = VkQueue;
    type CommandBuffer = VkCommandBuffer;
    type Fence = VkFence;
    type Semaphore = VkSemaphore;
    type TimelineSemaphore = VkTimelineSemaphore;
    type Heap = VkMemoryHeap;

    fn name() -> &'static str {
        "Vulkan"
    }
}
