use emugpu_core::gpu::*;

use super::*;

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum NullBackend {}

impl GPUBackend for NullBackend {
    type Device = NullDevice;
    type Queue = NullQueue;
    type CommandBuffer = NullCommandBuffer;
    type Fence = NullFence;
    type Semaphore = NullSemaphore;
    type TimelineSemaphore = NullTimelineSemaphore;
    type Heap = NullHeap;

    fn name() -> &'static str {
        "Null"
    }
}
