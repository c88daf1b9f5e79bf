use super::*;

// WANT https://github.com/rust-lang/rust/issues/44265
pub trait GPUBackend: 'static + Sized {
    type Device: Device<Self> + Send + Sync;
    type Queue: Queue<Self> + Send + Sync;
    type CommandBuffer: CommandBuffer + Send;
    type Fence: Fence + Send + Sync;
    type Semaphore: Send + Sync;
    type TimelineSemaphore: TimelineSemaphore + Send + Sync;
    type Heap: Heap + Send + Sync;

    fn name() -> &'static str;
}
