use super::*;

pub struct Submission<'a, B: GPUBackend> {
    pub command_buffers: &'a [&'a B::CommandBuffer],
    pub wait_semaphores: &'a [SemaphoreRef<'a, B>],
    pub signal_semaphores: &'a [SemaphoreRef<'a, B>],
    /// Signalled once every command buffer of this and all earlier submissions completed.
    pub fence: Option<&'a B::Fence>,
}

/// Queue access is externally synchronized: callers serialize `submit`.
pub trait Queue<B: GPUBackend> {
    unsafe fn submit(&self, submission: &Submission<B>) -> Result<(), DeviceError>;
    unsafe fn wait_for_idle(&self) -> Result<(), DeviceError>;
}
