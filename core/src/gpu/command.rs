use super::*;

/// A single primary command buffer. Every command buffer owns whatever pool
/// memory it records into, so different command buffers may be recorded on
/// different threads at the same time.
pub trait CommandBuffer {
    unsafe fn begin(&mut self) -> Result<(), DeviceError>;
    unsafe fn finish(&mut self) -> Result<(), DeviceError>;

    /// Must only be called once the GPU finished executing the last submission.
    unsafe fn reset(&mut self) -> Result<(), DeviceError>;
}
