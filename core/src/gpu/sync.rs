use std::time::Duration;

use super::*;

/// Binary host completion fence.
pub trait Fence {
    fn is_signalled(&self) -> Result<bool, DeviceError>;

    /// Blocks until the fence is signalled or `timeout` elapsed, `None` waits forever.
    /// Returns `Ok(false)` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool, DeviceError>;

    /// Must not be called while a submission that signals the fence is pending.
    unsafe fn reset(&self) -> Result<(), DeviceError>;
}

pub trait TimelineSemaphore {
    fn value(&self) -> Result<u64, DeviceError>;
    fn await_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceError>;
}

pub struct FenceValuePairRef<'a, B: GPUBackend> {
    pub semaphore: &'a B::TimelineSemaphore,
    pub value: u64,
}

impl<'a, B: GPUBackend> Clone for FenceValuePairRef<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: GPUBackend> Copy for FenceValuePairRef<'a, B> {}

impl<'a, B: GPUBackend> FenceValuePairRef<'a, B> {
    pub fn is_signalled(&self) -> Result<bool, DeviceError> {
        Ok(self.semaphore.value()? >= self.value)
    }
}

pub enum SemaphoreRef<'a, B: GPUBackend> {
    Binary(&'a B::Semaphore),
    Timeline(FenceValuePairRef<'a, B>),
}

impl<'a, B: GPUBackend> Clone for SemaphoreRef<'a, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, B: GPUBackend> Copy for SemaphoreRef<'a, B> {}
