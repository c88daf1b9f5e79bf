use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, trace};

use super::gpu::{Device as _, DeviceError, Fence as _, GPUBackend};
use super::*;

/// Host fence of one command buffer slot.
///
/// Remembers whether it was ever handed to the queue so waiting on a fence
/// that nothing will signal returns right away instead of blocking forever.
pub struct FenceWrapper<B: GPUBackend> {
    fence: B::Fence,
    submitted: AtomicBool,
    signalled: AtomicBool,
}

impl<B: GPUBackend> FenceWrapper<B> {
    pub(super) fn new(device: &B::Device) -> Result<Self, GraphicsError> {
        let fence = unsafe { device.create_fence() }
            .map_err(|source| GraphicsError::ObjectCreation { object: "fence", source })?;
        Ok(Self {
            fence,
            submitted: AtomicBool::new(false),
            signalled: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    pub(super) fn handle(&self) -> &B::Fence {
        &self.fence
    }

    #[inline(always)]
    pub(super) fn mark_submitted(&self) {
        self.submitted.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }

    pub fn is_signalled(&self) -> bool {
        if self.signalled.load(Ordering::Acquire) {
            return true;
        }
        if !self.is_submitted() {
            return false;
        }
        match self.fence.is_signalled() {
            Ok(signalled) => {
                if signalled {
                    self.signalled.store(true, Ordering::Release);
                }
                signalled
            }
            Err(e) => {
                error!("Polling fence failed: {}", e);
                false
            }
        }
    }

    /// Returns false on timeout, on device errors and for fences that were never submitted.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.signalled.load(Ordering::Acquire) {
            return true;
        }
        if !self.is_submitted() {
            trace!("Not waiting for a fence that was never submitted");
            return false;
        }
        match self.fence.wait(timeout) {
            Ok(signalled) => {
                if signalled {
                    self.signalled.store(true, Ordering::Release);
                }
                signalled
            }
            Err(e) => {
                error!("Waiting for fence failed: {}", e);
                false
            }
        }
    }

    /// Waits for every fence within one shared deadline.
    pub fn wait_all(fences: &[Arc<Self>], timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        fences.iter().all(|fence| {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            fence.wait(remaining)
        })
    }

    /// The submission that signals this fence must have completed.
    pub(super) unsafe fn reset(&self) -> Result<(), DeviceError> {
        self.fence.reset()?;
        self.submitted.store(false, Ordering::Release);
        self.signalled.store(false, Ordering::Release);
        Ok(())
    }
}
