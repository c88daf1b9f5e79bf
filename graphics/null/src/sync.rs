use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use emugpu_core::gpu::*;

use super::*;

pub struct NullFence {
    pub(crate) shared: Arc<NullShared>,
    pub(crate) state: Arc<FenceState>,
}

impl NullFence {
    pub(crate) fn new(shared: &Arc<NullShared>) -> Self {
        Self {
            shared: shared.clone(),
            state: Arc::new(FenceState {
                signalled: AtomicBool::new(false),
            }),
        }
    }
}

impl Fence for NullFence {
    fn is_signalled(&self) -> Result<bool, DeviceError> {
        Ok(self.state.signalled.load(Ordering::Acquire))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<bool, DeviceError> {
        {
            let mut guard = self.shared.state.lock();
            if guard.failing_fence_waits != 0 {
                guard.failing_fence_waits -= 1;
                return Err(DeviceError::DeviceLost);
            }
        }
        let state = &self.state;
        Ok(self.shared.wait_until(|| state.signalled.load(Ordering::Acquire), timeout))
    }

    unsafe fn reset(&self) -> Result<(), DeviceError> {
        let guard = self.shared.state.lock();
        let pending = guard.pending.iter()
            .any(|submission| submission.fence.as_ref().map_or(false, |fence| Arc::ptr_eq(fence, &self.state)));
        assert!(!pending, "Resetting a fence that is still used by a pending submission.");
        self.state.signalled.store(false, Ordering::Release);
        Ok(())
    }
}

pub struct NullSemaphore {}

pub struct NullTimelineSemaphore {
    pub(crate) shared: Arc<NullShared>,
    pub(crate) state: Arc<TimelineState>,
}

impl NullTimelineSemaphore {
    pub(crate) fn new(shared: &Arc<NullShared>, initial_value: u64) -> Self {
        Self {
            shared: shared.clone(),
            state: Arc::new(TimelineState {
                value: AtomicU64::new(initial_value),
            }),
        }
    }
}

impl TimelineSemaphore for NullTimelineSemaphore {
    fn value(&self) -> Result<u64, DeviceError> {
        Ok(self.state.value.load(Ordering::Acquire))
    }

    fn await_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceError> {
        let state = &self.state;
        Ok(self.shared.wait_until(|| state.value.load(Ordering::Acquire) >= value, timeout))
    }
}
