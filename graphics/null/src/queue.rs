use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;
use smallvec::SmallVec;

use emugpu_core::gpu::*;

use super::*;

pub struct NullQueue {
    pub(crate) shared: Arc<NullShared>,
}

impl Queue<NullBackend> for NullQueue {
    unsafe fn submit(&self, submission: &Submission<NullBackend>) -> Result<(), DeviceError> {
        let mut guard = self.shared.state.lock();
        if guard.failing_submits != 0 {
            guard.failing_submits -= 1;
            return Err(DeviceError::DeviceLost);
        }

        for command_buffer in submission.command_buffers {
            assert!(command_buffer.is_finished(), "Submitted a command buffer that is still recording.");
        }

        let mut timeline_signals = SmallVec::new();
        for semaphore in submission.signal_semaphores {
            if let SemaphoreRef::Timeline(pair) = semaphore {
                timeline_signals.push((pair.semaphore.state.clone(), pair.value));
            }
        }

        if let Some(fence) = submission.fence {
            assert!(!fence.state.signalled.load(Ordering::Acquire), "Submitted a fence that was not reset.");
        }

        guard.pending.push_back(PendingSubmission {
            fence: submission.fence.map(|fence| fence.state.clone()),
            timeline_signals,
        });
        guard.submitted += 1;
        trace!("Null queue: submission {} queued", guard.submitted);

        if guard.auto_complete {
            while self.shared.complete_front(&mut guard) {}
        }
        Ok(())
    }

    unsafe fn wait_for_idle(&self) -> Result<(), DeviceError> {
        let mut guard = self.shared.state.lock();
        while self.shared.complete_front(&mut guard) {}
        Ok(())
    }
}
