use std::sync::Arc;

use ash::vk;
use smallvec::SmallVec;

use emugpu_core::gpu::{DeviceError, Queue, SemaphoreRef, Submission};

use super::*;

pub struct VkQueue {
    queue: parking_lot::Mutex<vk::Queue>,
    queue_family_index: u32,
    device: Arc<RawVkDevice>,
}

impl VkQueue {
    pub(crate) fn new(device: &Arc<RawVkDevice>, queue_family_index: u32, queue_index: u32) -> Self {
        let queue = unsafe { device.get_device_queue(queue_family_index, queue_index) };
        Self {
            queue: parking_lot::Mutex::new(queue),
            queue_family_index,
            device: device.clone(),
        }
    }

    #[inline(always)]
    pub fn family_index(&self) -> u32 {
        self.queue_family_index
    }
}

fn semaphore_handle_and_value(semaphore: &SemaphoreRef<VkBackend>) -> (vk::Semaphore, u64) {
    match semaphore {
        SemaphoreRef::Binary(semaphore) => (semaphore.handle(), 0),
        SemaphoreRef::Timeline(pair) => (pair.semaphore.handle(), pair.value),
    }
}

impl Queue<VkBackend> for VkQueue {
    unsafe fn submit(&self, submission: &Submission<VkBackend>) -> Result<(), DeviceError> {
        let command_buffers: SmallVec<[vk::CommandBuffer; 4]> = submission
            .command_buffers
            .iter()
            .map(|command_buffer| command_buffer.handle())
            .collect();

        let mut wait_semaphores = SmallVec::<[vk::Semaphore; 4]>::new();
        let mut wait_values = SmallVec::<[u64; 4]>::new();
        let mut wait_stages = SmallVec::<[vk::PipelineStageFlags; 4]>::new();
        for semaphore in submission.wait_semaphores {
            let (handle, value) = semaphore_handle_and_value(semaphore);
            wait_semaphores.push(handle);
            wait_values.push(value);
            wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
        }

        let mut signal_semaphores = SmallVec::<[vk::Semaphore; 4]>::new();
        let mut signal_values = SmallVec::<[u64; 4]>::new();
        for semaphore in submission.signal_semaphores {
            let (handle, value) = semaphore_handle_and_value(semaphore);
            signal_semaphores.push(handle);
            signal_values.push(value);
        }

        let uses_timeline = submission
            .wait_semaphores
            .iter()
            .chain(submission.signal_semaphores.iter())
            .any(|semaphore| matches!(semaphore, SemaphoreRef::Timeline(_)));

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let mut submit = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        if uses_timeline {
            submit = submit.push_next(&mut timeline_info);
        }

        let fence = submission.fence.map_or(vk::Fence::null(), |fence| fence.handle());
        let queue = self.queue.lock();
        self.device
            .queue_submit(*queue, &[submit.build()], fence)
            .map_err(vk_error)
    }

    unsafe fn wait_for_idle(&self) -> Result<(), DeviceError> {
        let queue = self.queue.lock();
        self.device.queue_wait_idle(*queue).map_err(vk_error)
    }
}
