use std::sync::Arc;

use ash::vk;

use emugpu_core::gpu::{CommandBuffer, DeviceError};

use super::*;

/// A primary command buffer with a command pool of its own, so resetting it
/// releases all of its pool memory at once.
pub struct VkCommandBuffer {
    device: Arc<RawVkDevice>,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl VkCommandBuffer {
    pub(crate) fn new(device: &Arc<RawVkDevice>, queue_family_index: u32) -> Result<Self, DeviceError> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(vk_error)?;

        let buffer_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&buffer_info) } {
            Ok(command_buffers) => command_buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(vk_error(e));
            }
        };

        Ok(Self {
            device: device.clone(),
            pool,
            command_buffer,
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

impl CommandBuffer for VkCommandBuffer {
    unsafe fn begin(&mut self) -> Result<(), DeviceError> {
        let info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device.begin_command_buffer(self.command_buffer, &info).map_err(vk_error)
    }

    unsafe fn finish(&mut self) -> Result<(), DeviceError> {
        self.device.end_command_buffer(self.command_buffer).map_err(vk_error)
    }

    unsafe fn reset(&mut self) -> Result<(), DeviceError> {
        self.device
            .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
            .map_err(vk_error)
    }
}

impl Drop for VkCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
