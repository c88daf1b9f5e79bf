use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use emugpu_core::gpu::{DeviceError, Fence, TimelineSemaphore};

use super::*;

pub struct VkFence {
    fence: vk::Fence,
    device: Arc<RawVkDevice>,
}

impl VkFence {
    pub(crate) fn new(device: &Arc<RawVkDevice>) -> Result<Self, DeviceError> {
        let info = vk::FenceCreateInfo::default();
        let fence = unsafe { device.create_fence(&info, None) }.map_err(vk_error)?;
        Ok(Self {
            fence,
            device: device.clone(),
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Fence for VkFence {
    fn is_signalled(&self) -> Result<bool, DeviceError> {
        unsafe { self.device.get_fence_status(self.fence) }.map_err(vk_error)
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<bool, DeviceError> {
        match unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error(e)),
        }
    }

    unsafe fn reset(&self) -> Result<(), DeviceError> {
        self.device.reset_fences(&[self.fence]).map_err(vk_error)
    }
}

impl Drop for VkFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

pub struct VkSemaphore {
    semaphore: vk::Semaphore,
    device: Arc<RawVkDevice>,
}

impl VkSemaphore {
    pub(crate) fn new(device: &Arc<RawVkDevice>) -> Result<Self, DeviceError> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.create_semaphore(&info, None) }.map_err(vk_error)?;
        Ok(Self {
            semaphore,
            device: device.clone(),
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for VkSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

pub struct VkTimelineSemaphore {
    semaphore: vk::Semaphore,
    device: Arc<RawVkDevice>,
}

impl VkTimelineSemaphore {
    pub(crate) fn new(device: &Arc<RawVkDevice>, initial_value: u64) -> Result<Self, DeviceError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let semaphore = unsafe { device.create_semaphore(&info, None) }.map_err(vk_error)?;
        Ok(Self {
            semaphore,
            device: device.clone(),
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl TimelineSemaphore for VkTimelineSemaphore {
    fn value(&self) -> Result<u64, DeviceError> {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }.map_err(vk_error)
    }

    fn await_value(&self, value: u64, timeout: Option<Duration>) -> Result<bool, DeviceError> {
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder().semaphores(&semaphores).values(&values);
        match unsafe { self.device.wait_semaphores(&info, timeout_ns(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error(e)),
        }
    }
}

impl Drop for VkTimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
