use std::ops::Deref;

use ash::vk;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VkFeatures: u32 {
        const TIMELINE_SEMAPHORES = 0b1;
        const BDA                 = 0b10;
    }
}

/// The logical device together with everything needed to query its physical device.
/// Destroys the logical device when dropped, the instance stays owned by the embedder.
pub struct RawVkDevice {
    pub device: ash::Device,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub features: VkFeatures,
}

impl Deref for RawVkDevice {
    type Target = ash::Device;

    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for RawVkDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
