use std::sync::Arc;

use ash::vk;
use log::{info, warn};

use emugpu_core::gpu::{Device, DeviceError, MemoryKind, MemoryTypeInfo, OutOfMemoryError, Queue};

use super::*;

pub struct VkDevice {
    device: Arc<RawVkDevice>,
    queue: VkQueue,
    memory_types: Vec<MemoryTypeInfo>,
    memory_properties: Vec<vk::MemoryPropertyFlags>,
}

impl VkDevice {
    /// Takes ownership of `device`. `features` lists what was enabled when the device was created.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        queue_index: u32,
        features: VkFeatures,
    ) -> Self {
        let raw = Arc::new(RawVkDevice {
            device,
            instance: instance.clone(),
            physical_device,
            features,
        });

        let properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let mut memory_types = Vec::<MemoryTypeInfo>::with_capacity(properties.memory_type_count as usize);
        let mut memory_properties = Vec::<vk::MemoryPropertyFlags>::with_capacity(properties.memory_type_count as usize);
        for memory_type in &properties.memory_types[..properties.memory_type_count as usize] {
            let heap = &properties.memory_heaps[memory_type.heap_index as usize];
            let flags = memory_type.property_flags;
            memory_types.push(MemoryTypeInfo {
                memory_index: memory_type.heap_index,
                memory_kind: if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
                    MemoryKind::VRAM
                } else {
                    MemoryKind::RAM
                },
                is_cached: flags.contains(vk::MemoryPropertyFlags::HOST_CACHED),
                is_cpu_accessible: flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
                is_coherent: flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            });
            memory_properties.push(flags);
        }
        info!(
            "Vulkan device with {} memory types, features: {:?}",
            memory_types.len(),
            features
        );

        let queue = VkQueue::new(&raw, queue_family_index, queue_index);
        Self {
            device: raw,
            queue,
            memory_types,
            memory_properties,
        }
    }

    #[inline(always)]
    pub fn raw(&self) -> &Arc<RawVkDevice> {
        &self.device
    }
}

impl Device<VkBackend> for VkDevice {
    unsafe fn create_command_buffer(&self) -> Result<VkCommandBuffer, DeviceError> {
        VkCommandBuffer::new(&self.device, self.queue.family_index())
    }

    unsafe fn create_fence(&self) -> Result<VkFence, DeviceError> {
        VkFence::new(&self.device)
    }

    unsafe fn create_semaphore(&self) -> Result<VkSemaphore, DeviceError> {
        VkSemaphore::new(&self.device)
    }

    fn supports_timeline_semaphores(&self) -> bool {
        self.device.features.contains(VkFeatures::TIMELINE_SEMAPHORES)
    }

    unsafe fn create_timeline_semaphore(&self, initial_value: u64) -> Result<VkTimelineSemaphore, DeviceError> {
        if !self.supports_timeline_semaphores() {
            return Err(DeviceError::Other(vk::Result::ERROR_FEATURE_NOT_PRESENT.as_raw()));
        }
        VkTimelineSemaphore::new(&self.device, initial_value)
    }

    fn memory_type_infos(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    unsafe fn create_heap(&self, memory_type_index: u32, size: u64, mapped: bool) -> Result<VkMemoryHeap, OutOfMemoryError> {
        let properties = match self.memory_properties.get(memory_type_index as usize) {
            Some(properties) => *properties,
            None => return Err(OutOfMemoryError {}),
        };
        VkMemoryHeap::new(&self.device, memory_type_index, properties, size, mapped)
    }

    fn queue(&self) -> &VkQueue {
        &self.queue
    }

    unsafe fn wait_for_idle(&self) {
        if let Err(e) = self.queue.wait_for_idle() {
            warn!("Waiting for the queue to go idle failed: {}", e);
        }
        if let Err(e) = self.device.device_wait_idle() {
            warn!("Waiting for the device to go idle failed: {:?}", e);
        }
    }
}
