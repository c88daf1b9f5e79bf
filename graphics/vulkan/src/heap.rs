use std::ffi::c_void;
use std::sync::Arc;

use ash::vk;
use log::warn;

use emugpu_core::gpu::{Heap, OutOfMemoryError};

use super::*;

pub struct VkMemoryHeap {
    device: Arc<RawVkDevice>,
    memory: vk::DeviceMemory,
    memory_type_index: u32,
    size: u64,
    map_ptr: Option<*mut c_void>,
}

unsafe impl Send for VkMemoryHeap {}
unsafe impl Sync for VkMemoryHeap {}

impl Drop for VkMemoryHeap {
    fn drop(&mut self) {
        unsafe {
            if self.map_ptr.is_some() {
                self.device.unmap_memory(self.memory);
            }

            self.device.free_memory(self.memory, None);
        }
    }
}

impl VkMemoryHeap {
    pub(crate) unsafe fn new(
        device: &Arc<RawVkDevice>,
        memory_type_index: u32,
        memory_properties: vk::MemoryPropertyFlags,
        size: u64,
        mapped: bool,
    ) -> Result<Self, OutOfMemoryError> {
        if mapped && !memory_properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            warn!("Memory type {} cannot be mapped", memory_type_index);
            return Err(OutOfMemoryError {});
        }

        let mut flags_info = vk::MemoryAllocateFlagsInfo::builder().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        if device.features.contains(VkFeatures::BDA) {
            memory_info = memory_info.push_next(&mut flags_info);
        }

        let memory = match device.allocate_memory(&memory_info, None) {
            Ok(memory) => memory,
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                return Err(OutOfMemoryError {});
            }
            Err(e) => {
                warn!("Allocating {} bytes of memory type {} failed: {:?}", size, memory_type_index, e);
                return Err(OutOfMemoryError {});
            }
        };

        let map_ptr = if mapped {
            match device.map_memory(memory, 0u64, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) {
                Ok(map_ptr) => Some(map_ptr),
                Err(e) => {
                    warn!("Mapping memory of type {} failed: {:?}", memory_type_index, e);
                    device.free_memory(memory, None);
                    return Err(OutOfMemoryError {});
                }
            }
        } else {
            None
        };

        Ok(Self {
            device: device.clone(),
            memory,
            memory_type_index,
            size,
            map_ptr,
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.memory
    }
}

impl Heap for VkMemoryHeap {
    fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_mapped(&self) -> bool {
        self.map_ptr.is_some()
    }

    unsafe fn map_ptr(&self, offset: u64) -> Option<*mut c_void> {
        self.map_ptr.map(|map_ptr| map_ptr.add(offset as usize))
    }
}
