use thiserror::Error;

use super::gpu::{DeviceError, OutOfMemoryError};
use super::MemoryUsage;

#[derive(Debug, Error)]
pub enum GraphicsError {
    #[error("queue submission failed")]
    Submission {
        #[source]
        source: DeviceError,
    },

    #[error("command buffer {operation} failed")]
    CommandBuffer {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },

    /// Every reclaim pass ran and the host still refused the allocation.
    #[error("failed to allocate {size} bytes from memory type {memory_type_index}")]
    Allocation {
        size: u64,
        memory_type_index: u32,
        #[source]
        source: OutOfMemoryError,
    },

    #[error("no memory type in mask {memory_type_mask:#b} can back {usage:?} memory")]
    NoMatchingMemoryType {
        usage: MemoryUsage,
        memory_type_mask: u32,
    },

    #[error("all {capacity} command buffer slots are recording and the pool may not grow beyond {max_capacity}")]
    PoolExhausted {
        capacity: usize,
        max_capacity: usize,
    },

    #[error("failed to create {object}")]
    ObjectCreation {
        object: &'static str,
        #[source]
        source: DeviceError,
    },
}

impl GraphicsError {
    /// Device loss is the only error the host API never recovers from.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            GraphicsError::Submission { source: DeviceError::DeviceLost }
                | GraphicsError::CommandBuffer { source: DeviceError::DeviceLost, .. }
                | GraphicsError::ObjectCreation { source: DeviceError::DeviceLost, .. }
        )
    }
}
