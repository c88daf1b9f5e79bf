//! Vulkan implementation of the host API seam on top of `ash`.
//!
//! The instance and logical device are created by the embedder, this crate
//! only takes over the device and the queue it was told about.

pub use self::backend::VkBackend;
pub use self::command::VkCommandBuffer;
pub use self::device::VkDevice;
pub use self::heap::VkMemoryHeap;
pub use self::queue::VkQueue;
pub use self::raw::{RawVkDevice, VkFeatures};
pub use self::sync::{VkFence, VkSemaphore, VkTimelineSemaphore};

pub(crate) use self::error::*;

mod backend;
mod command;
mod device;
mod error;
mod heap;
mod queue;
mod raw;
mod sync;
