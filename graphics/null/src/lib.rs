//! A backend without a GPU. Submissions are queued on the CPU and only
//! "execute" (signalling their fence and timeline values) when the owner of the
//! device completes them, or immediately in auto-complete mode.

pub use self::backend::NullBackend;
pub use self::command::NullCommandBuffer;
pub use self::device::{NullDevice, NullDeviceInfo};
pub use self::heap::NullHeap;
pub use self::queue::NullQueue;
pub use self::sync::{NullFence, NullSemaphore, NullTimelineSemaphore};

pub(crate) use self::shared::*;

mod backend;
mod command;
mod device;
mod heap;
mod queue;
mod shared;
mod sync;
