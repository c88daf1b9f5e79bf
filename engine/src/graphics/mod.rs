pub use device::*;
pub use error::*;
pub use settings::*;
pub use fence::*;
pub use allocator::*;
pub use memory::*;
pub use buffer_usage::*;
pub use command::*;
pub use resource::*;
pub use sync::*;

mod device;
mod error;
mod settings;
mod fence;
mod allocator;
mod memory;
mod buffer_usage;
mod command;
mod resource;
mod sync;

pub use emugpu_core::gpu;
