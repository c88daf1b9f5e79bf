pub use self::backend::*;
pub use self::command::*;
pub use self::device::*;
pub use self::error::*;
pub use self::heap::*;
pub use self::queue::*;
pub use self::sync::*;

mod backend;
mod command;
mod device;
mod error;
mod heap;
mod queue;
mod sync;
