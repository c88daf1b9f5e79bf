//! Host graphics API seam shared by the lifetime/synchronization layer and the
//! per-API backends.

pub mod gpu;
mod align;

pub use self::align::*;
