//! Resource lifetime and submission synchronization for an emulator's host GPU backend.
//!
//! Everything lives in [`graphics`] and is generic over a
//! [`GPUBackend`](emugpu_core::gpu::GPUBackend).

pub mod graphics;

#[allow(unused_imports)]
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
