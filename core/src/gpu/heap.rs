use std::ffi::c_void;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ResourceHeapInfo {
    pub memory_type_mask: u32,
    pub alignment: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryTypeInfo {
    pub memory_index: u32,
    pub memory_kind: MemoryKind,
    pub is_cached: bool,
    pub is_cpu_accessible: bool,
    pub is_coherent: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum MemoryKind {
    VRAM,
    RAM,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of memory")]
pub struct OutOfMemoryError {}

/// One device memory allocation as returned by the host API.
pub trait Heap {
    fn memory_type_index(&self) -> u32;
    fn size(&self) -> u64;
    fn is_mapped(&self) -> bool;

    /// Host pointer to `offset` bytes into the heap, `None` for heaps that were not mapped.
    unsafe fn map_ptr(&self, offset: u64) -> Option<*mut c_void>;
}
