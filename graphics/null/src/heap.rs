use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use emugpu_core::gpu::*;

use super::*;

pub struct NullHeap {
    shared: Arc<NullShared>,
    memory_type_index: u32,
    size: u64,
    host_memory: Option<NonNull<u8>>,
}

unsafe impl Send for NullHeap {}
unsafe impl Sync for NullHeap {}

const HOST_MEMORY_ALIGNMENT: usize = 256;

impl NullHeap {
    pub(crate) fn new(shared: &Arc<NullShared>, memory_type_index: u32, size: u64, mapped: bool) -> Result<Self, OutOfMemoryError> {
        {
            let mut guard = shared.state.lock();
            if guard.failing_heaps != 0 {
                guard.failing_heaps -= 1;
                return Err(OutOfMemoryError {});
            }
            if let Some(budget) = guard.heap_budget {
                if guard.heap_bytes + size > budget {
                    return Err(OutOfMemoryError {});
                }
            }
            guard.heap_bytes += size;
            guard.live_heaps += 1;
        }

        let host_memory = if mapped && size != 0 {
            let layout = Layout::from_size_align(size as usize, HOST_MEMORY_ALIGNMENT).map_err(|_| OutOfMemoryError {})?;
            NonNull::new(unsafe { alloc_zeroed(layout) })
        } else {
            None
        };
        if mapped && size != 0 && host_memory.is_none() {
            let mut guard = shared.state.lock();
            guard.heap_bytes -= size;
            guard.live_heaps -= 1;
            return Err(OutOfMemoryError {});
        }

        Ok(Self {
            shared: shared.clone(),
            memory_type_index,
            size,
            host_memory,
        })
    }
}

impl Heap for NullHeap {
    fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_mapped(&self) -> bool {
        self.host_memory.is_some()
    }

    unsafe fn map_ptr(&self, offset: u64) -> Option<*mut c_void> {
        debug_assert!(offset <= self.size);
        self.host_memory.map(|ptr| ptr.as_ptr().add(offset as usize) as *mut c_void)
    }
}

impl Drop for NullHeap {
    fn drop(&mut self) {
        if let Some(ptr) = self.host_memory.take() {
            unsafe {
                dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(self.size as usize, HOST_MEMORY_ALIGNMENT));
            }
        }
        let mut guard = self.shared.state.lock();
        guard.heap_bytes -= self.size;
        guard.live_heaps -= 1;
    }
}
