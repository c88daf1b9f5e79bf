use std::ffi::c_void;
use std::time::Instant;

use smallvec::SmallVec;

use emugpu_core::align_up_64;

use super::gpu::{GPUBackend, Heap as _};
use crate::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    offset: u64,
    length: u64,
}

impl Range {
    #[inline(always)]
    fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// One host memory allocation carved up with a first fit free list.
///
/// The free list stays sorted by offset and adjacent ranges are always merged.
pub struct MemoryBlock<B: GPUBackend> {
    heap: B::Heap,
    size: u64,
    mapped: bool,
    inner: Mutex<MemoryBlockInner>,
}

struct MemoryBlockInner {
    free_list: SmallVec<[Range; 16]>,
    used: u64,
    allocation_count: u32,
    last_used: Instant,
}

impl<B: GPUBackend> MemoryBlock<B> {
    pub(super) fn new(heap: B::Heap, size: u64, mapped: bool) -> Self {
        let mut free_list = SmallVec::<[Range; 16]>::new();
        free_list.push(Range { offset: 0, length: size });
        Self {
            heap,
            size,
            mapped,
            inner: Mutex::new(MemoryBlockInner {
                free_list,
                used: 0,
                allocation_count: 0,
                last_used: Instant::now(),
            }),
        }
    }

    #[inline(always)]
    pub fn heap(&self) -> &B::Heap {
        &self.heap
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    pub fn used(&self) -> u64 {
        self.inner.lock().used
    }

    pub fn allocation_count(&self) -> u32 {
        self.inner.lock().allocation_count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().allocation_count == 0
    }

    pub fn last_used(&self) -> Instant {
        self.inner.lock().last_used
    }

    pub fn free_range_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Host pointer to `offset` bytes into the block, `None` for unmapped blocks.
    pub fn host_ptr(&self, offset: u64) -> Option<*mut c_void> {
        if !self.mapped {
            return None;
        }
        unsafe { self.heap.map_ptr(offset) }
    }

    /// Returns the offset of the first free range that fits `size` bytes at `alignment`.
    pub(super) fn allocate(&self, size: u64, alignment: u64) -> Option<u64> {
        debug_assert!(alignment.is_power_of_two());
        if size == 0 || size > self.size {
            return None;
        }

        let mut inner = self.inner.lock();
        let (index, range, offset) = inner.free_list.iter().enumerate().find_map(|(index, range)| {
            let offset = align_up_64(range.offset, alignment);
            let padding = offset - range.offset;
            if range.length < padding || range.length - padding < size {
                None
            } else {
                Some((index, *range, offset))
            }
        })?;

        let mut remainders = SmallVec::<[Range; 2]>::new();
        if offset > range.offset {
            remainders.push(Range { offset: range.offset, length: offset - range.offset });
        }
        if range.end() > offset + size {
            remainders.push(Range { offset: offset + size, length: range.end() - offset - size });
        }
        inner.free_list.remove(index);
        for (i, remainder) in remainders.into_iter().enumerate() {
            inner.free_list.insert(index + i, remainder);
        }

        inner.used += size;
        inner.allocation_count += 1;
        inner.last_used = Instant::now();
        Some(offset)
    }

    /// Returns the range to the free list. Returns whether the block is completely free afterwards.
    pub(super) fn free(&self, offset: u64, size: u64) -> bool {
        let mut inner = self.inner.lock();
        let freed = Range { offset, length: size };
        assert!(freed.end() <= self.size, "Freed range {:?} exceeds the block size {}", freed, self.size);

        let index = inner.free_list.partition_point(|range| range.offset < offset);
        if index > 0 {
            let previous = inner.free_list[index - 1];
            assert!(previous.end() <= offset, "Range {:?} was freed twice", freed);
        }
        if let Some(next) = inner.free_list.get(index) {
            assert!(freed.end() <= next.offset, "Range {:?} was freed twice", freed);
        }

        let merges_previous = index > 0 && inner.free_list[index - 1].end() == offset;
        let merges_next = inner.free_list.get(index).map_or(false, |next| next.offset == freed.end());
        match (merges_previous, merges_next) {
            (true, true) => {
                let next = inner.free_list.remove(index);
                inner.free_list[index - 1].length += size + next.length;
            }
            (true, false) => {
                inner.free_list[index - 1].length += size;
            }
            (false, true) => {
                let next = &mut inner.free_list[index];
                next.offset = offset;
                next.length += size;
            }
            (false, false) => {
                inner.free_list.insert(index, freed);
            }
        }

        inner.used -= size;
        inner.allocation_count -= 1;
        inner.last_used = Instant::now();
        inner.allocation_count == 0
    }
}

#[cfg(test)]
mod test {
    use emugpu_null::{NullBackend, NullDevice};

    use super::super::gpu::Device;
    use super::*;

    fn block(device: &NullDevice, size: u64) -> MemoryBlock<NullBackend> {
        let heap = unsafe { device.create_heap(1, size, true) }.unwrap();
        MemoryBlock::new(heap, size, true)
    }

    #[test]
    fn first_fit_reuses_hole() {
        let device = NullDevice::default();
        let block = block(&device, 1 << 20);
        assert_eq!(block.allocate(307200, 256), Some(0));
        assert_eq!(block.allocate(307200, 256), Some(307200));
        assert_eq!(block.allocate(307200, 256), Some(614400));

        assert!(!block.free(307200, 307200));
        assert_eq!(block.allocate(256000, 256), Some(307200));
        assert_eq!(block.allocation_count(), 3);
    }

    #[test]
    fn alignment_leaves_padding_free() {
        let device = NullDevice::default();
        let block = block(&device, 65536);
        assert_eq!(block.allocate(100, 1), Some(0));
        assert_eq!(block.allocate(100, 4096), Some(4096));
        assert_eq!(block.free_range_count(), 2);
        assert_eq!(block.allocate(200, 4), Some(100));
    }

    #[test]
    fn frees_coalesce_back_to_one_range() {
        let device = NullDevice::default();
        let block = block(&device, 4096);
        let a = block.allocate(1024, 1).unwrap();
        let b = block.allocate(1024, 1).unwrap();
        let c = block.allocate(1024, 1).unwrap();
        assert!(!block.free(a, 1024));
        assert!(!block.free(c, 1024));
        assert_eq!(block.free_range_count(), 2);
        assert!(block.free(b, 1024));
        assert_eq!(block.free_range_count(), 1);
        assert_eq!(block.used(), 0);
        assert_eq!(block.allocate(4096, 1), Some(0));
    }

    #[test]
    fn oversized_requests_fail() {
        let device = NullDevice::default();
        let block = block(&device, 4096);
        assert_eq!(block.allocate(4097, 1), None);
        assert_eq!(block.allocate(0, 1), None);
        assert_eq!(block.allocate(4096, 1), Some(0));
        assert_eq!(block.allocate(1, 1), None);
    }

    #[test]
    #[should_panic(expected = "freed twice")]
    fn double_free_panics() {
        let device = NullDevice::default();
        let block = block(&device, 4096);
        let a = block.allocate(1024, 1).unwrap();
        let _b = block.allocate(1024, 1).unwrap();
        block.free(a, 1024);
        block.free(a, 1024);
    }
}
