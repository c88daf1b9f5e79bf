use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, trace, warn};

use emugpu_core::align_up_64;

use super::gpu::{self, Device as _, GPUBackend, OutOfMemoryError};
use super::*;
use crate::{Mutex, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryUsage {
    GPUMemory,
    MainMemoryCached,
    MainMemoryWriteCombined,
    MappableGPUMemory,
}

pub type MemoryTypeIndex = u32;
pub type MemoryTypeMask = u32;

/// How hard a reclaim pass tries to hand empty blocks back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReclaimPolicy {
    Conservative,
    Forced,
    Aggressive,
}

impl MemoryArenaSettings {
    pub fn thresholds(&self, policy: ReclaimPolicy) -> ReclaimThresholds {
        match policy {
            ReclaimPolicy::Conservative => self.conservative,
            ReclaimPolicy::Forced => self.forced,
            ReclaimPolicy::Aggressive => self.aggressive,
        }
    }
}

/// Sub-allocates device memory of a single memory type out of large blocks.
///
/// Lookups run under a shared lock, creating and destroying blocks takes the
/// exclusive one. Frees always take the exclusive lock so a block can never be
/// reclaimed while another thread is in the middle of allocating from it.
pub struct DeviceMemoryArena<B: GPUBackend> {
    device: Arc<B::Device>,
    memory_type_index: MemoryTypeIndex,
    settings: MemoryArenaSettings,
    blocks: RwLock<Vec<Arc<MemoryBlock<B>>>>,
}

/// A live range of a [`MemoryBlock`]. Returns itself to the arena when dropped.
pub struct MemoryAllocation<B: GPUBackend> {
    arena: Arc<DeviceMemoryArena<B>>,
    block: Arc<MemoryBlock<B>>,
    offset: u64,
    size: u64,
}

impl<B: GPUBackend> MemoryAllocation<B> {
    #[inline(always)]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub fn block(&self) -> &Arc<MemoryBlock<B>> {
        &self.block
    }

    #[inline(always)]
    pub fn heap(&self) -> &B::Heap {
        self.block.heap()
    }

    #[inline(always)]
    pub fn memory_type_index(&self) -> MemoryTypeIndex {
        self.arena.memory_type_index
    }

    pub fn host_ptr(&self) -> Option<*mut c_void> {
        self.block.host_ptr(self.offset)
    }
}

impl<B: GPUBackend> Drop for MemoryAllocation<B> {
    fn drop(&mut self) {
        self.arena.free(&self.block, self.offset, self.size);
    }
}

impl<B: GPUBackend> DeviceMemoryArena<B> {
    pub fn new(device: &Arc<B::Device>, memory_type_index: MemoryTypeIndex, settings: &MemoryArenaSettings) -> Self {
        assert!(settings.block_alignment.is_power_of_two(), "Block alignment must be a power of two");
        Self {
            device: device.clone(),
            memory_type_index,
            settings: settings.clone(),
            blocks: RwLock::new(Vec::new()),
        }
    }

    #[inline(always)]
    pub fn memory_type_index(&self) -> MemoryTypeIndex {
        self.memory_type_index
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn committed_bytes(&self) -> u64 {
        self.blocks.read().iter().map(|block| block.size()).sum()
    }

    pub fn used_bytes(&self) -> u64 {
        self.blocks.read().iter().map(|block| block.used()).sum()
    }

    pub fn allocate(self: &Arc<Self>, size: u64, alignment: u64, mapped: bool) -> Result<MemoryAllocation<B>, GraphicsError> {
        assert_ne!(size, 0, "Zero sized device memory allocation");
        let alignment = alignment.max(1);
        assert!(alignment.is_power_of_two(), "Device memory alignment {} is not a power of two", alignment);

        if let Some(allocation) = self.allocate_from_existing(size, alignment, mapped) {
            return Ok(allocation);
        }

        if self.reclaim(ReclaimPolicy::Conservative) != 0 {
            if let Some(allocation) = self.allocate_from_existing(size, alignment, mapped) {
                return Ok(allocation);
            }
        }

        let block_size = align_up_64(size, self.settings.block_alignment);
        let block = self.create_block(size, block_size, mapped)?;
        let offset = block.allocate(size, alignment).ok_or(GraphicsError::Allocation {
            size,
            memory_type_index: self.memory_type_index,
            source: OutOfMemoryError {},
        })?;
        self.blocks.write().push(block.clone());
        Ok(MemoryAllocation {
            arena: self.clone(),
            block,
            offset,
            size,
        })
    }

    fn allocate_from_existing(self: &Arc<Self>, size: u64, alignment: u64, mapped: bool) -> Option<MemoryAllocation<B>> {
        let blocks = self.blocks.read();
        blocks
            .iter()
            .filter(|block| block.is_mapped() == mapped && block.size() >= size)
            .find_map(|block| {
                block.allocate(size, alignment).map(|offset| MemoryAllocation {
                    arena: self.clone(),
                    block: block.clone(),
                    offset,
                    size,
                })
            })
    }

    /// Asks the host for a new block, running forced and then aggressive reclaim passes between attempts.
    fn create_block(&self, requested_size: u64, block_size: u64, mapped: bool) -> Result<Arc<MemoryBlock<B>>, GraphicsError> {
        let ladder = [None, Some(ReclaimPolicy::Forced), Some(ReclaimPolicy::Aggressive)];
        let mut last_error = OutOfMemoryError {};
        for policy in ladder {
            if let Some(policy) = policy {
                let reclaimed = self.reclaim(policy);
                debug!("{:?} reclaim freed {} blocks of memory type {}", policy, reclaimed, self.memory_type_index);
            }
            match unsafe { self.device.create_heap(self.memory_type_index, block_size, mapped) } {
                Ok(heap) => {
                    trace!("Created {} byte block for memory type {}", block_size, self.memory_type_index);
                    return Ok(Arc::new(MemoryBlock::new(heap, block_size, mapped)));
                }
                Err(e) => {
                    warn!("Allocating a {} byte block of memory type {} failed", block_size, self.memory_type_index);
                    last_error = e;
                }
            }
        }

        error!("Out of device memory: {} bytes of memory type {} could not be allocated", requested_size, self.memory_type_index);
        Err(GraphicsError::Allocation {
            size: requested_size,
            memory_type_index: self.memory_type_index,
            source: last_error,
        })
    }

    pub(super) fn free(&self, block: &Arc<MemoryBlock<B>>, offset: u64, size: u64) {
        let mut blocks = self.blocks.write();
        if !block.free(offset, size) {
            return;
        }

        let free_blocks = blocks
            .iter()
            .filter(|other| other.is_mapped() == block.is_mapped() && other.is_empty())
            .count();
        if free_blocks > self.settings.max_free_blocks {
            blocks.retain(|other| !Arc::ptr_eq(other, block));
            trace!("Destroyed free block of memory type {}", self.memory_type_index);
        }
    }

    /// Destroys empty blocks that were idle long enough while the arena usage is low enough
    /// for the policy. Returns the number of destroyed blocks.
    pub fn reclaim(&self, policy: ReclaimPolicy) -> usize {
        let thresholds = self.settings.thresholds(policy);
        let mut blocks = self.blocks.write();

        let committed: u64 = blocks.iter().map(|block| block.size()).sum();
        if committed == 0 {
            return 0;
        }
        let used: u64 = blocks.iter().map(|block| block.used()).sum();
        let usage_ratio = used as f64 / committed as f64;
        if usage_ratio > thresholds.max_usage_ratio as f64 {
            return 0;
        }

        let now = Instant::now();
        let min_idle = thresholds.min_idle();
        let count_before = blocks.len();
        blocks.retain(|block| !block.is_empty() || now.saturating_duration_since(block.last_used()) < min_idle);
        let reclaimed = count_before - blocks.len();
        if reclaimed != 0 {
            trace!("{:?} reclaim destroyed {} blocks of memory type {}", policy, reclaimed, self.memory_type_index);
        }
        reclaimed
    }
}

#[derive(Debug)]
pub(super) enum MemoryTypeMatchingStrictness {
    Strict,
    Normal,
    Fallback,
}

/// Picks a memory type for a [`MemoryUsage`] and forwards to one arena per memory type.
pub struct MemoryAllocator<B: GPUBackend> {
    device: Arc<B::Device>,
    is_uma: bool,
    settings: MemoryArenaSettings,
    arenas: Mutex<HashMap<MemoryTypeIndex, Arc<DeviceMemoryArena<B>>>>,
}

impl<B: GPUBackend> MemoryAllocator<B> {
    pub fn new(device: &Arc<B::Device>, settings: &MemoryArenaSettings) -> Self {
        let memory_types = device.memory_type_infos();
        let is_uma = memory_types.iter().all(|memory_type| memory_type.memory_kind == gpu::MemoryKind::VRAM);

        Self {
            device: device.clone(),
            is_uma,
            settings: settings.clone(),
            arenas: Mutex::new(HashMap::new()),
        }
    }

    pub fn arena(&self, memory_type_index: MemoryTypeIndex) -> Arc<DeviceMemoryArena<B>> {
        let mut arenas = self.arenas.lock();
        arenas
            .entry(memory_type_index)
            .or_insert_with(|| Arc::new(DeviceMemoryArena::new(&self.device, memory_type_index, &self.settings)))
            .clone()
    }

    pub fn allocate(&self, usage: MemoryUsage, requirements: &gpu::ResourceHeapInfo) -> Result<MemoryAllocation<B>, GraphicsError> {
        let strictness_levels: &[MemoryTypeMatchingStrictness] = if usage != MemoryUsage::GPUMemory {
            &[MemoryTypeMatchingStrictness::Strict, MemoryTypeMatchingStrictness::Normal, MemoryTypeMatchingStrictness::Fallback]
        } else {
            &[MemoryTypeMatchingStrictness::Normal, MemoryTypeMatchingStrictness::Fallback]
        };

        let mapped = usage != MemoryUsage::GPUMemory;
        let mut last_error = Option::<GraphicsError>::None;
        for strictness in strictness_levels {
            let mask = self.find_memory_type_mask(usage, strictness) & requirements.memory_type_mask;
            match self.try_allocate(mask, requirements.size, requirements.alignment, mapped) {
                Ok(allocation) => return Ok(allocation),
                Err(Some(e)) => last_error = Some(e),
                Err(None) => {}
            }
        }

        Err(last_error.unwrap_or(GraphicsError::NoMatchingMemoryType {
            usage,
            memory_type_mask: requirements.memory_type_mask,
        }))
    }

    /// `Err(None)` means the mask did not contain a single usable memory type.
    fn try_allocate(&self, memory_type_mask: MemoryTypeMask, size: u64, alignment: u64, mapped: bool) -> Result<MemoryAllocation<B>, Option<GraphicsError>> {
        let memory_type_count = self.device.memory_type_infos().len();
        let mut last_error = Option::<GraphicsError>::None;
        for i in 0..memory_type_count {
            if ((1u32 << i as u32) & memory_type_mask) == 0 {
                continue;
            }

            match self.arena(i as u32).allocate(size, alignment, mapped) {
                Ok(allocation) => return Ok(allocation),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error)
    }

    pub(super) fn find_memory_type_mask(&self, usage: MemoryUsage, strictness: &MemoryTypeMatchingStrictness) -> MemoryTypeMask {
        let memory_types = self.device.memory_type_infos();
        let memory_kind = if self.is_uma() || usage == MemoryUsage::GPUMemory || usage == MemoryUsage::MappableGPUMemory {
            gpu::MemoryKind::VRAM
        } else {
            gpu::MemoryKind::RAM
        };
        let cpu_accessible = usage != MemoryUsage::GPUMemory;
        let cached = usage == MemoryUsage::MainMemoryCached;

        let mut mask = 0u32;
        for (i, memory_type) in memory_types.iter().enumerate() {
            match strictness {
                MemoryTypeMatchingStrictness::Strict => {
                    if cached != memory_type.is_cached
                        || cpu_accessible != memory_type.is_cpu_accessible
                        || memory_type.memory_kind != memory_kind
                        || (cpu_accessible && !memory_type.is_coherent) {
                        continue;
                    }
                }
                MemoryTypeMatchingStrictness::Normal => {
                    if (cached && !memory_type.is_cached)
                        || (cpu_accessible && !memory_type.is_cpu_accessible)
                        || memory_type.memory_kind != memory_kind {
                        continue;
                    }
                }
                MemoryTypeMatchingStrictness::Fallback => {
                    if cpu_accessible && !memory_type.is_cpu_accessible {
                        continue;
                    }
                }
            }
            mask |= 1 << i as u32;
        }
        mask
    }

    /// Memory types the device does not report are treated as GPU-only memory.
    pub fn memory_usage(&self, memory_type_index: MemoryTypeIndex) -> MemoryUsage {
        let memory_type_info = match self.device.memory_type_infos().get(memory_type_index as usize) {
            Some(memory_type_info) => memory_type_info,
            None => return MemoryUsage::GPUMemory,
        };
        if memory_type_info.is_cpu_accessible {
            if memory_type_info.is_cached {
                MemoryUsage::MainMemoryCached
            } else if memory_type_info.memory_kind == gpu::MemoryKind::VRAM {
                MemoryUsage::MappableGPUMemory
            } else {
                MemoryUsage::MainMemoryWriteCombined
            }
        } else {
            MemoryUsage::GPUMemory
        }
    }

    #[inline(always)]
    pub fn is_uma(&self) -> bool {
        self.is_uma
    }

    /// Runs a reclaim pass over every arena. Returns the number of destroyed blocks.
    pub fn reclaim(&self, policy: ReclaimPolicy) -> usize {
        let arenas: Vec<Arc<DeviceMemoryArena<B>>> = self.arenas.lock().values().cloned().collect();
        arenas.iter().map(|arena| arena.reclaim(policy)).sum()
    }
}

#[cfg(test)]
mod test {
    use emugpu_null::{NullBackend, NullDevice, NullDeviceInfo};

    use super::*;

    const MIB: u64 = 1 << 20;

    fn arena(device: &Arc<NullDevice>, block_alignment: u64) -> Arc<DeviceMemoryArena<NullBackend>> {
        let settings = MemoryArenaSettings {
            block_alignment,
            ..Default::default()
        };
        Arc::new(DeviceMemoryArena::new(device, 1, &settings))
    }

    #[test]
    fn freed_hole_is_reused_first_fit() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);

        let a = arena.allocate(307200, 256, true).unwrap();
        let b = arena.allocate(307200, 256, true).unwrap();
        let c = arena.allocate(307200, 256, true).unwrap();
        assert_eq!((a.offset(), b.offset(), c.offset()), (0, 307200, 614400));
        assert!(Arc::ptr_eq(a.block(), c.block()));

        drop(b);
        let d = arena.allocate(256000, 256, true).unwrap();
        assert_eq!(d.offset(), 307200);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(device.live_heap_count(), 1);
    }

    #[test]
    fn blocks_are_sized_to_alignment() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        let allocation = arena.allocate(MIB + 1, 1, true).unwrap();
        assert_eq!(allocation.block().size(), 2 * MIB);
        assert_eq!(arena.committed_bytes(), 2 * MIB);
        assert!(allocation.host_ptr().is_some());
    }

    #[test]
    fn mapped_and_unmapped_do_not_share_blocks() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        let mapped = arena.allocate(4096, 1, true).unwrap();
        let unmapped = arena.allocate(4096, 1, false).unwrap();
        assert!(!Arc::ptr_eq(mapped.block(), unmapped.block()));
        assert!(unmapped.host_ptr().is_none());
    }

    #[test]
    fn one_free_block_survives_free() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        let a = arena.allocate(MIB, 1, true).unwrap();
        let b = arena.allocate(MIB, 1, true).unwrap();
        assert_eq!(arena.block_count(), 2);

        drop(a);
        assert_eq!(arena.block_count(), 2);
        drop(b);
        assert_eq!(arena.block_count(), 1);
        assert_eq!(device.live_heap_count(), 1);
    }

    #[test]
    fn reclaim_ladder_respects_thresholds() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        drop(arena.allocate(4096, 1, true).unwrap());
        assert_eq!(arena.block_count(), 1);

        // The block was used just now.
        assert_eq!(arena.reclaim(ReclaimPolicy::Conservative), 0);
        assert_eq!(arena.reclaim(ReclaimPolicy::Forced), 0);
        assert_eq!(arena.reclaim(ReclaimPolicy::Aggressive), 1);
        assert_eq!(arena.block_count(), 0);
        assert_eq!(device.live_heap_count(), 0);
    }

    #[test]
    fn busy_arena_is_not_reclaimed() {
        let device = Arc::new(NullDevice::default());
        let settings = MemoryArenaSettings {
            block_alignment: MIB,
            conservative: ReclaimThresholds { min_idle_ms: 0, max_usage_ratio: 0.5 },
            ..Default::default()
        };
        let arena = Arc::new(DeviceMemoryArena::<NullBackend>::new(&device, 1, &settings));
        let _a = arena.allocate(MIB, 1, true).unwrap();
        let b = arena.allocate(MIB, 1, true).unwrap();
        let _c = arena.allocate(MIB, 1, true).unwrap();
        drop(b);

        // Two of three blocks are still full.
        assert_eq!(arena.reclaim(ReclaimPolicy::Conservative), 0);
        assert_eq!(arena.reclaim(ReclaimPolicy::Aggressive), 1);
        assert_eq!(arena.block_count(), 2);
    }

    #[test]
    fn host_failure_runs_the_ladder_before_giving_up() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        drop(arena.allocate(MIB, 1, true).unwrap());
        assert_eq!(device.live_heap_count(), 1);

        // The idle block is the only thing standing between us and the budget.
        device.set_heap_budget(Some(2 * MIB));
        let big = arena.allocate(2 * MIB, 1, true).unwrap();
        assert_eq!(big.block().size(), 2 * MIB);
        assert_eq!(arena.block_count(), 1);

        match arena.allocate(MIB, 1, true) {
            Err(GraphicsError::Allocation { size, memory_type_index, .. }) => {
                assert_eq!(size, MIB);
                assert_eq!(memory_type_index, 1);
            }
            Err(e) => panic!("Unexpected error {}", e),
            Ok(_) => panic!("Allocation should not fit into the budget"),
        }
    }

    #[test]
    fn allocator_picks_memory_types_by_usage() {
        let device = Arc::new(NullDevice::default());
        let allocator = MemoryAllocator::<NullBackend>::new(&device, &MemoryArenaSettings::default());
        assert!(!allocator.is_uma());

        let requirements = gpu::ResourceHeapInfo {
            memory_type_mask: !0,
            alignment: 256,
            size: 65536,
        };
        let gpu_only = allocator.allocate(MemoryUsage::GPUMemory, &requirements).unwrap();
        assert_eq!(gpu_only.memory_type_index(), 0);
        let upload = allocator.allocate(MemoryUsage::MainMemoryWriteCombined, &requirements).unwrap();
        assert_eq!(upload.memory_type_index(), 1);
        let readback = allocator.allocate(MemoryUsage::MainMemoryCached, &requirements).unwrap();
        assert_eq!(readback.memory_type_index(), 2);
        assert_eq!(allocator.memory_usage(2), MemoryUsage::MainMemoryCached);
    }

    #[test]
    fn allocator_reports_impossible_masks() {
        let device = Arc::new(NullDevice::default());
        let allocator = MemoryAllocator::<NullBackend>::new(&device, &MemoryArenaSettings::default());
        let requirements = gpu::ResourceHeapInfo {
            memory_type_mask: 0b001,
            alignment: 1,
            size: 64,
        };
        match allocator.allocate(MemoryUsage::MainMemoryCached, &requirements) {
            Err(GraphicsError::NoMatchingMemoryType { usage, .. }) => assert_eq!(usage, MemoryUsage::MainMemoryCached),
            _ => panic!("Expected NoMatchingMemoryType"),
        }
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn alignment_has_to_be_a_power_of_two() {
        let device = Arc::new(NullDevice::default());
        let arena = arena(&device, MIB);
        let _allocation = arena.allocate(256, 48, true);
    }

    #[test]
    fn unknown_memory_types_are_gpu_memory() {
        let device = Arc::new(NullDevice::new(NullDeviceInfo {
            memory_types: Vec::new(),
            ..Default::default()
        }));
        let allocator = MemoryAllocator::<NullBackend>::new(&device, &MemoryArenaSettings::default());
        assert_eq!(allocator.memory_usage(0), MemoryUsage::GPUMemory);

        let populated = Arc::new(NullDevice::default());
        let allocator = MemoryAllocator::<NullBackend>::new(&populated, &MemoryArenaSettings::default());
        assert_eq!(allocator.memory_usage(7), MemoryUsage::GPUMemory);
        assert_eq!(allocator.memory_usage(1), MemoryUsage::MainMemoryWriteCombined);
    }
}
