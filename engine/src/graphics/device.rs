use std::sync::Arc;

use log::{debug, info};

use super::gpu::{Device as _, GPUBackend};
use super::*;

/// Owns the command buffer pool, the memory allocator and the sync points of one host device.
pub struct GraphicsDevice<B: GPUBackend> {
    device: Arc<B::Device>,
    settings: GraphicsSettings,
    command_pool: Arc<CommandBufferPool<B>>,
    memory_allocator: Arc<MemoryAllocator<B>>,
    sync_points: SyncPointManager<B>,
}

impl<B: GPUBackend> GraphicsDevice<B> {
    pub fn new(device: &Arc<B::Device>, flusher: Arc<dyn CommandFlusher>, settings: GraphicsSettings) -> Result<Self, GraphicsError> {
        let command_pool = Arc::new(CommandBufferPool::new(device, &settings.command_buffer_pool)?);
        let memory_allocator = Arc::new(MemoryAllocator::new(device, &settings.memory));
        let sync_points = SyncPointManager::new(&command_pool, flusher, &settings.sync_points)?;
        info!(
            "Created {} graphics device, {} memory types, UMA: {}",
            B::name(),
            device.memory_type_infos().len(),
            memory_allocator.is_uma()
        );

        Ok(Self {
            device: device.clone(),
            settings,
            command_pool,
            memory_allocator,
            sync_points,
        })
    }

    #[inline(always)]
    pub fn device(&self) -> &Arc<B::Device> {
        &self.device
    }

    #[inline(always)]
    pub fn settings(&self) -> &GraphicsSettings {
        &self.settings
    }

    #[inline(always)]
    pub fn command_pool(&self) -> &Arc<CommandBufferPool<B>> {
        &self.command_pool
    }

    #[inline(always)]
    pub fn memory_allocator(&self) -> &Arc<MemoryAllocator<B>> {
        &self.memory_allocator
    }

    #[inline(always)]
    pub fn sync_points(&self) -> &SyncPointManager<B> {
        &self.sync_points
    }

    pub fn rent_command_buffer(&self) -> Result<CommandBufferRecorder<B>, GraphicsError> {
        self.command_pool.rent()
    }

    pub fn submit(&self, recorder: CommandBufferRecorder<B>) -> Result<u64, GraphicsError> {
        self.command_pool.submit(recorder, &[], &[])
    }

    pub fn create_buffer_usage_tracker(&self, size: u64) -> Arc<BufferUsageTracker<B>> {
        Arc::new(BufferUsageTracker::new(size, self.settings.buffer_usage.granularity))
    }

    /// Wraps a buffer of `size` bytes so its range usage is tracked per command buffer.
    pub fn create_buffer_resource<T: Send + Sync + 'static>(&self, value: T, size: u64) -> Arc<ResourceHandle<B, T>> {
        ResourceHandle::with_waitable(value, self.create_buffer_usage_tracker(size))
    }

    pub fn create_resource<T: Send + Sync + 'static>(&self, value: T) -> Arc<ResourceHandle<B, T>> {
        ResourceHandle::new(value)
    }

    pub fn allocate_memory(&self, usage: MemoryUsage, requirements: &gpu::ResourceHeapInfo) -> Result<MemoryAllocation<B>, GraphicsError> {
        self.memory_allocator.allocate(usage, requirements)
    }

    /// Per frame housekeeping. Never blocks on the GPU.
    pub fn maintain(&self) {
        let reclaimed_slots = self.command_pool.sweep();
        let dropped_sync_points = self.sync_points.cleanup();
        let reclaimed_blocks = self.memory_allocator.reclaim(ReclaimPolicy::Conservative);
        if reclaimed_slots + dropped_sync_points + reclaimed_blocks != 0 {
            debug!(
                "Maintenance reclaimed {} command buffers, {} sync points and {} memory blocks",
                reclaimed_slots, dropped_sync_points, reclaimed_blocks
            );
        }
    }

    /// Blocks until the GPU is idle and returns every command buffer to the pool.
    pub fn wait_idle(&self) {
        self.command_pool.wait_idle();
        self.sync_points.cleanup();
    }
}

impl<B: GPUBackend> Drop for GraphicsDevice<B> {
    fn drop(&mut self) {
        self.wait_idle();
        self.memory_allocator.reclaim(ReclaimPolicy::Aggressive);
    }
}
