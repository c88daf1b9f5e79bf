use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one device. Every field has a default, so partial settings
/// files deserialize fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub command_buffer_pool: CommandBufferPoolSettings,
    pub memory: MemoryArenaSettings,
    pub buffer_usage: BufferUsageSettings,
    pub sync_points: SyncPointSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandBufferPoolSettings {
    pub initial_capacity: usize,
    pub growth_factor: usize,
    pub max_capacity: usize,
}

impl Default for CommandBufferPoolSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 8,
            growth_factor: 2,
            max_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReclaimThresholds {
    /// Empty blocks younger than this survive the pass.
    pub min_idle_ms: u64,
    /// The pass only runs while used / committed bytes of the arena is at most this.
    pub max_usage_ratio: f32,
}

impl ReclaimThresholds {
    #[inline(always)]
    pub fn min_idle(&self) -> Duration {
        Duration::from_millis(self.min_idle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryArenaSettings {
    /// New blocks are sized to the request rounded up to this.
    pub block_alignment: u64,
    /// Fully free blocks kept around per arena and kind before `free` destroys them right away.
    pub max_free_blocks: usize,
    pub conservative: ReclaimThresholds,
    pub forced: ReclaimThresholds,
    pub aggressive: ReclaimThresholds,
}

impl Default for MemoryArenaSettings {
    fn default() -> Self {
        Self {
            block_alignment: 64 << 20,
            max_free_blocks: 1,
            conservative: ReclaimThresholds { min_idle_ms: 5000, max_usage_ratio: 0.5 },
            forced: ReclaimThresholds { min_idle_ms: 500, max_usage_ratio: 0.9 },
            aggressive: ReclaimThresholds { min_idle_ms: 0, max_usage_ratio: 1.0 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferUsageSettings {
    pub granularity: u64,
}

impl Default for BufferUsageSettings {
    fn default() -> Self {
        Self { granularity: 4096 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPointSettings {
    pub wait_timeout_ms: u64,
    pub prefer_timeline_semaphores: bool,
}

impl SyncPointSettings {
    #[inline(always)]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for SyncPointSettings {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 1000,
            prefer_timeline_semaphores: true,
        }
    }
}
