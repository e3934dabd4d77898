use std::path::Path;
use std::time::Duration;

use horde_world::{WorldConfig, LOD_UNSET};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Worker pool sizing and batch limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// `None` derives the count from hardware concurrency.
    pub visibility_threads: Option<usize>,
    pub regen_threads: Option<usize>,
    /// Hard cap on either pool.
    pub max_threads: usize,
    /// Tiles a regeneration worker dequeues at once.
    pub regen_batch: usize,
    /// Results the coordinator drains at once.
    pub drain_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_threads: None,
            regen_threads: None,
            max_threads: 16,
            regen_batch: 4,
            drain_batch: 256,
        }
    }
}

impl WorkerConfig {
    pub fn visibility_count(&self, hardware_threads: usize) -> usize {
        pool_size(self.visibility_threads, hardware_threads, self.max_threads)
    }

    pub fn regen_count(&self, hardware_threads: usize) -> usize {
        pool_size(self.regen_threads, hardware_threads, self.max_threads)
    }
}

fn pool_size(requested: Option<usize>, hardware_threads: usize, cap: usize) -> usize {
    requested
        .unwrap_or_else(|| hardware_threads.saturating_sub(1).max(1))
        .min(cap)
}

/// Linear LOD falloff between two camera distances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    pub min_distance: f32,
    pub max_distance: f32,
    pub max_lod: u8,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            min_distance: 400.0,
            max_distance: 2000.0,
            max_lod: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecyclerConfig {
    /// Spare buffers kept per swap image after garbage collection.
    pub spare_floor: usize,
}

impl Default for RecyclerConfig {
    fn default() -> Self {
        Self { spare_floor: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub acquire_timeout_ms: u64,
    /// Longest the coordinator waits for a single draw-queue batch.
    pub drain_timeout_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 1000,
            drain_timeout_ms: 5000,
        }
    }
}

impl FrameConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Everything the pipeline reads at startup. There is no hot reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HordeConfig {
    pub world: WorldConfig,
    pub workers: WorkerConfig,
    pub lod: LodConfig,
    pub recycler: RecyclerConfig,
    pub frame: FrameConfig,
}

impl HordeConfig {
    /// Read a YAML file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.world.tiles_x == 0 || self.world.tiles_z == 0 {
            return invalid(format!(
                "grid must be non-empty, got {}x{}",
                self.world.tiles_x, self.world.tiles_z
            ));
        }
        if self.world.tile_size.min_element() <= 0.0 || self.world.tile_gap.min_element() < 0.0 {
            return invalid("tile size must be positive and gaps non-negative".into());
        }
        if self.world.placements_per_tile == 0 {
            return invalid("placements_per_tile must be at least 1".into());
        }
        if self.workers.max_threads == 0 {
            return invalid("max_threads must be at least 1".into());
        }
        if self.workers.visibility_threads == Some(0) || self.workers.regen_threads == Some(0) {
            return invalid("worker pools need at least one thread".into());
        }
        if self.workers.regen_batch == 0 || self.workers.drain_batch == 0 {
            return invalid("batch sizes must be at least 1".into());
        }
        if !(self.lod.min_distance >= 0.0 && self.lod.max_distance > self.lod.min_distance) {
            return invalid(format!(
                "LOD distances must satisfy 0 <= min < max, got {}..{}",
                self.lod.min_distance, self.lod.max_distance
            ));
        }
        if self.lod.max_lod >= LOD_UNSET {
            return invalid(format!("max_lod must be below {LOD_UNSET}"));
        }
        if self.frame.acquire_timeout_ms == 0 || self.frame.drain_timeout_ms == 0 {
            return invalid("frame timeouts must be non-zero".into());
        }
        Ok(())
    }
}
