//! Horde pipeline: multithreaded tile visibility, command-buffer regeneration
//! and frame coordination.
//!
//! # Invariants
//! - Every tile is evaluated exactly once per frame and accounted for exactly
//!   once in the draw queue, either as a draw entry or inside a discard count.
//! - A tile's previous visibility and LOD are committed under its lock before
//!   the tile leaves the visibility pass.
//! - A command buffer is only ever freed into the pool that allocated it, and
//!   is not reissued until a later frame starts on the same swap image.
//! - Worker threads never block forever: marking the queues done wakes them all.
//!
//! The coordinator owns the frame loop. Visibility workers cull one row at a
//! time against an immutable frame snapshot; regeneration workers re-encode
//! the command buffers of tiles whose visibility or LOD changed.

mod config;
mod coordinator;
mod error;
mod log;
mod queue;
mod recycler;
mod regen;
mod shared;
mod snapshot;
mod stats;
mod visibility;

pub use config::{FrameConfig, HordeConfig, LodConfig, RecyclerConfig, WorkerConfig};
pub use coordinator::{FrameCoordinator, FrameOutcome, FramePhase, FrameReport, ShutdownReport};
pub use error::{ConfigError, PipelineError, RecycleError};
pub use log::{LogRecord, WorkerId, WorkerKind, WorkerLog};
pub use queue::{LineTask, PipelineQueues, RegenTask, TileResult, WorkQueue};
pub use recycler::{CommandBufferRecycler, FreeRequest, PoolRegistry, Teardown};
pub use snapshot::{compute_lod, FrameSnapshot};
pub use stats::{FrameStats, FrameTimer};

pub fn crate_info() -> &'static str {
    "horde-pipeline v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("pipeline"));
    }
}
