use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use horde_common::{PoolId, TileCoord};
use horde_render::{CameraSnapshot, CommandBackend, Swapchain};
use horde_world::TileWorld;

use crate::config::HordeConfig;
use crate::error::PipelineError;
use crate::log::{WorkerId, WorkerKind, WorkerLog};
use crate::queue::{LineTask, TileResult};
use crate::recycler::{CommandBufferRecycler, PoolRegistry};
use crate::shared::Shared;
use crate::snapshot::FrameSnapshot;
use crate::stats::FrameStats;
use crate::{regen, visibility};

/// Where the coordinator is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    AcquireFence,
    PublishSnapshot,
    FanOutTasks,
    DrainUntilComplete,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Acquire or present failed; presentation was skipped.
    Dropped,
}

/// What one frame did.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub swap_index: Option<u32>,
    pub outcome: FrameOutcome,
    /// Tiles to draw, in arrival order.
    pub draw_list: Vec<TileCoord>,
    pub discard_batches: Vec<u32>,
    pub stats: FrameStats,
    pub elapsed: Duration,
}

impl FrameReport {
    fn dropped(frame: u64, elapsed: Duration) -> Self {
        Self {
            frame,
            swap_index: None,
            outcome: FrameOutcome::Dropped,
            draw_list: Vec::new(),
            discard_batches: Vec::new(),
            stats: FrameStats::default(),
            elapsed,
        }
    }

    pub fn discarded(&self) -> usize {
        self.discard_batches.iter().map(|&n| n as usize).sum()
    }

    /// Tiles drained this frame. Equals the grid size for every completed frame.
    pub fn accounted(&self) -> usize {
        self.draw_list.len() + self.discarded()
    }
}

/// Counts from [`FrameCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub frames: u64,
    pub workers_joined: usize,
    pub workers_panicked: usize,
    pub buffers_destroyed: usize,
    pub blocks_destroyed: usize,
    /// Tile buffers whose owning pool was lost with a panicked worker.
    pub buffers_orphaned: usize,
}

/// Drives frames through the worker pools.
///
/// Each frame: acquire a swap image, publish the camera snapshot, enqueue one
/// line task per row, drain the draw queue until every tile is accounted for,
/// then submit the ordered draw list. Any error returned by
/// [`run_frame`](Self::run_frame) is fatal; shut the coordinator down afterwards.
pub struct FrameCoordinator<B, S>
where
    B: CommandBackend + 'static,
    S: Swapchain<Buffer = B::Buffer>,
{
    config: HordeConfig,
    backend: Arc<B>,
    swapchain: S,
    shared: Arc<Shared<B::Buffer>>,
    visibility: Vec<JoinHandle<()>>,
    regen: Vec<JoinHandle<CommandBufferRecycler<B>>>,
    frame: u64,
    phase: FramePhase,
    results: Vec<TileResult>,
    torn_down: bool,
}

impl<B, S> FrameCoordinator<B, S>
where
    B: CommandBackend + 'static,
    S: Swapchain<Buffer = B::Buffer>,
{
    /// Validate the configuration, build the world and start both worker pools.
    pub fn start(config: HordeConfig, backend: Arc<B>, swapchain: S) -> Result<Self, PipelineError> {
        config.validate()?;
        let _span = tracing::info_span!("pipeline_start").entered();

        let hardware = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        let visibility_threads = config.workers.visibility_count(hardware);
        let regen_threads = config.workers.regen_count(hardware);
        let images = swapchain.image_count() as usize;

        let world = TileWorld::generate(config.world.clone(), images);
        let log = Arc::new(WorkerLog::new());
        let (registry, inboxes) = PoolRegistry::with_pools(regen_threads);

        let mut recyclers = Vec::with_capacity(regen_threads);
        for (i, inbox) in inboxes.into_iter().enumerate() {
            let created = CommandBufferRecycler::new(
                PoolId(i as u32),
                WorkerId::regen(i),
                Arc::clone(&backend),
                Arc::clone(&log),
                inbox,
                images,
                config.recycler.spare_floor,
            );
            match created {
                Ok(recycler) => recyclers.push(recycler),
                Err(e) => {
                    for recycler in recyclers {
                        recycler.destroy_all();
                    }
                    log.flush();
                    return Err(e.into());
                }
            }
        }

        let mut coordinator = Self {
            results: Vec::with_capacity(config.workers.drain_batch),
            config,
            backend,
            swapchain,
            shared: Arc::new(Shared::new(world, registry, log)),
            visibility: Vec::with_capacity(visibility_threads),
            regen: Vec::with_capacity(regen_threads),
            frame: 0,
            phase: FramePhase::AcquireFence,
            torn_down: false,
        };

        // Spawn failures return early. Drop stops the threads already started
        // and unspawned recyclers release their blocks when dropped.
        for i in 0..visibility_threads {
            let id = WorkerId::visibility(i);
            let shared = Arc::clone(&coordinator.shared);
            let handle = thread::Builder::new()
                .name(format!("horde-{id}"))
                .spawn(move || visibility::run(id, shared))
                .map_err(PipelineError::Spawn)?;
            coordinator.visibility.push(handle);
        }
        let batch = coordinator.config.workers.regen_batch;
        for (i, recycler) in recyclers.into_iter().enumerate() {
            let id = WorkerId::regen(i);
            let shared = Arc::clone(&coordinator.shared);
            let backend = Arc::clone(&coordinator.backend);
            let handle = thread::Builder::new()
                .name(format!("horde-{id}"))
                .spawn(move || regen::run(id, shared, backend, recycler, batch))
                .map_err(PipelineError::Spawn)?;
            coordinator.regen.push(handle);
        }

        tracing::info!(
            tiles = coordinator.shared.world.len(),
            visibility_threads,
            regen_threads,
            swap_images = images,
            "pipeline started"
        );
        Ok(coordinator)
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn world(&self) -> &TileWorld<B::Buffer> {
        &self.shared.world
    }

    pub fn config(&self) -> &HordeConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    pub fn swapchain_mut(&mut self) -> &mut S {
        &mut self.swapchain
    }

    pub fn visibility_threads(&self) -> usize {
        self.visibility.len()
    }

    pub fn regen_threads(&self) -> usize {
        self.regen.len()
    }

    /// Run one frame with `camera`.
    ///
    /// A failed acquire or present drops the frame (the frame index still
    /// advances). Errors are fatal for the pipeline.
    pub fn run_frame(&mut self, camera: CameraSnapshot) -> Result<FrameReport, PipelineError> {
        let started = Instant::now();
        self.frame += 1;
        let frame = self.frame;
        let _span = tracing::info_span!("frame", frame).entered();
        self.shared.counters.take();

        self.phase = FramePhase::AcquireFence;
        let swap_index = match self
            .swapchain
            .acquire_next_image(self.config.frame.acquire_timeout())
        {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                self.shared.log.flush();
                return Ok(FrameReport::dropped(frame, started.elapsed()));
            }
        };

        self.phase = FramePhase::PublishSnapshot;
        let snapshot = Arc::new(FrameSnapshot {
            frame,
            swap_index,
            camera,
            lod: self.config.lod,
        });

        self.phase = FramePhase::FanOutTasks;
        for row in 0..self.shared.world.tiles_z() {
            self.shared.queues.lines.produce(LineTask {
                row,
                snapshot: Arc::clone(&snapshot),
            });
        }

        self.phase = FramePhase::DrainUntilComplete;
        let drained = self.drain(frame);
        if drained.is_err() {
            self.shared.log.flush();
        }
        let (draw_list, discard_batches) = drained?;

        self.phase = FramePhase::Finalize;
        let fault = self.shared.fault.lock().take();
        if let Some(fault) = fault {
            self.shared.log.flush();
            return Err(fault.into());
        }
        let outcome = self.submit(swap_index, &draw_list);
        let stats = self.shared.counters.take();
        self.shared.log.flush();

        tracing::debug!(
            swap_index,
            drawn = draw_list.len(),
            regenerated = stats.regenerated,
            discarded = stats.discarded,
            "frame complete"
        );
        Ok(FrameReport {
            frame,
            swap_index: Some(swap_index),
            outcome,
            draw_list,
            discard_batches,
            stats,
            elapsed: started.elapsed(),
        })
    }

    /// Consume draw-queue results until every tile of the grid is accounted for.
    fn drain(&mut self, frame: u64) -> Result<(Vec<TileCoord>, Vec<u32>), PipelineError> {
        let mut remaining = self.shared.world.len();
        let mut draw_list = Vec::with_capacity(remaining);
        let mut discard_batches = Vec::new();
        let timeout = self.config.frame.drain_timeout();

        while remaining > 0 {
            self.results.clear();
            let received = self.shared.queues.draw.consume_batch_timeout(
                self.config.workers.drain_batch,
                &mut self.results,
                timeout,
            );
            if received == 0 {
                self.check_workers()?;
                return Err(PipelineError::DrainStalled { frame, remaining });
            }
            for result in self.results.drain(..) {
                debug_assert!(result.tile_count() <= remaining);
                remaining = remaining.saturating_sub(result.tile_count());
                match result {
                    TileResult::Draw(coord) => draw_list.push(coord),
                    TileResult::Discard(n) => discard_batches.push(n),
                }
            }
            tracing::trace!(remaining, "drained batch");
        }
        Ok((draw_list, discard_batches))
    }

    fn check_workers(&self) -> Result<(), PipelineError> {
        if self.shared.queues.all_done() {
            return Ok(());
        }
        if self.visibility.iter().any(JoinHandle::is_finished) {
            return Err(PipelineError::WorkerLost {
                kind: WorkerKind::Visibility,
            });
        }
        if self.regen.iter().any(JoinHandle::is_finished) {
            return Err(PipelineError::WorkerLost {
                kind: WorkerKind::Regen,
            });
        }
        Ok(())
    }

    fn submit(&mut self, swap_index: u32, draw_list: &[TileCoord]) -> FrameOutcome {
        let shared = Arc::clone(&self.shared);
        let tiles: Vec<_> = draw_list.iter().map(|&c| shared.world.tile(c)).collect();
        let buffers: Vec<&B::Buffer> = tiles
            .iter()
            .filter_map(|tile| tile.command_buffer(swap_index))
            .map(|cb| &cb.buffer)
            .collect();
        if buffers.len() < tiles.len() {
            tracing::debug!(
                missing = tiles.len() - buffers.len(),
                "tiles without command buffers skipped"
            );
        }

        match self.swapchain.submit_and_present(swap_index, &buffers) {
            Ok(()) => FrameOutcome::Presented,
            Err(e) => {
                tracing::warn!(error = %e, "present failed, dropping frame");
                FrameOutcome::Dropped
            }
        }
    }

    /// Stop the workers and destroy every command buffer and block.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.teardown()
    }

    fn teardown(&mut self) -> ShutdownReport {
        let _span = tracing::info_span!("shutdown").entered();
        self.torn_down = true;
        self.shared.queues.mark_all_done();

        let mut report = ShutdownReport {
            frames: self.frame,
            ..ShutdownReport::default()
        };
        for handle in self.visibility.drain(..) {
            match handle.join() {
                Ok(()) => report.workers_joined += 1,
                Err(_) => report.workers_panicked += 1,
            }
        }
        let mut recyclers = Vec::with_capacity(self.regen.len());
        for handle in self.regen.drain(..) {
            match handle.join() {
                Ok(recycler) => {
                    report.workers_joined += 1;
                    recyclers.push(recycler);
                }
                Err(_) => report.workers_panicked += 1,
            }
        }

        // Tile-held buffers go home before their pools are destroyed.
        for (swap_index, buffer) in self.shared.world.drain_command_buffers() {
            if self
                .shared
                .registry
                .release(swap_index, self.frame, buffer)
                .is_err()
            {
                report.buffers_orphaned += 1;
            }
        }
        for recycler in recyclers {
            let teardown = recycler.destroy_all();
            report.buffers_destroyed += teardown.buffers;
            report.blocks_destroyed += teardown.blocks;
        }

        self.shared.log.flush();
        tracing::info!(
            frames = report.frames,
            workers = report.workers_joined,
            buffers = report.buffers_destroyed,
            blocks = report.blocks_destroyed,
            "pipeline stopped"
        );
        report
    }
}

impl<B, S> Drop for FrameCoordinator<B, S>
where
    B: CommandBackend + 'static,
    S: Swapchain<Buffer = B::Buffer>,
{
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}
