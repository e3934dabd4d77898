use std::sync::Arc;

use horde_render::{CommandBackend, EncodeRequest};
use tracing::Level;

use crate::error::RecycleError;
use crate::log::WorkerId;
use crate::queue::{RegenTask, TileResult};
use crate::recycler::CommandBufferRecycler;
use crate::shared::Shared;
use crate::stats::FrameCounters;

/// Regeneration worker loop. Returns the worker's recycler once the process
/// queue is done so the coordinator can tear it down.
pub(crate) fn run<B: CommandBackend>(
    id: WorkerId,
    shared: Arc<Shared<B::Buffer>>,
    backend: Arc<B>,
    mut recycler: CommandBufferRecycler<B>,
    batch_size: usize,
) -> CommandBufferRecycler<B> {
    shared
        .log
        .push(Level::DEBUG, id, format!("started with {}", recycler.id()));
    let mut batch = Vec::with_capacity(batch_size);
    let mut tiles = 0u64;

    while shared.queues.process.consume_batch(batch_size, &mut batch) > 0 {
        for task in batch.drain(..) {
            if let Err(e) = regenerate(&shared, backend.as_ref(), &mut recycler, task, id) {
                shared.log.push(Level::ERROR, id, e.to_string());
                shared.raise(e);
            }
            // Always accounted for, even when the tile kept its old buffers.
            shared.queues.draw.produce(TileResult::Draw(task.coord));
            tiles += 1;
        }
    }

    shared
        .log
        .push(Level::DEBUG, id, format!("exiting after {tiles} tiles"));
    recycler
}

/// Re-encode every swap image's command buffer for one tile.
///
/// The new buffers replace the old ones only once all encodes succeed; the
/// replaced buffers then go back to their owning pool. If an encode fails the
/// tile keeps its previous buffers and is flagged for regeneration next frame.
pub(crate) fn regenerate<B: CommandBackend>(
    shared: &Shared<B::Buffer>,
    backend: &B,
    recycler: &mut CommandBufferRecycler<B>,
    task: RegenTask,
    id: WorkerId,
) -> Result<(), RecycleError> {
    recycler.begin_frame(task.frame, task.swap_index);

    let mut tile = shared.world.tile(task.coord);
    let images = tile.command_buffers.len() as u32;
    let mut fresh = Vec::with_capacity(images as usize);

    for swap_index in 0..images {
        let mut cb = match recycler.acquire(swap_index) {
            Ok(cb) => cb,
            Err(e) => {
                tile.force_regen = true;
                drop(tile);
                for (i, cb) in fresh.into_iter().enumerate() {
                    recycler.release(i as u32, task.frame, cb);
                }
                return Err(e);
            }
        };

        let request = EncodeRequest {
            coord: task.coord,
            lod: tile.lod,
            swap_index,
            frame: task.frame,
            objects: &tile.objects,
        };
        if let Err(e) = backend.encode(&request, &mut cb.buffer) {
            tile.force_regen = true;
            drop(tile);
            recycler.release(swap_index, task.frame, cb);
            for (i, cb) in fresh.into_iter().enumerate() {
                recycler.release(i as u32, task.frame, cb);
            }
            FrameCounters::add(&shared.counters.encode_failures, 1);
            shared
                .log
                .push(Level::WARN, id, format!("{e}; keeping previous command buffers"));
            return Ok(());
        }
        cb.encoded_frame = task.frame;
        fresh.push(cb);
    }

    let superseded = tile.install_command_buffers(fresh);
    drop(tile);

    FrameCounters::add(&shared.counters.released, superseded.len());
    for (swap_index, cb) in superseded {
        if cb.id.pool == recycler.id() {
            recycler.release(swap_index, task.frame, cb);
        } else if let Err(cb) = shared.registry.release(swap_index, task.frame, cb) {
            shared.log.push(
                Level::WARN,
                id,
                format!("tile {}: {} is gone, dropping its buffer", task.coord, cb.id.pool),
            );
        }
    }
    FrameCounters::add(&shared.counters.regenerated, 1);
    Ok(())
}
