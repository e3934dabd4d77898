use std::sync::Arc;

use horde_common::TileCoord;
use tracing::Level;

use crate::log::WorkerId;
use crate::queue::{LineTask, RegenTask, TileResult};
use crate::shared::Shared;
use crate::stats::FrameCounters;

/// Where the visibility pass sends a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Regenerate,
    Draw,
    Discard,
}

/// Visibility worker loop: cull rows until the line queue is done.
pub(crate) fn run<C>(id: WorkerId, shared: Arc<Shared<C>>) {
    shared.log.push(Level::DEBUG, id, "started");
    let mut lines = 0u64;
    while let Some(task) = shared.queues.lines.consume() {
        cull_line(&shared, &task, id);
        lines += 1;
    }
    shared
        .log
        .push(Level::DEBUG, id, format!("exiting after {lines} lines"));
}

/// Evaluate every tile of one row against the frame snapshot and route it.
///
/// Each tile is updated exactly once: its new visibility and LOD are compared
/// with the previous frame's and then committed as the new previous state.
pub(crate) fn cull_line<C>(shared: &Shared<C>, task: &LineTask, id: WorkerId) {
    let snapshot = &task.snapshot;
    let mut routed = Vec::with_capacity(shared.world.tiles_x() as usize);
    let mut released = 0;

    for x in 0..shared.world.tiles_x() {
        let coord = TileCoord::new(x, task.row);
        let mut tile = shared.world.tile(coord);
        tile.visible = snapshot.is_visible(&tile.aabb);
        tile.lod = snapshot.lod_at(tile.aabb.center());

        let route = if tile.changed() {
            tile.force_regen = false;
            if tile.visible {
                Route::Regenerate
            } else {
                for (swap_index, buffer) in tile.take_command_buffers() {
                    released += 1;
                    if let Err(buffer) = shared.registry.release(swap_index, snapshot.frame, buffer) {
                        shared.log.push(
                            Level::WARN,
                            id,
                            format!("tile {coord}: {} is gone, dropping its buffer", buffer.id.pool),
                        );
                    }
                }
                Route::Discard
            }
        } else if tile.visible {
            Route::Draw
        } else {
            Route::Discard
        };
        tile.commit();
        routed.push((coord, route));
    }

    let count = |r: Route| routed.iter().filter(|(_, route)| *route == r).count();
    let queued = count(Route::Regenerate);
    let drawn = count(Route::Draw);
    let discarded = count(Route::Discard);

    // Counters land before any result can complete the coordinator's drain.
    let counters = &shared.counters;
    FrameCounters::add(&counters.queued_for_regen, queued);
    FrameCounters::add(&counters.drawn_unchanged, drawn);
    FrameCounters::add(&counters.released, released);
    FrameCounters::add(&counters.discarded, discarded);

    for (coord, route) in routed {
        match route {
            Route::Regenerate => shared.queues.process.produce(RegenTask {
                coord,
                frame: snapshot.frame,
                swap_index: snapshot.swap_index,
            }),
            Route::Draw => shared.queues.draw.produce(TileResult::Draw(coord)),
            Route::Discard => {}
        }
    }
    if discarded > 0 {
        shared.queues.draw.produce(TileResult::Discard(discarded as u32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LodConfig;
    use crate::log::WorkerLog;
    use crate::recycler::PoolRegistry;
    use crate::snapshot::FrameSnapshot;
    use glam::Vec3;
    use horde_common::{CommandBufferId, PoolId};
    use horde_render::CameraSnapshot;
    use horde_world::{TileCommandBuffer, TileWorld, WorldConfig};

    const ID: WorkerId = WorkerId {
        kind: crate::log::WorkerKind::Visibility,
        index: 0,
    };

    fn shared() -> (Shared<u32>, Vec<crossbeam_channel::Receiver<crate::recycler::FreeRequest<u32>>>) {
        let config = WorldConfig {
            tiles_x: 4,
            tiles_z: 4,
            ..WorldConfig::default()
        };
        let (registry, inboxes) = PoolRegistry::with_pools(2);
        let shared = Shared::new(
            TileWorld::generate(config, 1),
            registry,
            Arc::new(WorkerLog::new()),
        );
        (shared, inboxes)
    }

    /// Narrow camera straight above the centre of tile (2, 2).
    fn above_tile_2_2() -> CameraSnapshot {
        let eye = Vec3::new(415.0, 300.0, 415.0);
        CameraSnapshot::look_at(eye, eye - Vec3::Y, Vec3::Z, 20f32.to_radians(), 1.0, 1.0, 5000.0)
    }

    /// Below the ground looking further down: nothing is in front of it.
    fn under_world() -> CameraSnapshot {
        let eye = Vec3::new(340.0, -50.0, 340.0);
        CameraSnapshot::look_at(eye, eye - Vec3::Y, Vec3::Z, 1.0, 1.0, 1.0, 5000.0)
    }

    fn task(row: u32, frame: u64, camera: CameraSnapshot) -> LineTask {
        LineTask {
            row,
            snapshot: Arc::new(FrameSnapshot {
                frame,
                swap_index: 0,
                camera,
                lod: LodConfig::default(),
            }),
        }
    }

    fn drain_draw(shared: &Shared<u32>) -> Vec<TileResult> {
        let mut out = Vec::new();
        while !shared.queues.draw.is_empty() {
            shared.queues.draw.consume_batch(64, &mut out);
        }
        out
    }

    #[test]
    fn invisible_row_folds_into_one_discard() {
        let (shared, _) = shared();
        cull_line(&shared, &task(1, 1, under_world()), ID);
        assert_eq!(drain_draw(&shared), vec![TileResult::Discard(4)]);
        assert!(shared.queues.process.is_empty());
        assert_eq!(shared.counters.take().discarded, 4);
    }

    #[test]
    fn newly_visible_tile_is_queued_once() {
        let (shared, _) = shared();
        cull_line(&shared, &task(2, 1, above_tile_2_2()), ID);

        let mut queued = Vec::new();
        shared.queues.process.consume_batch(8, &mut queued);
        assert_eq!(
            queued,
            vec![RegenTask {
                coord: TileCoord::new(2, 2),
                frame: 1,
                swap_index: 0
            }]
        );
        assert!(shared.queues.process.is_empty());
        assert_eq!(drain_draw(&shared), vec![TileResult::Discard(3)]);

        let tile = shared.world.tile(TileCoord::new(2, 2));
        assert!(tile.prev_visible);
        assert_eq!(tile.prev_lod, 0);
    }

    #[test]
    fn unchanged_visible_tile_goes_straight_to_draw() {
        let (shared, _) = shared();
        cull_line(&shared, &task(2, 1, above_tile_2_2()), ID);
        let _ = shared.queues.process.consume();
        let _ = drain_draw(&shared);
        shared.counters.take();

        cull_line(&shared, &task(2, 2, above_tile_2_2()), ID);
        assert!(shared.queues.process.is_empty());
        assert_eq!(
            drain_draw(&shared),
            vec![
                TileResult::Draw(TileCoord::new(2, 2)),
                TileResult::Discard(3)
            ]
        );
        let stats = shared.counters.take();
        assert_eq!(stats.queued_for_regen, 0);
        assert_eq!(stats.drawn_unchanged, 1);
    }

    #[test]
    fn forced_tile_is_regenerated_even_if_unchanged() {
        let (shared, _) = shared();
        cull_line(&shared, &task(2, 1, above_tile_2_2()), ID);
        let _ = shared.queues.process.consume();
        shared.world.tile(TileCoord::new(2, 2)).force_regen = true;

        cull_line(&shared, &task(2, 2, above_tile_2_2()), ID);
        assert_eq!(shared.queues.process.len(), 1);
        assert!(!shared.world.tile(TileCoord::new(2, 2)).force_regen);
    }

    #[test]
    fn hidden_tile_sends_buffers_to_owner() {
        let (shared, inboxes) = shared();
        cull_line(&shared, &task(2, 1, above_tile_2_2()), ID);
        let id = CommandBufferId {
            pool: PoolId(1),
            block: 0,
            slot: 5,
            generation: 2,
        };
        shared
            .world
            .tile(TileCoord::new(2, 2))
            .install_command_buffers(vec![TileCommandBuffer {
                id,
                encoded_frame: 1,
                buffer: 7,
            }]);

        cull_line(&shared, &task(2, 2, under_world()), ID);
        assert!(inboxes[0].is_empty());
        let request = inboxes[1].try_recv().unwrap();
        assert_eq!(request.buffer.id, id);
        assert_eq!(request.freed_in, 2);
        assert!(!shared.world.tile(TileCoord::new(2, 2)).has_command_buffers());
        assert_eq!(shared.counters.take().released, 1);
    }
}
