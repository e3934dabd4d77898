use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use horde_common::{MaterialHandle, MeshHandle, PipelineKind, PoolId, TileCoord};
use parking_lot::Mutex;

use crate::backend::{BackendError, CommandBackend, EncodeRequest, Swapchain};

/// One recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCommand {
    BindPipeline(PipelineKind),
    BindMaterial(MaterialHandle),
    DrawIndexed { mesh: MeshHandle, lod: u8, instance: u32 },
}

/// An in-memory command buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedCommands {
    pub tile: Option<TileCoord>,
    pub swap_index: u32,
    pub frame: u64,
    pub commands: Vec<DrawCommand>,
}

impl RecordedCommands {
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::DrawIndexed { .. }))
            .count()
    }
}

/// A block of at most `capacity` buffers.
#[derive(Debug)]
pub struct HeadlessPool {
    pub owner: PoolId,
    capacity: usize,
    live: usize,
}

impl HeadlessPool {
    pub fn live(&self) -> usize {
        self.live
    }
}

/// Backend that records commands in memory. Supports injecting allocation,
/// pool-creation and encode failures.
#[derive(Debug)]
pub struct HeadlessBackend {
    block_capacity: usize,
    pool_limit: Option<usize>,
    failing_tiles: Mutex<HashSet<TileCoord>>,
    live_buffers: AtomicUsize,
    live_pools: AtomicUsize,
    pools_created: AtomicUsize,
    encodes: AtomicU64,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            block_capacity: 256,
            pool_limit: None,
            failing_tiles: Mutex::new(HashSet::new()),
            live_buffers: AtomicUsize::new(0),
            live_pools: AtomicUsize::new(0),
            pools_created: AtomicUsize::new(0),
            encodes: AtomicU64::new(0),
        }
    }

    /// Buffers each block can hand out before allocation fails.
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    /// Total blocks that may ever be created; further creation fails.
    pub fn with_pool_limit(mut self, limit: usize) -> Self {
        self.pool_limit = Some(limit);
        self
    }

    /// Make every encode for `coord` fail until cleared.
    pub fn fail_encoding(&self, coord: TileCoord) {
        self.failing_tiles.lock().insert(coord);
    }

    pub fn clear_encode_failures(&self) {
        self.failing_tiles.lock().clear();
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Relaxed)
    }

    pub fn live_pools(&self) -> usize {
        self.live_pools.load(Ordering::Relaxed)
    }

    pub fn encodes(&self) -> u64 {
        self.encodes.load(Ordering::Relaxed)
    }
}

impl CommandBackend for HeadlessBackend {
    type Pool = HeadlessPool;
    type Buffer = RecordedCommands;

    fn create_pool(&self, owner: PoolId) -> Result<HeadlessPool, BackendError> {
        let created = self.pools_created.fetch_add(1, Ordering::Relaxed);
        if self.pool_limit.is_some_and(|limit| created >= limit) {
            self.pools_created.fetch_sub(1, Ordering::Relaxed);
            return Err(BackendError::PoolCreation(format!(
                "{owner}: block limit {created} reached"
            )));
        }
        self.live_pools.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessPool {
            owner,
            capacity: self.block_capacity,
            live: 0,
        })
    }

    fn allocate(&self, pool: &mut HeadlessPool) -> Result<RecordedCommands, BackendError> {
        if pool.live >= pool.capacity {
            return Err(BackendError::Allocation(format!(
                "{}: block full ({} buffers)",
                pool.owner, pool.capacity
            )));
        }
        pool.live += 1;
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        Ok(RecordedCommands::default())
    }

    fn encode(
        &self,
        request: &EncodeRequest<'_>,
        buffer: &mut RecordedCommands,
    ) -> Result<(), BackendError> {
        if self.failing_tiles.lock().contains(&request.coord) {
            return Err(BackendError::Encode {
                coord: request.coord,
                reason: "injected failure".into(),
            });
        }

        buffer.tile = Some(request.coord);
        buffer.swap_index = request.swap_index;
        buffer.frame = request.frame;
        buffer.commands.clear();

        let mut pipeline = None;
        let mut material = None;
        for (instance, object) in request.objects.iter().enumerate() {
            if pipeline != Some(object.pipeline) {
                buffer.commands.push(DrawCommand::BindPipeline(object.pipeline));
                pipeline = Some(object.pipeline);
                material = None;
            }
            if material != Some(object.material) {
                buffer.commands.push(DrawCommand::BindMaterial(object.material));
                material = Some(object.material);
            }
            buffer.commands.push(DrawCommand::DrawIndexed {
                mesh: object.mesh.mesh,
                lod: object.mesh.resolve(request.lod),
                instance: instance as u32,
            });
        }

        self.encodes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn destroy(&self, pool: &mut HeadlessPool, _buffer: RecordedCommands) {
        pool.live = pool.live.saturating_sub(1);
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
    }

    fn destroy_pool(&self, pool: HeadlessPool) {
        self.live_buffers.fetch_sub(pool.live, Ordering::Relaxed);
        self.live_pools.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Summary of one presented frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    pub swap_index: u32,
    /// Tiles in submission order.
    pub tiles: Vec<TileCoord>,
    pub draws: usize,
}

/// Swapchain that cycles through its images and remembers the last present.
#[derive(Debug)]
pub struct HeadlessSwapchain {
    image_count: u32,
    next_image: u32,
    acquires: u64,
    failing_acquires: HashSet<u64>,
    presents: u64,
    last_presented: Option<PresentedFrame>,
}

impl HeadlessSwapchain {
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count: image_count.max(1),
            next_image: 0,
            acquires: 0,
            failing_acquires: HashSet::new(),
            presents: 0,
            last_presented: None,
        }
    }

    /// Make the `n`th acquire (0-based, counting every call) time out.
    pub fn fail_acquire(&mut self, n: u64) {
        self.failing_acquires.insert(n);
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn last_presented(&self) -> Option<&PresentedFrame> {
        self.last_presented.as_ref()
    }
}

impl Swapchain for HeadlessSwapchain {
    type Buffer = RecordedCommands;

    fn image_count(&self) -> u32 {
        self.image_count
    }

    fn acquire_next_image(&mut self, timeout: Duration) -> Result<u32, BackendError> {
        let call = self.acquires;
        self.acquires += 1;
        if self.failing_acquires.remove(&call) {
            return Err(BackendError::AcquireTimeout(timeout));
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok(index)
    }

    fn submit_and_present(
        &mut self,
        swap_index: u32,
        draw_list: &[&RecordedCommands],
    ) -> Result<(), BackendError> {
        if swap_index >= self.image_count {
            return Err(BackendError::Present(format!(
                "swap index {swap_index} out of range"
            )));
        }
        if let Some(stale) = draw_list.iter().find(|b| b.swap_index != swap_index) {
            return Err(BackendError::Present(format!(
                "buffer for {:?} recorded for image {}, presenting {swap_index}",
                stale.tile, stale.swap_index
            )));
        }
        self.presents += 1;
        self.last_presented = Some(PresentedFrame {
            swap_index,
            tiles: draw_list.iter().filter_map(|b| b.tile).collect(),
            draws: draw_list.iter().map(|b| b.draw_count()).sum(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use horde_common::{MeshLodSet, TileObject, Transform};

    fn object(mesh: u32, lods: u8, material: u32, pipeline: PipelineKind) -> TileObject {
        TileObject {
            mesh: MeshLodSet {
                mesh: MeshHandle(mesh),
                lod_count: lods,
            },
            material: MaterialHandle(material),
            pipeline,
            transform: Transform {
                position: Vec3::ZERO,
                ..Transform::default()
            },
        }
    }

    #[test]
    fn encode_records_bind_and_draw() {
        let backend = HeadlessBackend::new();
        let mut pool = backend.create_pool(PoolId(0)).unwrap();
        let mut buf = backend.allocate(&mut pool).unwrap();
        let objects = [
            object(0, 7, 0, PipelineKind::Solid),
            object(2, 2, 0, PipelineKind::Solid),
            object(1, 1, 1, PipelineKind::Shadow),
        ];
        let req = EncodeRequest {
            coord: TileCoord::new(1, 2),
            lod: 3,
            swap_index: 1,
            frame: 9,
            objects: &objects,
        };
        backend.encode(&req, &mut buf).unwrap();

        assert_eq!(buf.tile, Some(TileCoord::new(1, 2)));
        assert_eq!(buf.frame, 9);
        assert_eq!(buf.draw_count(), 3);
        assert_eq!(
            buf.commands,
            vec![
                DrawCommand::BindPipeline(PipelineKind::Solid),
                DrawCommand::BindMaterial(MaterialHandle(0)),
                DrawCommand::DrawIndexed { mesh: MeshHandle(0), lod: 3, instance: 0 },
                DrawCommand::DrawIndexed { mesh: MeshHandle(2), lod: 1, instance: 1 },
                DrawCommand::BindPipeline(PipelineKind::Shadow),
                DrawCommand::BindMaterial(MaterialHandle(1)),
                DrawCommand::DrawIndexed { mesh: MeshHandle(1), lod: 0, instance: 2 },
            ]
        );
        assert_eq!(backend.encodes(), 1);
    }

    #[test]
    fn injected_encode_failure() {
        let backend = HeadlessBackend::new();
        let mut pool = backend.create_pool(PoolId(0)).unwrap();
        let mut buf = backend.allocate(&mut pool).unwrap();
        backend.fail_encoding(TileCoord::new(0, 0));
        let req = EncodeRequest {
            coord: TileCoord::new(0, 0),
            lod: 0,
            swap_index: 0,
            frame: 1,
            objects: &[],
        };
        assert!(matches!(
            backend.encode(&req, &mut buf),
            Err(BackendError::Encode { .. })
        ));
        backend.clear_encode_failures();
        assert!(backend.encode(&req, &mut buf).is_ok());
    }

    #[test]
    fn block_capacity_and_pool_limit() {
        let backend = HeadlessBackend::new()
            .with_block_capacity(2)
            .with_pool_limit(1);
        let mut pool = backend.create_pool(PoolId(3)).unwrap();
        let a = backend.allocate(&mut pool).unwrap();
        let _b = backend.allocate(&mut pool).unwrap();
        assert!(matches!(
            backend.allocate(&mut pool),
            Err(BackendError::Allocation(_))
        ));
        assert!(matches!(
            backend.create_pool(PoolId(3)),
            Err(BackendError::PoolCreation(_))
        ));

        backend.destroy(&mut pool, a);
        assert_eq!(backend.live_buffers(), 1);
        backend.destroy_pool(pool);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_pools(), 0);
    }

    #[test]
    fn swapchain_cycles_images() {
        let mut sc = HeadlessSwapchain::new(3);
        let t = Duration::from_millis(1);
        let seq: Vec<u32> = (0..4).map(|_| sc.acquire_next_image(t).unwrap()).collect();
        assert_eq!(seq, vec![0, 1, 2, 0]);
    }

    #[test]
    fn swapchain_injected_timeout() {
        let mut sc = HeadlessSwapchain::new(2);
        sc.fail_acquire(1);
        let t = Duration::from_millis(1);
        assert_eq!(sc.acquire_next_image(t).unwrap(), 0);
        assert!(matches!(
            sc.acquire_next_image(t),
            Err(BackendError::AcquireTimeout(_))
        ));
        assert_eq!(sc.acquire_next_image(t).unwrap(), 1);
    }

    #[test]
    fn present_rejects_buffers_for_other_image() {
        let mut sc = HeadlessSwapchain::new(2);
        let buf = RecordedCommands {
            tile: Some(TileCoord::new(0, 0)),
            swap_index: 1,
            ..RecordedCommands::default()
        };
        assert!(sc.submit_and_present(0, &[&buf]).is_err());
        sc.submit_and_present(1, &[&buf]).unwrap();
        assert_eq!(sc.presents(), 1);
        assert_eq!(
            sc.last_presented().map(|p| p.tiles.clone()),
            Some(vec![TileCoord::new(0, 0)])
        );
    }
}
