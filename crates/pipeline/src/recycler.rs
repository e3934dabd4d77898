use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use horde_common::{CommandBufferId, PoolId};
use horde_render::CommandBackend;
use horde_world::TileCommandBuffer;
use tracing::Level;

use crate::error::RecycleError;
use crate::log::{WorkerId, WorkerLog};

/// Ownership transfer of a command buffer back to the pool that allocated it.
#[derive(Debug)]
pub struct FreeRequest<C> {
    pub swap_index: u32,
    /// Frame during which the buffer was released.
    pub freed_in: u64,
    pub buffer: TileCommandBuffer<C>,
}

/// Routes free requests to the owning recycler's inbox.
#[derive(Debug)]
pub struct PoolRegistry<C> {
    inboxes: Vec<Sender<FreeRequest<C>>>,
}

impl<C> PoolRegistry<C> {
    /// Create one inbox per pool. The receiver at index `i` belongs to `PoolId(i)`.
    pub fn with_pools(count: usize) -> (Self, Vec<Receiver<FreeRequest<C>>>) {
        let (inboxes, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| unbounded()).unzip();
        (Self { inboxes }, receivers)
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    /// Send `buffer` home. Hands it back if the owner no longer exists.
    pub fn release(
        &self,
        swap_index: u32,
        freed_in: u64,
        buffer: TileCommandBuffer<C>,
    ) -> Result<(), TileCommandBuffer<C>> {
        let Some(inbox) = self.inboxes.get(buffer.id.pool.0 as usize) else {
            return Err(buffer);
        };
        inbox
            .send(FreeRequest {
                swap_index,
                freed_in,
                buffer,
            })
            .map_err(|e| e.into_inner().buffer)
    }
}

struct Pending<C> {
    freed_in: u64,
    buffer: TileCommandBuffer<C>,
}

/// Counts reported by [`CommandBufferRecycler::destroy_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    pub buffers: usize,
    pub blocks: usize,
}

/// A regeneration worker's private command-buffer pool.
///
/// Free lists are kept per swap image. A buffer released during frame N waits
/// in `free_next_frame` and only moves to `free_now` when a later frame starts
/// on the same swap image, so it is never reissued while a submission from an
/// earlier use of that image may still be in flight. Reissuing a slot bumps
/// its generation.
pub struct CommandBufferRecycler<B: CommandBackend> {
    id: PoolId,
    worker: WorkerId,
    backend: Arc<B>,
    log: Arc<WorkerLog>,
    blocks: Vec<B::Pool>,
    free_now: Vec<Vec<TileCommandBuffer<B::Buffer>>>,
    free_next_frame: Vec<Vec<Pending<B::Buffer>>>,
    inbox: Receiver<FreeRequest<B::Buffer>>,
    spare_floor: usize,
    next_slot: u32,
    current_frame: Option<u64>,
}

impl<B: CommandBackend> CommandBufferRecycler<B> {
    /// Create the pool and its first block. Failing to create the block is fatal.
    pub fn new(
        id: PoolId,
        worker: WorkerId,
        backend: Arc<B>,
        log: Arc<WorkerLog>,
        inbox: Receiver<FreeRequest<B::Buffer>>,
        swap_images: usize,
        spare_floor: usize,
    ) -> Result<Self, RecycleError> {
        let mut recycler = Self {
            id,
            worker,
            backend,
            log,
            blocks: Vec::new(),
            free_now: (0..swap_images).map(|_| Vec::new()).collect(),
            free_next_frame: (0..swap_images).map(|_| Vec::new()).collect(),
            inbox,
            spare_floor,
            next_slot: 0,
            current_frame: None,
        };
        recycler.grow()?;
        Ok(recycler)
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn free_count(&self, swap_index: u32) -> usize {
        self.free_now.get(swap_index as usize).map_or(0, Vec::len)
    }

    pub fn pending_count(&self, swap_index: u32) -> usize {
        self.free_next_frame
            .get(swap_index as usize)
            .map_or(0, Vec::len)
    }

    /// Whether the slot behind `id` is currently reusable for `swap_index`.
    pub fn is_free_now(&self, swap_index: u32, id: CommandBufferId) -> bool {
        self.free_now.get(swap_index as usize).is_some_and(|list| {
            list.iter()
                .any(|b| b.id.block == id.block && b.id.slot == id.slot)
        })
    }

    /// Start work for `frame` on `swap_index`: collect incoming frees, promote
    /// buffers released in earlier frames, and trim the spares. Repeated calls
    /// within one frame do nothing.
    pub fn begin_frame(&mut self, frame: u64, swap_index: u32) {
        if self.current_frame == Some(frame) {
            return;
        }
        self.current_frame = Some(frame);
        self.collect_inbox();

        let swap = swap_index as usize;
        let (Some(pending), Some(free)) = (
            self.free_next_frame.get_mut(swap),
            self.free_now.get_mut(swap),
        ) else {
            return;
        };
        let (ready, waiting): (Vec<_>, Vec<_>) =
            pending.drain(..).partition(|p| p.freed_in < frame);
        *pending = waiting;
        free.extend(ready.into_iter().map(|p| p.buffer));

        if free.len() > self.spare_floor {
            let excess: Vec<_> = free.drain(self.spare_floor..).collect();
            let count = excess.len();
            for buffer in excess {
                self.destroy(buffer);
            }
            self.log.push(
                Level::TRACE,
                self.worker,
                format!("{}: destroyed {count} spare buffers", self.id),
            );
        }
    }

    fn collect_inbox(&mut self) {
        while let Ok(request) = self.inbox.try_recv() {
            self.release(request.swap_index, request.freed_in, request.buffer);
        }
    }

    /// Put a buffer on the one-frame-delayed free list for `swap_index`.
    pub fn release(&mut self, swap_index: u32, freed_in: u64, buffer: TileCommandBuffer<B::Buffer>) {
        match self.free_next_frame.get_mut(swap_index as usize) {
            Some(pending) => pending.push(Pending { freed_in, buffer }),
            None => self.destroy(buffer),
        }
    }

    /// Take a buffer for `swap_index`, reusing a free one or allocating, and
    /// growing the pool by one block if allocation fails.
    pub fn acquire(&mut self, swap_index: u32) -> Result<TileCommandBuffer<B::Buffer>, RecycleError> {
        if let Some(mut buffer) = self
            .free_now
            .get_mut(swap_index as usize)
            .and_then(Vec::pop)
        {
            buffer.id.generation = buffer.id.generation.wrapping_add(1);
            return Ok(buffer);
        }

        if let Some(block) = self.blocks.last_mut() {
            match self.backend.allocate(block) {
                Ok(buffer) => return Ok(self.issue(self.blocks.len() - 1, buffer)),
                Err(e) => self.log.push(
                    Level::WARN,
                    self.worker,
                    format!("{}: {e}; adding a block", self.id),
                ),
            }
        }

        let index = self.grow()?;
        let buffer = self
            .backend
            .allocate(&mut self.blocks[index])
            .map_err(|source| RecycleError::Exhausted {
                pool: self.id,
                source,
            })?;
        Ok(self.issue(index, buffer))
    }

    fn issue(&mut self, block: usize, buffer: B::Buffer) -> TileCommandBuffer<B::Buffer> {
        let id = CommandBufferId {
            pool: self.id,
            block: block as u32,
            slot: self.next_slot,
            generation: 0,
        };
        self.next_slot += 1;
        TileCommandBuffer {
            id,
            encoded_frame: 0,
            buffer,
        }
    }

    fn grow(&mut self) -> Result<usize, RecycleError> {
        let block = self
            .backend
            .create_pool(self.id)
            .map_err(|source| RecycleError::Growth {
                pool: self.id,
                source,
            })?;
        self.blocks.push(block);
        self.log.push(
            Level::DEBUG,
            self.worker,
            format!("{}: created block {}", self.id, self.blocks.len() - 1),
        );
        Ok(self.blocks.len() - 1)
    }

    fn destroy(&mut self, buffer: TileCommandBuffer<B::Buffer>) {
        if let Some(block) = self.blocks.get_mut(buffer.id.block as usize) {
            self.backend.destroy(block, buffer.buffer);
        }
    }

    /// Destroy every buffer this pool still holds, then every block. Buffers
    /// still installed in tiles must be sent home first or die with their block.
    pub fn destroy_all(mut self) -> Teardown {
        self.release_resources()
    }

    fn release_resources(&mut self) -> Teardown {
        self.collect_inbox();
        let mut held: Vec<_> = self.free_now.iter_mut().flat_map(|list| list.drain(..)).collect();
        held.extend(
            self.free_next_frame
                .iter_mut()
                .flat_map(|list| list.drain(..))
                .map(|p| p.buffer),
        );

        let buffers = held.len();
        for buffer in held {
            self.destroy(buffer);
        }
        let blocks = self.blocks.len();
        for block in self.blocks.drain(..) {
            self.backend.destroy_pool(block);
        }
        Teardown { buffers, blocks }
    }
}

/// A recycler dropped without [`CommandBufferRecycler::destroy_all`] (a failed
/// spawn, a panicking worker) still hands its blocks back to the backend.
impl<B: CommandBackend> Drop for CommandBufferRecycler<B> {
    fn drop(&mut self) {
        if !self.blocks.is_empty() {
            self.release_resources();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_render::HeadlessBackend;

    fn recycler(
        backend: HeadlessBackend,
        images: usize,
        floor: usize,
    ) -> (
        CommandBufferRecycler<HeadlessBackend>,
        PoolRegistry<horde_render::RecordedCommands>,
        Arc<HeadlessBackend>,
    ) {
        let backend = Arc::new(backend);
        let (registry, mut inboxes) = PoolRegistry::with_pools(1);
        let r = CommandBufferRecycler::new(
            PoolId(0),
            WorkerId::regen(0),
            Arc::clone(&backend),
            Arc::new(WorkerLog::new()),
            inboxes.remove(0),
            images,
            floor,
        )
        .unwrap();
        (r, registry, backend)
    }

    #[test]
    fn freed_buffer_waits_one_frame() {
        let (mut r, _, _) = recycler(HeadlessBackend::new(), 1, 10);
        r.begin_frame(1, 0);
        let cb = r.acquire(0).unwrap();
        let id = cb.id;
        r.release(0, 1, cb);

        assert!(!r.is_free_now(0, id));
        assert_eq!(r.pending_count(0), 1);
        r.begin_frame(1, 0);
        assert!(!r.is_free_now(0, id));

        r.begin_frame(2, 0);
        assert!(r.is_free_now(0, id));
        let reused = r.acquire(0).unwrap();
        assert_eq!(reused.id.slot, id.slot);
        assert_eq!(reused.id.generation, id.generation + 1);
        assert_ne!(reused.id, id);
    }

    #[test]
    fn free_lists_are_per_swap_image() {
        let (mut r, _, _) = recycler(HeadlessBackend::new(), 3, 10);
        r.begin_frame(1, 0);
        let cb = r.acquire(1).unwrap();
        r.release(1, 1, cb);

        // Frame 2 runs on image 2; image 1's list is untouched.
        r.begin_frame(2, 2);
        assert_eq!(r.free_count(1), 0);
        assert_eq!(r.pending_count(1), 1);

        r.begin_frame(3, 1);
        assert_eq!(r.free_count(1), 1);
        assert_eq!(r.pending_count(1), 0);
    }

    #[test]
    fn remote_frees_arrive_through_inbox() {
        let (mut r, registry, _) = recycler(HeadlessBackend::new(), 1, 10);
        r.begin_frame(1, 0);
        let cb = r.acquire(0).unwrap();
        registry.release(0, 1, cb).unwrap();
        assert_eq!(r.pending_count(0), 0);

        r.begin_frame(2, 0);
        // Collected in frame 2 but released in frame 1: already reusable.
        assert_eq!(r.free_count(0), 1);
    }

    #[test]
    fn registry_rejects_unknown_pool() {
        let (mut r, _, _) = recycler(HeadlessBackend::new(), 1, 10);
        let mut cb = r.acquire(0).unwrap();
        cb.id.pool = PoolId(9);
        let (registry, _inboxes) = PoolRegistry::<horde_render::RecordedCommands>::with_pools(1);
        assert!(registry.release(0, 1, cb).is_err());
    }

    #[test]
    fn garbage_collection_keeps_floor() {
        let (mut r, _, backend) = recycler(HeadlessBackend::new(), 1, 2);
        r.begin_frame(1, 0);
        let buffers: Vec<_> = (0..5).map(|_| r.acquire(0).unwrap()).collect();
        for cb in buffers {
            r.release(0, 1, cb);
        }
        assert_eq!(backend.live_buffers(), 5);

        r.begin_frame(2, 0);
        assert_eq!(r.free_count(0), 2);
        assert_eq!(backend.live_buffers(), 2);
    }

    #[test]
    fn allocation_failure_grows_pool() {
        let (mut r, _, backend) = recycler(HeadlessBackend::new().with_block_capacity(2), 1, 10);
        let held: Vec<_> = (0..5).map(|_| r.acquire(0).unwrap()).collect();
        assert_eq!(r.block_count(), 3);
        assert_eq!(backend.live_pools(), 3);
        assert_eq!(held[4].id.block, 2);
        let slots: std::collections::HashSet<_> = held.iter().map(|b| b.id.slot).collect();
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn growth_failure_is_fatal() {
        let (mut r, _, _) = recycler(
            HeadlessBackend::new().with_block_capacity(1).with_pool_limit(1),
            1,
            10,
        );
        let _first = r.acquire(0).unwrap();
        assert!(matches!(r.acquire(0), Err(RecycleError::Growth { .. })));
    }

    #[test]
    fn empty_fresh_block_is_fatal() {
        let (mut r, _, _) = recycler(HeadlessBackend::new().with_block_capacity(0), 1, 10);
        assert!(matches!(r.acquire(0), Err(RecycleError::Exhausted { .. })));
    }

    #[test]
    fn first_block_failure_aborts_construction() {
        let backend = Arc::new(HeadlessBackend::new().with_pool_limit(0));
        let (_registry, mut inboxes) = PoolRegistry::<horde_render::RecordedCommands>::with_pools(1);
        let result = CommandBufferRecycler::new(
            PoolId(0),
            WorkerId::regen(0),
            backend,
            Arc::new(WorkerLog::new()),
            inboxes.remove(0),
            1,
            10,
        );
        assert!(matches!(result, Err(RecycleError::Growth { .. })));
    }

    #[test]
    fn destroy_all_releases_everything() {
        let (mut r, registry, backend) = recycler(HeadlessBackend::new().with_block_capacity(2), 2, 10);
        r.begin_frame(1, 0);
        let a = r.acquire(0).unwrap();
        let b = r.acquire(1).unwrap();
        let c = r.acquire(1).unwrap();
        r.release(0, 1, a);
        registry.release(1, 1, b).unwrap();
        drop(registry);

        let teardown = r.destroy_all();
        assert_eq!(teardown, Teardown { buffers: 2, blocks: 2 });
        // `c` was never returned; it died with its block.
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_pools(), 0);
        drop(c);
    }

    #[test]
    fn dropped_recycler_returns_its_blocks() {
        let (mut r, _, backend) = recycler(HeadlessBackend::new().with_block_capacity(1), 1, 10);
        r.begin_frame(1, 0);
        let a = r.acquire(0).unwrap();
        let _b = r.acquire(0).unwrap();
        r.release(0, 1, a);
        assert_eq!(backend.live_pools(), 2);

        drop(r);
        assert_eq!(backend.live_pools(), 0);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn destroy_all_then_drop_does_not_double_free() {
        let (r, _, backend) = recycler(HeadlessBackend::new(), 1, 10);
        assert_eq!(r.destroy_all(), Teardown { buffers: 0, blocks: 1 });
        assert_eq!(backend.live_pools(), 0);
    }
}
