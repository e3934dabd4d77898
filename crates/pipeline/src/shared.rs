use std::sync::Arc;

use horde_world::TileWorld;
use parking_lot::Mutex;

use crate::error::RecycleError;
use crate::log::WorkerLog;
use crate::queue::PipelineQueues;
use crate::recycler::PoolRegistry;
use crate::stats::FrameCounters;

/// State every pipeline thread can reach.
pub(crate) struct Shared<C> {
    pub world: TileWorld<C>,
    pub queues: PipelineQueues,
    pub registry: PoolRegistry<C>,
    pub log: Arc<WorkerLog>,
    pub counters: FrameCounters,
    /// First unrecoverable recycler error raised by a worker; checked after each frame.
    pub fault: Mutex<Option<RecycleError>>,
}

impl<C> Shared<C> {
    pub fn new(world: TileWorld<C>, registry: PoolRegistry<C>, log: Arc<WorkerLog>) -> Self {
        Self {
            world,
            queues: PipelineQueues::new(),
            registry,
            log,
            counters: FrameCounters::default(),
            fault: Mutex::new(None),
        }
    }

    pub fn raise(&self, error: RecycleError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(error);
        }
    }
}
