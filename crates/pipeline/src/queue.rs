use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use horde_common::TileCoord;
use parking_lot::Mutex;

use crate::snapshot::FrameSnapshot;

/// Blocking multi-producer multi-consumer queue with a terminal "done" state.
///
/// Consumers block until an item arrives or the queue is marked done. Once
/// done, consumers drain whatever is left and then get `None` without blocking.
/// Producing never fails and never blocks.
pub struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    // Dropping the sender disconnects `done_rx`, waking every blocked consumer.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        Self {
            tx,
            rx,
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
        }
    }

    pub fn produce(&self, item: T) {
        // The queue owns a receiver, so the channel never disconnects.
        let _ = self.tx.send(item);
    }

    /// Block until an item is available. `None` once the queue is done and empty.
    pub fn consume(&self) -> Option<T> {
        if let Ok(item) = self.rx.try_recv() {
            return Some(item);
        }
        select! {
            recv(self.rx) -> item => item.ok(),
            recv(self.done_rx) -> _ => self.rx.try_recv().ok(),
        }
    }

    /// Block for the first item, then take up to `max` without blocking.
    /// Returns how many items were appended to `out`; 0 only once done.
    pub fn consume_batch(&self, max: usize, out: &mut Vec<T>) -> usize {
        let Some(first) = self.consume() else {
            return 0;
        };
        out.push(first);
        1 + self.fill(max.saturating_sub(1), out)
    }

    /// Like [`consume_batch`](Self::consume_batch), but gives up waiting for the
    /// first item after `timeout`. Returns 0 on timeout or when done.
    pub fn consume_batch_timeout(&self, max: usize, out: &mut Vec<T>, timeout: Duration) -> usize {
        let first = match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(_) => select! {
                recv(self.rx) -> item => item.ok(),
                recv(self.done_rx) -> _ => self.rx.try_recv().ok(),
                default(timeout) => None,
            },
        };
        let Some(first) = first else {
            return 0;
        };
        out.push(first);
        1 + self.fill(max.saturating_sub(1), out)
    }

    fn fill(&self, max: usize, out: &mut Vec<T>) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.rx.try_recv() {
                Ok(item) => {
                    out.push(item);
                    taken += 1;
                }
                Err(_) => break,
            }
        }
        taken
    }

    /// Enter the terminal state. Idempotent.
    pub fn mark_done(&self) {
        self.done_tx.lock().take();
    }

    pub fn is_done(&self) -> bool {
        self.done_tx.lock().is_none()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// One row of tiles to cull, together with the frame it belongs to.
#[derive(Debug, Clone)]
pub struct LineTask {
    pub row: u32,
    pub snapshot: Arc<FrameSnapshot>,
}

/// A tile that needs its command buffers re-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegenTask {
    pub coord: TileCoord,
    pub frame: u64,
    pub swap_index: u32,
}

/// What the coordinator drains: one ready tile, or a count of invisible tiles
/// folded into a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileResult {
    Draw(TileCoord),
    Discard(u32),
}

impl TileResult {
    /// How many tiles this entry accounts for.
    pub fn tile_count(&self) -> usize {
        match self {
            TileResult::Draw(_) => 1,
            TileResult::Discard(n) => *n as usize,
        }
    }
}

/// The three queues connecting the coordinator and the worker pools.
#[derive(Default)]
pub struct PipelineQueues {
    pub lines: WorkQueue<LineTask>,
    pub process: WorkQueue<RegenTask>,
    pub draw: WorkQueue<TileResult>,
}

impl PipelineQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_all_done(&self) {
        self.lines.mark_done();
        self.process.mark_done();
        self.draw.mark_done();
    }

    pub fn all_done(&self) -> bool {
        self.lines.is_done() && self.process.is_done() && self.draw.is_done()
    }
}
