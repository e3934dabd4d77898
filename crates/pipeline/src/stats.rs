use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Per-frame work counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    /// Tiles routed to regeneration by the visibility pass.
    pub queued_for_regen: usize,
    /// Visible tiles drawn with their existing command buffers.
    pub drawn_unchanged: usize,
    /// Tiles whose command buffers were successfully re-encoded.
    pub regenerated: usize,
    pub encode_failures: usize,
    /// Command buffers handed back to their owning pool.
    pub released: usize,
    pub discarded: usize,
}

impl FrameStats {
    /// Tiles the visibility pass accounted for.
    pub fn tiles_seen(&self) -> usize {
        self.queued_for_regen + self.drawn_unchanged + self.discarded
    }
}

/// Counters workers bump while a frame is in flight.
#[derive(Debug, Default)]
pub(crate) struct FrameCounters {
    pub queued_for_regen: AtomicUsize,
    pub drawn_unchanged: AtomicUsize,
    pub regenerated: AtomicUsize,
    pub encode_failures: AtomicUsize,
    pub released: AtomicUsize,
    pub discarded: AtomicUsize,
}

impl FrameCounters {
    pub fn add(counter: &AtomicUsize, n: usize) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read and zero every counter. Only called between frames.
    pub fn take(&self) -> FrameStats {
        let take = |c: &AtomicUsize| c.swap(0, Ordering::Relaxed);
        FrameStats {
            queued_for_regen: take(&self.queued_for_regen),
            drawn_unchanged: take(&self.drawn_unchanged),
            regenerated: take(&self.regenerated),
            encode_failures: take(&self.encode_failures),
            released: take(&self.released),
            discarded: take(&self.discarded),
        }
    }
}

/// Ring buffer of recent frame times.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    next: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: vec![Duration::ZERO; capacity.max(1)],
            next: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.next] = dt;
        self.next = (self.next + 1) % self.history.len();
        self.filled |= self.next == 0;
    }

    fn samples(&self) -> &[Duration] {
        if self.filled {
            &self.history
        } else {
            &self.history[..self.next]
        }
    }

    pub fn count(&self) -> usize {
        self.samples().len()
    }

    pub fn average(&self) -> Duration {
        let samples = self.samples();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn min(&self) -> Duration {
        self.samples().iter().copied().min().unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.samples().iter().copied().max().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_reset_on_take() {
        let counters = FrameCounters::default();
        FrameCounters::add(&counters.discarded, 4);
        FrameCounters::add(&counters.discarded, 4);
        FrameCounters::add(&counters.queued_for_regen, 1);
        let stats = counters.take();
        assert_eq!(stats.discarded, 8);
        assert_eq!(stats.tiles_seen(), 9);
        assert_eq!(counters.take(), FrameStats::default());
    }

    #[test]
    fn timer_statistics() {
        let mut timer = FrameTimer::new(4);
        assert_eq!(timer.average(), Duration::ZERO);
        for ms in [10, 20, 30] {
            timer.record(Duration::from_millis(ms));
        }
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.min(), Duration::from_millis(10));
        assert_eq!(timer.max(), Duration::from_millis(30));
    }

    #[test]
    fn timer_keeps_latest_window() {
        let mut timer = FrameTimer::new(2);
        for ms in [100, 20, 30] {
            timer.record(Duration::from_millis(ms));
        }
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.average(), Duration::from_millis(25));
    }
}
