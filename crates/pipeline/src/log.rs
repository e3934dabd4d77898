use std::fmt;

use parking_lot::Mutex;
use tracing::Level;

/// Which pool a worker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Visibility,
    Regen,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Visibility => f.write_str("visibility"),
            WorkerKind::Regen => f.write_str("regen"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    pub kind: WorkerKind,
    pub index: usize,
}

impl WorkerId {
    pub fn visibility(index: usize) -> Self {
        Self {
            kind: WorkerKind::Visibility,
            index,
        }
    }

    pub fn regen(index: usize) -> Self {
        Self {
            kind: WorkerKind::Regen,
            index,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub source: WorkerId,
    pub message: String,
}

/// Log buffer shared by the workers and drained by the coordinator between
/// frames, keeping subscriber I/O off the worker threads.
#[derive(Debug, Default)]
pub struct WorkerLog {
    records: Mutex<Vec<LogRecord>>,
}

impl WorkerLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: Level, source: WorkerId, message: impl Into<String>) {
        self.records.lock().push(LogRecord {
            level,
            source,
            message: message.into(),
        });
    }

    pub fn drain(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Forward buffered records to `tracing`. Returns how many were forwarded.
    pub fn flush(&self) -> usize {
        let records = self.drain();
        for r in &records {
            match r.level {
                Level::ERROR => tracing::error!(worker = %r.source, "{}", r.message),
                Level::WARN => tracing::warn!(worker = %r.source, "{}", r.message),
                Level::INFO => tracing::info!(worker = %r.source, "{}", r.message),
                Level::DEBUG => tracing::debug!(worker = %r.source, "{}", r.message),
                _ => tracing::trace!(worker = %r.source, "{}", r.message),
            }
        }
        records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_ids_display() {
        assert_eq!(WorkerId::visibility(0).to_string(), "visibility#0");
        assert_eq!(WorkerId::regen(3).to_string(), "regen#3");
    }

    #[test]
    fn drain_empties_buffer_in_order() {
        let log = WorkerLog::new();
        log.push(Level::INFO, WorkerId::regen(0), "pool created");
        log.push(Level::WARN, WorkerId::visibility(1), format!("row {} slow", 4));
        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "pool created");
        assert_eq!(records[1].level, Level::WARN);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn flush_counts_records() {
        let log = WorkerLog::new();
        log.push(Level::ERROR, WorkerId::regen(1), "encode failed");
        assert_eq!(log.flush(), 1);
        assert_eq!(log.flush(), 0);
    }
}
