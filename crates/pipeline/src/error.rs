use horde_common::PoolId;
use horde_render::BackendError;

use crate::log::WorkerKind;

/// Errors loading or validating a [`crate::HordeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Unrecoverable command-buffer pool failures.
#[derive(Debug, thiserror::Error)]
pub enum RecycleError {
    #[error("{pool}: could not create a new command block: {source}")]
    Growth {
        pool: PoolId,
        #[source]
        source: BackendError,
    },
    #[error("{pool}: allocation failed on a fresh command block: {source}")]
    Exhausted {
        pool: PoolId,
        #[source]
        source: BackendError,
    },
}

/// Errors that stop the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Recycler(#[from] RecycleError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("frame {frame}: draw queue stalled with {remaining} tiles unaccounted for")]
    DrainStalled { frame: u64, remaining: usize },
    #[error("a {kind} worker exited while the pipeline was running")]
    WorkerLost { kind: WorkerKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_pool() {
        let e = RecycleError::Growth {
            pool: PoolId(2),
            source: BackendError::PoolCreation("out of memory".into()),
        };
        assert!(e.to_string().starts_with("pool#2"));

        let e: PipelineError = e.into();
        assert!(e.to_string().contains("out of memory"));
    }

    #[test]
    fn stall_reports_outstanding_tiles() {
        let e = PipelineError::DrainStalled {
            frame: 7,
            remaining: 3,
        };
        assert_eq!(
            e.to_string(),
            "frame 7: draw queue stalled with 3 tiles unaccounted for"
        );
    }
}
