use horde_common::{PoolId, TileCoord, TileObject};
use std::time::Duration;

/// Errors reported by a render backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("encoding tile {coord} failed: {reason}")]
    Encode { coord: TileCoord, reason: String },
    #[error("command buffer allocation failed: {0}")]
    Allocation(String),
    #[error("command pool creation failed: {0}")]
    PoolCreation(String),
    #[error("no swap image within {0:?}")]
    AcquireTimeout(Duration),
    #[error("present failed: {0}")]
    Present(String),
}

/// Everything a backend needs to encode one tile into one command buffer.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub coord: TileCoord,
    pub lod: u8,
    pub swap_index: u32,
    pub frame: u64,
    /// Objects in draw order.
    pub objects: &'a [TileObject],
}

/// Command-buffer allocation and encoding.
///
/// A `Pool` is one underlying allocation block. Pools and their buffers are
/// only ever touched by the thread that owns them; the backend itself is shared.
pub trait CommandBackend: Send + Sync {
    type Pool: Send + 'static;
    type Buffer: Send + 'static;

    /// Create a new block owned by `owner`.
    fn create_pool(&self, owner: PoolId) -> Result<Self::Pool, BackendError>;

    /// Allocate an empty buffer from `pool`. Fails when the block is exhausted.
    fn allocate(&self, pool: &mut Self::Pool) -> Result<Self::Buffer, BackendError>;

    /// Fill `buffer` with a replayable draw sequence for the request's objects,
    /// discarding whatever it held before.
    fn encode(&self, request: &EncodeRequest<'_>, buffer: &mut Self::Buffer)
        -> Result<(), BackendError>;

    /// Return a buffer to the block it was allocated from.
    fn destroy(&self, pool: &mut Self::Pool, buffer: Self::Buffer);

    /// Release a block. Buffers still allocated from it die with it.
    fn destroy_pool(&self, pool: Self::Pool);
}

/// Presentation surface: acquires swap images and consumes the frame's draw list.
pub trait Swapchain {
    type Buffer;

    fn image_count(&self) -> u32;

    /// Wait for the next swap image. A timeout drops the frame.
    fn acquire_next_image(&mut self, timeout: Duration) -> Result<u32, BackendError>;

    /// Submit the finalized draw list for `swap_index` and present it.
    fn submit_and_present(
        &mut self,
        swap_index: u32,
        draw_list: &[&Self::Buffer],
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_context() {
        let e = BackendError::Encode {
            coord: TileCoord::new(2, 3),
            reason: "device lost".into(),
        };
        assert_eq!(e.to_string(), "encoding tile (2, 3) failed: device lost");

        let e = BackendError::AcquireTimeout(Duration::from_millis(5));
        assert!(e.to_string().contains("5ms"));
    }
}
