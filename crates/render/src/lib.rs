//! Render adapter: the external capabilities the horde pipeline drives.
//!
//! # Invariants
//! - The pipeline never sees backend internals; command buffers are opaque.
//! - A camera snapshot is immutable once built and owns its frustum.
//!
//! The headless backend records draw commands in memory instead of talking to
//! a GPU. The traits are stable; a GPU backend can replace it without changing
//! the pipeline.

mod backend;
mod camera;
mod headless;

pub use backend::{BackendError, CommandBackend, EncodeRequest, Swapchain};
pub use camera::{CameraSnapshot, DemoMode, TrackCamera, DEMO_MODES};
pub use headless::{DrawCommand, HeadlessBackend, HeadlessPool, HeadlessSwapchain, PresentedFrame, RecordedCommands};

pub fn crate_info() -> &'static str {
    "horde-render v0.1.0"
}
