//! Shared types for the tile horde pipeline.
//!
//! # Invariants
//! - Everything here is plain data: `Copy` where possible, no interior mutability.
//! - External resources (meshes, materials, pipelines) are referenced only by handle.

mod bounds;
mod types;

pub use bounds::{Aabb, Frustum, Plane};
pub use types::{
    CommandBufferId, MaterialHandle, MeshHandle, MeshLodSet, PipelineKind, PoolId, TileCoord,
    TileObject, Transform,
};

pub fn crate_info() -> &'static str {
    "horde-common v0.1.0"
}
