use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid coordinate of a tile. `z` is the row ("line") index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: u32,
    pub z: u32,
}

impl TileCoord {
    pub fn new(x: u32, z: u32) -> Self {
        Self { x, z }
    }

    /// Row-major index into a grid `tiles_x` wide.
    pub fn index(self, tiles_x: u32) -> usize {
        self.z as usize * tiles_x as usize + self.x as usize
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Model matrix (translate * rotate * scale).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// A handle referencing a mesh owned by the render backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshHandle(pub u32);

/// A handle referencing a material (texture + sampler binding) owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialHandle(pub u32);

/// A mesh together with the number of detail levels the backend holds for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshLodSet {
    pub mesh: MeshHandle,
    pub lod_count: u8,
}

impl MeshLodSet {
    /// Clamp a tile LOD to the levels this mesh actually has.
    pub fn resolve(&self, lod: u8) -> u8 {
        lod.min(self.lod_count.saturating_sub(1))
    }
}

/// Which graphics pipeline an object is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineKind {
    Solid,
    Shadow,
    AlphaPremultiplied,
}

/// One object instance placed on a tile. All references are external handles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileObject {
    pub mesh: MeshLodSet,
    pub material: MaterialHandle,
    pub pipeline: PipelineKind,
    pub transform: Transform,
}

/// Identifies the command-buffer pool (one per regeneration worker) that owns a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub u32);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Arena identity of a command buffer.
///
/// `slot` is fixed for the lifetime of the underlying allocation; `generation`
/// increments every time the slot is handed out again from a free list, so a
/// stale reference to a recycled buffer never compares equal to the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandBufferId {
    pub pool: PoolId,
    pub block: u32,
    pub slot: u32,
    pub generation: u32,
}
