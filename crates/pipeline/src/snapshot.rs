use glam::Vec3;
use horde_common::Aabb;
use horde_render::CameraSnapshot;

use crate::config::LodConfig;

/// Everything a visibility worker reads for one frame.
///
/// Built by the coordinator and shared through an `Arc` carried by every line
/// task of the frame, so it is fully constructed before any worker can see it
/// and never changes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub frame: u64,
    pub swap_index: u32,
    pub camera: CameraSnapshot,
    pub lod: LodConfig,
}

impl FrameSnapshot {
    pub fn is_visible(&self, aabb: &Aabb) -> bool {
        self.camera.frustum.intersects_aabb(aabb)
    }

    /// LOD for a tile whose bounds are centred at `center`.
    pub fn lod_at(&self, center: Vec3) -> u8 {
        compute_lod(center.distance(self.camera.position), &self.lod)
    }
}

/// Linear falloff: 0 up to `min_distance`, reaching `max_lod` at `max_distance`.
pub fn compute_lod(distance: f32, lod: &LodConfig) -> u8 {
    let span = lod.max_distance - lod.min_distance;
    let t = ((distance - lod.min_distance) / span).max(0.0);
    (t * lod.max_lod as f32).min(lod.max_lod as f32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;

    #[test]
    fn lod_falloff() {
        let lod = LodConfig::default();
        assert_eq!(compute_lod(0.0, &lod), 0);
        assert_eq!(compute_lod(400.0, &lod), 0);
        // Halfway between 400 and 2000: 3.5 truncates to 3.
        assert_eq!(compute_lod(1200.0, &lod), 3);
        assert_eq!(compute_lod(2000.0, &lod), 7);
        assert_eq!(compute_lod(1.0e6, &lod), 7);
    }

    #[test]
    fn lod_measured_from_camera_position() {
        let snapshot = FrameSnapshot {
            frame: 1,
            swap_index: 0,
            camera: CameraSnapshot::new(Vec3::ZERO, Mat4::IDENTITY),
            lod: LodConfig::default(),
        };
        assert_eq!(snapshot.lod_at(Vec3::new(100.0, 0.0, 0.0)), 0);
        assert_eq!(snapshot.lod_at(Vec3::new(0.0, 0.0, 5000.0)), 7);
    }
}
