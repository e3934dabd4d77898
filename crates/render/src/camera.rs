use glam::{Mat4, Vec3};
use horde_common::Frustum;

/// Camera state captured once per frame. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSnapshot {
    /// Reference point for LOD distances.
    pub position: Vec3,
    pub view_projection: Mat4,
    pub frustum: Frustum,
}

impl CameraSnapshot {
    pub fn new(position: Vec3, view_projection: Mat4) -> Self {
        Self {
            position,
            view_projection,
            frustum: Frustum::from_view_projection(view_projection),
        }
    }

    /// Perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        let proj = Mat4::perspective_rh(fov, aspect, near, far);
        Self::new(eye, proj * view)
    }
}

/// One leg of the automatic fly-through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoMode {
    /// Track speed multiplier.
    pub speed: f32,
    pub height_offset: f32,
    /// How far ahead along the track the camera looks (in track time).
    pub forward_offset: f32,
    /// Seconds before switching to the next mode.
    pub duration: f32,
}

pub const DEMO_MODES: [DemoMode; 4] = [
    DemoMode { speed: 2.5, height_offset: 100.0, forward_offset: 5.0, duration: 10.0 },
    DemoMode { speed: 2.5, height_offset: 500.0, forward_offset: 10.0, duration: 10.0 },
    DemoMode { speed: 2.5, height_offset: 1000.0, forward_offset: 20.0, duration: 10.0 },
    DemoMode { speed: 15.0, height_offset: 1000.0, forward_offset: 20.0, duration: 10.0 },
];

const MAX_TIME: f32 = 10_000_000.0;
/// Mode transitions complete in 1 / 1.25 = 0.8 s.
const BLEND_RATE: f32 = 1.25;

/// Camera that circles the world centre, cycling through [`DEMO_MODES`].
///
/// Motion is driven by wall-clock deltas passed to [`TrackCamera::advance`]
/// and does not affect the pipeline's determinism.
#[derive(Debug, Clone)]
pub struct TrackCamera {
    pub world_size: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    logic_time: f32,
    game_time: f32,
    current_mode: usize,
    previous_mode: usize,
    mode_switch_time: f32,
}

impl TrackCamera {
    pub fn new(world_size: Vec3, aspect: f32) -> Self {
        Self {
            world_size,
            fov: 1.0,
            aspect,
            near: 10.0,
            far: 5000.0,
            logic_time: 0.0,
            game_time: 0.0,
            current_mode: 0,
            previous_mode: 0,
            mode_switch_time: 0.0,
        }
    }

    pub fn current_mode(&self) -> usize {
        self.current_mode
    }

    /// Point on the track at track time `t`.
    pub fn track_position(&self, t: f32) -> Vec3 {
        let centre = self.world_size * 0.5;
        let radius = self.world_size * 0.2;
        let angle = t * 0.02;
        let height = (t * 0.07).sin() * 15.0 + 100.0;
        let radius_factor = 0.95 + 0.1 * (t * 0.1).sin();
        centre
            + Vec3::new(
                angle.sin() * radius.x * radius_factor,
                height,
                angle.cos() * radius.z * radius_factor,
            )
    }

    /// Current mode parameters, blended from the previous mode.
    fn mode_parameters(&mut self) -> DemoMode {
        let current = DEMO_MODES[self.current_mode];
        if self.logic_time > self.mode_switch_time + current.duration {
            self.previous_mode = self.current_mode;
            self.current_mode = (self.current_mode + 1) % DEMO_MODES.len();
            self.mode_switch_time = self.logic_time;
            tracing::debug!(mode = self.current_mode, "camera mode switch");
        }

        let t = ((self.logic_time - self.mode_switch_time) * BLEND_RATE).clamp(0.0, 1.0);
        let factor = (1.0 - (t * std::f32::consts::PI).cos()) / 2.0;
        let prev = DEMO_MODES[self.previous_mode];
        let cur = DEMO_MODES[self.current_mode];
        let mix = |a: f32, b: f32| a + (b - a) * factor;
        DemoMode {
            speed: mix(prev.speed, cur.speed),
            height_offset: mix(prev.height_offset, cur.height_offset),
            forward_offset: mix(prev.forward_offset, cur.forward_offset),
            duration: cur.duration,
        }
    }

    /// Advance by `dt` seconds and capture the new camera.
    pub fn advance(&mut self, dt: f32) -> CameraSnapshot {
        self.logic_time += dt;
        if self.logic_time > MAX_TIME {
            self.logic_time = 0.0;
            self.mode_switch_time = 0.0;
        }

        let params = self.mode_parameters();
        self.game_time += dt * params.speed;
        if self.game_time > MAX_TIME {
            self.game_time = 0.0;
        }

        // LOD is measured from the track itself; the height offset only lifts the eye.
        let track = self.track_position(self.game_time);
        let mut target = self.track_position(self.game_time + params.forward_offset) + Vec3::splat(10.0);
        target.y = 0.0;
        let eye = track + Vec3::Y * params.height_offset;

        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        CameraSnapshot::new(track, proj * view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_frustum_matches_matrix() {
        let snap = CameraSnapshot::look_at(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, Vec3::Z, 1.0, 1.0, 1.0, 100.0);
        assert_eq!(snap.frustum, Frustum::from_view_projection(snap.view_projection));
        assert_eq!(snap.position, Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn track_circles_world_centre() {
        let cam = TrackCamera::new(Vec3::new(1000.0, 100.0, 1000.0), 1.0);
        let p = cam.track_position(0.0);
        // angle 0: offset is purely along +z, radius 0.2 * 1000 * 0.95.
        assert!((p.x - 500.0).abs() < 1e-3);
        assert!((p.z - 690.0).abs() < 1e-3);
        assert!((p.y - 150.0).abs() < 1e-3);
    }

    #[test]
    fn advance_produces_finite_camera() {
        let mut cam = TrackCamera::new(Vec3::new(8500.0, 100.0, 8500.0), 16.0 / 9.0);
        for _ in 0..100 {
            let snap = cam.advance(1.0 / 60.0);
            assert!(snap.view_projection.is_finite());
            assert!(snap.position.is_finite());
        }
    }

    #[test]
    fn modes_cycle_after_duration() {
        let mut cam = TrackCamera::new(Vec3::splat(1000.0), 1.0);
        assert_eq!(cam.current_mode(), 0);
        for _ in 0..11 {
            cam.advance(1.0);
        }
        assert_eq!(cam.current_mode(), 1);
        for _ in 0..40 {
            cam.advance(1.0);
        }
        assert_eq!(cam.current_mode(), 0);
    }

    #[test]
    fn blend_starts_at_previous_mode() {
        let mut cam = TrackCamera::new(Vec3::splat(1000.0), 1.0);
        for _ in 0..11 {
            cam.advance(1.0);
        }
        // Just switched: factor is 0, so the previous mode's parameters apply.
        let p = cam.mode_parameters();
        assert_eq!(p.height_offset, DEMO_MODES[0].height_offset);
    }
}
