use glam::Vec3;
use horde_common::{
    Aabb, MaterialHandle, MeshHandle, MeshLodSet, PipelineKind, TileObject, Transform,
};
use std::f32::consts::PI;

/// The kinds of object scattered over the tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Gnome,
    Mushroom,
    BigMushroom,
    Fern,
    Rock,
}

/// Static description of one palette entry: what to draw and how big it is.
#[derive(Debug, Clone, Copy)]
pub struct PaletteEntry {
    pub kind: ObjectKind,
    pub mesh: MeshLodSet,
    pub material: MaterialHandle,
    pub pipeline: PipelineKind,
    /// Blob shadow drawn under the object, if any.
    pub shadow: Option<(MeshLodSet, MaterialHandle)>,
    /// Half extents at scale 1.0; the object stands on the ground (y = 0).
    pub half_extents: Vec3,
}

const fn lods(mesh: u32, lod_count: u8) -> MeshLodSet {
    MeshLodSet {
        mesh: MeshHandle(mesh),
        lod_count,
    }
}

/// Objects placed on every tile, in placement order.
pub const PALETTE: [PaletteEntry; 5] = [
    PaletteEntry {
        kind: ObjectKind::Gnome,
        mesh: lods(0, 7),
        material: MaterialHandle(0),
        pipeline: PipelineKind::Solid,
        shadow: Some((lods(1, 1), MaterialHandle(1))),
        half_extents: Vec3::new(12.0, 20.0, 12.0),
    },
    PaletteEntry {
        kind: ObjectKind::Mushroom,
        mesh: lods(2, 2),
        material: MaterialHandle(2),
        pipeline: PipelineKind::Solid,
        shadow: Some((lods(3, 1), MaterialHandle(3))),
        half_extents: Vec3::new(10.0, 15.0, 10.0),
    },
    PaletteEntry {
        kind: ObjectKind::BigMushroom,
        mesh: lods(4, 1),
        material: MaterialHandle(4),
        pipeline: PipelineKind::Solid,
        shadow: Some((lods(5, 1), MaterialHandle(5))),
        half_extents: Vec3::new(25.0, 45.0, 25.0),
    },
    PaletteEntry {
        kind: ObjectKind::Fern,
        mesh: lods(6, 1),
        material: MaterialHandle(6),
        pipeline: PipelineKind::AlphaPremultiplied,
        shadow: Some((lods(7, 1), MaterialHandle(7))),
        half_extents: Vec3::new(20.0, 15.0, 20.0),
    },
    PaletteEntry {
        kind: ObjectKind::Rock,
        mesh: lods(8, 1),
        material: MaterialHandle(8),
        pipeline: PipelineKind::Solid,
        shadow: None,
        half_extents: Vec3::new(15.0, 10.0, 15.0),
    },
];

/// Hand-tuned slots for the default five placements: four quadrant centres and the middle.
const FIVE_SLOTS: [(f32, f32); 5] = [
    (0.25, 0.25),
    (0.25, 0.75),
    (0.75, 0.25),
    (0.75, 0.75),
    (0.50, 0.50),
];

/// Deterministic random stream for world generation (splitmix64).
#[derive(Debug, Clone)]
pub struct PlacementRng {
    state: u64,
}

impl PlacementRng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * self.next_f32()
    }

    pub fn below(&mut self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        (self.next_u64() % n as u64) as usize
    }
}

/// Jittered-grid slot positions (as fractions of the tile footprint).
fn slots(count: usize, rng: &mut PlacementRng) -> Vec<(f32, f32)> {
    if count <= FIVE_SLOTS.len() {
        // Rotate which object lands in which slot so tiles don't all look alike.
        let offset = rng.below(FIVE_SLOTS.len());
        return (0..count)
            .map(|i| FIVE_SLOTS[(i + offset) % FIVE_SLOTS.len()])
            .map(|(x, z)| jitter(x, z, 0.2, rng))
            .collect();
    }
    let side = (count as f32).sqrt().ceil() as usize;
    let cell = 1.0 / side as f32;
    (0..count)
        .map(|i| {
            let x = ((i % side) as f32 + 0.5) * cell;
            let z = ((i / side) as f32 + 0.5) * cell;
            jitter(x, z, 0.4 * cell, rng)
        })
        .collect()
}

fn jitter(x: f32, z: f32, deviation: f32, rng: &mut PlacementRng) -> (f32, f32) {
    let dx = deviation * rng.range(-1.0, 1.0);
    let dz = deviation * rng.range(-1.0, 1.0);
    ((x + dx).clamp(0.0, 1.0), (z + dz).clamp(0.0, 1.0))
}

/// Scatter `placements` palette objects (plus their shadows) over `footprint`.
///
/// Returns the objects and their combined bounds, clamped to the footprint.
pub(crate) fn scatter(
    footprint: &Aabb,
    placements: usize,
    rng: &mut PlacementRng,
) -> (Vec<TileObject>, Aabb) {
    let mut objects = Vec::with_capacity(placements * 2);
    let mut bounds = Aabb::new(footprint.min, footprint.min);

    for (i, (fx, fz)) in slots(placements, rng).into_iter().enumerate() {
        let entry = &PALETTE[i % PALETTE.len()];
        let position = Vec3::new(
            footprint.min.x + fx * (footprint.max.x - footprint.min.x),
            footprint.min.y,
            footprint.min.z + fz * (footprint.max.z - footprint.min.z),
        );
        let rotation = rng.range(-PI, PI);
        let scale = rng.range(0.8, 1.3);
        let transform = Transform {
            position,
            rotation: glam::Quat::from_rotation_y(rotation),
            scale: Vec3::splat(scale),
        };

        objects.push(TileObject {
            mesh: entry.mesh,
            material: entry.material,
            pipeline: entry.pipeline,
            transform,
        });
        if let Some((mesh, material)) = entry.shadow {
            objects.push(TileObject {
                mesh,
                material,
                pipeline: PipelineKind::Shadow,
                transform,
            });
        }

        let half = entry.half_extents * scale;
        let object_bounds = Aabb::from_center_half_extents(position + Vec3::Y * half.y, half);
        bounds = if i == 0 {
            object_bounds
        } else {
            bounds.union(&object_bounds)
        };
    }

    (objects, bounds.clamp_to(footprint))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footprint() -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::new(150.0, 100.0, 150.0))
    }

    #[test]
    fn rng_is_deterministic() {
        let mut a = PlacementRng::new(42);
        let mut b = PlacementRng::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = PlacementRng::new(1);
        let mut b = PlacementRng::new(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn rng_range_stays_in_bounds() {
        let mut rng = PlacementRng::new(7);
        for _ in 0..1000 {
            let v = rng.range(0.8, 1.3);
            assert!((0.8..=1.3).contains(&v));
        }
    }

    #[test]
    fn default_placement_yields_nine_objects() {
        let mut rng = PlacementRng::new(34563464);
        let (objects, _) = scatter(&footprint(), 5, &mut rng);
        // Five objects, four of which cast a shadow.
        assert_eq!(objects.len(), 9);
        let shadows = objects
            .iter()
            .filter(|o| o.pipeline == PipelineKind::Shadow)
            .count();
        assert_eq!(shadows, 4);
    }

    #[test]
    fn bounds_stay_inside_footprint() {
        let mut rng = PlacementRng::new(3);
        let fp = footprint();
        for placements in [1, 5, 9, 16] {
            let (objects, bounds) = scatter(&fp, placements, &mut rng);
            assert!(fp.contains_point(bounds.min));
            assert!(fp.contains_point(bounds.max));
            for o in &objects {
                assert!(fp.contains_point(o.transform.position));
            }
        }
    }

    #[test]
    fn dense_placement_uses_lattice() {
        let mut rng = PlacementRng::new(11);
        let (objects, _) = scatter(&footprint(), 12, &mut rng);
        let primaries = objects
            .iter()
            .filter(|o| o.pipeline != PipelineKind::Shadow)
            .count();
        assert_eq!(primaries, 12);
    }
}
