use glam::{Vec2, Vec3};
use horde_common::{Aabb, CommandBufferId, PoolId, TileCoord, TileObject};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::placement::{scatter, PlacementRng};

/// Previous-LOD value of a tile that has never been evaluated. Never equal to
/// a computed LOD, so the first visibility pass always sees every tile as changed.
pub const LOD_UNSET: u8 = u8::MAX;

/// Grid dimensions and placement parameters. Read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub tiles_x: u32,
    pub tiles_z: u32,
    /// Extent of one tile's footprint (x, height, z).
    pub tile_size: Vec3,
    /// Empty space between neighbouring tiles along x and z.
    pub tile_gap: Vec2,
    /// Object instances per tile (each may add a shadow object).
    pub placements_per_tile: usize,
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tiles_x: 50,
            tiles_z: 50,
            tile_size: Vec3::new(150.0, 100.0, 150.0),
            tile_gap: Vec2::new(20.0, 20.0),
            placements_per_tile: 5,
            seed: 34_563_464,
        }
    }
}

impl WorldConfig {
    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_z as usize
    }

    /// Distance between the origins of neighbouring tiles.
    pub fn tile_pitch(&self) -> Vec2 {
        Vec2::new(
            self.tile_size.x + self.tile_gap.x,
            self.tile_size.z + self.tile_gap.y,
        )
    }

    /// The ground footprint of a tile, `tile_size.y` tall.
    pub fn footprint(&self, coord: TileCoord) -> Aabb {
        let pitch = self.tile_pitch();
        let min = Vec3::new(coord.x as f32 * pitch.x, 0.0, coord.z as f32 * pitch.y);
        Aabb::new(min, min + self.tile_size)
    }

    /// Extent of the whole grid including gaps.
    pub fn world_size(&self) -> Vec3 {
        let pitch = self.tile_pitch();
        Vec3::new(
            pitch.x * self.tiles_x as f32,
            self.tile_size.y,
            pitch.y * self.tiles_z as f32,
        )
    }
}

/// A command buffer installed in a tile, together with its arena identity and
/// the frame it was last encoded in.
#[derive(Debug)]
pub struct TileCommandBuffer<C> {
    pub id: CommandBufferId,
    pub encoded_frame: u64,
    pub buffer: C,
}

/// One cell of the grid.
///
/// `visible`/`lod` hold the value computed in the current frame, `prev_*` the
/// value from the last completed pass. `command_buffers` has one slot per swap image.
#[derive(Debug)]
pub struct Tile<C> {
    pub coord: TileCoord,
    pub aabb: Aabb,
    pub objects: Vec<TileObject>,
    pub visible: bool,
    pub prev_visible: bool,
    pub lod: u8,
    pub prev_lod: u8,
    /// Set when regeneration failed; the next pass regenerates regardless of change.
    pub force_regen: bool,
    pub command_buffers: Vec<Option<TileCommandBuffer<C>>>,
}

impl<C> Tile<C> {
    fn new(coord: TileCoord, aabb: Aabb, objects: Vec<TileObject>, swap_images: usize) -> Self {
        Self {
            coord,
            aabb,
            objects,
            visible: false,
            prev_visible: false,
            lod: LOD_UNSET,
            prev_lod: LOD_UNSET,
            force_regen: false,
            command_buffers: (0..swap_images).map(|_| None).collect(),
        }
    }

    /// Whether this frame's evaluation differs from the previous one.
    pub fn changed(&self) -> bool {
        self.visible != self.prev_visible || self.lod != self.prev_lod || self.force_regen
    }

    /// Roll this frame's evaluation into the previous-frame state.
    pub fn commit(&mut self) {
        self.prev_visible = self.visible;
        self.prev_lod = self.lod;
    }

    /// Pool owning the tile's current command buffers, if it has any.
    pub fn owner(&self) -> Option<PoolId> {
        self.command_buffers
            .iter()
            .flatten()
            .map(|cb| cb.id.pool)
            .next()
    }

    pub fn has_command_buffers(&self) -> bool {
        self.command_buffers.iter().any(Option::is_some)
    }

    pub fn command_buffer(&self, swap_index: u32) -> Option<&TileCommandBuffer<C>> {
        self.command_buffers
            .get(swap_index as usize)
            .and_then(Option::as_ref)
    }

    /// Remove every installed buffer, paired with the swap image it belonged to.
    pub fn take_command_buffers(&mut self) -> Vec<(u32, TileCommandBuffer<C>)> {
        self.command_buffers
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.take().map(|cb| (i as u32, cb)))
            .collect()
    }

    /// Install one freshly encoded buffer per swap image. Returns the buffers
    /// they replace so the caller can hand them back to their owners.
    pub fn install_command_buffers(
        &mut self,
        fresh: Vec<TileCommandBuffer<C>>,
    ) -> Vec<(u32, TileCommandBuffer<C>)> {
        debug_assert_eq!(fresh.len(), self.command_buffers.len());
        let superseded = self.take_command_buffers();
        for (slot, cb) in self.command_buffers.iter_mut().zip(fresh) {
            *slot = Some(cb);
        }
        superseded
    }
}

/// The static tile grid.
///
/// Each tile sits behind its own lock. Visibility work is partitioned by row,
/// so the locks are uncontended except for the brief handoff to regeneration
/// and the coordinator's read at the end of the frame.
pub struct TileWorld<C> {
    config: WorldConfig,
    swap_images: usize,
    tiles: Vec<Mutex<Tile<C>>>,
}

impl<C> TileWorld<C> {
    /// Generate the grid: place objects on every tile and compute their bounds.
    pub fn generate(config: WorldConfig, swap_images: usize) -> Self {
        let _span = tracing::info_span!("world_generate").entered();
        let mut rng = PlacementRng::new(config.seed);
        let mut tiles = Vec::with_capacity(config.tile_count());

        for z in 0..config.tiles_z {
            for x in 0..config.tiles_x {
                let coord = TileCoord::new(x, z);
                let footprint = config.footprint(coord);
                let (objects, aabb) = scatter(&footprint, config.placements_per_tile, &mut rng);
                tiles.push(Mutex::new(Tile::new(coord, aabb, objects, swap_images)));
            }
        }

        tracing::debug!(
            tiles_x = config.tiles_x,
            tiles_z = config.tiles_z,
            objects = config.tile_count() * tiles.first().map_or(0, |t| t.lock().objects.len()),
            "tile world generated"
        );

        Self {
            config,
            swap_images,
            tiles,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn tiles_x(&self) -> u32 {
        self.config.tiles_x
    }

    pub fn tiles_z(&self) -> u32 {
        self.config.tiles_z
    }

    pub fn swap_images(&self) -> usize {
        self.swap_images
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Lock one tile.
    ///
    /// # Panics
    /// If `coord` lies outside the grid.
    pub fn tile(&self, coord: TileCoord) -> MutexGuard<'_, Tile<C>> {
        assert!(
            coord.x < self.config.tiles_x && coord.z < self.config.tiles_z,
            "tile {coord} outside {}x{} grid",
            self.config.tiles_x,
            self.config.tiles_z
        );
        self.tiles[coord.index(self.config.tiles_x)].lock()
    }

    /// Every coordinate of the grid in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let tiles_x = self.config.tiles_x;
        (0..self.config.tiles_z).flat_map(move |z| (0..tiles_x).map(move |x| TileCoord::new(x, z)))
    }

    /// Number of tiles whose last evaluation was visible.
    pub fn visible_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.lock().prev_visible).count()
    }

    /// Strip every command buffer out of every tile (shutdown path).
    pub fn drain_command_buffers(&self) -> Vec<(u32, TileCommandBuffer<C>)> {
        self.tiles
            .iter()
            .flat_map(|t| t.lock().take_command_buffers())
            .collect()
    }
}
