//! Tile world: the static grid the horde pipeline culls and draws.
//!
//! # Invariants
//! - The grid is created once and never resized; only tile state changes per frame.
//! - Generation is deterministic: the same `WorldConfig` always yields the same world.
//! - A tile's command-buffer slots are only touched while its lock is held.

mod placement;
mod world;

pub use placement::{ObjectKind, PaletteEntry, PlacementRng, PALETTE};
pub use world::{Tile, TileCommandBuffer, TileWorld, WorldConfig, LOD_UNSET};

pub fn crate_info() -> &'static str {
    "horde-world v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("world"));
    }
}
