//! Terrain sets and terrain patterns.

use serde::{Deserialize, Serialize};

use super::topology::{CellNeighbor, CELL_NEIGHBOR_COUNT};
use crate::config::Color;

/// Which peering bits of a tile carry a terrain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerrainMode {
    #[default]
    MatchCornersAndSides,
    MatchCorners,
    MatchSides,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Terrain {
    pub name: String,
    #[serde(default)]
    pub color: Color,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainSet {
    #[serde(default)]
    pub mode: TerrainMode,
    #[serde(default)]
    pub terrains: Vec<Terrain>,
}

/// Center terrain plus one terrain per peering bit. `-1` means "no terrain".
///
/// Bits that are not valid for the terrain set are always `-1`, so the
/// derived ordering (center first, then bits in `CellNeighbor` order) only
/// compares meaningful values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TerrainsPattern {
    terrain: i32,
    bits: [i32; CELL_NEIGHBOR_COUNT],
}

impl Default for TerrainsPattern {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl TerrainsPattern {
    pub const EMPTY: TerrainsPattern = TerrainsPattern {
        terrain: -1,
        bits: [-1; CELL_NEIGHBOR_COUNT],
    };

    pub fn new(terrain: i32) -> Self {
        Self {
            terrain,
            ..Self::EMPTY
        }
    }

    pub fn terrain(&self) -> i32 {
        self.terrain
    }

    pub fn set_terrain(&mut self, terrain: i32) {
        self.terrain = terrain;
    }

    pub fn terrain_peering_bit(&self, bit: CellNeighbor) -> i32 {
        self.bits[bit.index()]
    }

    /// Set a peering bit. Callers are responsible for only touching bits
    /// valid for the terrain set.
    pub fn set_terrain_peering_bit(&mut self, bit: CellNeighbor, terrain: i32) {
        self.bits[bit.index()] = terrain;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_ordering() {
        let mut a = TerrainsPattern::new(0);
        let b = TerrainsPattern::new(1);
        assert!(a < b);
        assert!(TerrainsPattern::EMPTY < a);

        // Center compares first, then bits in neighbor order
        let before = a;
        a.set_terrain_peering_bit(CellNeighbor::TopSide, 0);
        assert!(before < a);
        let mut c = TerrainsPattern::new(0);
        c.set_terrain_peering_bit(CellNeighbor::RightSide, 0);
        assert!(a < c);
    }

    #[test]
    fn test_empty_pattern() {
        assert!(TerrainsPattern::default().is_empty());
        assert!(!TerrainsPattern::new(2).is_empty());
    }
}
