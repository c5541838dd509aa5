//! Read-only tile set model consumed by the layer.
//!
//! A tile set describes the shape of its cells, the tile sources cells can
//! reference, the physics / occlusion / navigation layer descriptors and the
//! terrain sets used by the terrain solver.

pub mod source;
pub mod terrain;
pub mod tile_data;
pub mod topology;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use glam::{IVec2, Vec2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tilemap::TileMapCell;

pub use source::{
    AnimationMode, AtlasSource, AtlasTile, PackedScene, SceneRoot, SceneTile,
    ScenesCollectionSource, TileSetSource,
};
pub use terrain::{Terrain, TerrainMode, TerrainSet, TerrainsPattern};
pub use tile_data::{
    CollisionPolygon, MaterialId, NavigationPolygon, TileData, TilePhysics, TileTransform,
    TRANSFORM_FLIP_H, TRANSFORM_FLIP_V, TRANSFORM_TRANSPOSE,
};
pub use topology::{CellNeighbor, OffsetAxis, TileShape, CELL_NEIGHBOR_COUNT};

/// Bounce and friction of the bodies built for a physics layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    pub bounce: f32,
    pub friction: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsLayer {
    pub collision_layer: u32,
    pub collision_mask: u32,
    pub material: Option<PhysicsMaterial>,
}

impl Default for PhysicsLayer {
    fn default() -> Self {
        Self {
            collision_layer: 1,
            collision_mask: 1,
            material: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionLayer {
    pub light_mask: u32,
}

impl Default for OcclusionLayer {
    fn default() -> Self {
        Self { light_mask: 1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationLayer {
    pub layers: u32,
}

impl Default for NavigationLayer {
    fn default() -> Self {
        Self { layers: 1 }
    }
}

/// Remapping of a whole source, an atlas tile or a single alternative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordsProxy {
    pub from: (i32, IVec2),
    pub to: (i32, IVec2),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlternativeProxy {
    pub from: (i32, IVec2, i32),
    pub to: (i32, IVec2, i32),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileProxies {
    pub source: BTreeMap<i32, i32>,
    pub coords: Vec<CoordsProxy>,
    pub alternative: Vec<AlternativeProxy>,
}

/// Mapping of a pre-atlas tile id onto the current sources.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegacyTile {
    pub source_id: i32,
    /// Atlas coords of single tiles. Ignored for autotiles, which keep the
    /// coords stored in the record.
    #[serde(default)]
    pub atlas_coords: IVec2,
    #[serde(default)]
    pub autotile: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileSet {
    pub tile_shape: TileShape,
    pub offset_axis: OffsetAxis,
    pub tile_size: IVec2,
    pub sources: BTreeMap<i32, TileSetSource>,
    pub physics_layers: Vec<PhysicsLayer>,
    pub occlusion_layers: Vec<OcclusionLayer>,
    pub navigation_layers: Vec<NavigationLayer>,
    pub terrain_sets: Vec<TerrainSet>,
    pub proxies: TileProxies,
    pub legacy_tiles: BTreeMap<i32, LegacyTile>,
}

impl Default for TileSet {
    fn default() -> Self {
        Self {
            tile_shape: TileShape::Square,
            offset_axis: OffsetAxis::Horizontal,
            tile_size: IVec2::new(16, 16),
            sources: BTreeMap::new(),
            physics_layers: Vec::new(),
            occlusion_layers: Vec::new(),
            navigation_layers: Vec::new(),
            terrain_sets: Vec::new(),
            proxies: TileProxies::default(),
            legacy_tiles: BTreeMap::new(),
        }
    }
}

impl TileSet {
    /// Load a tile set description from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self, serde_json::Error> {
        let file = fs::File::open(path).map_err(serde_json::Error::io)?;
        serde_json::from_reader(std::io::BufReader::new(file))
    }

    pub fn add_source(&mut self, source_id: i32, source: TileSetSource) -> &mut Self {
        self.sources.insert(source_id, source);
        self
    }

    pub fn has_source(&self, source_id: i32) -> bool {
        self.sources.contains_key(&source_id)
    }

    pub fn source(&self, source_id: i32) -> Option<&TileSetSource> {
        self.sources.get(&source_id)
    }

    pub fn atlas_source(&self, source_id: i32) -> Option<&AtlasSource> {
        self.source(source_id)?.as_atlas()
    }

    /// Tile data of an atlas cell, or `None` if the reference does not resolve
    /// to an atlas tile.
    pub fn atlas_tile_data(&self, cell: &TileMapCell) -> Option<&TileData> {
        self.atlas_source(cell.source_id)?
            .tile_data(cell.atlas_coords, cell.alternative_tile)
    }

    /// Whether the cell references an existing tile of any source kind.
    pub fn resolves(&self, cell: &TileMapCell) -> bool {
        self.source(cell.source_id)
            .map(|s| s.has_alternative_tile(cell.atlas_coords, cell.alternative_tile))
            .unwrap_or(false)
    }

    pub fn map_to_local(&self, coords: IVec2) -> Vec2 {
        topology::map_to_local(self.tile_shape, self.offset_axis, self.tile_size, coords)
    }

    pub fn neighbor_cell(&self, coords: IVec2, neighbor: CellNeighbor) -> IVec2 {
        topology::neighbor_cell(self.tile_shape, self.offset_axis, coords, neighbor)
    }

    pub fn is_existing_neighbor(&self, neighbor: CellNeighbor) -> bool {
        topology::is_existing_neighbor(self.tile_shape, self.offset_axis, neighbor)
    }

    /// Cells touching `coords` through a side or a corner.
    pub fn surrounding_cells(&self, coords: IVec2) -> Vec<IVec2> {
        CellNeighbor::ALL
            .iter()
            .filter(|n| self.is_existing_neighbor(**n))
            .map(|n| self.neighbor_cell(coords, *n))
            .collect()
    }

    pub fn terrain_sets_count(&self) -> usize {
        self.terrain_sets.len()
    }

    pub fn terrain_set(&self, terrain_set: i32) -> Option<&TerrainSet> {
        usize::try_from(terrain_set)
            .ok()
            .and_then(|i| self.terrain_sets.get(i))
    }

    pub fn is_valid_terrain_peering_bit(&self, terrain_set: i32, bit: CellNeighbor) -> bool {
        self.terrain_set(terrain_set)
            .map(|set| topology::is_valid_peering_bit(self.tile_shape, self.offset_axis, set.mode, bit))
            .unwrap_or(false)
    }

    /// Terrain pattern of a tile within its own terrain set.
    pub fn terrains_pattern_of(&self, data: &TileData) -> TerrainsPattern {
        data.terrains_pattern(|bit| self.is_valid_terrain_peering_bit(data.terrain_set, bit))
    }

    /// Every atlas tile (with alternatives) of a terrain set, in source, atlas
    /// and alternative order.
    fn terrain_tiles(&self, terrain_set: i32) -> impl Iterator<Item = (TileMapCell, &TileData)> + '_ {
        self.sources.iter().flat_map(move |(source_id, source)| {
            source
                .as_atlas()
                .into_iter()
                .flat_map(|atlas| atlas.tiles.iter())
                .flat_map(move |tile| {
                    tile.alternatives.iter().map(move |(alternative, data)| {
                        (TileMapCell::new(*source_id, tile.atlas_coords, *alternative), data)
                    })
                })
                .filter(move |(_, data)| data.terrain_set == terrain_set)
        })
    }

    /// All terrain patterns available in a terrain set, including the empty
    /// pattern, in ascending order.
    pub fn terrains_pattern_set(&self, terrain_set: i32) -> Vec<TerrainsPattern> {
        let mut patterns: Vec<TerrainsPattern> = self
            .terrain_tiles(terrain_set)
            .map(|(_, data)| self.terrains_pattern_of(data))
            .collect();
        patterns.push(TerrainsPattern::EMPTY);
        patterns.sort();
        patterns.dedup();
        patterns
    }

    /// Pick a tile matching `pattern`, weighted by tile probability.
    ///
    /// The empty pattern maps to the empty cell. Returns the empty cell when no
    /// tile matches.
    pub fn random_tile_from_terrains_pattern<R: Rng>(
        &self,
        terrain_set: i32,
        pattern: &TerrainsPattern,
        rng: &mut R,
    ) -> TileMapCell {
        if pattern.is_empty() {
            return TileMapCell::EMPTY;
        }
        let candidates: Vec<(TileMapCell, f32)> = self
            .terrain_tiles(terrain_set)
            .filter(|(_, data)| self.terrains_pattern_of(data) == *pattern)
            .map(|(cell, data)| (cell, data.probability.max(0.0)))
            .collect();

        let total: f32 = candidates.iter().map(|(_, p)| p).sum();
        if candidates.is_empty() {
            return TileMapCell::EMPTY;
        }
        if total <= 0.0 {
            return candidates[0].0;
        }

        let mut pick = rng.gen::<f32>() * total;
        for (cell, probability) in &candidates {
            if pick < *probability {
                return *cell;
            }
            pick -= probability;
        }
        candidates[candidates.len() - 1].0
    }

    /// Apply the proxies: alternative-level first, then coords-level, then
    /// source-level.
    pub fn map_tile_proxy(&self, cell: TileMapCell) -> TileMapCell {
        let key = (cell.source_id, cell.atlas_coords, cell.alternative_tile);
        if let Some(proxy) = self.proxies.alternative.iter().find(|p| p.from == key) {
            return TileMapCell::new(proxy.to.0, proxy.to.1, proxy.to.2);
        }
        if let Some(proxy) = self
            .proxies
            .coords
            .iter()
            .find(|p| p.from == (cell.source_id, cell.atlas_coords))
        {
            return TileMapCell::new(proxy.to.0, proxy.to.1, cell.alternative_tile);
        }
        if let Some(source_id) = self.proxies.source.get(&cell.source_id) {
            return TileMapCell::new(*source_id, cell.atlas_coords, cell.alternative_tile);
        }
        cell
    }

    /// Map a pre-atlas tile id onto a cell of the current sources.
    pub fn compatibility_tilemap_map(
        &self,
        legacy_id: i32,
        coords: IVec2,
        flip_h: bool,
        flip_v: bool,
        transpose: bool,
    ) -> Option<TileMapCell> {
        let legacy = self.legacy_tiles.get(&legacy_id)?;
        let atlas_coords = if legacy.autotile { coords } else { legacy.atlas_coords };
        let mut alternative = 0;
        if flip_h {
            alternative |= TRANSFORM_FLIP_H;
        }
        if flip_v {
            alternative |= TRANSFORM_FLIP_V;
        }
        if transpose {
            alternative |= TRANSFORM_TRANSPOSE;
        }
        Some(TileMapCell::new(legacy.source_id, atlas_coords, alternative))
    }

    /// Map coords stored in `pattern` to the layer when the pattern is pasted at
    /// `position`. Half-offset shapes shift odd rows (or columns) so the
    /// pattern keeps its look whatever the parity of `position`.
    pub fn map_pattern(&self, position: IVec2, coords_in_pattern: IVec2) -> IVec2 {
        let mut output = position + coords_in_pattern;
        if self.tile_shape.is_half_offset() {
            match self.offset_axis {
                OffsetAxis::Horizontal => {
                    if position.y.rem_euclid(2) != 0 && coords_in_pattern.y.rem_euclid(2) != 0 {
                        output.x += 1;
                    }
                }
                OffsetAxis::Vertical => {
                    if position.x.rem_euclid(2) != 0 && coords_in_pattern.x.rem_euclid(2) != 0 {
                        output.y += 1;
                    }
                }
            }
        }
        output
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    pub const TERRAIN_T: i32 = 0;
    pub const TERRAIN_U: i32 = 1;

    /// Sides-only terrain tile on a square grid.
    pub fn sides_tile(terrain: i32, sides: [i32; 4]) -> TileData {
        let mut data = TileData {
            terrain_set: 0,
            terrain,
            ..TileData::default()
        };
        for (bit, t) in [
            CellNeighbor::RightSide,
            CellNeighbor::BottomSide,
            CellNeighbor::LeftSide,
            CellNeighbor::TopSide,
        ]
        .into_iter()
        .zip(sides)
        {
            data.set_terrain_peering_bit(bit, t);
        }
        data
    }

    /// Square tile set with one "match sides" terrain set of terrains T and U,
    /// a full T tile at (0, 0) and a full U tile at (1, 0) of source 0.
    pub fn terrain_tile_set() -> TileSet {
        let mut atlas = AtlasSource {
            texture: Some("terrain.png".to_string()),
            grid_size: IVec2::new(8, 8),
            tiles: Vec::new(),
        };
        let t = TERRAIN_T;
        let u = TERRAIN_U;
        atlas.add_tile(AtlasTile::new(IVec2::new(0, 0), sides_tile(t, [t; 4])));
        atlas.add_tile(AtlasTile::new(IVec2::new(1, 0), sides_tile(u, [u; 4])));

        let mut tile_set = TileSet::default();
        tile_set.terrain_sets.push(TerrainSet {
            mode: TerrainMode::MatchSides,
            terrains: vec![
                Terrain {
                    name: "T".to_string(),
                    color: crate::config::Color::WHITE,
                },
                Terrain {
                    name: "U".to_string(),
                    color: crate::config::Color::WHITE,
                },
            ],
        });
        tile_set.add_source(0, TileSetSource::Atlas(atlas));
        tile_set
    }

    #[test]
    fn test_pattern_set_is_sorted_and_has_empty() {
        let tile_set = terrain_tile_set();
        let patterns = tile_set.terrains_pattern_set(0);
        assert_eq!(patterns.len(), 3);
        assert_eq!(patterns[0], TerrainsPattern::EMPTY);
        assert!(patterns.windows(2).all(|w| w[0] < w[1]));
        // Corner bits are not part of a sides-only pattern
        assert_eq!(patterns[1].terrain_peering_bit(CellNeighbor::TopRightCorner), -1);
    }

    #[test]
    fn test_random_tile_from_pattern() {
        let tile_set = terrain_tile_set();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let full_u = tile_set.terrains_pattern_of(&sides_tile(TERRAIN_U, [TERRAIN_U; 4]));
        let cell = tile_set.random_tile_from_terrains_pattern(0, &full_u, &mut rng);
        assert_eq!(cell, TileMapCell::new(0, IVec2::new(1, 0), 0));

        let empty = tile_set.random_tile_from_terrains_pattern(0, &TerrainsPattern::EMPTY, &mut rng);
        assert!(empty.is_empty());

        let unknown = TerrainsPattern::new(5);
        assert!(tile_set.random_tile_from_terrains_pattern(0, &unknown, &mut rng).is_empty());
    }

    #[test]
    fn test_proxy_precedence() {
        let mut tile_set = TileSet::default();
        tile_set.proxies.source.insert(1, 2);
        tile_set.proxies.coords.push(CoordsProxy {
            from: (1, IVec2::new(3, 3)),
            to: (4, IVec2::new(0, 0)),
        });
        tile_set.proxies.alternative.push(AlternativeProxy {
            from: (1, IVec2::new(3, 3), 1),
            to: (5, IVec2::new(1, 1), 0),
        });

        let mapped = tile_set.map_tile_proxy(TileMapCell::new(1, IVec2::new(3, 3), 1));
        assert_eq!(mapped, TileMapCell::new(5, IVec2::new(1, 1), 0));
        let mapped = tile_set.map_tile_proxy(TileMapCell::new(1, IVec2::new(3, 3), 0));
        assert_eq!(mapped, TileMapCell::new(4, IVec2::new(0, 0), 0));
        let mapped = tile_set.map_tile_proxy(TileMapCell::new(1, IVec2::new(2, 2), 0));
        assert_eq!(mapped, TileMapCell::new(2, IVec2::new(2, 2), 0));
    }

    #[test]
    fn test_compatibility_map() {
        let mut tile_set = TileSet::default();
        tile_set.legacy_tiles.insert(
            7,
            LegacyTile {
                source_id: 2,
                atlas_coords: IVec2::new(4, 1),
                autotile: false,
            },
        );
        let cell = tile_set
            .compatibility_tilemap_map(7, IVec2::new(9, 9), true, false, true)
            .unwrap();
        assert_eq!(cell.atlas_coords, IVec2::new(4, 1));
        assert_eq!(cell.alternative_tile, TRANSFORM_FLIP_H | TRANSFORM_TRANSPOSE);
        assert!(tile_set.compatibility_tilemap_map(8, IVec2::ZERO, false, false, false).is_none());
    }

    #[test]
    fn test_map_pattern_half_offset_parity() {
        let mut tile_set = TileSet {
            tile_shape: TileShape::Hexagon,
            ..TileSet::default()
        };
        assert_eq!(tile_set.map_pattern(IVec2::new(0, 1), IVec2::new(0, 1)), IVec2::new(1, 2));
        assert_eq!(tile_set.map_pattern(IVec2::new(0, 2), IVec2::new(0, 1)), IVec2::new(0, 3));
        tile_set.tile_shape = TileShape::Square;
        assert_eq!(tile_set.map_pattern(IVec2::new(0, 1), IVec2::new(0, 1)), IVec2::new(0, 2));
    }
}
