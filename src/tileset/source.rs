//! Tile sources: texture atlases and scene collections.

use std::collections::BTreeMap;

use glam::{Affine2, IVec2, Vec2};
use serde::{Deserialize, Serialize};

use super::tile_data::{TileData, TileTransform};

/// Animation start behaviour of an animated atlas tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationMode {
    /// All instances share the same animation clock.
    #[default]
    Default,
    /// Every instance starts at a random offset.
    RandomStartTimes,
}

/// One tile of an atlas with its alternatives (alternative 0 is the base tile).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtlasTile {
    pub atlas_coords: IVec2,
    #[serde(default = "default_size")]
    pub size_in_atlas: IVec2,
    #[serde(default = "default_frames")]
    pub animation_frames: u32,
    #[serde(default)]
    pub animation_mode: AnimationMode,
    #[serde(default)]
    pub alternatives: BTreeMap<i32, TileData>,
}

fn default_size() -> IVec2 {
    IVec2::ONE
}

fn default_frames() -> u32 {
    1
}

impl AtlasTile {
    pub fn new(atlas_coords: IVec2, data: TileData) -> Self {
        let mut alternatives = BTreeMap::new();
        alternatives.insert(0, data);
        Self {
            atlas_coords,
            size_in_atlas: IVec2::ONE,
            animation_frames: 1,
            animation_mode: AnimationMode::Default,
            alternatives,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.animation_frames > 1
    }
}

/// A texture atlas cut into tiles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtlasSource {
    /// Path of the atlas texture, if any.
    #[serde(default)]
    pub texture: Option<String>,
    /// Size of the atlas grid in tiles. Tiles outside it are drawn as placeholders.
    #[serde(default)]
    pub grid_size: IVec2,
    #[serde(default)]
    pub tiles: Vec<AtlasTile>,
}

impl AtlasSource {
    pub fn tile(&self, atlas_coords: IVec2) -> Option<&AtlasTile> {
        self.tiles.iter().find(|t| t.atlas_coords == atlas_coords)
    }

    pub fn has_tile(&self, atlas_coords: IVec2) -> bool {
        self.tile(atlas_coords).is_some()
    }

    /// Tile data of an alternative, ignoring its transform bits.
    pub fn tile_data(&self, atlas_coords: IVec2, alternative: i32) -> Option<&TileData> {
        self.tile(atlas_coords)?
            .alternatives
            .get(&TileTransform::strip(alternative))
    }

    pub fn has_alternative_tile(&self, atlas_coords: IVec2, alternative: i32) -> bool {
        self.tile_data(atlas_coords, alternative).is_some()
    }

    /// Whether the tile lies outside the atlas grid (or the atlas has no texture).
    pub fn is_placeholder(&self, atlas_coords: IVec2) -> bool {
        let Some(tile) = self.tile(atlas_coords) else {
            return true;
        };
        let end = tile.atlas_coords + tile.size_in_atlas;
        self.texture.is_none()
            || tile.atlas_coords.cmplt(IVec2::ZERO).any()
            || end.cmpgt(self.grid_size).any()
    }

    pub fn add_tile(&mut self, tile: AtlasTile) -> &mut Self {
        self.tiles.retain(|t| t.atlas_coords != tile.atlas_coords);
        self.tiles.push(tile);
        self
    }
}

/// Root node of a packed scene, as far as placement is concerned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SceneRoot {
    /// UI control: placed by offsetting its position.
    Control { position: Vec2 },
    /// 2D node: placed by prepending a translation to its transform.
    Node2d { transform: Affine2 },
    /// Anything else is instantiated but not positioned.
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackedScene {
    pub path: String,
    pub root: SceneRoot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneTile {
    #[serde(default)]
    pub scene: Option<PackedScene>,
    /// Draw a placeholder in the editor instead of relying on the scene.
    #[serde(default)]
    pub display_placeholder: bool,
}

/// Source whose tiles are scene instances, keyed by alternative id.
///
/// Scene tiles always live at atlas coords `(0, 0)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenesCollectionSource {
    #[serde(default)]
    pub scenes: BTreeMap<i32, SceneTile>,
}

impl ScenesCollectionSource {
    pub fn scene_tile(&self, atlas_coords: IVec2, alternative: i32) -> Option<&SceneTile> {
        if atlas_coords != IVec2::ZERO {
            return None;
        }
        self.scenes.get(&alternative)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TileSetSource {
    Atlas(AtlasSource),
    ScenesCollection(ScenesCollectionSource),
}

impl TileSetSource {
    pub fn as_atlas(&self) -> Option<&AtlasSource> {
        match self {
            TileSetSource::Atlas(atlas) => Some(atlas),
            TileSetSource::ScenesCollection(_) => None,
        }
    }

    pub fn as_scenes_collection(&self) -> Option<&ScenesCollectionSource> {
        match self {
            TileSetSource::Atlas(_) => None,
            TileSetSource::ScenesCollection(scenes) => Some(scenes),
        }
    }

    pub fn has_tile(&self, atlas_coords: IVec2) -> bool {
        match self {
            TileSetSource::Atlas(atlas) => atlas.has_tile(atlas_coords),
            TileSetSource::ScenesCollection(_) => atlas_coords == IVec2::ZERO,
        }
    }

    pub fn has_alternative_tile(&self, atlas_coords: IVec2, alternative: i32) -> bool {
        match self {
            TileSetSource::Atlas(atlas) => atlas.has_alternative_tile(atlas_coords, alternative),
            TileSetSource::ScenesCollection(scenes) => {
                scenes.scene_tile(atlas_coords, alternative).is_some()
            }
        }
    }
}
