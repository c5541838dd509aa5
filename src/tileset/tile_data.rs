//! Per-tile data: rendering attributes, physics, occlusion, navigation and
//! terrain information of one alternative tile.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::terrain::TerrainsPattern;
use super::topology::{CellNeighbor, CELL_NEIGHBOR_COUNT};
use crate::config::Color;

/// Alternative id bit: flip horizontally.
pub const TRANSFORM_FLIP_H: i32 = 1 << 12;
/// Alternative id bit: flip vertically.
pub const TRANSFORM_FLIP_V: i32 = 1 << 13;
/// Alternative id bit: swap x and y.
pub const TRANSFORM_TRANSPOSE: i32 = 1 << 14;

const TRANSFORM_MASK: i32 = TRANSFORM_FLIP_H | TRANSFORM_FLIP_V | TRANSFORM_TRANSPOSE;

/// Opaque id of a material known to the rendering backend.
pub type MaterialId = u32;

/// Geometry transform encoded in the high bits of an alternative tile id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileTransform {
    pub flip_h: bool,
    pub flip_v: bool,
    pub transpose: bool,
}

impl TileTransform {
    pub fn from_alternative(alternative: i32) -> Self {
        Self {
            flip_h: alternative & TRANSFORM_FLIP_H != 0,
            flip_v: alternative & TRANSFORM_FLIP_V != 0,
            transpose: alternative & TRANSFORM_TRANSPOSE != 0,
        }
    }

    /// Alternative id without its transform bits, as stored in the source.
    pub fn strip(alternative: i32) -> i32 {
        if alternative < 0 {
            alternative
        } else {
            alternative & !TRANSFORM_MASK
        }
    }

    pub fn is_identity(&self) -> bool {
        !(self.flip_h || self.flip_v || self.transpose)
    }

    pub fn apply(&self, point: Vec2) -> Vec2 {
        let mut p = point;
        if self.transpose {
            p = Vec2::new(p.y, p.x);
        }
        if self.flip_h {
            p.x = -p.x;
        }
        if self.flip_v {
            p.y = -p.y;
        }
        p
    }

    pub fn apply_all(&self, points: &[Vec2]) -> Vec<Vec2> {
        points.iter().map(|p| self.apply(*p)).collect()
    }
}

/// One collision polygon of a tile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionPolygon {
    pub points: Vec<Vec2>,
    #[serde(default)]
    pub one_way: bool,
    #[serde(default)]
    pub one_way_margin: f32,
}

/// Physics data of a tile for one physics layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilePhysics {
    pub polygons: Vec<CollisionPolygon>,
    pub constant_linear_velocity: Vec2,
    pub constant_angular_velocity: f32,
}

/// Navigation polygon of a tile: convex polygons and/or outlines.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationPolygon {
    pub vertices: Vec<Vec2>,
    pub polygons: Vec<Vec<usize>>,
    pub outlines: Vec<Vec<Vec2>>,
}

impl NavigationPolygon {
    /// A region is only worth registering when it has some geometry.
    pub fn has_geometry(&self) -> bool {
        !self.polygons.is_empty() || !self.outlines.is_empty()
    }

    pub fn transformed(&self, transform: TileTransform) -> Self {
        if transform.is_identity() {
            return self.clone();
        }
        Self {
            vertices: transform.apply_all(&self.vertices),
            polygons: self.polygons.clone(),
            outlines: self.outlines.iter().map(|o| transform.apply_all(o)).collect(),
        }
    }

    /// Vertex lists of each convex polygon.
    pub fn polygon_points(&self) -> impl Iterator<Item = Vec<Vec2>> + '_ {
        self.polygons.iter().map(move |indices| {
            indices
                .iter()
                .filter_map(|i| self.vertices.get(*i).copied())
                .collect()
        })
    }
}

/// Data of one alternative tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileData {
    pub material: Option<MaterialId>,
    pub modulate: Color,
    pub z_index: i32,
    pub y_sort_origin: i32,
    /// Pixel offset of the texture region relative to the cell center.
    pub texture_origin: Vec2,
    pub probability: f32,

    /// Indexed by physics layer.
    pub physics: Vec<TilePhysics>,
    /// Indexed by occlusion layer. `None` means no occluder on that layer.
    pub occluders: Vec<Option<Vec<Vec2>>>,
    /// Indexed by navigation layer.
    pub navigation: Vec<Option<NavigationPolygon>>,

    pub terrain_set: i32,
    pub terrain: i32,
    pub terrain_peering_bits: [i32; CELL_NEIGHBOR_COUNT],
}

impl Default for TileData {
    fn default() -> Self {
        Self {
            material: None,
            modulate: Color::WHITE,
            z_index: 0,
            y_sort_origin: 0,
            texture_origin: Vec2::ZERO,
            probability: 1.0,
            physics: Vec::new(),
            occluders: Vec::new(),
            navigation: Vec::new(),
            terrain_set: -1,
            terrain: -1,
            terrain_peering_bits: [-1; CELL_NEIGHBOR_COUNT],
        }
    }
}

impl TileData {
    pub fn collision_polygons(&self, physics_layer: usize) -> &[CollisionPolygon] {
        self.physics
            .get(physics_layer)
            .map(|p| p.polygons.as_slice())
            .unwrap_or(&[])
    }

    pub fn constant_velocities(&self, physics_layer: usize) -> (Vec2, f32) {
        self.physics
            .get(physics_layer)
            .map(|p| (p.constant_linear_velocity, p.constant_angular_velocity))
            .unwrap_or((Vec2::ZERO, 0.0))
    }

    pub fn occluder(&self, occlusion_layer: usize) -> Option<&[Vec2]> {
        self.occluders
            .get(occlusion_layer)
            .and_then(|o| o.as_deref())
    }

    pub fn navigation_polygon(&self, navigation_layer: usize) -> Option<&NavigationPolygon> {
        self.navigation.get(navigation_layer).and_then(|n| n.as_ref())
    }

    pub fn terrain_peering_bit(&self, bit: CellNeighbor) -> i32 {
        self.terrain_peering_bits[bit.index()]
    }

    pub fn set_terrain_peering_bit(&mut self, bit: CellNeighbor, terrain: i32) {
        self.terrain_peering_bits[bit.index()] = terrain;
    }

    /// Terrain pattern of this tile, keeping only the bits `valid` accepts.
    pub fn terrains_pattern(&self, valid: impl Fn(CellNeighbor) -> bool) -> TerrainsPattern {
        let mut pattern = TerrainsPattern::new(self.terrain);
        for bit in CellNeighbor::ALL {
            if valid(bit) {
                pattern.set_terrain_peering_bit(bit, self.terrain_peering_bit(bit));
            }
        }
        pattern
    }
}
