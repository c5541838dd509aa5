//! Backend server interfaces.
//!
//! The layer never owns rendering, physics, navigation or scene resources
//! directly. It creates them through these traits and only keeps the opaque
//! handles, freeing each one exactly once.

pub mod recording;

use std::fmt;

use glam::{Affine2, Vec2};

use crate::config::{Color, TextureFilter, TextureRepeat};
use crate::tilemap::TileMapCell;
use crate::tileset::{MaterialId, NavigationPolygon, PackedScene, TileTransform};

pub use recording::RecordingBackend;

/// Opaque backend resource handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid(u64);

impl Rid {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RID({})", self.0)
    }
}

/// Handle of an instantiated scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneInstanceId(pub u64);

/// One tile drawn into a canvas item.
#[derive(Clone, Debug, PartialEq)]
pub struct TileDraw {
    pub cell: TileMapCell,
    /// Position of the tile center relative to the canvas item.
    pub position: Vec2,
    pub modulate: Color,
    pub transform: TileTransform,
    /// Animation time offset, non-zero only for randomly started animations.
    pub animation_offset: f32,
}

pub trait RenderingServer {
    fn canvas_item_create(&mut self) -> Rid;
    fn canvas_item_free(&mut self, item: Rid);
    fn canvas_item_set_parent(&mut self, item: Rid, parent: Option<Rid>);
    fn canvas_item_set_transform(&mut self, item: Rid, transform: Affine2);
    fn canvas_item_set_material(&mut self, item: Rid, material: Option<MaterialId>);
    fn canvas_item_set_use_parent_material(&mut self, item: Rid, enabled: bool);
    fn canvas_item_set_light_mask(&mut self, item: Rid, mask: u32);
    fn canvas_item_set_z_index(&mut self, item: Rid, z_index: i32);
    fn canvas_item_set_z_as_relative_to_parent(&mut self, item: Rid, relative: bool);
    fn canvas_item_set_sort_children_by_y(&mut self, item: Rid, enabled: bool);
    fn canvas_item_set_default_texture_filter(&mut self, item: Rid, filter: TextureFilter);
    fn canvas_item_set_default_texture_repeat(&mut self, item: Rid, repeat: TextureRepeat);
    fn canvas_item_set_modulate(&mut self, item: Rid, color: Color);
    fn canvas_item_set_self_modulate(&mut self, item: Rid, color: Color);
    fn canvas_item_set_draw_index(&mut self, item: Rid, index: i32);
    fn canvas_item_clear(&mut self, item: Rid);
    fn canvas_item_add_tile(&mut self, item: Rid, draw: TileDraw);
    fn canvas_item_add_circle(&mut self, item: Rid, center: Vec2, radius: f32, color: Color);
    fn canvas_item_add_polygon(&mut self, item: Rid, points: &[Vec2], color: Color);

    fn occluder_create(&mut self) -> Rid;
    fn occluder_free(&mut self, occluder: Rid);
    fn occluder_attach_to_canvas(&mut self, occluder: Rid, canvas: Option<Rid>);
    fn occluder_set_transform(&mut self, occluder: Rid, transform: Affine2);
    fn occluder_set_polygon(&mut self, occluder: Rid, polygon: &[Vec2]);
    fn occluder_set_light_mask(&mut self, occluder: Rid, mask: u32);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyMode {
    Static,
    Kinematic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyParam {
    Bounce,
    Friction,
}

pub trait PhysicsServer {
    fn body_create(&mut self) -> Rid;
    fn body_free(&mut self, body: Rid);
    fn body_set_mode(&mut self, body: Rid, mode: BodyMode);
    fn body_set_space(&mut self, body: Rid, space: Option<Rid>);
    fn body_set_transform(&mut self, body: Rid, transform: Affine2);
    fn body_get_transform(&self, body: Rid) -> Option<Affine2>;
    fn body_attach_object_instance_id(&mut self, body: Rid, instance_id: u64);
    fn body_set_collision_layer(&mut self, body: Rid, layer: u32);
    fn body_set_collision_mask(&mut self, body: Rid, mask: u32);
    fn body_set_pickable(&mut self, body: Rid, pickable: bool);
    fn body_set_param(&mut self, body: Rid, param: BodyParam, value: f32);
    fn body_set_constant_velocity(&mut self, body: Rid, linear: Vec2, angular: f32);
    fn body_clear_shapes(&mut self, body: Rid);
    fn body_add_shape(&mut self, body: Rid, points: &[Vec2]);
    fn body_set_shape_as_one_way_collision(&mut self, body: Rid, shape: usize, enabled: bool, margin: f32);
}

pub trait NavigationServer {
    fn map_create(&mut self) -> Rid;
    fn map_free(&mut self, map: Rid);
    fn map_set_cell_size(&mut self, map: Rid, cell_size: f32);
    fn map_set_active(&mut self, map: Rid, active: bool);

    fn region_create(&mut self) -> Rid;
    fn region_free(&mut self, region: Rid);
    fn region_set_owner_id(&mut self, region: Rid, owner_id: u64);
    fn region_set_map(&mut self, region: Rid, map: Option<Rid>);
    fn region_set_transform(&mut self, region: Rid, transform: Affine2);
    fn region_set_navigation_layers(&mut self, region: Rid, layers: u32);
    fn region_set_navigation_polygon(&mut self, region: Rid, polygon: &NavigationPolygon);
}

/// Where an instantiated scene root is placed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScenePlacement {
    /// Control root: its position, already offset to the cell.
    Control { position: Vec2 },
    /// 2D node root: its transform, already translated to the cell.
    Node2d { transform: Affine2 },
    /// Root type with no position.
    Unpositioned,
}

pub trait SceneInstancer {
    fn scene_instantiate(&mut self, scene: &PackedScene, placement: ScenePlacement) -> SceneInstanceId;
    fn scene_queue_free(&mut self, instance: SceneInstanceId);
}

/// Everything a layer talks to.
pub trait Backend: RenderingServer + PhysicsServer + NavigationServer + SceneInstancer {}

impl<T> Backend for T where T: RenderingServer + PhysicsServer + NavigationServer + SceneInstancer {}
