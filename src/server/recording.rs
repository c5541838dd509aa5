//! In-memory backend that records every call.
//!
//! Used by the tests and the CLI to observe what a layer asks the servers to
//! do. The state is shared behind `Rc<RefCell<..>>` so a clone kept by the
//! caller can still be inspected after the layer (and its copy) is dropped.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use glam::{Affine2, Vec2};
use rustc_hash::FxHashMap;

use super::{
    BodyMode, BodyParam, NavigationServer, PhysicsServer, RenderingServer, Rid, SceneInstanceId,
    SceneInstancer, ScenePlacement, TileDraw,
};
use crate::config::{Color, TextureFilter, TextureRepeat};
use crate::layer::World2d;
use crate::tileset::{MaterialId, NavigationPolygon, PackedScene};

/// Kind of a live handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Canvas, space and default navigation map of a world.
    World,
    CanvasItem,
    Occluder,
    Body,
    NavigationMap,
    NavigationRegion,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Tile(TileDraw),
    Circle { center: Vec2, radius: f32, color: Color },
    Polygon { points: Vec<Vec2>, color: Color },
}

#[derive(Clone, Debug, Default)]
pub struct CanvasItemState {
    pub parent: Option<Rid>,
    pub transform: Affine2,
    pub material: Option<MaterialId>,
    pub use_parent_material: bool,
    pub light_mask: u32,
    pub z_index: i32,
    pub z_relative: bool,
    pub sort_children_by_y: bool,
    pub texture_filter: TextureFilter,
    pub texture_repeat: TextureRepeat,
    pub modulate: Color,
    pub self_modulate: Color,
    pub draw_index: i32,
    pub commands: Vec<DrawCommand>,
}

#[derive(Clone, Debug, Default)]
pub struct OccluderState {
    pub canvas: Option<Rid>,
    pub transform: Affine2,
    pub polygon: Vec<Vec2>,
    pub light_mask: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShapeState {
    pub points: Vec<Vec2>,
    pub one_way: bool,
    pub one_way_margin: f32,
}

#[derive(Clone, Debug)]
pub struct BodyState {
    pub mode: BodyMode,
    pub space: Option<Rid>,
    pub transform: Affine2,
    pub instance_id: u64,
    pub collision_layer: u32,
    pub collision_mask: u32,
    pub pickable: bool,
    pub bounce: f32,
    pub friction: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub shapes: Vec<ShapeState>,
}

impl Default for BodyState {
    fn default() -> Self {
        Self {
            mode: BodyMode::Static,
            space: None,
            transform: Affine2::IDENTITY,
            instance_id: 0,
            collision_layer: 1,
            collision_mask: 1,
            pickable: true,
            bounce: 0.0,
            friction: 1.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            shapes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapState {
    pub cell_size: f32,
    pub active: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RegionState {
    pub owner_id: u64,
    pub map: Option<Rid>,
    pub transform: Affine2,
    pub navigation_layers: u32,
    pub polygon: NavigationPolygon,
}

#[derive(Clone, Debug)]
pub struct SceneRecord {
    pub path: String,
    pub placement: ScenePlacement,
}

/// Everything recorded so far.
#[derive(Debug, Default)]
pub struct RecordingState {
    next_id: u64,
    live: FxHashMap<Rid, HandleKind>,
    pub canvas_items: FxHashMap<Rid, CanvasItemState>,
    pub occluders: FxHashMap<Rid, OccluderState>,
    pub bodies: FxHashMap<Rid, BodyState>,
    pub maps: FxHashMap<Rid, MapState>,
    pub regions: FxHashMap<Rid, RegionState>,
    pub scenes: FxHashMap<SceneInstanceId, SceneRecord>,
    /// Calls that referenced a handle that was never created or already freed.
    pub invalid_calls: usize,
    /// Total number of server calls.
    pub calls: usize,
}

impl RecordingState {
    fn allocate(&mut self, kind: HandleKind) -> Rid {
        self.next_id += 1;
        let rid = Rid::new(self.next_id);
        self.live.insert(rid, kind);
        rid
    }

    fn release(&mut self, rid: Rid, kind: HandleKind) {
        if self.live.get(&rid) == Some(&kind) {
            self.live.remove(&rid);
        } else {
            self.invalid_calls += 1;
        }
    }

    /// Live handles created by layers (world resources excluded).
    pub fn live_count(&self) -> usize {
        self.live.values().filter(|k| **k != HandleKind::World).count()
    }

    pub fn live_count_of(&self, kind: HandleKind) -> usize {
        self.live
            .values()
            .filter(|k| **k == kind && kind != HandleKind::World)
            .count()
    }

    pub fn is_live(&self, rid: Rid) -> bool {
        self.live.contains_key(&rid)
    }

    /// Canvas items whose parent is `parent`.
    pub fn children_of(&self, parent: Rid) -> Vec<Rid> {
        let mut children: Vec<Rid> = self
            .canvas_items
            .iter()
            .filter(|(rid, item)| item.parent == Some(parent) && self.live.contains_key(rid))
            .map(|(rid, _)| *rid)
            .collect();
        children.sort();
        children
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingBackend {
    state: Rc<RefCell<RecordingState>>,
}

macro_rules! with_entry {
    ($self:ident, $map:ident, $rid:expr, |$entry:ident| $body:expr) => {{
        let mut guard = $self.state.borrow_mut();
        let state = &mut *guard;
        state.calls += 1;
        match state.$map.get_mut(&$rid) {
            Some($entry) => {
                $body;
            }
            None => state.invalid_calls += 1,
        }
    }};
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, RecordingState> {
        self.state.borrow()
    }

    /// Create the world resources a layer attaches to when entering the tree.
    pub fn create_world(&self) -> World2d {
        let mut state = self.state.borrow_mut();
        let canvas = state.allocate(HandleKind::World);
        let space = state.allocate(HandleKind::World);
        let navigation_map = state.allocate(HandleKind::World);
        World2d {
            canvas,
            space,
            navigation_map,
        }
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live_count()
    }

    pub fn live_count_of(&self, kind: HandleKind) -> usize {
        self.state.borrow().live_count_of(kind)
    }

    pub fn invalid_calls(&self) -> usize {
        self.state.borrow().invalid_calls
    }

    pub fn calls(&self) -> usize {
        self.state.borrow().calls
    }

    pub fn canvas_item(&self, rid: Rid) -> Option<CanvasItemState> {
        self.state.borrow().canvas_items.get(&rid).cloned()
    }

    pub fn body(&self, rid: Rid) -> Option<BodyState> {
        self.state.borrow().bodies.get(&rid).cloned()
    }

    pub fn region(&self, rid: Rid) -> Option<RegionState> {
        self.state.borrow().regions.get(&rid).cloned()
    }

    pub fn occluder(&self, rid: Rid) -> Option<OccluderState> {
        self.state.borrow().occluders.get(&rid).cloned()
    }

    pub fn scene_count(&self) -> usize {
        self.state.borrow().scenes.len()
    }

    fn create(&self, kind: HandleKind) -> Rid {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        let rid = state.allocate(kind);
        match kind {
            HandleKind::CanvasItem => {
                state.canvas_items.insert(rid, CanvasItemState::default());
            }
            HandleKind::Occluder => {
                state.occluders.insert(rid, OccluderState::default());
            }
            HandleKind::Body => {
                state.bodies.insert(rid, BodyState::default());
            }
            HandleKind::NavigationMap => {
                state.maps.insert(rid, MapState::default());
            }
            HandleKind::NavigationRegion => {
                state.regions.insert(rid, RegionState::default());
            }
            HandleKind::World => {}
        }
        rid
    }

    fn free(&self, rid: Rid, kind: HandleKind) {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        state.release(rid, kind);
        match kind {
            HandleKind::CanvasItem => {
                state.canvas_items.remove(&rid);
            }
            HandleKind::Occluder => {
                state.occluders.remove(&rid);
            }
            HandleKind::Body => {
                state.bodies.remove(&rid);
            }
            HandleKind::NavigationMap => {
                state.maps.remove(&rid);
            }
            HandleKind::NavigationRegion => {
                state.regions.remove(&rid);
            }
            HandleKind::World => {}
        }
    }
}

impl RenderingServer for RecordingBackend {
    fn canvas_item_create(&mut self) -> Rid {
        self.create(HandleKind::CanvasItem)
    }

    fn canvas_item_free(&mut self, item: Rid) {
        self.free(item, HandleKind::CanvasItem)
    }

    fn canvas_item_set_parent(&mut self, item: Rid, parent: Option<Rid>) {
        with_entry!(self, canvas_items, item, |ci| ci.parent = parent)
    }

    fn canvas_item_set_transform(&mut self, item: Rid, transform: Affine2) {
        with_entry!(self, canvas_items, item, |ci| ci.transform = transform)
    }

    fn canvas_item_set_material(&mut self, item: Rid, material: Option<MaterialId>) {
        with_entry!(self, canvas_items, item, |ci| ci.material = material)
    }

    fn canvas_item_set_use_parent_material(&mut self, item: Rid, enabled: bool) {
        with_entry!(self, canvas_items, item, |ci| ci.use_parent_material = enabled)
    }

    fn canvas_item_set_light_mask(&mut self, item: Rid, mask: u32) {
        with_entry!(self, canvas_items, item, |ci| ci.light_mask = mask)
    }

    fn canvas_item_set_z_index(&mut self, item: Rid, z_index: i32) {
        with_entry!(self, canvas_items, item, |ci| ci.z_index = z_index)
    }

    fn canvas_item_set_z_as_relative_to_parent(&mut self, item: Rid, relative: bool) {
        with_entry!(self, canvas_items, item, |ci| ci.z_relative = relative)
    }

    fn canvas_item_set_sort_children_by_y(&mut self, item: Rid, enabled: bool) {
        with_entry!(self, canvas_items, item, |ci| ci.sort_children_by_y = enabled)
    }

    fn canvas_item_set_default_texture_filter(&mut self, item: Rid, filter: TextureFilter) {
        with_entry!(self, canvas_items, item, |ci| ci.texture_filter = filter)
    }

    fn canvas_item_set_default_texture_repeat(&mut self, item: Rid, repeat: TextureRepeat) {
        with_entry!(self, canvas_items, item, |ci| ci.texture_repeat = repeat)
    }

    fn canvas_item_set_modulate(&mut self, item: Rid, color: Color) {
        with_entry!(self, canvas_items, item, |ci| ci.modulate = color)
    }

    fn canvas_item_set_self_modulate(&mut self, item: Rid, color: Color) {
        with_entry!(self, canvas_items, item, |ci| ci.self_modulate = color)
    }

    fn canvas_item_set_draw_index(&mut self, item: Rid, index: i32) {
        with_entry!(self, canvas_items, item, |ci| ci.draw_index = index)
    }

    fn canvas_item_clear(&mut self, item: Rid) {
        with_entry!(self, canvas_items, item, |ci| ci.commands.clear())
    }

    fn canvas_item_add_tile(&mut self, item: Rid, draw: TileDraw) {
        with_entry!(self, canvas_items, item, |ci| ci.commands.push(DrawCommand::Tile(draw)))
    }

    fn canvas_item_add_circle(&mut self, item: Rid, center: Vec2, radius: f32, color: Color) {
        with_entry!(self, canvas_items, item, |ci| ci
            .commands
            .push(DrawCommand::Circle { center, radius, color }))
    }

    fn canvas_item_add_polygon(&mut self, item: Rid, points: &[Vec2], color: Color) {
        with_entry!(self, canvas_items, item, |ci| ci.commands.push(DrawCommand::Polygon {
            points: points.to_vec(),
            color,
        }))
    }

    fn occluder_create(&mut self) -> Rid {
        self.create(HandleKind::Occluder)
    }

    fn occluder_free(&mut self, occluder: Rid) {
        self.free(occluder, HandleKind::Occluder)
    }

    fn occluder_attach_to_canvas(&mut self, occluder: Rid, canvas: Option<Rid>) {
        with_entry!(self, occluders, occluder, |o| o.canvas = canvas)
    }

    fn occluder_set_transform(&mut self, occluder: Rid, transform: Affine2) {
        with_entry!(self, occluders, occluder, |o| o.transform = transform)
    }

    fn occluder_set_polygon(&mut self, occluder: Rid, polygon: &[Vec2]) {
        with_entry!(self, occluders, occluder, |o| o.polygon = polygon.to_vec())
    }

    fn occluder_set_light_mask(&mut self, occluder: Rid, mask: u32) {
        with_entry!(self, occluders, occluder, |o| o.light_mask = mask)
    }
}

impl PhysicsServer for RecordingBackend {
    fn body_create(&mut self) -> Rid {
        self.create(HandleKind::Body)
    }

    fn body_free(&mut self, body: Rid) {
        self.free(body, HandleKind::Body)
    }

    fn body_set_mode(&mut self, body: Rid, mode: BodyMode) {
        with_entry!(self, bodies, body, |b| b.mode = mode)
    }

    fn body_set_space(&mut self, body: Rid, space: Option<Rid>) {
        with_entry!(self, bodies, body, |b| b.space = space)
    }

    fn body_set_transform(&mut self, body: Rid, transform: Affine2) {
        with_entry!(self, bodies, body, |b| b.transform = transform)
    }

    fn body_get_transform(&self, body: Rid) -> Option<Affine2> {
        self.state.borrow().bodies.get(&body).map(|b| b.transform)
    }

    fn body_attach_object_instance_id(&mut self, body: Rid, instance_id: u64) {
        with_entry!(self, bodies, body, |b| b.instance_id = instance_id)
    }

    fn body_set_collision_layer(&mut self, body: Rid, layer: u32) {
        with_entry!(self, bodies, body, |b| b.collision_layer = layer)
    }

    fn body_set_collision_mask(&mut self, body: Rid, mask: u32) {
        with_entry!(self, bodies, body, |b| b.collision_mask = mask)
    }

    fn body_set_pickable(&mut self, body: Rid, pickable: bool) {
        with_entry!(self, bodies, body, |b| b.pickable = pickable)
    }

    fn body_set_param(&mut self, body: Rid, param: BodyParam, value: f32) {
        with_entry!(self, bodies, body, |b| match param {
            BodyParam::Bounce => b.bounce = value,
            BodyParam::Friction => b.friction = value,
        })
    }

    fn body_set_constant_velocity(&mut self, body: Rid, linear: Vec2, angular: f32) {
        with_entry!(self, bodies, body, |b| {
            b.linear_velocity = linear;
            b.angular_velocity = angular;
        })
    }

    fn body_clear_shapes(&mut self, body: Rid) {
        with_entry!(self, bodies, body, |b| b.shapes.clear())
    }

    fn body_add_shape(&mut self, body: Rid, points: &[Vec2]) {
        with_entry!(self, bodies, body, |b| b.shapes.push(ShapeState {
            points: points.to_vec(),
            one_way: false,
            one_way_margin: 0.0,
        }))
    }

    fn body_set_shape_as_one_way_collision(&mut self, body: Rid, shape: usize, enabled: bool, margin: f32) {
        with_entry!(self, bodies, body, |b| if let Some(s) = b.shapes.get_mut(shape) {
            s.one_way = enabled;
            s.one_way_margin = margin;
        })
    }
}

impl NavigationServer for RecordingBackend {
    fn map_create(&mut self) -> Rid {
        self.create(HandleKind::NavigationMap)
    }

    fn map_free(&mut self, map: Rid) {
        self.free(map, HandleKind::NavigationMap)
    }

    fn map_set_cell_size(&mut self, map: Rid, cell_size: f32) {
        with_entry!(self, maps, map, |m| m.cell_size = cell_size)
    }

    fn map_set_active(&mut self, map: Rid, active: bool) {
        with_entry!(self, maps, map, |m| m.active = active)
    }

    fn region_create(&mut self) -> Rid {
        self.create(HandleKind::NavigationRegion)
    }

    fn region_free(&mut self, region: Rid) {
        self.free(region, HandleKind::NavigationRegion)
    }

    fn region_set_owner_id(&mut self, region: Rid, owner_id: u64) {
        with_entry!(self, regions, region, |r| r.owner_id = owner_id)
    }

    fn region_set_map(&mut self, region: Rid, map: Option<Rid>) {
        with_entry!(self, regions, region, |r| r.map = map)
    }

    fn region_set_transform(&mut self, region: Rid, transform: Affine2) {
        with_entry!(self, regions, region, |r| r.transform = transform)
    }

    fn region_set_navigation_layers(&mut self, region: Rid, layers: u32) {
        with_entry!(self, regions, region, |r| r.navigation_layers = layers)
    }

    fn region_set_navigation_polygon(&mut self, region: Rid, polygon: &NavigationPolygon) {
        with_entry!(self, regions, region, |r| r.polygon = polygon.clone())
    }
}

impl SceneInstancer for RecordingBackend {
    fn scene_instantiate(&mut self, scene: &PackedScene, placement: ScenePlacement) -> SceneInstanceId {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        state.next_id += 1;
        let id = SceneInstanceId(state.next_id);
        state.scenes.insert(
            id,
            SceneRecord {
                path: scene.path.clone(),
                placement,
            },
        );
        id
    }

    fn scene_queue_free(&mut self, instance: SceneInstanceId) {
        let mut state = self.state.borrow_mut();
        state.calls += 1;
        if state.scenes.remove(&instance).is_none() {
            state.invalid_calls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_tracked_per_kind() {
        let mut backend = RecordingBackend::new();
        let observer = backend.clone();
        let item = backend.canvas_item_create();
        let body = backend.body_create();
        assert_eq!(observer.live_count(), 2);
        assert_eq!(observer.live_count_of(HandleKind::Body), 1);

        backend.canvas_item_free(item);
        backend.body_free(body);
        assert_eq!(observer.live_count(), 0);
        assert_eq!(observer.invalid_calls(), 0);

        // Double free is recorded
        backend.body_free(body);
        assert_eq!(observer.invalid_calls(), 1);
    }

    #[test]
    fn test_world_handles_are_not_counted() {
        let mut backend = RecordingBackend::new();
        let world = backend.create_world();
        assert_eq!(backend.live_count(), 0);
        assert!(backend.state().is_live(world.canvas));

        // Layers must not free world resources
        backend.map_free(world.navigation_map);
        assert_eq!(backend.invalid_calls(), 1);
    }

    #[test]
    fn test_setters_on_freed_handle_are_invalid() {
        let mut backend = RecordingBackend::new();
        let item = backend.canvas_item_create();
        backend.canvas_item_set_z_index(item, 3);
        assert_eq!(backend.canvas_item(item).unwrap().z_index, 3);
        backend.canvas_item_free(item);
        backend.canvas_item_set_z_index(item, 4);
        assert_eq!(backend.invalid_calls(), 1);
    }
}
