//! The tile map layer: a sparse grid of cells kept in sync with the rendering,
//! physics, navigation and scene servers.
//!
//! Edits only touch the grid and the dirty tracker. A pass (see
//! [`TileMapLayer::deferred_update`]) then walks the dirty cells and flags and
//! lets each synchronizer create, update or free the server handles it owns.

pub mod debug;
pub mod dirty;
pub mod navigation;
pub mod physics;
pub mod quadrant;
pub mod rendering;
pub mod runtime;
pub mod scenes;
pub mod scheduler;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use glam::{Affine2, IVec2, Vec2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::config::{Color, LayerConfig, TextureFilter, TextureRepeat, VisibilityMode};
use crate::format::{self, TileDataError, TileDataFormat};
use crate::pattern::TileMapPattern;
use crate::server::{Backend, Rid};
use crate::terrain::{self, TerrainError, TerrainFill};
use crate::tilemap::{GridStore, Rect2, Rect2i, TileMapCell};
use crate::tileset::{OffsetAxis, TerrainsPattern, TileData, TileSet};

use debug::DebugState;
use dirty::{DirtyFlag, DirtyState};
use navigation::NavigationState;
use physics::PhysicsState;
use rendering::RenderingState;
use runtime::{RuntimeState, RuntimeTileDataHooks};
use scenes::ScenesState;
use scheduler::{UpdateHook, UpdateScheduler};

/// Resources of the world a layer is attached to while in the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct World2d {
    pub canvas: Rid,
    pub space: Rid,
    pub navigation_map: Rid,
}

/// How a layer is drawn relative to the layer selected in its group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Highlight {
    #[default]
    Normal,
    Below,
    Above,
}

/// Node-level state of the layer read by the synchronizers.
#[derive(Clone, Debug)]
pub(crate) struct LayerProps {
    /// The layer's own canvas item, parent of every quadrant canvas item.
    pub canvas_item: Rid,
    pub world: Option<World2d>,
    pub in_canvas: bool,
    pub in_destructor: bool,
    pub enabled: bool,
    pub visible: bool,
    pub modulate: Color,
    pub self_modulate: Color,
    pub y_sort_enabled: bool,
    pub y_sort_origin: i32,
    pub z_index: i32,
    pub use_kinematic_bodies: bool,
    pub navigation_enabled: bool,
    pub layer_index_in_group: i32,
    pub highlight: Highlight,
    pub global_transform: Affine2,
}

impl LayerProps {
    fn new(canvas_item: Rid) -> Self {
        Self {
            canvas_item,
            world: None,
            in_canvas: false,
            in_destructor: false,
            enabled: true,
            visible: true,
            modulate: Color::WHITE,
            self_modulate: Color::WHITE,
            y_sort_enabled: false,
            y_sort_origin: 0,
            z_index: 0,
            use_kinematic_bodies: false,
            navigation_enabled: true,
            layer_index_in_group: 0,
            highlight: Highlight::Normal,
            global_transform: Affine2::IDENTITY,
        }
    }

    pub fn in_tree(&self) -> bool {
        self.world.is_some()
    }

    pub fn visible_in_tree(&self) -> bool {
        self.visible && self.in_tree() && self.in_canvas
    }

    /// Rendering and the debug overlay tear down everything when false.
    pub fn canvas_active(&self) -> bool {
        !self.in_destructor && self.enabled && self.visible_in_tree()
    }

    /// Physics, navigation and scenes tear down everything when false.
    pub fn tree_active(&self) -> bool {
        !self.in_destructor && self.enabled && self.in_tree()
    }

    pub fn highlighted_modulate(&self) -> Color {
        match self.highlight {
            Highlight::Normal => self.modulate,
            Highlight::Below => self.modulate.darkened(0.5),
            Highlight::Above => {
                let mut color = self.modulate.darkened(0.5);
                color.a *= 0.3;
                color
            }
        }
    }
}

/// Everything a synchronizer may read during a pass, plus the backend.
pub struct Pass<'a, B> {
    pub backend: &'a mut B,
    tile_set: Option<&'a TileSet>,
    pub(crate) config: &'a LayerConfig,
    pub(crate) props: &'a LayerProps,
    pub(crate) dirty: &'a DirtyState,
}

impl<'a, B> Pass<'a, B> {
    /// Tile set for the canvas subsystems, `None` when they must clean up.
    pub fn canvas_tile_set(&self) -> Option<&'a TileSet> {
        self.tile_set.filter(|_| self.props.canvas_active())
    }

    /// Tile set for the tree subsystems, `None` when they must clean up.
    pub fn tree_tile_set(&self) -> Option<&'a TileSet> {
        self.tile_set.filter(|_| self.props.tree_active())
    }
}

#[derive(Debug)]
pub enum LayerError {
    MissingTileSet,
    NotInTree,
    InvalidQuadrantSize(i32),
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerError::MissingTileSet => write!(f, "The layer has no tile set"),
            LayerError::NotInTree => write!(f, "The navigation map can only be changed while the layer is in the tree"),
            LayerError::InvalidQuadrantSize(size) => {
                write!(f, "Rendering quadrant size must be at least 1, got {}", size)
            }
        }
    }
}

impl std::error::Error for LayerError {}

pub type ChangedListener = Box<dyn FnMut()>;

pub struct TileMapLayer<B: Backend> {
    backend: B,
    name: String,
    tile_set: Option<Rc<TileSet>>,
    config: LayerConfig,
    props: LayerProps,

    grid: GridStore,
    dirty: DirtyState,
    scheduler: UpdateScheduler,

    runtime: RuntimeState,
    rendering: RenderingState,
    physics: PhysicsState,
    navigation: NavigationState,
    scenes: ScenesState,
    debug: DebugState,

    changed: Vec<ChangedListener>,
    rect_cache: Cell<Option<Rect2>>,
    terrain_rng: ChaCha8Rng,
}

impl<B: Backend> TileMapLayer<B> {
    /// Creates a detached layer. Fails before touching the backend when the
    /// configured rendering quadrant size is below 1.
    pub fn new(mut backend: B, config: LayerConfig) -> Result<Self, LayerError> {
        if config.rendering_quadrant_size < 1 {
            return Err(LayerError::InvalidQuadrantSize(config.rendering_quadrant_size));
        }
        let canvas_item = backend.canvas_item_create();
        let mut dirty = DirtyState::new();
        dirty.mark_all();
        Ok(Self {
            backend,
            name: String::new(),
            tile_set: None,
            terrain_rng: ChaCha8Rng::seed_from_u64(config.terrain_seed),
            config,
            props: LayerProps::new(canvas_item),
            grid: GridStore::new(),
            dirty,
            scheduler: UpdateScheduler::new(),
            runtime: RuntimeState::default(),
            rendering: RenderingState::default(),
            physics: PhysicsState::default(),
            navigation: NavigationState::default(),
            scenes: ScenesState::default(),
            debug: DebugState::default(),
            changed: Vec::new(),
            rect_cache: Cell::new(None),
        })
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Host callback invoked each time a pass gets scheduled.
    pub fn set_update_hook(&mut self, hook: Option<UpdateHook>) {
        self.scheduler.set_hook(hook);
    }

    pub fn is_update_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Run the scheduled pass, if any.
    pub fn deferred_update(&mut self) {
        if self.scheduler.take() {
            self.internal_update();
        }
    }

    /// Run a pass now, scheduled or not.
    pub fn update_internals(&mut self) {
        self.scheduler.force();
        self.deferred_update();
    }

    fn queue_update(&mut self) {
        if self.props.in_destructor {
            return;
        }
        self.scheduler.queue(self.props.in_tree());
    }

    fn internal_update(&mut self) {
        let Self {
            backend,
            tile_set,
            config,
            props,
            grid,
            dirty,
            runtime,
            rendering,
            physics,
            navigation,
            scenes,
            debug,
            ..
        } = &mut *self;
        let tile_set = tile_set.as_deref();

        runtime.build(tile_set.filter(|_| props.canvas_active()), grid, dirty);

        let dirty_cells = dirty.cells().len();
        {
            let mut pass = Pass {
                backend: &mut *backend,
                tile_set,
                config: &*config,
                props: &*props,
                dirty: &*dirty,
            };
            rendering.update(&mut pass, grid);
            physics.update(&mut pass, grid);
            navigation.update(&mut pass, grid);
            scenes.update(&mut pass, grid);
            debug.update(&mut pass, grid);
        }

        runtime.clear(grid, dirty);
        dirty.clear_flags();

        // Erased cells have released their handles, drop them for good
        let mut purged = 0;
        for coords in dirty.cells() {
            if !grid.get(*coords).is_empty() {
                continue;
            }
            if let Some(cell) = grid.remove(*coords) {
                rendering.remove_cell(&cell);
                debug.remove_cell(&cell);
                purged += 1;
            }
        }
        dirty.clear_cells();

        log::debug!(
            "Layer '{}' updated: {} dirty cells, {} purged, {} quadrants",
            self.name,
            dirty_cells,
            purged,
            self.rendering.quadrant_count()
        );
    }

    // =========================================================================
    // Change signal
    // =========================================================================

    /// Register a listener for the "changed" signal.
    pub fn connect_changed(&mut self, listener: ChangedListener) {
        self.changed.push(listener);
    }

    fn emit_changed(&mut self) {
        for listener in self.changed.iter_mut() {
            listener();
        }
    }

    /// Notification from the group owning the layer.
    pub fn notify_group_change(&mut self, flag: DirtyFlag) {
        if matches!(
            flag,
            DirtyFlag::SelectedLayers | DirtyFlag::HighlightSelected | DirtyFlag::TileSet
        ) {
            self.emit_changed();
        }
        self.dirty.mark(flag);
        self.queue_update();
    }

    // =========================================================================
    // Cells
    // =========================================================================

    /// Write a cell. A reference with any invalid component erases the cell.
    pub fn set_cell(&mut self, coords: IVec2, cell: TileMapCell) {
        let cell = TileMapCell::new(cell.source_id, cell.atlas_coords, cell.alternative_tile);
        if !self.grid.set(coords, cell) {
            return;
        }
        self.dirty.mark_cell(coords);
        self.rect_cache.set(None);
        self.queue_update();
    }

    pub fn erase_cell(&mut self, coords: IVec2) {
        self.set_cell(coords, TileMapCell::EMPTY);
    }

    /// Erase every cell.
    pub fn clear(&mut self) {
        for coords in self.grid.coords() {
            self.erase_cell(coords);
        }
    }

    /// Cell at `coords`, remapped through the tile set proxies if asked.
    pub fn get_cell(&self, coords: IVec2, use_proxies: bool) -> TileMapCell {
        let cell = self.grid.get(coords);
        match self.tile_set.as_deref() {
            Some(tile_set) if use_proxies && !cell.is_empty() => tile_set.map_tile_proxy(cell),
            _ => cell,
        }
    }

    pub fn get_cell_source_id(&self, coords: IVec2, use_proxies: bool) -> i32 {
        self.get_cell(coords, use_proxies).source_id
    }

    pub fn get_cell_atlas_coords(&self, coords: IVec2, use_proxies: bool) -> IVec2 {
        self.get_cell(coords, use_proxies).atlas_coords
    }

    pub fn get_cell_alternative_tile(&self, coords: IVec2, use_proxies: bool) -> i32 {
        self.get_cell(coords, use_proxies).alternative_tile
    }

    /// Tile data of an atlas cell.
    pub fn get_cell_tile_data(&self, coords: IVec2, use_proxies: bool) -> Option<&TileData> {
        let cell = self.get_cell(coords, use_proxies);
        self.tile_set.as_deref()?.atlas_tile_data(&cell)
    }

    pub fn get_used_cells(&self) -> Vec<IVec2> {
        self.grid.used_cells()
    }

    pub fn get_used_cells_by_id(
        &self,
        source_id: Option<i32>,
        atlas_coords: Option<IVec2>,
        alternative_tile: Option<i32>,
    ) -> Vec<IVec2> {
        self.grid.used_cells_by_id(source_id, atlas_coords, alternative_tile)
    }

    pub fn get_used_rect(&self) -> Rect2i {
        self.grid.used_rect()
    }

    /// Bounding rectangle of the tile centres in layer-local space.
    pub fn get_rect(&self) -> Rect2 {
        let Some(tile_set) = self.tile_set.as_deref() else {
            return Rect2::default();
        };
        if let Some(rect) = self.rect_cache.get() {
            return rect;
        }
        let mut rect: Option<Rect2> = None;
        for coords in self.grid.used_cells() {
            let p = tile_set.map_to_local(coords);
            rect = Some(match rect {
                None => Rect2 {
                    position: p,
                    size: Vec2::ZERO,
                },
                Some(r) => r.expand(p),
            });
        }
        let rect = rect.unwrap_or_default();
        self.rect_cache.set(Some(rect));
        rect
    }

    /// Erase the cells whose reference does not resolve in the tile set.
    pub fn fix_invalid_tiles(&mut self) -> Result<(), LayerError> {
        let tile_set = self.tile_set.clone().ok_or(LayerError::MissingTileSet)?;
        let invalid: Vec<IVec2> = self
            .grid
            .used_cells()
            .into_iter()
            .filter(|c| !tile_set.resolves(&self.grid.get(*c)))
            .collect();
        for coords in invalid {
            self.erase_cell(coords);
        }
        Ok(())
    }

    // =========================================================================
    // Tile data records
    // =========================================================================

    /// Export the cells in the current record format.
    pub fn get_tile_data(&self) -> Vec<i32> {
        format::encode(self.grid.used_cells().into_iter().map(|c| (c, self.grid.get(c))))
    }

    /// Replace every cell by the decoded records. The layer is left untouched
    /// when the records are malformed.
    pub fn set_tile_data(&mut self, format: TileDataFormat, data: &[i32]) -> Result<(), TileDataError> {
        let cells = format::decode(format, data, self.tile_set.as_deref())?;
        self.clear();
        for (coords, cell) in cells {
            self.set_cell(coords, cell);
        }
        Ok(())
    }

    // =========================================================================
    // Patterns
    // =========================================================================

    /// Copy the given cells into a pattern anchored at their top-left corner.
    pub fn get_pattern(&self, coords: &[IVec2]) -> Result<TileMapPattern, LayerError> {
        let tile_set = self.tile_set.as_deref().ok_or(LayerError::MissingTileSet)?;
        let mut pattern = TileMapPattern::new();
        let Some(min) = coords.iter().copied().reduce(|a, b| a.min(b)) else {
            return Ok(pattern);
        };

        // Half-offset rows (or columns) shift when the pattern starts on an
        // odd one, keep all coords positive.
        let mut ensure_positive = IVec2::ZERO;
        let in_pattern: Vec<IVec2> = coords
            .iter()
            .map(|c| {
                let mut p = *c - min;
                if tile_set.tile_shape.is_half_offset() {
                    match tile_set.offset_axis {
                        OffsetAxis::Horizontal if min.y % 2 != 0 && p.y % 2 != 0 => {
                            p.x -= 1;
                            if p.x < 0 {
                                ensure_positive.x = 1;
                            }
                        }
                        OffsetAxis::Vertical if min.x % 2 != 0 && p.x % 2 != 0 => {
                            p.y -= 1;
                            if p.y < 0 {
                                ensure_positive.y = 1;
                            }
                        }
                        _ => {}
                    }
                }
                p
            })
            .collect();

        for (c, p) in coords.iter().zip(in_pattern) {
            pattern.set_cell(p + ensure_positive, self.grid.get(*c));
        }
        Ok(pattern)
    }

    /// Paste a pattern with its origin at `position`.
    pub fn set_pattern(&mut self, position: IVec2, pattern: &TileMapPattern) -> Result<(), LayerError> {
        let tile_set = self.tile_set.clone().ok_or(LayerError::MissingTileSet)?;
        for (coords, cell) in pattern.iter() {
            self.set_cell(tile_set.map_pattern(position, coords), cell);
        }
        Ok(())
    }

    // =========================================================================
    // Terrains
    // =========================================================================

    pub fn terrain_fill_connect(
        &self,
        cells: &[IVec2],
        terrain_set: i32,
        terrain: i32,
        ignore_empty_terrains: bool,
    ) -> Result<TerrainFill, TerrainError> {
        let tile_set = self.tile_set.as_deref().ok_or(TerrainError::MissingTileSet)?;
        terrain::fill_connect(tile_set, &self.grid, cells, terrain_set, terrain, ignore_empty_terrains)
    }

    pub fn terrain_fill_path(
        &self,
        path: &[IVec2],
        terrain_set: i32,
        terrain: i32,
        ignore_empty_terrains: bool,
    ) -> Result<TerrainFill, TerrainError> {
        let tile_set = self.tile_set.as_deref().ok_or(TerrainError::MissingTileSet)?;
        terrain::fill_path(tile_set, &self.grid, path, terrain_set, terrain, ignore_empty_terrains)
    }

    pub fn terrain_fill_pattern(
        &self,
        cells: &[IVec2],
        terrain_set: i32,
        pattern: &TerrainsPattern,
        ignore_empty_terrains: bool,
    ) -> Result<TerrainFill, TerrainError> {
        let tile_set = self.tile_set.as_deref().ok_or(TerrainError::MissingTileSet)?;
        terrain::fill_pattern(tile_set, &self.grid, cells, terrain_set, pattern, ignore_empty_terrains)
    }

    /// Paint `cells` with `terrain`, connected to each other and to matching
    /// neighbours.
    pub fn set_cells_terrain_connect(
        &mut self,
        cells: &[IVec2],
        terrain_set: i32,
        terrain: i32,
        ignore_empty_terrains: bool,
    ) -> Result<(), TerrainError> {
        let fill = self.terrain_fill_connect(cells, terrain_set, terrain, ignore_empty_terrains)?;
        self.apply_terrain_fill(terrain_set, cells, fill);
        Ok(())
    }

    /// Paint a path of neighbouring cells with `terrain`.
    pub fn set_cells_terrain_path(
        &mut self,
        path: &[IVec2],
        terrain_set: i32,
        terrain: i32,
        ignore_empty_terrains: bool,
    ) -> Result<(), TerrainError> {
        let fill = self.terrain_fill_path(path, terrain_set, terrain, ignore_empty_terrains)?;
        self.apply_terrain_fill(terrain_set, path, fill);
        Ok(())
    }

    pub fn set_cells_terrain_pattern(
        &mut self,
        cells: &[IVec2],
        terrain_set: i32,
        pattern: &TerrainsPattern,
        ignore_empty_terrains: bool,
    ) -> Result<(), TerrainError> {
        let fill = self.terrain_fill_pattern(cells, terrain_set, pattern, ignore_empty_terrains)?;
        self.apply_terrain_fill(terrain_set, cells, fill);
        Ok(())
    }

    /// Write a random tile of each chosen pattern. Neighbours of the painted
    /// cells are only rewritten when their pattern changes.
    fn apply_terrain_fill(&mut self, terrain_set: i32, painted: &[IVec2], fill: TerrainFill) {
        let Some(tile_set) = self.tile_set.clone() else {
            return;
        };
        let painted: FxHashSet<IVec2> = painted.iter().copied().collect();
        for (coords, pattern) in fill {
            if !painted.contains(&coords)
                && terrain::solver::current_pattern(&tile_set, &self.grid, coords, terrain_set) == pattern
            {
                continue;
            }
            let cell = tile_set.random_tile_from_terrains_pattern(terrain_set, &pattern, &mut self.terrain_rng);
            self.set_cell(coords, cell);
        }
    }

    // =========================================================================
    // Layer properties
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        if self.name == name {
            return;
        }
        self.name = name.to_string();
        self.emit_changed();
    }

    pub fn tile_set(&self) -> Option<&Rc<TileSet>> {
        self.tile_set.as_ref()
    }

    pub fn set_tile_set(&mut self, tile_set: Option<Rc<TileSet>>) {
        let same = match (&self.tile_set, &tile_set) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }
        self.tile_set = tile_set;
        self.rect_cache.set(None);
        self.dirty.mark(DirtyFlag::TileSet);
        self.queue_update();
        self.emit_changed();
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.props.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.props.enabled == enabled {
            return;
        }
        self.props.enabled = enabled;
        self.dirty.mark(DirtyFlag::Enabled);
        self.queue_update();
        self.emit_changed();
    }

    pub fn is_visible(&self) -> bool {
        self.props.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        if self.props.visible == visible {
            return;
        }
        self.props.visible = visible;
        self.dirty.mark(DirtyFlag::Visibility);
        if let Some(tile_set) = self.tile_set.as_deref() {
            rendering::push_occluder_transforms(&mut self.backend, tile_set, &self.props, &self.grid);
        }
        self.queue_update();
    }

    /// Modulate of the layer canvas item, pushed on the next pass.
    pub fn set_modulate(&mut self, modulate: Color) {
        if self.props.modulate == modulate {
            return;
        }
        self.props.modulate = modulate;
        self.queue_update();
    }

    pub fn set_self_modulate(&mut self, self_modulate: Color) {
        if self.props.self_modulate == self_modulate {
            return;
        }
        self.props.self_modulate = self_modulate;
        self.dirty.mark(DirtyFlag::SelfModulate);
        self.queue_update();
        self.emit_changed();
    }

    pub fn is_y_sort_enabled(&self) -> bool {
        self.props.y_sort_enabled
    }

    pub fn set_y_sort_enabled(&mut self, enabled: bool) {
        if self.props.y_sort_enabled == enabled {
            return;
        }
        self.props.y_sort_enabled = enabled;
        self.dirty.mark(DirtyFlag::YSortEnabled);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_y_sort_origin(&mut self, origin: i32) {
        if self.props.y_sort_origin == origin {
            return;
        }
        self.props.y_sort_origin = origin;
        self.dirty.mark(DirtyFlag::YSortOrigin);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_z_index(&mut self, z_index: i32) {
        if self.props.z_index == z_index {
            return;
        }
        self.props.z_index = z_index;
        self.dirty.mark(DirtyFlag::ZIndex);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_use_kinematic_bodies(&mut self, use_kinematic_bodies: bool) {
        if self.props.use_kinematic_bodies == use_kinematic_bodies {
            return;
        }
        self.props.use_kinematic_bodies = use_kinematic_bodies;
        self.dirty.mark(DirtyFlag::UseKinematicBodies);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_navigation_enabled(&mut self, enabled: bool) {
        if self.props.navigation_enabled == enabled {
            return;
        }
        self.props.navigation_enabled = enabled;
        self.dirty.mark(DirtyFlag::NavigationEnabled);
        self.queue_update();
        self.emit_changed();
    }

    /// Position of the layer in its group. Layer 0 registers its navigation
    /// regions on the world map, the others get a map of their own.
    pub fn set_layer_index_in_group(&mut self, index: i32) {
        if self.props.layer_index_in_group == index {
            return;
        }
        self.props.layer_index_in_group = index;
        self.dirty.mark(DirtyFlag::IndexInGroup);
        self.queue_update();
    }

    pub fn set_highlight(&mut self, highlight: Highlight) {
        if self.props.highlight == highlight {
            return;
        }
        self.props.highlight = highlight;
        self.dirty.mark(DirtyFlag::HighlightSelected);
        self.queue_update();
    }

    /// Move the layer. Existing bodies, occluders and regions follow at once.
    pub fn set_global_transform(&mut self, transform: Affine2) {
        if self.props.global_transform == transform {
            return;
        }
        self.props.global_transform = transform;
        if let Some(tile_set) = self.tile_set.as_deref() {
            rendering::push_occluder_transforms(&mut self.backend, tile_set, &self.props, &self.grid);
            if self.props.in_tree() {
                physics::push_body_transforms(&mut self.backend, tile_set, &self.props, &self.grid);
            }
            navigation::push_region_transforms(&mut self.backend, tile_set, &self.props, &self.grid);
        }
        if self.props.y_sort_enabled {
            self.dirty.mark(DirtyFlag::LocalTransform);
            self.queue_update();
        }
    }

    pub fn set_rendering_quadrant_size(&mut self, size: i32) -> Result<(), LayerError> {
        if size < 1 {
            return Err(LayerError::InvalidQuadrantSize(size));
        }
        if self.config.rendering_quadrant_size == size {
            return Ok(());
        }
        self.config.rendering_quadrant_size = size;
        self.dirty.mark(DirtyFlag::RenderingQuadrantSize);
        self.queue_update();
        self.emit_changed();
        Ok(())
    }

    pub fn set_light_mask(&mut self, light_mask: u32) {
        if self.config.light_mask == light_mask {
            return;
        }
        self.config.light_mask = light_mask;
        self.dirty.mark(DirtyFlag::LightMask);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_texture_filter(&mut self, filter: TextureFilter) {
        if self.config.texture_filter == filter {
            return;
        }
        self.config.texture_filter = filter;
        self.dirty.mark(DirtyFlag::TextureFilter);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_texture_repeat(&mut self, repeat: TextureRepeat) {
        if self.config.texture_repeat == repeat {
            return;
        }
        self.config.texture_repeat = repeat;
        self.dirty.mark(DirtyFlag::TextureRepeat);
        self.queue_update();
        self.emit_changed();
    }

    pub fn set_collision_visibility(&mut self, mode: VisibilityMode) {
        if self.config.collision_visibility == mode {
            return;
        }
        self.config.collision_visibility = mode;
        self.dirty.mark(DirtyFlag::CollisionVisibility);
        self.queue_update();
    }

    pub fn set_navigation_visibility(&mut self, mode: VisibilityMode) {
        if self.config.navigation_visibility == mode {
            return;
        }
        self.config.navigation_visibility = mode;
        self.dirty.mark(DirtyFlag::NavigationVisibility);
        self.queue_update();
    }

    /// Reseed the generator picking random tiles for terrain painting.
    pub fn set_terrain_seed(&mut self, seed: u64) {
        self.config.terrain_seed = seed;
        self.terrain_rng = ChaCha8Rng::seed_from_u64(seed);
    }

    // =========================================================================
    // Runtime tile data
    // =========================================================================

    pub fn set_runtime_tile_data_hooks(&mut self, hooks: RuntimeTileDataHooks) {
        self.runtime.hooks = hooks;
        self.notify_runtime_tile_data_update();
    }

    /// Rebuild the runtime overrides of every cell on the next pass.
    pub fn notify_runtime_tile_data_update(&mut self) {
        self.dirty.mark(DirtyFlag::RuntimeUpdate);
        self.queue_update();
    }

    // =========================================================================
    // Tree and canvas
    // =========================================================================

    pub fn enter_tree(&mut self, world: World2d) {
        self.props.world = Some(world);
        physics::push_body_space(&mut self.backend, &self.props, &self.grid);
        self.dirty.mark(DirtyFlag::InTree);
        self.queue_update();
        self.enter_canvas();
    }

    /// Leaving the tree tears everything down immediately.
    pub fn exit_tree(&mut self) {
        self.exit_canvas();
        self.props.world = None;
        self.dirty.mark(DirtyFlag::InTree);
        self.update_internals();
    }

    pub fn enter_canvas(&mut self) {
        self.props.in_canvas = true;
        let canvas = self.props.world.map(|w| w.canvas);
        self.backend.canvas_item_set_parent(self.props.canvas_item, canvas);
        if let Some(tile_set) = self.tile_set.as_deref() {
            rendering::push_occluder_transforms(&mut self.backend, tile_set, &self.props, &self.grid);
        }
        self.dirty.mark(DirtyFlag::InCanvas);
        self.queue_update();
    }

    pub fn exit_canvas(&mut self) {
        self.props.in_canvas = false;
        self.backend.canvas_item_set_parent(self.props.canvas_item, None);
        self.dirty.mark(DirtyFlag::InCanvas);
        self.update_internals();
    }

    pub fn is_in_tree(&self) -> bool {
        self.props.in_tree()
    }

    // =========================================================================
    // Physics and navigation queries
    // =========================================================================

    pub fn has_body_rid(&self, body: Rid) -> bool {
        self.physics.has_body_rid(body)
    }

    pub fn get_coords_for_body_rid(&self, body: Rid) -> Option<IVec2> {
        self.physics.coords_for_body_rid(body)
    }

    /// Map the navigation regions are registered on.
    pub fn get_navigation_map(&self) -> Option<Rid> {
        self.navigation.map().or(self.props.world.map(|w| w.navigation_map))
    }

    /// Register the navigation regions on another map.
    pub fn set_navigation_map(&mut self, map: Option<Rid>) -> Result<(), LayerError> {
        if !self.props.in_tree() {
            return Err(LayerError::NotInTree);
        }
        self.navigation.set_map(&mut self.backend, &self.props, map);
        let map = self.navigation.map();
        for cell in self.grid.iter() {
            for region in cell.navigation_regions.iter().flatten() {
                self.backend.region_set_map(*region, map);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn canvas_item(&self) -> Rid {
        self.props.canvas_item
    }

    /// Cells held by the grid, erased ones awaiting a pass included.
    pub fn stored_cell_count(&self) -> usize {
        self.grid.len()
    }

    pub fn rendering_quadrant_count(&self) -> usize {
        self.rendering.quadrant_count()
    }

    pub fn canvas_item_count(&self) -> usize {
        self.rendering.canvas_item_count()
    }

    pub fn body_count(&self) -> usize {
        self.physics.body_count()
    }

    pub fn debug_quadrant_count(&self) -> usize {
        self.debug.quadrant_count()
    }
}

impl<B: Backend> Drop for TileMapLayer<B> {
    fn drop(&mut self) {
        self.props.in_destructor = true;
        self.clear();
        self.internal_update();
        self.backend.canvas_item_free(self.props.canvas_item);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell as StdCell;

    use super::*;
    use crate::server::NavigationServer;
    use crate::server::recording::{HandleKind, RecordingBackend};
    use crate::tileset::{
        AtlasSource, AtlasTile, CollisionPolygon, NavigationLayer, NavigationPolygon, OcclusionLayer,
        PackedScene, PhysicsLayer, SceneRoot, SceneTile, ScenesCollectionSource, TilePhysics, TileSetSource,
    };

    const PLAIN: TileMapCell = TileMapCell {
        source_id: 0,
        atlas_coords: IVec2::new(0, 0),
        alternative_tile: 0,
    };
    const SOLID: TileMapCell = TileMapCell {
        source_id: 0,
        atlas_coords: IVec2::new(1, 0),
        alternative_tile: 0,
    };
    const TALL: TileMapCell = TileMapCell {
        source_id: 0,
        atlas_coords: IVec2::new(2, 0),
        alternative_tile: 0,
    };
    const SCENE: TileMapCell = TileMapCell {
        source_id: 1,
        atlas_coords: IVec2::new(0, 0),
        alternative_tile: 1,
    };

    fn square(half: f32) -> Vec<Vec2> {
        vec![
            Vec2::new(-half, -half),
            Vec2::new(half, -half),
            Vec2::new(half, half),
            Vec2::new(-half, half),
        ]
    }

    /// Square 16x16 tile set with one physics, occlusion and navigation
    /// layer. Source 0 holds a plain tile, a solid tile (body, occluder and
    /// region) and a tile with a y-sort origin; source 1 holds a scene.
    fn test_tile_set() -> TileSet {
        let solid = TileData {
            physics: vec![TilePhysics {
                polygons: vec![CollisionPolygon {
                    points: square(8.0),
                    ..CollisionPolygon::default()
                }],
                ..TilePhysics::default()
            }],
            occluders: vec![Some(square(8.0))],
            navigation: vec![Some(NavigationPolygon {
                vertices: square(8.0),
                polygons: vec![vec![0, 1, 2, 3]],
                outlines: Vec::new(),
            })],
            ..TileData::default()
        };
        let tall = TileData {
            y_sort_origin: 4,
            ..TileData::default()
        };

        let mut atlas = AtlasSource {
            texture: Some("tiles.png".to_string()),
            grid_size: IVec2::new(4, 4),
            tiles: Vec::new(),
        };
        atlas.add_tile(AtlasTile::new(PLAIN.atlas_coords, TileData::default()));
        atlas.add_tile(AtlasTile::new(SOLID.atlas_coords, solid));
        atlas.add_tile(AtlasTile::new(TALL.atlas_coords, tall));

        let mut scenes = ScenesCollectionSource::default();
        scenes.scenes.insert(
            SCENE.alternative_tile,
            SceneTile {
                scene: Some(PackedScene {
                    path: "res://lamp.tscn".to_string(),
                    root: SceneRoot::Node2d {
                        transform: Affine2::IDENTITY,
                    },
                }),
                display_placeholder: false,
            },
        );

        let mut tile_set = TileSet::default();
        tile_set.physics_layers.push(PhysicsLayer::default());
        tile_set.occlusion_layers.push(OcclusionLayer::default());
        tile_set.navigation_layers.push(NavigationLayer::default());
        tile_set.add_source(0, TileSetSource::Atlas(atlas));
        tile_set.add_source(1, TileSetSource::ScenesCollection(scenes));
        tile_set
    }

    struct Fixture {
        layer: TileMapLayer<RecordingBackend>,
        backend: RecordingBackend,
        world: World2d,
    }

    fn fixture() -> Fixture {
        let backend = RecordingBackend::new();
        let world = backend.create_world();
        let mut layer = TileMapLayer::new(backend.clone(), LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(test_tile_set())));
        layer.enter_tree(world);
        layer.update_internals();
        Fixture { layer, backend, world }
    }

    /// Every tile-bearing cell sits in exactly one quadrant and no quadrant
    /// is left without a tile.
    fn assert_quadrant_partition(layer: &TileMapLayer<RecordingBackend>) {
        for coords in layer.get_used_cells() {
            let owners = layer
                .rendering
                .quadrants
                .values()
                .filter(|q| q.cells.contains(&coords))
                .count();
            assert_eq!(owners, 1, "cell {:?} in {} quadrants", coords, owners);
        }
        for quadrant in layer.rendering.quadrants.values() {
            assert!(quadrant.cells.iter().any(|c| !layer.grid.get(*c).is_empty()));
            assert!(!quadrant.canvas_items.is_empty());
        }
    }

    #[test]
    fn test_erased_cells_are_purged_by_the_pass() {
        let mut f = fixture();
        for x in 0..5 {
            f.layer.set_cell(IVec2::new(x, 0), SOLID);
        }
        f.layer.update_internals();
        f.layer.erase_cell(IVec2::new(1, 0));
        f.layer.set_cell(IVec2::new(2, 0), TileMapCell::new(0, IVec2::ZERO, -1));
        // Still stored until the pass released their handles
        assert_eq!(f.layer.stored_cell_count(), 5);

        f.layer.update_internals();
        assert_eq!(f.layer.stored_cell_count(), 3);
        assert_eq!(f.layer.body_count(), 3);
        assert_eq!(f.backend.live_count_of(HandleKind::Body), 3);
        assert_eq!(f.backend.live_count_of(HandleKind::Occluder), 3);
        assert_eq!(f.backend.live_count_of(HandleKind::NavigationRegion), 3);
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_idempotent_set_schedules_nothing() {
        let mut f = fixture();
        let scheduled = Rc::new(StdCell::new(0));
        let s = scheduled.clone();
        f.layer.set_update_hook(Some(Box::new(move || s.set(s.get() + 1))));

        f.layer.set_cell(IVec2::new(3, 3), PLAIN);
        assert_eq!(scheduled.get(), 1);
        f.layer.deferred_update();

        let calls = f.backend.calls();
        f.layer.set_cell(IVec2::new(3, 3), PLAIN);
        f.layer.erase_cell(IVec2::new(40, 40));
        assert_eq!(scheduled.get(), 1);
        assert!(!f.layer.is_update_pending());
        f.layer.deferred_update();
        assert_eq!(f.backend.calls(), calls);
    }

    #[test]
    fn test_edits_coalesce_into_one_pass() {
        let mut f = fixture();
        let scheduled = Rc::new(StdCell::new(0));
        let s = scheduled.clone();
        f.layer.set_update_hook(Some(Box::new(move || s.set(s.get() + 1))));
        for x in 0..10 {
            f.layer.set_cell(IVec2::new(x, x), PLAIN);
        }
        assert_eq!(scheduled.get(), 1);
        assert!(f.layer.is_update_pending());
        f.layer.deferred_update();
        assert!(!f.layer.is_update_pending());
        assert_eq!(f.layer.canvas_item_count(), 1);
    }

    #[test]
    fn test_quadrant_partition_after_edits() {
        let mut f = fixture();
        for x in -20..20 {
            for y in [-17, -1, 0, 15, 16] {
                f.layer.set_cell(IVec2::new(x, y), PLAIN);
            }
        }
        f.layer.update_internals();
        assert_quadrant_partition(&f.layer);
        // Columns and rows -2, -1, 0 and 1
        assert_eq!(f.layer.rendering_quadrant_count(), 4 * 4);

        // Empty a whole quadrant
        for x in 0..16 {
            f.layer.erase_cell(IVec2::new(x, 16));
        }
        f.layer.update_internals();
        assert_quadrant_partition(&f.layer);
        assert_eq!(f.layer.rendering_quadrant_count(), 4 * 4 - 1);

        f.layer.set_rendering_quadrant_size(8).unwrap();
        f.layer.update_internals();
        assert_quadrant_partition(&f.layer);
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_negative_coords_share_a_quadrant() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(-1, -1), PLAIN);
        f.layer.set_cell(IVec2::new(-16, -16), PLAIN);
        f.layer.set_cell(IVec2::new(0, 0), PLAIN);
        f.layer.update_internals();

        let a = f.layer.grid.cell_data(IVec2::new(-1, -1)).and_then(|c| c.rendering_quadrant);
        let b = f.layer.grid.cell_data(IVec2::new(-16, -16)).and_then(|c| c.rendering_quadrant);
        assert_eq!(a, Some(IVec2::new(-1, -1)));
        assert_eq!(b, Some(IVec2::new(-1, -1)));
        assert_eq!(f.layer.rendering_quadrant_count(), 2);
    }

    #[test]
    fn test_draw_indices_follow_quadrant_positions() {
        let mut f = fixture();
        for x in (-40..40).step_by(7) {
            for y in (-40..40).step_by(9) {
                f.layer.set_cell(IVec2::new(x, y), PLAIN);
            }
        }
        f.layer.update_internals();

        let mut quadrants: Vec<&quadrant::RenderingQuadrant> = f.layer.rendering.quadrants.values().collect();
        quadrants.sort_by(|a, b| quadrant::draw_order(a, b));
        let indices: Vec<i32> = quadrants
            .iter()
            .flat_map(|q| q.canvas_items.iter())
            .filter_map(|ci| f.backend.canvas_item(*ci))
            .map(|state| state.draw_index)
            .collect();
        assert!(indices.len() > 1);
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_teardown_releases_every_handle() {
        let mut f = fixture();
        for x in 0..6 {
            for y in 0..6 {
                let cell = if (x + y) % 3 == 0 { SCENE } else { SOLID };
                f.layer.set_cell(IVec2::new(x, y), cell);
            }
        }
        f.layer.set_layer_index_in_group(1);
        f.layer.update_internals();
        assert!(f.backend.live_count_of(HandleKind::Body) > 0);
        assert!(f.backend.live_count_of(HandleKind::NavigationMap) == 1);
        assert!(f.backend.scene_count() > 0);

        let Fixture { layer, backend, .. } = f;
        drop(layer);
        assert_eq!(backend.live_count(), 0);
        assert_eq!(backend.scene_count(), 0);
        assert_eq!(backend.invalid_calls(), 0);
    }

    #[test]
    fn test_exit_tree_tears_down_and_enter_rebuilds() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.set_cell(IVec2::new(1, 0), SCENE);
        f.layer.update_internals();
        let ci = f.layer.canvas_item();

        f.layer.exit_tree();
        // Only the layer's own canvas item survives
        assert_eq!(f.backend.live_count(), 1);
        assert_eq!(f.backend.scene_count(), 0);
        assert_eq!(f.backend.canvas_item(ci).and_then(|s| s.parent), None);

        f.layer.enter_tree(f.world);
        f.layer.deferred_update();
        assert_eq!(f.backend.live_count_of(HandleKind::Body), 1);
        assert_eq!(f.backend.scene_count(), 1);
        assert_eq!(f.backend.canvas_item(ci).and_then(|s| s.parent), Some(f.world.canvas));
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_hidden_layer_keeps_physics() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.update_internals();
        assert_eq!(f.layer.canvas_item_count(), 1);

        f.layer.set_visible(false);
        f.layer.deferred_update();
        assert_eq!(f.layer.canvas_item_count(), 0);
        assert_eq!(f.backend.live_count_of(HandleKind::Occluder), 0);
        assert_eq!(f.layer.body_count(), 1);

        f.layer.set_enabled(false);
        f.layer.deferred_update();
        assert_eq!(f.layer.body_count(), 0);
        assert_eq!(f.backend.live_count_of(HandleKind::NavigationRegion), 0);

        f.layer.set_enabled(true);
        f.layer.set_visible(true);
        f.layer.deferred_update();
        assert_eq!(f.layer.canvas_item_count(), 1);
        assert_eq!(f.layer.body_count(), 1);
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_body_reverse_index() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(4, -2), SOLID);
        f.layer.update_internals();

        let (body, _) = f
            .backend
            .state()
            .bodies
            .iter()
            .map(|(rid, state)| (*rid, state.clone()))
            .next()
            .unwrap();
        assert!(f.layer.has_body_rid(body));
        assert_eq!(f.layer.get_coords_for_body_rid(body), Some(IVec2::new(4, -2)));

        f.layer.erase_cell(IVec2::new(4, -2));
        f.layer.update_internals();
        assert!(!f.layer.has_body_rid(body));
        assert_eq!(f.layer.get_coords_for_body_rid(body), None);
    }

    #[test]
    fn test_kinematic_switch_rebuilds_bodies() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.update_internals();
        f.layer.set_use_kinematic_bodies(true);
        f.layer.deferred_update();
        let state = f.backend.state();
        let body = state.bodies.values().next().unwrap();
        assert_eq!(body.mode, crate::server::BodyMode::Kinematic);
        assert_eq!(body.space, Some(f.world.space));
    }

    #[test]
    fn test_transform_change_moves_bodies_and_regions() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(1, 1), SOLID);
        f.layer.update_internals();

        let xform = Affine2::from_translation(Vec2::new(100.0, 0.0));
        f.layer.set_global_transform(xform);
        // No pass needed
        assert!(!f.layer.is_update_pending());

        let expected = xform * Affine2::from_translation(Vec2::new(24.0, 24.0));
        let state = f.backend.state();
        assert!(state.bodies.values().all(|b| b.transform == expected));
        assert!(state.regions.values().all(|r| r.transform == expected));
        assert!(state.occluders.values().all(|o| o.transform == expected));
    }

    #[test]
    fn test_navigation_regions_use_world_map() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.update_internals();
        assert_eq!(f.layer.get_navigation_map(), Some(f.world.navigation_map));
        {
            let state = f.backend.state();
            assert!(state.regions.values().all(|r| r.map == Some(f.world.navigation_map)));
        }

        // Navigation disabled frees the regions, the world map is kept
        f.layer.set_navigation_enabled(false);
        f.layer.deferred_update();
        assert_eq!(f.backend.live_count_of(HandleKind::NavigationRegion), 0);
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_set_navigation_map_requires_tree() {
        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend.clone(), LayerConfig::default()).unwrap();
        assert!(matches!(layer.set_navigation_map(None), Err(LayerError::NotInTree)));

        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.update_internals();
        let mut other = f.backend.clone();
        let map = other.map_create();
        f.layer.set_navigation_map(Some(map)).unwrap();
        assert_eq!(f.layer.get_navigation_map(), Some(map));
        let state = f.backend.state();
        assert!(state.regions.values().all(|r| r.map == Some(map)));
    }

    #[test]
    fn test_y_sort_gives_one_quadrant_per_row() {
        let mut f = fixture();
        f.layer.set_y_sort_enabled(true);
        for x in 0..4 {
            f.layer.set_cell(IVec2::new(x, 0), PLAIN);
            f.layer.set_cell(IVec2::new(x, 1), PLAIN);
        }
        // Sorted at y 12, between the two rows
        f.layer.set_cell(IVec2::new(9, 0), TALL);
        f.layer.update_internals();
        assert_eq!(f.layer.rendering_quadrant_count(), 3);
        assert_quadrant_partition(&f.layer);

        let ci = f.layer.canvas_item();
        assert!(f.backend.canvas_item(ci).unwrap().sort_children_by_y);
    }

    #[test]
    fn test_changed_signal() {
        let mut f = fixture();
        let count = Rc::new(StdCell::new(0));
        let c = count.clone();
        f.layer.connect_changed(Box::new(move || c.set(c.get() + 1)));

        f.layer.set_z_index(3);
        f.layer.set_z_index(3);
        f.layer.set_name("ground");
        f.layer.set_tile_set(None);
        f.layer.notify_group_change(DirtyFlag::SelectedLayers);
        f.layer.notify_group_change(DirtyFlag::IndexInGroup);
        f.layer.set_layer_index_in_group(2);
        assert_eq!(count.get(), 4);
    }

    #[test]
    fn test_debug_overlay_only_when_shown() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), SOLID);
        f.layer.set_cell(IVec2::new(20, 0), SOLID);
        f.layer.update_internals();
        assert_eq!(f.layer.debug_quadrant_count(), 0);

        f.layer.set_collision_visibility(VisibilityMode::ForceShow);
        f.layer.deferred_update();
        assert_eq!(f.layer.debug_quadrant_count(), 2);
        let polygons = f
            .backend
            .state()
            .canvas_items
            .values()
            .flat_map(|ci| ci.commands.iter())
            .filter(|cmd| matches!(cmd, crate::server::recording::DrawCommand::Polygon { .. }))
            .count();
        assert_eq!(polygons, 2);

        f.layer.set_collision_visibility(VisibilityMode::ForceHide);
        f.layer.deferred_update();
        assert_eq!(f.layer.debug_quadrant_count(), 0);
        assert_eq!(f.backend.invalid_calls(), 0);
    }

    #[test]
    fn test_highlight_modulate() {
        let mut props = LayerProps::new(Rid::new(1));
        props.modulate = Color::rgba(1.0, 1.0, 1.0, 1.0);
        assert_eq!(props.highlighted_modulate(), Color::WHITE);
        props.highlight = Highlight::Below;
        assert_eq!(props.highlighted_modulate(), Color::rgba(0.5, 0.5, 0.5, 1.0));
        props.highlight = Highlight::Above;
        let above = props.highlighted_modulate();
        assert!((above.a - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_runtime_tile_data_override() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), PLAIN);
        f.layer.set_cell(IVec2::new(1, 0), PLAIN);
        f.layer.update_internals();

        let tint = Color::rgba(1.0, 0.0, 0.0, 1.0);
        f.layer.set_runtime_tile_data_hooks(RuntimeTileDataHooks::new(
            Box::new(|coords: IVec2| coords.x == 1),
            Box::new(move |_: IVec2, data: &mut TileData| data.modulate = tint),
        ));
        f.layer.deferred_update();

        let state = f.backend.state();
        let draws: Vec<_> = state
            .canvas_items
            .values()
            .flat_map(|ci| ci.commands.iter())
            .filter_map(|cmd| match cmd {
                crate::server::recording::DrawCommand::Tile(draw) => Some(draw.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws.iter().filter(|d| d.modulate == tint).count(), 1);
        drop(state);

        // Overrides only live for the pass
        assert!(f.layer.grid.iter().all(|c| c.runtime_tile_data.is_none()));
    }

    #[test]
    fn test_tile_data_round_trip() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(-3, 7), SOLID);
        f.layer.set_cell(IVec2::new(2, 2), PLAIN);
        f.layer.set_cell(IVec2::new(5, -1), SCENE);
        let data = f.layer.get_tile_data();

        let mut g = fixture();
        g.layer.set_cell(IVec2::new(9, 9), PLAIN);
        g.layer.set_tile_data(TileDataFormat::Format3, &data).unwrap();
        assert_eq!(g.layer.get_used_cells(), f.layer.get_used_cells());
        for coords in f.layer.get_used_cells() {
            assert_eq!(g.layer.get_cell(coords, false), f.layer.get_cell(coords, false));
        }
    }

    #[test]
    fn test_bad_tile_data_leaves_layer_untouched() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(1, 1), PLAIN);
        let err = f.layer.set_tile_data(TileDataFormat::Format3, &[1, 2]);
        assert!(matches!(err, Err(TileDataError::CorruptedSize { .. })));
        assert_eq!(f.layer.get_cell(IVec2::new(1, 1), false), PLAIN);
    }

    #[test]
    fn test_pattern_copy_and_paste() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(-2, 3), PLAIN);
        f.layer.set_cell(IVec2::new(-1, 4), SOLID);
        let pattern = f
            .layer
            .get_pattern(&[IVec2::new(-2, 3), IVec2::new(-1, 4), IVec2::new(-2, 4)])
            .unwrap();
        assert_eq!(pattern.size(), IVec2::new(2, 2));
        assert_eq!(pattern.cell(IVec2::new(1, 1)), SOLID);
        assert!(!pattern.has_cell(IVec2::new(0, 1)));

        f.layer.set_pattern(IVec2::new(10, 10), &pattern).unwrap();
        assert_eq!(f.layer.get_cell(IVec2::new(10, 10), false), PLAIN);
        assert_eq!(f.layer.get_cell(IVec2::new(11, 11), false), SOLID);
    }

    #[test]
    fn test_half_offset_pattern_stays_positive() {
        let mut tile_set = test_tile_set();
        tile_set.tile_shape = crate::tileset::TileShape::HalfOffsetSquare;
        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend, LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(tile_set)));
        layer.set_cell(IVec2::new(0, 1), PLAIN);
        layer.set_cell(IVec2::new(0, 2), SOLID);

        // Starting on an odd row shifts the next row left, then everything
        // moves right to stay positive
        let pattern = layer.get_pattern(&[IVec2::new(0, 1), IVec2::new(0, 2)]).unwrap();
        assert_eq!(pattern.cell(IVec2::new(1, 0)), PLAIN);
        assert_eq!(pattern.cell(IVec2::new(0, 1)), SOLID);
        assert!(pattern.used_cells().iter().all(|c| c.x >= 0 && c.y >= 0));
    }

    #[test]
    fn test_terrain_connect_paints_block() {
        use crate::tileset::tests::{terrain_tile_set, TERRAIN_T};

        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend, LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(terrain_tile_set())));
        let block: Vec<IVec2> = (0..3).flat_map(|x| (0..3).map(move |y| IVec2::new(x, y))).collect();
        layer.set_cells_terrain_connect(&block, 0, TERRAIN_T, true).unwrap();

        let full_t = TileMapCell::new(0, IVec2::new(0, 0), 0);
        assert_eq!(layer.get_used_cells(), block);
        assert!(block.iter().all(|c| layer.get_cell(*c, false) == full_t));

        assert!(matches!(
            layer.set_cells_terrain_path(&[IVec2::ZERO, IVec2::new(2, 2)], 0, TERRAIN_T, true),
            Err(TerrainError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_missing_tile_set_errors() {
        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend, LayerConfig::default()).unwrap();
        assert!(matches!(layer.get_pattern(&[IVec2::ZERO]), Err(LayerError::MissingTileSet)));
        assert!(matches!(layer.fix_invalid_tiles(), Err(LayerError::MissingTileSet)));
        assert!(matches!(
            layer.set_cells_terrain_connect(&[IVec2::ZERO], 0, 0, true),
            Err(TerrainError::MissingTileSet)
        ));
        assert!(matches!(
            layer.set_rendering_quadrant_size(0),
            Err(LayerError::InvalidQuadrantSize(0))
        ));
        assert_eq!(layer.get_rect(), Rect2::default());
    }

    #[test]
    fn test_zero_quadrant_size_config_is_rejected() {
        let backend = RecordingBackend::new();
        let config: LayerConfig = serde_json::from_str(r#"{"rendering_quadrant_size": 0}"#).unwrap();
        assert!(matches!(
            TileMapLayer::new(backend.clone(), config),
            Err(LayerError::InvalidQuadrantSize(0))
        ));
        assert_eq!(backend.live_count(), 0);

        let config: LayerConfig = serde_json::from_str(r#"{"rendering_quadrant_size": 1}"#).unwrap();
        let mut layer = TileMapLayer::new(backend.clone(), config).unwrap();
        layer.set_tile_set(Some(Rc::new(test_tile_set())));
        layer.enter_tree(backend.create_world());
        layer.set_cell(IVec2::new(-3, 2), PLAIN);
        layer.set_cell(IVec2::new(3, 2), PLAIN);
        layer.update_internals();
        assert_eq!(layer.rendering_quadrant_count(), 2);
    }

    #[test]
    fn test_fix_invalid_tiles() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), PLAIN);
        f.layer.set_cell(IVec2::new(1, 0), TileMapCell::new(7, IVec2::ZERO, 0));
        f.layer.set_cell(IVec2::new(2, 0), TileMapCell::new(0, IVec2::new(3, 3), 0));
        f.layer.update_internals();
        // Unresolvable cells are drawn as nothing
        assert_quadrant_partition_ignoring_invalid(&f.layer);

        f.layer.fix_invalid_tiles().unwrap();
        f.layer.update_internals();
        assert_eq!(f.layer.get_used_cells(), vec![IVec2::new(0, 0)]);
        assert_eq!(f.layer.stored_cell_count(), 1);
    }

    fn assert_quadrant_partition_ignoring_invalid(layer: &TileMapLayer<RecordingBackend>) {
        let quadrant_cells: usize = layer.rendering.quadrants.values().map(|q| q.cells.len()).sum();
        assert_eq!(quadrant_cells, 1);
    }

    #[test]
    fn test_proxies_on_read() {
        let mut tile_set = test_tile_set();
        tile_set.proxies.source.insert(5, 0);
        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend, LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(tile_set)));
        layer.set_cell(IVec2::ZERO, TileMapCell::new(5, IVec2::new(1, 0), 0));

        assert_eq!(layer.get_cell_source_id(IVec2::ZERO, false), 5);
        assert_eq!(layer.get_cell_source_id(IVec2::ZERO, true), 0);
        assert!(layer.get_cell_tile_data(IVec2::ZERO, false).is_none());
        assert!(layer.get_cell_tile_data(IVec2::ZERO, true).is_some());
    }

    #[test]
    fn test_rect_of_tile_centres() {
        let mut f = fixture();
        f.layer.set_cell(IVec2::new(0, 0), PLAIN);
        f.layer.set_cell(IVec2::new(2, 3), PLAIN);
        let rect = f.layer.get_rect();
        assert_eq!(rect.position, Vec2::new(8.0, 8.0));
        assert_eq!(rect.size, Vec2::new(32.0, 48.0));
        assert_eq!(f.layer.get_used_rect(), Rect2i::new(IVec2::ZERO, IVec2::new(3, 4)));

        f.layer.erase_cell(IVec2::new(2, 3));
        assert_eq!(f.layer.get_rect().size, Vec2::ZERO);
    }

    #[test]
    fn test_detached_layer_does_not_schedule() {
        let backend = RecordingBackend::new();
        let mut layer = TileMapLayer::new(backend.clone(), LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(test_tile_set())));
        layer.set_cell(IVec2::ZERO, SOLID);
        assert!(!layer.is_update_pending());

        // Forced passes still run, building nothing outside the tree
        layer.update_internals();
        assert_eq!(backend.live_count(), 1);
    }
}
