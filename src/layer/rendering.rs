//! Rendering synchronizer: batches cells into quadrants of canvas items and
//! keeps light occluders in sync.

use std::hash::{Hash, Hasher};

use glam::{Affine2, IVec2, Vec2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustc_hash::{FxHashMap, FxHasher};

use super::dirty::DirtyFlag;
use super::quadrant::{draw_order, quadrant_coords, DirtyQuadrants, RenderingQuadrant};
use super::{LayerProps, Pass};
use crate::config::LayerConfig;
use crate::server::{Backend, RenderingServer, Rid, TileDraw};
use crate::tilemap::{resolve_tile_data, CellData, GridStore};
use crate::tileset::{AnimationMode, MaterialId, TileSet, TileTransform};

/// Flags re-pushed to every existing canvas item when set.
const ATTRIBUTE_FLAGS: [DirtyFlag; 4] = [
    DirtyFlag::LightMask,
    DirtyFlag::TextureFilter,
    DirtyFlag::TextureRepeat,
    DirtyFlag::SelfModulate,
];

#[derive(Debug, Default)]
pub struct RenderingState {
    pub(crate) quadrants: FxHashMap<IVec2, RenderingQuadrant>,
    dirty_quadrants: DirtyQuadrants,
    was_cleaned_up: bool,
}

impl RenderingState {
    pub fn update<B: Backend>(&mut self, pass: &mut Pass<'_, B>, grid: &mut GridStore) {
        let tile_set = pass.canvas_tile_set();
        let dirty = pass.dirty;
        let props = pass.props;

        if tile_set.is_some() {
            let ci = props.canvas_item;
            pass.backend.canvas_item_set_modulate(ci, props.highlighted_modulate());
            pass.backend.canvas_item_set_light_mask(ci, pass.config.light_mask);
            pass.backend.canvas_item_set_z_index(ci, props.z_index);
            pass.backend.canvas_item_set_sort_children_by_y(ci, props.y_sort_enabled);
        }

        // Quadrant keys depend on the quadrant size and, when y-sorting, on
        // the y positions of the cells.
        let quadrant_shape_changed = dirty.is_set(DirtyFlag::RenderingQuadrantSize)
            || dirty.is_set(DirtyFlag::YSortEnabled)
            || (props.y_sort_enabled
                && dirty.any_of(&[DirtyFlag::YSortOrigin, DirtyFlag::LocalTransform, DirtyFlag::TileSet]));

        if tile_set.is_none() || quadrant_shape_changed {
            self.free_all_quadrants(pass.backend, grid);
            self.was_cleaned_up = true;
        }

        match tile_set {
            Some(tile_set) => {
                let full = self.was_cleaned_up || dirty.any_of(&[DirtyFlag::TileSet, DirtyFlag::InTree]);
                let coords = if full { grid.coords() } else { dirty.cells().to_vec() };
                for c in &coords {
                    self.update_cell_quadrant(tile_set, pass.config, props, grid, *c);
                }
                self.rebuild_dirty_quadrants(pass.backend, tile_set, pass.config, props, grid);
                self.update_draw_order(pass.backend);

                if dirty.any_of(&ATTRIBUTE_FLAGS) {
                    for ci in self.quadrants.values().flat_map(|q| q.canvas_items.iter()) {
                        push_canvas_item_attributes(pass.backend, *ci, pass.config, props);
                    }
                }

                // Occluders
                let occluder_coords = if self.was_cleaned_up || dirty.is_set(DirtyFlag::TileSet) {
                    grid.coords()
                } else {
                    dirty.cells().to_vec()
                };
                for c in occluder_coords {
                    if let Some(cell) = grid.cell_data_mut(c) {
                        update_cell_occluders(pass.backend, tile_set, props, cell);
                    }
                }
            }
            None => {
                for cell in grid.iter_mut() {
                    clear_cell_occluders(pass.backend, cell);
                }
            }
        }

        self.was_cleaned_up = tile_set.is_none();
    }

    pub fn quadrant_count(&self) -> usize {
        self.quadrants.len()
    }

    pub fn canvas_item_count(&self) -> usize {
        self.quadrants.values().map(|q| q.canvas_items.len()).sum()
    }

    /// Forget a purged cell.
    pub fn remove_cell(&mut self, cell: &CellData) {
        if let Some(q) = cell.rendering_quadrant.and_then(|q| self.quadrants.get_mut(&q)) {
            q.cells.remove(&cell.coords);
        }
    }

    fn free_all_quadrants<B: RenderingServer>(&mut self, backend: &mut B, grid: &mut GridStore) {
        for quadrant in self.quadrants.values_mut() {
            for ci in quadrant.canvas_items.drain(..) {
                backend.canvas_item_free(ci);
            }
        }
        self.quadrants.clear();
        self.dirty_quadrants.take();
        for cell in grid.iter_mut() {
            cell.rendering_quadrant = None;
        }
    }

    fn update_cell_quadrant(
        &mut self,
        tile_set: &TileSet,
        config: &LayerConfig,
        props: &LayerProps,
        grid: &mut GridStore,
        coords: IVec2,
    ) {
        let Some(cell) = grid.cell_data_mut(coords) else {
            return;
        };
        let y_sort_origin = cell.tile_data(tile_set).map(|td| td.y_sort_origin);

        let Some(y_sort_origin) = y_sort_origin else {
            if let Some(old) = cell.rendering_quadrant.take() {
                if let Some(q) = self.quadrants.get_mut(&old) {
                    q.cells.remove(&coords);
                }
                self.dirty_quadrants.mark(old);
            }
            return;
        };

        let (key, position) = if props.y_sort_enabled {
            let y = tile_set.map_to_local(coords).y + (y_sort_origin + props.y_sort_origin) as f32;
            let position = Vec2::new(0.0, y);
            ((position * 100.0).as_ivec2(), position)
        } else {
            let size = config.rendering_quadrant_size;
            let q = quadrant_coords(coords, size);
            (q, tile_set.map_to_local(q * size))
        };

        if let Some(old) = cell.rendering_quadrant {
            if old != key {
                if let Some(q) = self.quadrants.get_mut(&old) {
                    q.cells.remove(&coords);
                }
            }
            self.dirty_quadrants.mark(old);
        }

        self.quadrants
            .entry(key)
            .or_insert_with(|| RenderingQuadrant::new(key, position))
            .cells
            .insert(coords);
        cell.rendering_quadrant = Some(key);
        self.dirty_quadrants.mark(key);
    }

    fn rebuild_dirty_quadrants<B: RenderingServer>(
        &mut self,
        backend: &mut B,
        tile_set: &TileSet,
        config: &LayerConfig,
        props: &LayerProps,
        grid: &mut GridStore,
    ) {
        for key in self.dirty_quadrants.take() {
            let Some(quadrant) = self.quadrants.get_mut(&key) else {
                continue;
            };
            for ci in quadrant.canvas_items.drain(..) {
                backend.canvas_item_free(ci);
            }

            let has_tile = quadrant.cells.iter().any(|c| !grid.get(*c).is_empty());
            if !has_tile {
                for c in &quadrant.cells {
                    if let Some(cell) = grid.cell_data_mut(*c) {
                        if cell.rendering_quadrant == Some(key) {
                            cell.rendering_quadrant = None;
                        }
                    }
                }
                self.quadrants.remove(&key);
                continue;
            }

            let cells = sorted_cells(quadrant, tile_set, props, grid);
            let mut current: Option<(Option<MaterialId>, i32)> = None;
            let mut ci = None;
            for coords in cells {
                let Some(cell) = grid.cell_data(coords) else {
                    continue;
                };
                let Some(tile_data) = cell.tile_data(tile_set) else {
                    log::trace!("Cell {:?} no longer resolves, skipped", coords);
                    continue;
                };

                let key = (tile_data.material, tile_data.z_index);
                if current != Some(key) {
                    let item = create_canvas_item(backend, quadrant.position, key, config, props);
                    quadrant.canvas_items.push(item);
                    ci = Some(item);
                    current = Some(key);
                }
                let Some(item) = ci else {
                    continue;
                };

                let local = tile_set.map_to_local(coords);
                let animation_offset = tile_set
                    .atlas_source(cell.cell.source_id)
                    .and_then(|a| a.tile(cell.cell.atlas_coords))
                    .filter(|t| t.is_animated() && t.animation_mode == AnimationMode::RandomStartTimes)
                    .map(|_| random_animation_offset(local, config.instance_id))
                    .unwrap_or(0.0);

                backend.canvas_item_add_tile(
                    item,
                    TileDraw {
                        cell: cell.cell,
                        position: local - quadrant.position - tile_data.texture_origin,
                        modulate: tile_data.modulate,
                        transform: TileTransform::from_alternative(cell.cell.alternative_tile),
                        animation_offset,
                    },
                );
            }
        }
    }

    /// Assign increasing draw indices to all canvas items, quadrant by quadrant.
    fn update_draw_order<B: RenderingServer>(&self, backend: &mut B) {
        let mut ordered: Vec<&RenderingQuadrant> = self.quadrants.values().collect();
        ordered.sort_by(|a, b| draw_order(a, b));
        let mut index = i32::MIN;
        for quadrant in ordered {
            for ci in &quadrant.canvas_items {
                backend.canvas_item_set_draw_index(*ci, index);
                index = index.saturating_add(1);
            }
        }
    }
}

/// Cells of a quadrant in draw order.
fn sorted_cells(
    quadrant: &RenderingQuadrant,
    tile_set: &TileSet,
    props: &LayerProps,
    grid: &GridStore,
) -> Vec<IVec2> {
    let mut cells: Vec<IVec2> = quadrant.cells.iter().copied().collect();
    if props.y_sort_enabled {
        let mut keyed: Vec<(f32, i32, IVec2)> = cells
            .into_iter()
            .map(|c| {
                let origin = grid
                    .cell_data(c)
                    .and_then(|cell| cell.tile_data(tile_set))
                    .map(|td| td.y_sort_origin)
                    .unwrap_or(0);
                (tile_set.map_to_local(c).y + origin as f32, origin, c)
            })
            .collect();
        // World y, then origin, then right to left and top to bottom
        keyed.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(b.2.x.cmp(&a.2.x))
                .then(a.2.y.cmp(&b.2.y))
        });
        keyed.into_iter().map(|(_, _, c)| c).collect()
    } else {
        cells.sort_by_key(|c| (c.x, c.y));
        cells
    }
}

fn create_canvas_item<B: RenderingServer>(
    backend: &mut B,
    position: Vec2,
    (material, z_index): (Option<MaterialId>, i32),
    config: &LayerConfig,
    props: &LayerProps,
) -> Rid {
    let ci = backend.canvas_item_create();
    if material.is_some() {
        backend.canvas_item_set_material(ci, material);
    }
    backend.canvas_item_set_parent(ci, Some(props.canvas_item));
    backend.canvas_item_set_use_parent_material(ci, material.is_none());
    backend.canvas_item_set_transform(ci, Affine2::from_translation(position));
    backend.canvas_item_set_z_as_relative_to_parent(ci, true);
    backend.canvas_item_set_z_index(ci, z_index);
    push_canvas_item_attributes(backend, ci, config, props);
    ci
}

fn push_canvas_item_attributes<B: RenderingServer>(backend: &mut B, ci: Rid, config: &LayerConfig, props: &LayerProps) {
    backend.canvas_item_set_light_mask(ci, config.light_mask);
    backend.canvas_item_set_default_texture_filter(ci, config.texture_filter);
    backend.canvas_item_set_default_texture_repeat(ci, config.texture_repeat);
    backend.canvas_item_set_self_modulate(ci, props.self_modulate);
}

/// Animation offset in 0..1, stable for a given tile position and owner.
pub fn random_animation_offset(local: Vec2, instance_id: u64) -> f32 {
    let mut hasher = FxHasher::default();
    local.x.to_bits().hash(&mut hasher);
    local.y.to_bits().hash(&mut hasher);
    instance_id.hash(&mut hasher);
    ChaCha8Rng::seed_from_u64(hasher.finish()).gen::<f32>()
}

fn update_cell_occluders<B: RenderingServer>(backend: &mut B, tile_set: &TileSet, props: &LayerProps, cell: &mut CellData) {
    let count = tile_set.occlusion_layers.len();
    if cell.occluders.len() > count {
        for occluder in cell.occluders.drain(count..).flatten() {
            backend.occluder_free(occluder);
        }
    }
    cell.occluders.resize(count, None);

    let CellData {
        coords,
        cell: tile,
        runtime_tile_data,
        occluders,
        ..
    } = cell;
    let Some(tile_data) = resolve_tile_data(tile_set, tile, runtime_tile_data.as_deref()) else {
        for occluder in occluders.iter_mut().filter_map(Option::take) {
            backend.occluder_free(occluder);
        }
        return;
    };

    let transform = TileTransform::from_alternative(tile.alternative_tile);
    let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(*coords));
    for (i, layer) in tile_set.occlusion_layers.iter().enumerate() {
        match tile_data.occluder(i) {
            Some(polygon) => {
                let occluder = *occluders[i].get_or_insert_with(|| backend.occluder_create());
                backend.occluder_set_transform(occluder, xform);
                backend.occluder_set_polygon(occluder, &transform.apply_all(polygon));
                backend.occluder_attach_to_canvas(occluder, props.world.map(|w| w.canvas));
                backend.occluder_set_light_mask(occluder, layer.light_mask);
            }
            None => {
                if let Some(occluder) = occluders[i].take() {
                    backend.occluder_free(occluder);
                }
            }
        }
    }
}

fn clear_cell_occluders<B: RenderingServer>(backend: &mut B, cell: &mut CellData) {
    for occluder in cell.occluders.drain(..).flatten() {
        backend.occluder_free(occluder);
    }
}

/// Re-push transform and canvas of existing occluders, after the layer moved
/// or its canvas changed.
pub(crate) fn push_occluder_transforms<B: RenderingServer>(backend: &mut B, tile_set: &TileSet, props: &LayerProps, grid: &GridStore) {
    for cell in grid.iter() {
        let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(cell.coords));
        for occluder in cell.occluders.iter().flatten() {
            backend.occluder_set_transform(*occluder, xform);
            backend.occluder_attach_to_canvas(*occluder, props.world.map(|w| w.canvas));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_offset_is_stable() {
        let a = random_animation_offset(Vec2::new(8.0, 24.0), 42);
        assert_eq!(a, random_animation_offset(Vec2::new(8.0, 24.0), 42));
        assert!((0.0..1.0).contains(&a));
        assert_ne!(a, random_animation_offset(Vec2::new(24.0, 8.0), 42));
    }
}
