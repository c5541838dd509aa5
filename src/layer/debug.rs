//! Debug overlay: placeholders, collision shapes and navigation polygons drawn
//! into one canvas item per debug quadrant.

use glam::{Affine2, IVec2, Vec2};
use rustc_hash::FxHashMap;

use super::quadrant::{quadrant_coords, DebugQuadrant, DirtyQuadrants};
use super::{LayerProps, Pass};
use crate::config::{Color, LayerConfig};
use crate::server::{Backend, Rid};
use crate::tilemap::{CellData, GridStore};
use crate::tileset::{TileSet, TileSetSource, TileTransform};

/// Edge length in cells of a debug quadrant.
pub const DEBUG_QUADRANT_SIZE: i32 = 16;

/// Highest z index a canvas item can use.
pub const CANVAS_ITEM_Z_MAX: i32 = 4096;

const COLLISION_COLOR: Color = Color::rgba(0.0, 0.6, 0.7, 0.42);
const NAVIGATION_COLOR: Color = Color::rgba(0.5, 1.0, 1.0, 0.4);

#[derive(Debug, Default)]
pub struct DebugState {
    quadrants: FxHashMap<IVec2, DebugQuadrant>,
    dirty_quadrants: DirtyQuadrants,
    was_cleaned_up: bool,
}

impl DebugState {
    pub fn update<B: Backend>(&mut self, pass: &mut Pass<'_, B>, grid: &mut GridStore) {
        let Some(tile_set) = pass.canvas_tile_set().filter(|_| overlay_visible(pass.config)) else {
            for quadrant in self.quadrants.values_mut() {
                if let Some(ci) = quadrant.canvas_item.take() {
                    pass.backend.canvas_item_free(ci);
                }
            }
            self.quadrants.clear();
            self.dirty_quadrants.take();
            for cell in grid.iter_mut() {
                cell.debug_quadrant = None;
            }
            self.was_cleaned_up = true;
            return;
        };

        // Any layer-wide change may alter what the overlay shows.
        let coords = if self.was_cleaned_up || pass.dirty.any_flag() {
            grid.coords()
        } else {
            pass.dirty.cells().to_vec()
        };
        for c in coords {
            if let Some(cell) = grid.cell_data_mut(c) {
                let key = quadrant_coords(c, DEBUG_QUADRANT_SIZE);
                self.quadrants
                    .entry(key)
                    .or_insert_with(|| DebugQuadrant {
                        coords: key,
                        ..DebugQuadrant::default()
                    })
                    .cells
                    .insert(c);
                cell.debug_quadrant = Some(key);
                self.dirty_quadrants.mark(key);
            }
        }

        for key in self.dirty_quadrants.take() {
            let Some(quadrant) = self.quadrants.get_mut(&key) else {
                continue;
            };
            let has_tile = quadrant.cells.iter().any(|c| !grid.get(*c).is_empty());
            if !has_tile {
                if let Some(ci) = quadrant.canvas_item.take() {
                    pass.backend.canvas_item_free(ci);
                }
                self.quadrants.remove(&key);
                continue;
            }

            let ci = match quadrant.canvas_item {
                Some(ci) => {
                    pass.backend.canvas_item_clear(ci);
                    ci
                }
                None => {
                    let ci = pass.backend.canvas_item_create();
                    pass.backend.canvas_item_set_z_index(ci, CANVAS_ITEM_Z_MAX - 1);
                    pass.backend.canvas_item_set_parent(ci, Some(pass.props.canvas_item));
                    quadrant.canvas_item = Some(ci);
                    ci
                }
            };
            let origin = tile_set.map_to_local(key * DEBUG_QUADRANT_SIZE);
            pass.backend.canvas_item_set_transform(ci, Affine2::from_translation(origin));

            let mut cells: Vec<IVec2> = quadrant.cells.iter().copied().collect();
            cells.sort_by_key(|c| (c.x, c.y));
            for c in cells {
                let Some(cell) = grid.cell_data(c).filter(|cell| !cell.cell.is_empty()) else {
                    continue;
                };
                let ctx = DrawContext {
                    tile_set,
                    config: pass.config,
                    props: pass.props,
                    ci,
                    origin,
                };
                draw_rendering_placeholder(pass.backend, &ctx, cell);
                draw_collision(pass.backend, &ctx, cell);
                draw_navigation(pass.backend, &ctx, cell);
                draw_scene_placeholder(pass.backend, &ctx, cell);
            }
        }

        self.was_cleaned_up = false;
    }

    /// Forget a purged cell.
    pub fn remove_cell(&mut self, cell: &CellData) {
        if let Some(q) = cell.debug_quadrant.and_then(|q| self.quadrants.get_mut(&q)) {
            q.cells.remove(&cell.coords);
        }
    }

    pub fn quadrant_count(&self) -> usize {
        self.quadrants.len()
    }
}

/// Whether anything could be drawn at all.
fn overlay_visible(config: &LayerConfig) -> bool {
    config.editor_hint || config.show_collision() || config.show_navigation()
}

struct DrawContext<'a> {
    tile_set: &'a TileSet,
    config: &'a LayerConfig,
    props: &'a LayerProps,
    ci: Rid,
    origin: Vec2,
}

impl DrawContext<'_> {
    fn local(&self, coords: IVec2) -> Vec2 {
        self.tile_set.map_to_local(coords) - self.origin
    }

    fn placeholder_radius(&self) -> f32 {
        self.tile_set.tile_size.min_element() as f32 / 4.0
    }
}

fn source_color(source_id: i32) -> Color {
    Color::from_hsv((source_id.rem_euclid(37)) as f32 / 37.0, 0.6, 0.9, 0.7)
}

fn draw_rendering_placeholder<B: Backend>(backend: &mut B, ctx: &DrawContext<'_>, cell: &CellData) {
    if !ctx.config.editor_hint {
        return;
    }
    let Some(atlas) = ctx.tile_set.atlas_source(cell.cell.source_id) else {
        return;
    };
    if !atlas.is_placeholder(cell.cell.atlas_coords) {
        return;
    }
    let center = ctx.local(cell.coords);
    let half = ctx.tile_set.tile_size.as_vec2() * 0.5;
    let rect = [
        center + Vec2::new(-half.x, -half.y),
        center + Vec2::new(half.x, -half.y),
        center + Vec2::new(half.x, half.y),
        center + Vec2::new(-half.x, half.y),
    ];
    backend.canvas_item_add_polygon(ctx.ci, &rect, source_color(cell.cell.source_id));
}

fn draw_collision<B: Backend>(backend: &mut B, ctx: &DrawContext<'_>, cell: &CellData) {
    if !ctx.config.show_collision() {
        return;
    }
    let Some(tile_data) = cell.tile_data(ctx.tile_set) else {
        return;
    };
    let transform = TileTransform::from_alternative(cell.cell.alternative_tile);
    let to_local = ctx.props.global_transform.inverse();
    for (i, body) in cell.bodies.iter().enumerate() {
        let Some(body) = body else {
            continue;
        };
        let Some(body_xform) = backend.body_get_transform(*body) else {
            continue;
        };
        let xform = to_local * body_xform;
        for polygon in tile_data.collision_polygons(i) {
            let points: Vec<Vec2> = polygon
                .points
                .iter()
                .map(|p| xform.transform_point2(transform.apply(*p)) - ctx.origin)
                .collect();
            backend.canvas_item_add_polygon(ctx.ci, &points, COLLISION_COLOR);
        }
    }
}

fn draw_navigation<B: Backend>(backend: &mut B, ctx: &DrawContext<'_>, cell: &CellData) {
    if !ctx.config.show_navigation() {
        return;
    }
    let Some(tile_data) = cell.tile_data(ctx.tile_set) else {
        return;
    };
    let transform = TileTransform::from_alternative(cell.cell.alternative_tile);
    let center = ctx.local(cell.coords);
    for (i, region) in cell.navigation_regions.iter().enumerate() {
        if region.is_none() {
            continue;
        }
        let Some(polygon) = tile_data.navigation_polygon(i) else {
            continue;
        };
        for points in polygon.transformed(transform).polygon_points() {
            let points: Vec<Vec2> = points.into_iter().map(|p| p + center).collect();
            backend.canvas_item_add_polygon(ctx.ci, &points, NAVIGATION_COLOR);
        }
    }
}

fn draw_scene_placeholder<B: Backend>(backend: &mut B, ctx: &DrawContext<'_>, cell: &CellData) {
    if !ctx.config.editor_hint {
        return;
    }
    let Some(TileSetSource::ScenesCollection(scenes)) = ctx.tile_set.source(cell.cell.source_id) else {
        return;
    };
    let Some(tile) = scenes.scene_tile(cell.cell.atlas_coords, cell.cell.alternative_tile) else {
        return;
    };
    if tile.scene.is_none() || tile.display_placeholder {
        backend.canvas_item_add_circle(
            ctx.ci,
            ctx.local(cell.coords),
            ctx.placeholder_radius(),
            source_color(cell.cell.source_id),
        );
    }
}
