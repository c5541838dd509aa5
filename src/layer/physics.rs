//! Physics synchronizer: one body per cell and physics layer.

use glam::{Affine2, IVec2};
use rustc_hash::FxHashMap;

use super::dirty::DirtyFlag;
use super::{LayerProps, Pass};
use crate::config::LayerConfig;
use crate::server::{Backend, BodyMode, BodyParam, PhysicsServer, Rid};
use crate::tilemap::{resolve_tile_data, CellData, GridStore};
use crate::tileset::{TileSet, TileTransform};

#[derive(Debug, Default)]
pub struct PhysicsState {
    /// Reverse index from body handle to cell coordinates.
    bodies_coords: FxHashMap<Rid, IVec2>,
    was_cleaned_up: bool,
}

impl PhysicsState {
    pub fn update<B: Backend>(&mut self, pass: &mut Pass<'_, B>, grid: &mut GridStore) {
        match pass.tree_tile_set() {
            Some(tile_set) => {
                let full = self.was_cleaned_up
                    || pass.dirty.any_of(&[
                        DirtyFlag::TileSet,
                        DirtyFlag::UseKinematicBodies,
                        DirtyFlag::InTree,
                    ]);
                if full {
                    for cell in grid.iter_mut() {
                        self.update_cell(pass.backend, tile_set, pass.config, pass.props, cell);
                    }
                } else {
                    for c in pass.dirty.cells() {
                        if let Some(cell) = grid.cell_data_mut(*c) {
                            self.update_cell(pass.backend, tile_set, pass.config, pass.props, cell);
                        }
                    }
                }
                self.was_cleaned_up = false;
            }
            None => {
                for cell in grid.iter_mut() {
                    self.clear_cell(pass.backend, cell);
                }
                self.was_cleaned_up = true;
            }
        }
    }

    pub fn has_body_rid(&self, body: Rid) -> bool {
        self.bodies_coords.contains_key(&body)
    }

    pub fn coords_for_body_rid(&self, body: Rid) -> Option<IVec2> {
        self.bodies_coords.get(&body).copied()
    }

    pub fn body_count(&self) -> usize {
        self.bodies_coords.len()
    }

    fn free_body<B: PhysicsServer>(&mut self, backend: &mut B, body: Rid) {
        backend.body_free(body);
        self.bodies_coords.remove(&body);
    }

    fn clear_cell<B: PhysicsServer>(&mut self, backend: &mut B, cell: &mut CellData) {
        for body in cell.bodies.drain(..).flatten() {
            self.free_body(backend, body);
        }
    }

    fn update_cell<B: PhysicsServer>(
        &mut self,
        backend: &mut B,
        tile_set: &TileSet,
        config: &LayerConfig,
        props: &LayerProps,
        cell: &mut CellData,
    ) {
        let count = tile_set.physics_layers.len();
        if cell.bodies.len() > count {
            for body in cell.bodies.drain(count..).flatten() {
                self.free_body(backend, body);
            }
        }
        cell.bodies.resize(count, None);

        let CellData {
            coords,
            cell: tile,
            runtime_tile_data,
            bodies,
            ..
        } = cell;
        let Some(tile_data) = resolve_tile_data(tile_set, tile, runtime_tile_data.as_deref()) else {
            for body in bodies.iter_mut().filter_map(Option::take) {
                self.free_body(backend, body);
            }
            return;
        };

        let transform = TileTransform::from_alternative(tile.alternative_tile);
        let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(*coords));
        let mode = if props.use_kinematic_bodies {
            BodyMode::Kinematic
        } else {
            BodyMode::Static
        };

        for (i, layer) in tile_set.physics_layers.iter().enumerate() {
            let polygons = tile_data.collision_polygons(i);
            if polygons.is_empty() {
                if let Some(body) = bodies[i].take() {
                    self.free_body(backend, body);
                }
                continue;
            }

            let body = match bodies[i] {
                Some(body) => body,
                None => {
                    let body = backend.body_create();
                    bodies[i] = Some(body);
                    self.bodies_coords.insert(body, *coords);
                    body
                }
            };

            backend.body_set_mode(body, mode);
            backend.body_set_space(body, props.world.map(|w| w.space));
            backend.body_set_transform(body, xform);
            backend.body_attach_object_instance_id(body, config.instance_id);
            backend.body_set_collision_layer(body, layer.collision_layer);
            backend.body_set_collision_mask(body, layer.collision_mask);
            backend.body_set_pickable(body, false);

            let (linear, angular) = tile_data.constant_velocities(i);
            backend.body_set_constant_velocity(body, linear, angular);

            let (bounce, friction) = layer
                .material
                .map(|m| (m.bounce, m.friction))
                .unwrap_or((0.0, 1.0));
            backend.body_set_param(body, BodyParam::Bounce, bounce);
            backend.body_set_param(body, BodyParam::Friction, friction);

            backend.body_clear_shapes(body);
            for (shape, polygon) in polygons.iter().enumerate() {
                backend.body_add_shape(body, &transform.apply_all(&polygon.points));
                backend.body_set_shape_as_one_way_collision(body, shape, polygon.one_way, polygon.one_way_margin);
            }
        }
    }
}

/// Move existing bodies to the space of the world the layer entered.
pub(crate) fn push_body_space<B: PhysicsServer>(backend: &mut B, props: &LayerProps, grid: &GridStore) {
    let space = props.world.map(|w| w.space);
    for body in grid.iter().flat_map(|cell| cell.bodies.iter().flatten()) {
        backend.body_set_space(*body, space);
    }
}

/// Re-push body transforms after the layer moved.
pub(crate) fn push_body_transforms<B: PhysicsServer>(backend: &mut B, tile_set: &TileSet, props: &LayerProps, grid: &GridStore) {
    for cell in grid.iter() {
        let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(cell.coords));
        for body in cell.bodies.iter().flatten() {
            backend.body_set_transform(*body, xform);
        }
    }
}
