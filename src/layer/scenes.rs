//! Scene synchronizer: instantiates the scene of scene-collection tiles.

use glam::Affine2;

use super::dirty::DirtyFlag;
use super::Pass;
use crate::server::{Backend, SceneInstancer, ScenePlacement};
use crate::tilemap::{CellData, GridStore};
use crate::tileset::{SceneRoot, TileSet};

#[derive(Debug, Default)]
pub struct ScenesState {
    was_cleaned_up: bool,
}

impl ScenesState {
    pub fn update<B: Backend>(&mut self, pass: &mut Pass<'_, B>, grid: &mut GridStore) {
        match pass.tree_tile_set() {
            Some(tile_set) => {
                if self.was_cleaned_up || pass.dirty.any_of(&[DirtyFlag::TileSet, DirtyFlag::InTree]) {
                    for cell in grid.iter_mut() {
                        update_cell(pass.backend, tile_set, cell);
                    }
                } else {
                    for c in pass.dirty.cells() {
                        if let Some(cell) = grid.cell_data_mut(*c) {
                            update_cell(pass.backend, tile_set, cell);
                        }
                    }
                }
                self.was_cleaned_up = false;
            }
            None => {
                for cell in grid.iter_mut() {
                    clear_cell(pass.backend, cell);
                }
                self.was_cleaned_up = true;
            }
        }
    }
}

fn clear_cell<B: SceneInstancer>(backend: &mut B, cell: &mut CellData) {
    if let Some(instance) = cell.scene.take() {
        backend.scene_queue_free(instance);
    }
}

/// Scenes are always recreated: the previous instance is released first.
fn update_cell<B: SceneInstancer>(backend: &mut B, tile_set: &TileSet, cell: &mut CellData) {
    clear_cell(backend, cell);

    let Some(scene) = tile_set
        .source(cell.cell.source_id)
        .and_then(|s| s.as_scenes_collection())
        .and_then(|s| s.scene_tile(cell.cell.atlas_coords, cell.cell.alternative_tile))
        .and_then(|t| t.scene.as_ref())
    else {
        return;
    };

    let local = tile_set.map_to_local(cell.coords);
    let placement = match &scene.root {
        SceneRoot::Control { position } => ScenePlacement::Control {
            position: local + *position,
        },
        SceneRoot::Node2d { transform } => ScenePlacement::Node2d {
            transform: Affine2::from_translation(local) * *transform,
        },
        SceneRoot::Other => ScenePlacement::Unpositioned,
    };
    cell.scene = Some(backend.scene_instantiate(scene, placement));
}
