//! Runtime tile data overrides.
//!
//! The host can ask, per cell, for a modified copy of the tile data to be used
//! in place of the tile set's. Copies are built at the start of a pass and
//! dropped at its end.

use glam::IVec2;

use super::dirty::{DirtyFlag, DirtyState};
use crate::tilemap::{CellData, GridStore};
use crate::tileset::TileSet;

/// Returns whether a cell should get an override.
pub type UseRuntimeTileData = Box<dyn FnMut(IVec2) -> bool>;
/// Edits the copy of the tile data used for a cell.
pub type UpdateRuntimeTileData = Box<dyn FnMut(IVec2, &mut crate::tileset::TileData)>;

#[derive(Default)]
pub struct RuntimeTileDataHooks {
    pub use_tile_data: Option<UseRuntimeTileData>,
    pub update_tile_data: Option<UpdateRuntimeTileData>,
}

impl RuntimeTileDataHooks {
    pub fn new(use_tile_data: UseRuntimeTileData, update_tile_data: UpdateRuntimeTileData) -> Self {
        Self {
            use_tile_data: Some(use_tile_data),
            update_tile_data: Some(update_tile_data),
        }
    }

    /// Both callbacks are needed for overrides to be built.
    pub fn is_active(&self) -> bool {
        self.use_tile_data.is_some() && self.update_tile_data.is_some()
    }
}

#[derive(Default)]
pub struct RuntimeState {
    pub hooks: RuntimeTileDataHooks,
    was_cleaned_up: bool,
    needs_all_cells_cleaned_up: bool,
}

impl RuntimeState {
    /// Build overrides for the cells the pass will look at.
    ///
    /// `tile_set` is `None` when the canvas subsystems are being torn down,
    /// in which case nothing is built.
    pub fn build(&mut self, tile_set: Option<&TileSet>, grid: &mut GridStore, dirty: &mut DirtyState) {
        let Some(tile_set) = tile_set.filter(|_| self.hooks.is_active()) else {
            self.was_cleaned_up = tile_set.is_none();
            return;
        };

        if self.was_cleaned_up || dirty.is_set(DirtyFlag::TileSet) {
            self.needs_all_cells_cleaned_up = true;
            for cell in grid.iter_mut() {
                self.build_cell(tile_set, cell, None);
            }
        } else if dirty.is_set(DirtyFlag::RuntimeUpdate) {
            for cell in grid.iter_mut() {
                self.build_cell(tile_set, cell, Some(&mut *dirty));
            }
        } else {
            for c in dirty.cells().to_vec() {
                if let Some(cell) = grid.cell_data_mut(c) {
                    self.build_cell(tile_set, cell, None);
                }
            }
        }
        self.was_cleaned_up = false;
    }

    /// Drop the overrides built for this pass.
    pub fn clear(&mut self, grid: &mut GridStore, dirty: &DirtyState) {
        if self.needs_all_cells_cleaned_up {
            for cell in grid.iter_mut() {
                cell.runtime_tile_data = None;
            }
            self.needs_all_cells_cleaned_up = false;
        } else {
            for c in dirty.cells() {
                if let Some(cell) = grid.cell_data_mut(*c) {
                    cell.runtime_tile_data = None;
                }
            }
        }
    }

    /// `redirty` re-marks the cell when an override was built so every
    /// subsystem picks it up.
    fn build_cell(&mut self, tile_set: &TileSet, cell: &mut CellData, redirty: Option<&mut DirtyState>) {
        let (Some(use_tile_data), Some(update_tile_data)) =
            (self.hooks.use_tile_data.as_mut(), self.hooks.update_tile_data.as_mut())
        else {
            return;
        };
        let Some(base) = tile_set.atlas_tile_data(&cell.cell) else {
            return;
        };
        if !use_tile_data(cell.coords) {
            return;
        }
        let mut copy = base.clone();
        update_tile_data(cell.coords, &mut copy);
        cell.runtime_tile_data = Some(Box::new(copy));
        if let Some(dirty) = redirty {
            dirty.mark_cell(cell.coords);
        }
    }
}
