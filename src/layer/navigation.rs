//! Navigation synchronizer: one region per cell and navigation layer, all
//! registered on the layer's navigation map.

use glam::Affine2;

use super::dirty::DirtyFlag;
use super::{LayerProps, Pass};
use crate::config::LayerConfig;
use crate::server::{Backend, NavigationServer, Rid};
use crate::tilemap::{resolve_tile_data, CellData, GridStore};
use crate::tileset::{TileSet, TileTransform};

#[derive(Debug, Default)]
pub struct NavigationState {
    map: Option<Rid>,
    /// Private map created by the layer, freed when released.
    owns_map: bool,
    /// Map set by the host, kept until replaced.
    overridden: bool,
    was_cleaned_up: bool,
}

impl NavigationState {
    pub fn update<B: Backend>(&mut self, pass: &mut Pass<'_, B>, grid: &mut GridStore) {
        let tile_set = pass
            .tree_tile_set()
            .filter(|_| pass.props.navigation_enabled);

        match tile_set {
            Some(tile_set) => {
                // Layer 0 of a group shares the world map, the others do not
                if pass.dirty.is_set(DirtyFlag::IndexInGroup) && !self.overridden {
                    for cell in grid.iter_mut() {
                        clear_cell(pass.backend, cell);
                    }
                    self.release_map(pass.backend);
                    self.was_cleaned_up = true;
                }
                if self.map.is_none() {
                    self.acquire_map(pass.backend, pass.props);
                }
                let full = self.was_cleaned_up || pass.dirty.any_of(&[DirtyFlag::TileSet, DirtyFlag::InTree]);
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
                    clear_cell(pass.backend, cell);
                }
                if !self.overridden {
                    self.release_map(pass.backend);
                }
                self.was_cleaned_up = true;
            }
        }
    }

    pub fn map(&self) -> Option<Rid> {
        self.map
    }

    /// Register regions on `map` from now on. The host keeps ownership of the
    /// map. `None` goes back to the default map.
    pub(crate) fn set_map<B: NavigationServer>(&mut self, backend: &mut B, props: &LayerProps, map: Option<Rid>) {
        self.release_map(backend);
        match map {
            Some(map) => {
                self.map = Some(map);
                self.overridden = true;
            }
            None => {
                self.overridden = false;
                self.acquire_map(backend, props);
            }
        }
    }

    fn release_map<B: NavigationServer>(&mut self, backend: &mut B) {
        if let Some(map) = self.map.take() {
            if self.owns_map {
                backend.map_free(map);
            }
        }
        self.owns_map = false;
        self.overridden = false;
    }

    fn acquire_map<B: NavigationServer>(&mut self, backend: &mut B, props: &LayerProps) {
        match (props.layer_index_in_group, props.world) {
            (0, Some(world)) => {
                self.map = Some(world.navigation_map);
                self.owns_map = false;
            }
            _ => {
                let map = backend.map_create();
                backend.map_set_cell_size(map, 1.0);
                backend.map_set_active(map, true);
                self.map = Some(map);
                self.owns_map = true;
            }
        }
    }

    fn update_cell<B: NavigationServer>(
        &self,
        backend: &mut B,
        tile_set: &TileSet,
        config: &LayerConfig,
        props: &LayerProps,
        cell: &mut CellData,
    ) {
        let count = tile_set.navigation_layers.len();
        if cell.navigation_regions.len() > count {
            for region in cell.navigation_regions.drain(count..).flatten() {
                free_region(backend, region);
            }
        }
        cell.navigation_regions.resize(count, None);

        let CellData {
            coords,
            cell: tile,
            runtime_tile_data,
            navigation_regions,
            ..
        } = cell;
        let Some(tile_data) = resolve_tile_data(tile_set, tile, runtime_tile_data.as_deref()) else {
            for region in navigation_regions.iter_mut().filter_map(Option::take) {
                free_region(backend, region);
            }
            return;
        };

        let transform = TileTransform::from_alternative(tile.alternative_tile);
        let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(*coords));
        for (i, layer) in tile_set.navigation_layers.iter().enumerate() {
            match tile_data.navigation_polygon(i).filter(|p| p.has_geometry()) {
                Some(polygon) => {
                    let region = match navigation_regions[i] {
                        Some(region) => region,
                        None => {
                            let region = backend.region_create();
                            backend.region_set_owner_id(region, config.instance_id);
                            backend.region_set_map(region, self.map);
                            navigation_regions[i] = Some(region);
                            region
                        }
                    };
                    backend.region_set_transform(region, xform);
                    backend.region_set_navigation_layers(region, layer.layers);
                    backend.region_set_navigation_polygon(region, &polygon.transformed(transform));
                }
                None => {
                    if let Some(region) = navigation_regions[i].take() {
                        free_region(backend, region);
                    }
                }
            }
        }
    }
}

fn free_region<B: NavigationServer>(backend: &mut B, region: Rid) {
    backend.region_set_map(region, None);
    backend.region_free(region);
}

fn clear_cell<B: NavigationServer>(backend: &mut B, cell: &mut CellData) {
    for region in cell.navigation_regions.drain(..).flatten() {
        free_region(backend, region);
    }
}

/// Re-push region transforms after the layer moved.
pub(crate) fn push_region_transforms<B: NavigationServer>(backend: &mut B, tile_set: &TileSet, props: &LayerProps, grid: &GridStore) {
    for cell in grid.iter() {
        let xform = props.global_transform * Affine2::from_translation(tile_set.map_to_local(cell.coords));
        for region in cell.navigation_regions.iter().flatten() {
            backend.region_set_transform(*region, xform);
        }
    }
}
