//! Sparse cell grid of a layer.
//!
//! Cells are keyed by integer coordinates. Besides the tile reference each
//! cell keeps the backend handles created for it, which is why erased cells
//! stay in the grid until the next update pass has released them.

use std::cell::Cell;
use std::fmt;

use glam::{IVec2, Vec2};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::server::{Rid, SceneInstanceId};
use crate::tileset::{TileData, TileSet};

pub const INVALID_SOURCE: i32 = -1;
pub const INVALID_ATLAS_COORDS: IVec2 = IVec2::new(-1, -1);
pub const INVALID_TILE_ALTERNATIVE: i32 = -1;

/// Reference to a tile: source id, atlas coordinates and alternative id.
///
/// Either all components are valid or the cell is the empty cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileMapCell {
    pub source_id: i32,
    pub atlas_coords: IVec2,
    pub alternative_tile: i32,
}

impl Default for TileMapCell {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl TileMapCell {
    pub const EMPTY: TileMapCell = TileMapCell {
        source_id: INVALID_SOURCE,
        atlas_coords: INVALID_ATLAS_COORDS,
        alternative_tile: INVALID_TILE_ALTERNATIVE,
    };

    /// Build a cell; any invalid component yields the empty cell.
    pub fn new(source_id: i32, atlas_coords: IVec2, alternative_tile: i32) -> Self {
        if source_id == INVALID_SOURCE
            || atlas_coords == INVALID_ATLAS_COORDS
            || alternative_tile == INVALID_TILE_ALTERNATIVE
        {
            Self::EMPTY
        } else {
            Self {
                source_id,
                atlas_coords,
                alternative_tile,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_id == INVALID_SOURCE
    }
}

impl fmt::Display for TileMapCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "empty")
        } else {
            write!(
                f,
                "{}:({}, {}):{}",
                self.source_id, self.atlas_coords.x, self.atlas_coords.y, self.alternative_tile
            )
        }
    }
}

/// Integer rectangle (position and size in cells).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect2i {
    pub position: IVec2,
    pub size: IVec2,
}

impl Rect2i {
    pub fn new(position: IVec2, size: IVec2) -> Self {
        Self { position, size }
    }

    pub fn end(&self) -> IVec2 {
        self.position + self.size
    }

    pub fn expand(&self, point: IVec2) -> Self {
        let begin = self.position.min(point);
        let end = self.end().max(point);
        Self::new(begin, end - begin)
    }

    pub fn contains(&self, point: IVec2) -> bool {
        point.cmpge(self.position).all() && point.cmplt(self.end()).all()
    }
}

/// Float rectangle in layer-local space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

impl Rect2 {
    pub fn expand(&self, point: Vec2) -> Self {
        let begin = self.position.min(point);
        let end = (self.position + self.size).max(point);
        Self {
            position: begin,
            size: end - begin,
        }
    }
}

/// A cell of the grid with everything the update passes attached to it.
#[derive(Debug, Default)]
pub struct CellData {
    pub coords: IVec2,
    pub cell: TileMapCell,

    /// Runtime override of the tile data, built at the start of a pass.
    pub runtime_tile_data: Option<Box<TileData>>,

    /// Rendering quadrant this cell is batched into.
    pub rendering_quadrant: Option<IVec2>,
    /// One occluder per occlusion layer.
    pub occluders: Vec<Option<Rid>>,

    /// One body per physics layer.
    pub bodies: Vec<Option<Rid>>,

    /// One region per navigation layer.
    pub navigation_regions: Vec<Option<Rid>>,

    pub scene: Option<SceneInstanceId>,

    pub debug_quadrant: Option<IVec2>,
}

impl CellData {
    fn new(coords: IVec2) -> Self {
        Self {
            coords,
            ..Self::default()
        }
    }

    /// Tile data for this cell: the runtime override if one was built, the
    /// tile set's data otherwise. `None` unless the cell is an atlas tile.
    pub fn tile_data<'a>(&'a self, tile_set: &'a TileSet) -> Option<&'a TileData> {
        resolve_tile_data(tile_set, &self.cell, self.runtime_tile_data.as_deref())
    }
}

/// Field-level variant of [`CellData::tile_data`] for callers holding
/// mutable borrows of other cell fields.
pub fn resolve_tile_data<'a>(
    tile_set: &'a TileSet,
    cell: &TileMapCell,
    runtime: Option<&'a TileData>,
) -> Option<&'a TileData> {
    let data = tile_set.atlas_tile_data(cell)?;
    Some(runtime.unwrap_or(data))
}

/// Sparse map from coordinates to cells.
#[derive(Debug, Default)]
pub struct GridStore {
    cells: FxHashMap<IVec2, CellData>,
    used_rect_cache: Cell<Option<Rect2i>>,
}

impl GridStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored cells, including erased ones awaiting a pass.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Tile reference at `coords`, the empty cell if none.
    pub fn get(&self, coords: IVec2) -> TileMapCell {
        self.cells
            .get(&coords)
            .map(|c| c.cell)
            .unwrap_or(TileMapCell::EMPTY)
    }

    /// Write a tile reference. Returns `true` when the stored value changed.
    ///
    /// Writing the empty cell at an absent coordinate does not create it.
    pub fn set(&mut self, coords: IVec2, cell: TileMapCell) -> bool {
        match self.cells.get_mut(&coords) {
            Some(existing) => {
                if existing.cell == cell {
                    return false;
                }
                existing.cell = cell;
            }
            None => {
                if cell.is_empty() {
                    return false;
                }
                let mut data = CellData::new(coords);
                data.cell = cell;
                self.cells.insert(coords, data);
            }
        }
        self.used_rect_cache.set(None);
        true
    }

    pub fn cell_data(&self, coords: IVec2) -> Option<&CellData> {
        self.cells.get(&coords)
    }

    pub fn cell_data_mut(&mut self, coords: IVec2) -> Option<&mut CellData> {
        self.cells.get_mut(&coords)
    }

    /// Drop a cell for good. Only meant for cells whose handles were released.
    pub fn remove(&mut self, coords: IVec2) -> Option<CellData> {
        let removed = self.cells.remove(&coords);
        if removed.is_some() {
            self.used_rect_cache.set(None);
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellData> {
        self.cells.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CellData> {
        self.cells.values_mut()
    }

    /// Coordinates of every stored cell, in no particular order.
    pub fn coords(&self) -> Vec<IVec2> {
        self.cells.keys().copied().collect()
    }

    /// Coordinates of non-empty cells, sorted by x then y.
    pub fn used_cells(&self) -> Vec<IVec2> {
        let mut cells: Vec<IVec2> = self
            .cells
            .values()
            .filter(|c| !c.cell.is_empty())
            .map(|c| c.coords)
            .collect();
        cells.sort_by_key(|c| (c.x, c.y));
        cells
    }

    /// Non-empty cells matching the filter. `None` fields match anything.
    pub fn used_cells_by_id(
        &self,
        source_id: Option<i32>,
        atlas_coords: Option<IVec2>,
        alternative_tile: Option<i32>,
    ) -> Vec<IVec2> {
        let mut cells: Vec<IVec2> = self
            .cells
            .values()
            .filter(|c| !c.cell.is_empty())
            .filter(|c| source_id.map_or(true, |s| c.cell.source_id == s))
            .filter(|c| atlas_coords.map_or(true, |a| c.cell.atlas_coords == a))
            .filter(|c| alternative_tile.map_or(true, |a| c.cell.alternative_tile == a))
            .map(|c| c.coords)
            .collect();
        cells.sort_by_key(|c| (c.x, c.y));
        cells
    }

    /// Bounding rectangle of non-empty cells, each cell counting as 1x1.
    pub fn used_rect(&self) -> Rect2i {
        if let Some(rect) = self.used_rect_cache.get() {
            return rect;
        }
        let mut rect: Option<Rect2i> = None;
        for data in self.cells.values().filter(|c| !c.cell.is_empty()) {
            rect = Some(match rect {
                None => Rect2i::new(data.coords, IVec2::ZERO),
                Some(r) => r.expand(data.coords),
            });
        }
        let rect = rect
            .map(|r| Rect2i::new(r.position, r.size + IVec2::ONE))
            .unwrap_or_default();
        self.used_rect_cache.set(Some(rect));
        rect
    }
}
