//! Patterns: standalone blocks of cells that can be copied out of a layer and
//! pasted back elsewhere.

use std::collections::BTreeMap;

use glam::IVec2;

use crate::tilemap::TileMapCell;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileMapPattern {
    /// Keyed by (x, y) so iteration is deterministic.
    cells: BTreeMap<(i32, i32), TileMapCell>,
    size: IVec2,
}

impl TileMapPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cell. Coordinates must be non-negative; writing the empty cell
    /// removes the entry.
    pub fn set_cell(&mut self, coords: IVec2, cell: TileMapCell) {
        if coords.x < 0 || coords.y < 0 {
            log::warn!("Pattern cell coords must be positive, got ({}, {})", coords.x, coords.y);
            return;
        }
        if cell.is_empty() {
            self.cells.remove(&(coords.x, coords.y));
            self.recompute_size();
        } else {
            self.cells.insert((coords.x, coords.y), cell);
            self.size = self.size.max(coords + IVec2::ONE);
        }
    }

    pub fn cell(&self, coords: IVec2) -> TileMapCell {
        self.cells
            .get(&(coords.x, coords.y))
            .copied()
            .unwrap_or(TileMapCell::EMPTY)
    }

    pub fn has_cell(&self, coords: IVec2) -> bool {
        self.cells.contains_key(&(coords.x, coords.y))
    }

    pub fn used_cells(&self) -> Vec<IVec2> {
        self.cells.keys().map(|(x, y)| IVec2::new(*x, *y)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IVec2, TileMapCell)> + '_ {
        self.cells.iter().map(|((x, y), c)| (IVec2::new(*x, *y), *c))
    }

    pub fn size(&self) -> IVec2 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn recompute_size(&mut self) {
        self.size = self
            .cells
            .keys()
            .fold(IVec2::ZERO, |acc, (x, y)| acc.max(IVec2::new(x + 1, y + 1)));
    }
}
