//! Terrain constraints keyed by a canonical peering position.
//!
//! A corner or side is shared by several cells. Each of them names it with a
//! different (cell, direction) pair, so constraints are normalized onto one
//! base cell and a small bit index. Bit 0 is the cell centre.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use glam::IVec2;

use crate::tileset::{CellNeighbor, OffsetAxis, TileSet, TileShape};

use CellNeighbor::*;

/// Priority of constraints inferred from the board.
pub const DEFAULT_PRIORITY: i32 = 1;
/// Priority of constraints derived from already decided cells.
pub const DECIDED_PRIORITY: i32 = 5;
/// Priority of constraints coming from the paint gesture.
pub const PAINT_PRIORITY: i32 = 10;

#[derive(Clone, Copy, Debug)]
pub struct TerrainConstraint {
    base: IVec2,
    bit: u8,
    terrain: i32,
    priority: i32,
}

impl PartialEq for TerrainConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TerrainConstraint {}

impl PartialOrd for TerrainConstraint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by position only: terrain and priority are payload.
impl Ord for TerrainConstraint {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.base.x, self.base.y, self.bit).cmp(&(other.base.x, other.base.y, other.bit))
    }
}

impl TerrainConstraint {
    /// Constraint on the centre of a cell.
    pub fn centre(coords: IVec2, terrain: i32) -> Self {
        Self {
            base: coords,
            bit: 0,
            terrain,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Constraint on a peering bit of a cell. `None` if the direction is not a
    /// peering position of the tile shape.
    pub fn peering(tile_set: &TileSet, coords: IVec2, bit: CellNeighbor, terrain: i32) -> Option<Self> {
        let (base, bit) = normalize(tile_set, coords, bit)?;
        Some(Self {
            base,
            bit,
            terrain,
            priority: DEFAULT_PRIORITY,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_terrain(mut self, terrain: i32) -> Self {
        self.terrain = terrain;
        self
    }

    pub fn terrain(&self) -> i32 {
        self.terrain
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn base(&self) -> IVec2 {
        self.base
    }

    pub fn is_centre(&self) -> bool {
        self.bit == 0
    }

    /// Every cell touching this position, with the direction it uses for it.
    /// Empty for centre constraints.
    pub fn overlapping(&self, tile_set: &TileSet) -> Vec<(IVec2, CellNeighbor)> {
        if self.is_centre() {
            return Vec::new();
        }
        let base = self.base;
        let n = |dir| tile_set.neighbor_cell(base, dir);
        match (tile_set.tile_shape, tile_set.offset_axis) {
            (TileShape::Square, _) => match self.bit {
                1 => vec![(base, RightSide), (n(RightSide), LeftSide)],
                2 => vec![
                    (base, BottomRightCorner),
                    (n(RightSide), BottomLeftCorner),
                    (n(BottomRightCorner), TopLeftCorner),
                    (n(BottomSide), TopRightCorner),
                ],
                3 => vec![(base, BottomSide), (n(BottomSide), TopSide)],
                _ => Vec::new(),
            },
            (TileShape::Isometric, _) => match self.bit {
                1 => vec![(base, BottomRightSide), (n(BottomRightSide), TopLeftSide)],
                2 => vec![
                    (base, BottomCorner),
                    (n(BottomRightSide), LeftCorner),
                    (n(BottomCorner), TopCorner),
                    (n(BottomLeftSide), RightCorner),
                ],
                3 => vec![(base, BottomLeftSide), (n(BottomLeftSide), TopRightSide)],
                _ => Vec::new(),
            },
            (_, OffsetAxis::Horizontal) => match self.bit {
                1 => vec![(base, RightSide), (n(RightSide), LeftSide)],
                2 => vec![
                    (base, BottomRightCorner),
                    (n(RightSide), BottomLeftCorner),
                    (n(BottomRightSide), TopCorner),
                ],
                3 => vec![(base, BottomRightSide), (n(BottomRightSide), TopLeftSide)],
                4 => vec![
                    (base, BottomCorner),
                    (n(BottomRightSide), TopLeftCorner),
                    (n(BottomLeftSide), TopRightCorner),
                ],
                5 => vec![(base, BottomLeftSide), (n(BottomLeftSide), TopRightSide)],
                _ => Vec::new(),
            },
            (_, OffsetAxis::Vertical) => match self.bit {
                1 => vec![
                    (base, RightCorner),
                    (n(TopRightSide), BottomLeftCorner),
                    (n(BottomRightSide), TopLeftCorner),
                ],
                2 => vec![(base, BottomRightSide), (n(BottomRightSide), TopLeftSide)],
                3 => vec![
                    (base, BottomRightCorner),
                    (n(BottomRightSide), LeftCorner),
                    (n(BottomSide), TopRightCorner),
                ],
                4 => vec![(base, BottomSide), (n(BottomSide), TopSide)],
                5 => vec![(base, BottomLeftSide), (n(BottomLeftSide), TopRightSide)],
                _ => Vec::new(),
            },
        }
    }
}

/// Map a (cell, direction) pair onto its canonical (base cell, bit).
fn normalize(tile_set: &TileSet, coords: IVec2, bit: CellNeighbor) -> Option<(IVec2, u8)> {
    let n = |dir| tile_set.neighbor_cell(coords, dir);
    let normalized = match (tile_set.tile_shape, tile_set.offset_axis) {
        (TileShape::Square, _) => match bit {
            RightSide => (coords, 1),
            BottomRightCorner => (coords, 2),
            BottomSide => (coords, 3),
            BottomLeftCorner => (n(LeftSide), 2),
            LeftSide => (n(LeftSide), 1),
            TopLeftCorner => (n(TopLeftCorner), 2),
            TopSide => (n(TopSide), 3),
            TopRightCorner => (n(TopSide), 2),
            _ => return None,
        },
        (TileShape::Isometric, _) => match bit {
            RightCorner => (n(TopRightSide), 2),
            BottomRightSide => (coords, 1),
            BottomCorner => (coords, 2),
            BottomLeftSide => (coords, 3),
            LeftCorner => (n(TopLeftSide), 2),
            TopLeftSide => (n(TopLeftSide), 1),
            TopCorner => (n(TopCorner), 2),
            TopRightSide => (n(TopRightSide), 3),
            _ => return None,
        },
        (_, OffsetAxis::Horizontal) => match bit {
            RightSide => (coords, 1),
            BottomRightCorner => (coords, 2),
            BottomRightSide => (coords, 3),
            BottomCorner => (coords, 4),
            BottomLeftSide => (coords, 5),
            BottomLeftCorner => (n(LeftSide), 2),
            LeftSide => (n(LeftSide), 1),
            TopLeftCorner => (n(TopLeftSide), 4),
            TopLeftSide => (n(TopLeftSide), 3),
            TopCorner => (n(TopLeftSide), 2),
            TopRightSide => (n(TopRightSide), 5),
            TopRightCorner => (n(TopRightSide), 4),
            _ => return None,
        },
        (_, OffsetAxis::Vertical) => match bit {
            RightCorner => (coords, 1),
            BottomRightSide => (coords, 2),
            BottomRightCorner => (coords, 3),
            BottomSide => (coords, 4),
            BottomLeftCorner => (n(BottomLeftSide), 1),
            BottomLeftSide => (coords, 5),
            LeftCorner => (n(TopLeftSide), 3),
            TopLeftSide => (n(TopLeftSide), 2),
            TopLeftCorner => (n(TopLeftSide), 1),
            TopSide => (n(TopSide), 4),
            TopRightCorner => (n(TopSide), 3),
            TopRightSide => (n(TopRightSide), 5),
            _ => return None,
        },
    };
    Some(normalized)
}

/// Constraints of one fill, at most one per position.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    set: BTreeSet<TerrainConstraint>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint unless its position is already constrained.
    pub fn insert(&mut self, constraint: TerrainConstraint) -> bool {
        self.set.insert(constraint)
    }

    /// Add a constraint, overwriting any previous one at its position.
    pub fn replace(&mut self, constraint: TerrainConstraint) {
        self.set.replace(constraint);
    }

    /// Constraint at the position of `probe`, whatever its terrain.
    pub fn get(&self, probe: &TerrainConstraint) -> Option<&TerrainConstraint> {
        self.set.get(probe)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TerrainConstraint> {
        self.set.iter()
    }
}

impl Extend<TerrainConstraint> for ConstraintSet {
    fn extend<I: IntoIterator<Item = TerrainConstraint>>(&mut self, iter: I) {
        for c in iter {
            self.insert(c);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_side_normalizes_to_one_key() {
        let tile_set = TileSet::default();
        let a = TerrainConstraint::peering(&tile_set, IVec2::new(0, 0), RightSide, 0);
        let b = TerrainConstraint::peering(&tile_set, IVec2::new(1, 0), LeftSide, 1);
        assert!(a.is_some());
        assert_eq!(a, b);

        let c = TerrainConstraint::peering(&tile_set, IVec2::new(0, 0), BottomSide, 0);
        assert_ne!(a, c);
    }

    #[test]
    fn test_square_corner_overlaps_four_cells() {
        let tile_set = TileSet::default();
        let Some(corner) = TerrainConstraint::peering(&tile_set, IVec2::new(1, 1), TopLeftCorner, 0) else {
            panic!("top left corner exists on squares");
        };
        assert_eq!(corner.base(), IVec2::new(0, 0));

        let overlapping = corner.overlapping(&tile_set);
        assert_eq!(overlapping.len(), 4);
        assert!(overlapping.contains(&(IVec2::new(1, 1), TopLeftCorner)));
        assert!(overlapping.contains(&(IVec2::new(0, 1), TopRightCorner)));

        // Every overlapping phrasing maps back to the same key
        for (coords, dir) in overlapping {
            assert_eq!(TerrainConstraint::peering(&tile_set, coords, dir, 0), Some(corner));
        }
    }

    #[test]
    fn test_overlapping_cells_share_the_key_on_every_shape() {
        let shapes = [
            TileShape::Square,
            TileShape::Isometric,
            TileShape::HalfOffsetSquare,
            TileShape::Hexagon,
        ];
        for shape in shapes {
            for axis in [OffsetAxis::Horizontal, OffsetAxis::Vertical] {
                let tile_set = TileSet {
                    tile_shape: shape,
                    offset_axis: axis,
                    ..TileSet::default()
                };
                for y in -3..=3 {
                    for x in -3..=3 {
                        let coords = IVec2::new(x, y);
                        for dir in CellNeighbor::ALL {
                            let Some(key) = TerrainConstraint::peering(&tile_set, coords, dir, 0) else {
                                continue;
                            };
                            let overlapping = key.overlapping(&tile_set);
                            assert!(
                                overlapping.contains(&(coords, dir)),
                                "{:?}/{:?}: {:?} {:?} missing from its own overlap",
                                shape,
                                axis,
                                coords,
                                dir
                            );
                            for (other, other_dir) in overlapping {
                                assert_eq!(
                                    TerrainConstraint::peering(&tile_set, other, other_dir, 0),
                                    Some(key),
                                    "{:?}/{:?}: {:?} {:?} seen from {:?} {:?}",
                                    shape,
                                    axis,
                                    coords,
                                    dir,
                                    other,
                                    other_dir
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_iso_rejects_square_directions() {
        let tile_set = TileSet {
            tile_shape: TileShape::Isometric,
            ..TileSet::default()
        };
        assert!(TerrainConstraint::peering(&tile_set, IVec2::ZERO, RightSide, 0).is_none());
        assert!(TerrainConstraint::peering(&tile_set, IVec2::ZERO, BottomCorner, 0).is_some());
    }

    #[test]
    fn test_insert_keeps_first_replace_overwrites() {
        let mut set = ConstraintSet::new();
        let coords = IVec2::new(3, -2);
        assert!(set.insert(TerrainConstraint::centre(coords, 0).with_priority(PAINT_PRIORITY)));
        assert!(!set.insert(TerrainConstraint::centre(coords, 1)));
        let probe = TerrainConstraint::centre(coords, -1);
        assert_eq!(set.get(&probe).map(|c| c.terrain()), Some(0));

        set.replace(TerrainConstraint::centre(coords, 1).with_priority(DECIDED_PRIORITY));
        assert_eq!(set.get(&probe).map(|c| (c.terrain(), c.priority())), Some((1, DECIDED_PRIORITY)));
        assert_eq!(set.len(), 1);
    }
}
