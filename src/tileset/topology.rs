//! Cell topology per tile shape: neighbor directions, neighbor lookup,
//! peering bit validity and cell-to-local mapping.

use glam::{IVec2, Vec2};
use serde::{Deserialize, Serialize};

use super::terrain::TerrainMode;

/// Shape of a single tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileShape {
    #[default]
    Square,
    /// Diamond tiles, laid out diamond-down (x goes bottom-right, y bottom-left).
    Isometric,
    /// Square tiles with every other row (or column) shifted by half a tile.
    HalfOffsetSquare,
    /// Hexagons, stacked with every other row (or column) shifted.
    Hexagon,
}

impl TileShape {
    pub fn is_half_offset(&self) -> bool {
        matches!(self, TileShape::HalfOffsetSquare | TileShape::Hexagon)
    }
}

/// Axis along which half-offset shapes are shifted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetAxis {
    /// Odd rows are shifted right by half a tile.
    #[default]
    Horizontal,
    /// Odd columns are shifted down by half a tile.
    Vertical,
}

/// Direction from a cell to one of its sides or corners.
///
/// Sides have even discriminants and corners odd ones, walking clockwise from
/// the right side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellNeighbor {
    RightSide = 0,
    RightCorner = 1,
    BottomRightSide = 2,
    BottomRightCorner = 3,
    BottomSide = 4,
    BottomCorner = 5,
    BottomLeftSide = 6,
    BottomLeftCorner = 7,
    LeftSide = 8,
    LeftCorner = 9,
    TopLeftSide = 10,
    TopLeftCorner = 11,
    TopSide = 12,
    TopCorner = 13,
    TopRightSide = 14,
    TopRightCorner = 15,
}

/// Number of `CellNeighbor` values.
pub const CELL_NEIGHBOR_COUNT: usize = 16;

impl CellNeighbor {
    pub const ALL: [CellNeighbor; CELL_NEIGHBOR_COUNT] = [
        CellNeighbor::RightSide,
        CellNeighbor::RightCorner,
        CellNeighbor::BottomRightSide,
        CellNeighbor::BottomRightCorner,
        CellNeighbor::BottomSide,
        CellNeighbor::BottomCorner,
        CellNeighbor::BottomLeftSide,
        CellNeighbor::BottomLeftCorner,
        CellNeighbor::LeftSide,
        CellNeighbor::LeftCorner,
        CellNeighbor::TopLeftSide,
        CellNeighbor::TopLeftCorner,
        CellNeighbor::TopSide,
        CellNeighbor::TopCorner,
        CellNeighbor::TopRightSide,
        CellNeighbor::TopRightCorner,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_side(self) -> bool {
        (self as u8) % 2 == 0
    }
}

use CellNeighbor::*;

const SQUARE_SIDES: [CellNeighbor; 4] = [RightSide, BottomSide, LeftSide, TopSide];
const SQUARE_CORNERS: [CellNeighbor; 4] =
    [BottomRightCorner, BottomLeftCorner, TopLeftCorner, TopRightCorner];
const ISO_SIDES: [CellNeighbor; 4] = [BottomRightSide, BottomLeftSide, TopLeftSide, TopRightSide];
const ISO_CORNERS: [CellNeighbor; 4] = [RightCorner, BottomCorner, LeftCorner, TopCorner];
const HORIZONTAL_SIDES: [CellNeighbor; 6] = [
    RightSide,
    BottomRightSide,
    BottomLeftSide,
    LeftSide,
    TopLeftSide,
    TopRightSide,
];
const HORIZONTAL_CORNERS: [CellNeighbor; 6] = [
    BottomRightCorner,
    BottomCorner,
    BottomLeftCorner,
    TopLeftCorner,
    TopCorner,
    TopRightCorner,
];
const VERTICAL_SIDES: [CellNeighbor; 6] = [
    BottomRightSide,
    BottomSide,
    BottomLeftSide,
    TopLeftSide,
    TopSide,
    TopRightSide,
];
const VERTICAL_CORNERS: [CellNeighbor; 6] = [
    RightCorner,
    BottomRightCorner,
    BottomLeftCorner,
    LeftCorner,
    TopLeftCorner,
    TopRightCorner,
];

/// Sides and corners that exist for a shape.
fn sides_and_corners(shape: TileShape, axis: OffsetAxis) -> (&'static [CellNeighbor], &'static [CellNeighbor]) {
    match shape {
        TileShape::Square => (&SQUARE_SIDES, &SQUARE_CORNERS),
        TileShape::Isometric => (&ISO_SIDES, &ISO_CORNERS),
        TileShape::HalfOffsetSquare | TileShape::Hexagon => match axis {
            OffsetAxis::Horizontal => (&HORIZONTAL_SIDES, &HORIZONTAL_CORNERS),
            OffsetAxis::Vertical => (&VERTICAL_SIDES, &VERTICAL_CORNERS),
        },
    }
}

/// Whether a cell of this shape has an adjacent cell in direction `neighbor`.
pub fn is_existing_neighbor(shape: TileShape, axis: OffsetAxis, neighbor: CellNeighbor) -> bool {
    let (sides, corners) = sides_and_corners(shape, axis);
    match shape {
        // Half-offset cells only touch other cells through their sides.
        TileShape::HalfOffsetSquare | TileShape::Hexagon => sides.contains(&neighbor),
        _ => sides.contains(&neighbor) || corners.contains(&neighbor),
    }
}

/// Whether `bit` carries a terrain for the given shape and terrain mode.
pub fn is_valid_peering_bit(shape: TileShape, axis: OffsetAxis, mode: TerrainMode, bit: CellNeighbor) -> bool {
    let (sides, corners) = sides_and_corners(shape, axis);
    match mode {
        TerrainMode::MatchCornersAndSides => sides.contains(&bit) || corners.contains(&bit),
        TerrainMode::MatchCorners => corners.contains(&bit),
        TerrainMode::MatchSides => sides.contains(&bit),
    }
}

/// Coordinates of the cell in direction `neighbor`.
///
/// Directions that do not exist for the shape return `coords` unchanged.
pub fn neighbor_cell(shape: TileShape, axis: OffsetAxis, coords: IVec2, neighbor: CellNeighbor) -> IVec2 {
    let offset = match shape {
        TileShape::Square => match neighbor {
            RightSide => IVec2::new(1, 0),
            BottomRightCorner => IVec2::new(1, 1),
            BottomSide => IVec2::new(0, 1),
            BottomLeftCorner => IVec2::new(-1, 1),
            LeftSide => IVec2::new(-1, 0),
            TopLeftCorner => IVec2::new(-1, -1),
            TopSide => IVec2::new(0, -1),
            TopRightCorner => IVec2::new(1, -1),
            _ => IVec2::ZERO,
        },
        TileShape::Isometric => match neighbor {
            RightCorner => IVec2::new(1, -1),
            BottomRightSide => IVec2::new(1, 0),
            BottomCorner => IVec2::new(1, 1),
            BottomLeftSide => IVec2::new(0, 1),
            LeftCorner => IVec2::new(-1, 1),
            TopLeftSide => IVec2::new(-1, 0),
            TopCorner => IVec2::new(-1, -1),
            TopRightSide => IVec2::new(0, -1),
            _ => IVec2::ZERO,
        },
        TileShape::HalfOffsetSquare | TileShape::Hexagon => match axis {
            OffsetAxis::Horizontal => {
                let odd = coords.y.rem_euclid(2) != 0;
                let o = |when_odd: i32, when_even: i32| if odd { when_odd } else { when_even };
                match neighbor {
                    RightSide => IVec2::new(1, 0),
                    LeftSide => IVec2::new(-1, 0),
                    BottomRightSide => IVec2::new(o(1, 0), 1),
                    BottomLeftSide => IVec2::new(o(0, -1), 1),
                    TopRightSide => IVec2::new(o(1, 0), -1),
                    TopLeftSide => IVec2::new(o(0, -1), -1),
                    BottomCorner => IVec2::new(0, 2),
                    TopCorner => IVec2::new(0, -2),
                    BottomRightCorner => IVec2::new(o(2, 1), 1),
                    BottomLeftCorner => IVec2::new(o(-1, -2), 1),
                    TopRightCorner => IVec2::new(o(2, 1), -1),
                    TopLeftCorner => IVec2::new(o(-1, -2), -1),
                    _ => IVec2::ZERO,
                }
            }
            OffsetAxis::Vertical => {
                let odd = coords.x.rem_euclid(2) != 0;
                let o = |when_odd: i32, when_even: i32| if odd { when_odd } else { when_even };
                match neighbor {
                    BottomSide => IVec2::new(0, 1),
                    TopSide => IVec2::new(0, -1),
                    BottomRightSide => IVec2::new(1, o(1, 0)),
                    TopRightSide => IVec2::new(1, o(0, -1)),
                    BottomLeftSide => IVec2::new(-1, o(1, 0)),
                    TopLeftSide => IVec2::new(-1, o(0, -1)),
                    RightCorner => IVec2::new(2, 0),
                    LeftCorner => IVec2::new(-2, 0),
                    BottomRightCorner => IVec2::new(1, o(2, 1)),
                    BottomLeftCorner => IVec2::new(-1, o(2, 1)),
                    TopRightCorner => IVec2::new(1, o(-1, -2)),
                    TopLeftCorner => IVec2::new(-1, o(-1, -2)),
                    _ => IVec2::ZERO,
                }
            }
        },
    };
    coords + offset
}

/// Center of the cell in layer-local space.
pub fn map_to_local(shape: TileShape, axis: OffsetAxis, tile_size: IVec2, coords: IVec2) -> Vec2 {
    let size = tile_size.as_vec2();
    let half = size * 0.5;
    match shape {
        TileShape::Square => coords.as_vec2() * size + half,
        TileShape::Isometric => Vec2::new(
            (coords.x - coords.y) as f32 * half.x,
            (coords.x + coords.y) as f32 * half.y,
        ) + half,
        TileShape::HalfOffsetSquare | TileShape::Hexagon => {
            // Hexagon rows (or columns) overlap by a quarter tile.
            let spacing = if shape == TileShape::Hexagon { 0.75 } else { 1.0 };
            match axis {
                OffsetAxis::Horizontal => {
                    let shift = if coords.y.rem_euclid(2) != 0 { half.x } else { 0.0 };
                    Vec2::new(
                        coords.x as f32 * size.x + shift,
                        coords.y as f32 * size.y * spacing,
                    ) + half
                }
                OffsetAxis::Vertical => {
                    let shift = if coords.x.rem_euclid(2) != 0 { half.y } else { 0.0 };
                    Vec2::new(
                        coords.x as f32 * size.x * spacing,
                        coords.y as f32 * size.y + shift,
                    ) + half
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parity() {
        for neighbor in CellNeighbor::ALL {
            let name = format!("{:?}", neighbor);
            assert_eq!(neighbor.is_side(), name.ends_with("Side"), "{}", name);
        }
    }

    #[test]
    fn test_square_neighbors_round_trip() {
        let c = IVec2::new(3, -2);
        let shape = TileShape::Square;
        let axis = OffsetAxis::Horizontal;
        let right = neighbor_cell(shape, axis, c, RightSide);
        assert_eq!(right, IVec2::new(4, -2));
        assert_eq!(neighbor_cell(shape, axis, right, LeftSide), c);

        let corner = neighbor_cell(shape, axis, c, TopLeftCorner);
        assert_eq!(neighbor_cell(shape, axis, corner, BottomRightCorner), c);

        // Isometric-only directions don't exist on squares
        assert_eq!(neighbor_cell(shape, axis, c, RightCorner), c);
        assert!(!is_existing_neighbor(shape, axis, RightCorner));
    }

    #[test]
    fn test_half_offset_sides_are_symmetric() {
        let shape = TileShape::Hexagon;
        for axis in [OffsetAxis::Horizontal, OffsetAxis::Vertical] {
            for y in -3..3 {
                for x in -3..3 {
                    let c = IVec2::new(x, y);
                    for (a, b) in [
                        (BottomRightSide, TopLeftSide),
                        (BottomLeftSide, TopRightSide),
                        (RightSide, LeftSide),
                        (BottomSide, TopSide),
                    ] {
                        if !is_existing_neighbor(shape, axis, a) {
                            continue;
                        }
                        let n = neighbor_cell(shape, axis, c, a);
                        assert_eq!(neighbor_cell(shape, axis, n, b), c, "{:?} {:?} {:?}", axis, c, a);
                    }
                }
            }
        }
    }

    #[test]
    fn test_isometric_neighbors_are_adjacent_in_local_space() {
        let size = IVec2::new(64, 32);
        let c = IVec2::new(2, 5);
        let center = map_to_local(TileShape::Isometric, OffsetAxis::Horizontal, size, c);
        let right = neighbor_cell(TileShape::Isometric, OffsetAxis::Horizontal, c, RightCorner);
        let right_center = map_to_local(TileShape::Isometric, OffsetAxis::Horizontal, size, right);
        assert_eq!(right_center - center, Vec2::new(64.0, 0.0));

        let below = neighbor_cell(TileShape::Isometric, OffsetAxis::Horizontal, c, BottomCorner);
        let below_center = map_to_local(TileShape::Isometric, OffsetAxis::Horizontal, size, below);
        assert_eq!(below_center - center, Vec2::new(0.0, 32.0));
    }

    #[test]
    fn test_peering_bits_per_mode() {
        let s = TileShape::Square;
        let a = OffsetAxis::Horizontal;
        assert!(is_valid_peering_bit(s, a, TerrainMode::MatchSides, RightSide));
        assert!(!is_valid_peering_bit(s, a, TerrainMode::MatchSides, TopRightCorner));
        assert!(is_valid_peering_bit(s, a, TerrainMode::MatchCorners, TopRightCorner));
        assert!(is_valid_peering_bit(s, a, TerrainMode::MatchCornersAndSides, TopRightCorner));
        assert!(!is_valid_peering_bit(s, a, TerrainMode::MatchCornersAndSides, TopCorner));
    }

    #[test]
    fn test_square_map_to_local() {
        let p = map_to_local(TileShape::Square, OffsetAxis::Horizontal, IVec2::new(16, 16), IVec2::new(-1, 2));
        assert_eq!(p, Vec2::new(-8.0, 40.0));
    }
}
