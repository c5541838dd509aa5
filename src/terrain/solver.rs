//! Terrain fill: picks a terrain pattern for painted cells and their
//! surroundings by minimizing the priority of violated constraints.

use std::collections::BTreeMap;

use glam::IVec2;
use rustc_hash::FxHashSet;

use super::constraint::{ConstraintSet, TerrainConstraint, DECIDED_PRIORITY, PAINT_PRIORITY};
use super::{TerrainBoard, TerrainError, TerrainFill};
use crate::tileset::{CellNeighbor, TerrainsPattern, TileData, TileSet};

/// Tile data of the cell at `coords` if it belongs to `terrain_set`.
fn terrain_tile_data<'a>(
    tile_set: &'a TileSet,
    board: &impl TerrainBoard,
    coords: IVec2,
    terrain_set: i32,
) -> Option<&'a TileData> {
    tile_set
        .atlas_tile_data(&board.cell(coords))
        .filter(|data| data.terrain_set == terrain_set)
}

/// Pattern currently on the board at `coords`, the empty pattern for cells
/// outside the terrain set.
pub fn current_pattern(tile_set: &TileSet, board: &impl TerrainBoard, coords: IVec2, terrain_set: i32) -> TerrainsPattern {
    terrain_tile_data(tile_set, board, coords, terrain_set)
        .map(|data| tile_set.terrains_pattern_of(data))
        .unwrap_or(TerrainsPattern::EMPTY)
}

fn valid_bits(tile_set: &TileSet, terrain_set: i32) -> impl Iterator<Item = CellNeighbor> + '_ {
    CellNeighbor::ALL
        .into_iter()
        .filter(move |bit| tile_set.is_valid_terrain_peering_bit(terrain_set, *bit))
}

fn check_terrain_set(tile_set: &TileSet, terrain_set: i32) -> Result<(), TerrainError> {
    if tile_set.terrain_set(terrain_set).is_none() {
        return Err(TerrainError::InvalidTerrainSet {
            terrain_set,
            count: tile_set.terrain_sets_count(),
        });
    }
    Ok(())
}

/// Cells a fill may rewrite: the painted ones, last painted first, then the
/// neighbours selected by `include`.
fn modifiable_cells(
    tile_set: &TileSet,
    cells: &[IVec2],
    include: impl Fn(CellNeighbor) -> bool,
) -> (Vec<IVec2>, FxHashSet<IVec2>) {
    let mut list = Vec::new();
    let mut seen = FxHashSet::default();
    for coords in cells.iter().rev() {
        if seen.insert(*coords) {
            list.push(*coords);
        }
    }
    let painted = seen.clone();
    for coords in cells {
        for bit in CellNeighbor::ALL.into_iter().filter(|b| include(*b)) {
            let neighbor = tile_set.neighbor_cell(*coords, bit);
            if seen.insert(neighbor) {
                list.push(neighbor);
            }
        }
    }
    (list, painted)
}

/// Constraints a pattern placed at `coords` imposes on its surroundings.
pub fn constraints_from_pattern(
    tile_set: &TileSet,
    coords: IVec2,
    terrain_set: i32,
    pattern: &TerrainsPattern,
) -> Vec<TerrainConstraint> {
    let mut output = vec![TerrainConstraint::centre(coords, pattern.terrain())];
    output.extend(valid_bits(tile_set, terrain_set).filter_map(|bit| {
        TerrainConstraint::peering(tile_set, coords, bit, pattern.terrain_peering_bit(bit))
    }));
    output
}

/// Constraints inferred from the board around the painted cells.
///
/// Each peering position touched by a painted cell takes the terrain most
/// cells overlapping it agree on, if a single one has the most votes. Centres
/// of painted cells keep their current terrain as a weak constraint.
pub fn constraints_from_painted_cells(
    tile_set: &TileSet,
    board: &impl TerrainBoard,
    painted: &FxHashSet<IVec2>,
    terrain_set: i32,
    ignore_empty_terrains: bool,
) -> Vec<TerrainConstraint> {
    let mut positions = ConstraintSet::new();
    for coords in painted {
        positions.extend(
            valid_bits(tile_set, terrain_set).filter_map(|bit| TerrainConstraint::peering(tile_set, *coords, bit, -1)),
        );
    }

    let mut output = Vec::new();
    for position in positions.iter() {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for (coords, bit) in position.overlapping(tile_set) {
            let terrain = terrain_tile_data(tile_set, board, coords, terrain_set)
                .map(|data| data.terrain_peering_bit(bit))
                .unwrap_or(-1);
            if !ignore_empty_terrains || terrain >= 0 {
                *counts.entry(terrain).or_default() += 1;
            }
        }

        let Some(max) = counts.values().copied().max() else {
            continue;
        };
        let mut winners = counts.iter().filter(|(_, count)| **count == max);
        if let (Some((terrain, _)), None) = (winners.next(), winners.next()) {
            output.push(position.with_terrain(*terrain));
        }
    }

    let mut centres: Vec<IVec2> = painted.iter().copied().collect();
    centres.sort_by_key(|c| (c.x, c.y));
    for coords in centres {
        let terrain = terrain_tile_data(tile_set, board, coords, terrain_set)
            .map(|data| data.terrain)
            .unwrap_or(-1);
        if !ignore_empty_terrains || terrain >= 0 {
            output.push(TerrainConstraint::centre(coords, terrain));
        }
    }
    output
}

/// Lowest scoring pattern for `coords`.
///
/// A pattern scores the summed priority of the constraints it violates. Bits
/// without a constraint must keep their current value, otherwise the pattern
/// is not considered. Patterns are tried in ascending order and the first
/// minimum wins; the current pattern is kept if none qualifies.
pub fn best_pattern(
    tile_set: &TileSet,
    terrain_set: i32,
    coords: IVec2,
    constraints: &ConstraintSet,
    current: &TerrainsPattern,
    candidates: &[TerrainsPattern],
) -> TerrainsPattern {
    let mut best = *current;
    let mut best_score = i32::MAX;

    'candidates: for pattern in candidates {
        let mut score = 0;

        let centre = TerrainConstraint::centre(coords, pattern.terrain());
        match constraints.get(&centre) {
            Some(c) if c.terrain() != pattern.terrain() => score += c.priority(),
            Some(_) => {}
            None if current.terrain() != pattern.terrain() => continue,
            None => {}
        }

        for bit in valid_bits(tile_set, terrain_set) {
            let value = pattern.terrain_peering_bit(bit);
            let Some(probe) = TerrainConstraint::peering(tile_set, coords, bit, value) else {
                continue;
            };
            match constraints.get(&probe) {
                Some(c) if c.terrain() != value => score += c.priority(),
                Some(_) => {}
                None if current.terrain_peering_bit(bit) != value => continue 'candidates,
                None => {}
            }
        }

        if score < best_score {
            best = *pattern;
            best_score = score;
        }
    }
    best
}

/// Decide the cells of `to_replace` in order, each decision constraining the
/// following ones.
pub fn fill_constraints(
    tile_set: &TileSet,
    board: &impl TerrainBoard,
    to_replace: &[IVec2],
    terrain_set: i32,
    constraints: &ConstraintSet,
) -> TerrainFill {
    let mut constraints = constraints.clone();
    let candidates = tile_set.terrains_pattern_set(terrain_set);

    let mut output = Vec::with_capacity(to_replace.len());
    for coords in to_replace {
        let current = current_pattern(tile_set, board, *coords, terrain_set);
        let pattern = best_pattern(tile_set, terrain_set, *coords, &constraints, &current, &candidates);
        for c in constraints_from_pattern(tile_set, *coords, terrain_set, &pattern) {
            constraints.replace(c.with_priority(DECIDED_PRIORITY));
        }
        output.push((*coords, pattern));
    }
    output
}

/// Paint `cells` with `terrain`, connecting them to each other and to
/// neighbours of the same terrain.
///
/// With `ignore_empty_terrains`, empty neighbours are connected to as well:
/// they are free to become part of the painted terrain.
pub fn fill_connect(
    tile_set: &TileSet,
    board: &impl TerrainBoard,
    cells: &[IVec2],
    terrain_set: i32,
    terrain: i32,
    ignore_empty_terrains: bool,
) -> Result<TerrainFill, TerrainError> {
    check_terrain_set(tile_set, terrain_set)?;

    let (can_modify, painted) = modifiable_cells(tile_set, cells, |bit| tile_set.is_existing_neighbor(bit));

    let connected: FxHashSet<IVec2> = can_modify
        .iter()
        .copied()
        .filter(|coords| {
            painted.contains(coords)
                || terrain_tile_data(tile_set, board, *coords, terrain_set).is_some_and(|d| d.terrain == terrain)
                || (ignore_empty_terrains && board.cell(*coords).is_empty())
        })
        .collect();

    let mut constraints = ConstraintSet::new();
    for coords in cells {
        constraints.insert(TerrainConstraint::centre(*coords, terrain).with_priority(PAINT_PRIORITY));

        for bit in valid_bits(tile_set, terrain_set) {
            let Some(c) = TerrainConstraint::peering(tile_set, *coords, bit, terrain) else {
                continue;
            };
            let c = c.with_priority(PAINT_PRIORITY);
            let connects = if bit.is_side() {
                connected.contains(&tile_set.neighbor_cell(*coords, bit))
            } else {
                c.overlapping(tile_set).iter().all(|(coords, _)| connected.contains(coords))
            };
            if connects {
                constraints.insert(c);
            }
        }
    }

    constraints.extend(constraints_from_painted_cells(
        tile_set,
        board,
        &painted,
        terrain_set,
        ignore_empty_terrains,
    ));

    Ok(fill_constraints(tile_set, board, &can_modify, terrain_set, &constraints))
}

/// Paint a path of neighbouring cells, connecting each cell to the next.
pub fn fill_path(
    tile_set: &TileSet,
    board: &impl TerrainBoard,
    path: &[IVec2],
    terrain_set: i32,
    terrain: i32,
    ignore_empty_terrains: bool,
) -> Result<TerrainFill, TerrainError> {
    check_terrain_set(tile_set, terrain_set)?;

    let mut links = Vec::with_capacity(path.len().saturating_sub(1));
    for pair in path.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let bit = CellNeighbor::ALL
            .into_iter()
            .filter(|bit| tile_set.is_existing_neighbor(*bit))
            .find(|bit| tile_set.neighbor_cell(from, *bit) == to)
            .ok_or(TerrainError::InvalidPath { from, to })?;
        links.push((from, bit));
    }

    let (can_modify, painted) =
        modifiable_cells(tile_set, path, |bit| tile_set.is_valid_terrain_peering_bit(terrain_set, bit));

    let mut constraints = ConstraintSet::new();
    for coords in path {
        constraints.insert(TerrainConstraint::centre(*coords, terrain).with_priority(PAINT_PRIORITY));
    }
    for (coords, bit) in links {
        if let Some(c) = TerrainConstraint::peering(tile_set, coords, bit, terrain) {
            constraints.insert(c.with_priority(PAINT_PRIORITY));
        }
    }

    constraints.extend(constraints_from_painted_cells(
        tile_set,
        board,
        &painted,
        terrain_set,
        ignore_empty_terrains,
    ));

    Ok(fill_constraints(tile_set, board, &can_modify, terrain_set, &constraints))
}

/// Paint `cells` with an explicit pattern.
pub fn fill_pattern(
    tile_set: &TileSet,
    board: &impl TerrainBoard,
    cells: &[IVec2],
    terrain_set: i32,
    pattern: &TerrainsPattern,
    ignore_empty_terrains: bool,
) -> Result<TerrainFill, TerrainError> {
    check_terrain_set(tile_set, terrain_set)?;

    let (can_modify, painted) =
        modifiable_cells(tile_set, cells, |bit| tile_set.is_valid_terrain_peering_bit(terrain_set, bit));

    let mut constraints = ConstraintSet::new();
    for coords in cells {
        for c in constraints_from_pattern(tile_set, *coords, terrain_set, pattern) {
            constraints.insert(c.with_priority(PAINT_PRIORITY));
        }
    }

    constraints.extend(constraints_from_painted_cells(
        tile_set,
        board,
        &painted,
        terrain_set,
        ignore_empty_terrains,
    ));

    Ok(fill_constraints(tile_set, board, &can_modify, terrain_set, &constraints))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tilemap::{GridStore, TileMapCell};
    use crate::tileset::tests::{sides_tile, terrain_tile_set, TERRAIN_T, TERRAIN_U};
    use crate::tileset::topology::is_valid_peering_bit;
    use crate::tileset::{
        AtlasSource, AtlasTile, OffsetAxis, Terrain, TerrainMode, TerrainSet, TileSetSource, TileShape,
    };
    use rustc_hash::FxHashMap;

    fn pattern_at(fill: &TerrainFill, coords: IVec2) -> Option<TerrainsPattern> {
        fill.iter().find(|(c, _)| *c == coords).map(|(_, p)| *p)
    }

    fn full(terrain: i32) -> TerrainsPattern {
        let mut pattern = TerrainsPattern::new(terrain);
        for bit in [
            CellNeighbor::RightSide,
            CellNeighbor::BottomSide,
            CellNeighbor::LeftSide,
            CellNeighbor::TopSide,
        ] {
            pattern.set_terrain_peering_bit(bit, terrain);
        }
        pattern
    }

    /// Terrain set plus a T tile whose right side is U, at atlas (2, 0).
    fn tile_set_with_transition() -> TileSet {
        let mut tile_set = terrain_tile_set();
        if let Some(TileSetSource::Atlas(atlas)) = tile_set.sources.get_mut(&0) {
            let (t, u) = (TERRAIN_T, TERRAIN_U);
            atlas.add_tile(AtlasTile::new(IVec2::new(2, 0), sides_tile(t, [u, t, t, t])));
        }
        tile_set
    }

    /// Tile set holding one tile per combination of centre and valid peering
    /// bits over terrains T and U, plus the cell of the all-U tile.
    fn complete_tile_set(shape: TileShape, axis: OffsetAxis, mode: TerrainMode) -> (TileSet, TileMapCell) {
        let bits: Vec<CellNeighbor> = CellNeighbor::ALL
            .into_iter()
            .filter(|bit| is_valid_peering_bit(shape, axis, mode, *bit))
            .collect();
        let combos = 1 << bits.len();
        let coords_of = |index: i32| IVec2::new(index % 32, index / 32);

        let mut atlas = AtlasSource {
            texture: Some("terrain.png".to_string()),
            grid_size: IVec2::new(32, 32),
            tiles: Vec::new(),
        };
        for centre in [TERRAIN_T, TERRAIN_U] {
            for mask in 0..combos {
                let mut data = TileData {
                    terrain_set: 0,
                    terrain: centre,
                    ..TileData::default()
                };
                for (i, bit) in bits.iter().enumerate() {
                    let terrain = if (mask >> i) & 1 == 1 { TERRAIN_U } else { TERRAIN_T };
                    data.set_terrain_peering_bit(*bit, terrain);
                }
                atlas.add_tile(AtlasTile::new(coords_of(centre * combos + mask), data));
            }
        }

        let mut tile_set = TileSet {
            tile_shape: shape,
            offset_axis: axis,
            ..TileSet::default()
        };
        tile_set.terrain_sets.push(TerrainSet {
            mode,
            terrains: ["T", "U"]
                .into_iter()
                .map(|name| Terrain {
                    name: name.to_string(),
                    color: crate::config::Color::WHITE,
                })
                .collect(),
        });
        tile_set.add_source(0, TileSetSource::Atlas(atlas));
        let full_u = TileMapCell::new(0, coords_of(TERRAIN_U * combos + combos - 1), 0);
        (tile_set, full_u)
    }

    /// Board covering -4..=4 on both axes with `cell` everywhere.
    fn filled_board(cell: TileMapCell) -> (GridStore, Vec<IVec2>) {
        let mut board = GridStore::new();
        let mut region = Vec::new();
        for y in -4..=4 {
            for x in -4..=4 {
                board.set(IVec2::new(x, y), cell);
                region.push(IVec2::new(x, y));
            }
        }
        (board, region)
    }

    /// Applies `fill` over the board and checks that every peering position
    /// inside `region` holds one terrain, whichever cell names it.
    fn assert_shared_bits_agree(tile_set: &TileSet, board: &GridStore, region: &[IVec2], fill: &TerrainFill) {
        let decided: FxHashMap<IVec2, TerrainsPattern> = fill.iter().copied().collect();
        for coords in decided.keys() {
            assert!(region.contains(coords), "{:?} decided outside the board", coords);
        }

        let mut seen = ConstraintSet::new();
        for coords in region {
            let pattern = decided
                .get(coords)
                .copied()
                .unwrap_or_else(|| current_pattern(tile_set, board, *coords, 0));
            for bit in valid_bits(tile_set, 0) {
                let value = pattern.terrain_peering_bit(bit);
                let Some(c) = TerrainConstraint::peering(tile_set, *coords, bit, value) else {
                    continue;
                };
                if !seen.insert(c) {
                    let prior = seen.get(&c).map(|p| p.terrain());
                    assert_eq!(prior, Some(value), "{:?} {:?} disagrees with a neighbour", coords, bit);
                }
            }
        }
    }

    #[test]
    fn test_connect_on_vertical_hexagons_keeps_corners_shared() {
        let (tile_set, full_u) = complete_tile_set(TileShape::Hexagon, OffsetAxis::Vertical, TerrainMode::MatchCorners);
        let (board, region) = filled_board(full_u);

        // Three hexagons meeting at the bottom right corner of the origin
        let origin = IVec2::ZERO;
        let right = tile_set.neighbor_cell(origin, CellNeighbor::BottomRightSide);
        let below = tile_set.neighbor_cell(origin, CellNeighbor::BottomSide);
        let fill = fill_connect(&tile_set, &board, &[origin, right, below], 0, TERRAIN_T, true).unwrap();

        for coords in [origin, right, below] {
            assert_eq!(pattern_at(&fill, coords).map(|p| p.terrain()), Some(TERRAIN_T));
        }
        let corner = [
            (origin, CellNeighbor::BottomRightCorner),
            (right, CellNeighbor::LeftCorner),
            (below, CellNeighbor::TopRightCorner),
        ];
        for (coords, bit) in corner {
            let pattern = pattern_at(&fill, coords).unwrap();
            assert_eq!(pattern.terrain_peering_bit(bit), TERRAIN_T, "{:?} {:?}", coords, bit);
        }
        assert_shared_bits_agree(&tile_set, &board, &region, &fill);
    }

    #[test]
    fn test_connect_on_isometric_keeps_bits_shared() {
        let (tile_set, full_u) = complete_tile_set(
            TileShape::Isometric,
            OffsetAxis::Horizontal,
            TerrainMode::MatchCornersAndSides,
        );
        let (board, region) = filled_board(full_u);

        let block = [IVec2::new(0, 0), IVec2::new(1, 0), IVec2::new(0, 1), IVec2::new(1, 1)];
        let fill = fill_connect(&tile_set, &board, &block, 0, TERRAIN_T, true).unwrap();

        for coords in block {
            assert_eq!(pattern_at(&fill, coords).map(|p| p.terrain()), Some(TERRAIN_T));
        }
        // The diamond in the middle of the block
        let corner = [
            (IVec2::new(0, 0), CellNeighbor::BottomCorner),
            (IVec2::new(1, 0), CellNeighbor::LeftCorner),
            (IVec2::new(1, 1), CellNeighbor::TopCorner),
            (IVec2::new(0, 1), CellNeighbor::RightCorner),
        ];
        for (coords, bit) in corner {
            let pattern = pattern_at(&fill, coords).unwrap();
            assert_eq!(pattern.terrain_peering_bit(bit), TERRAIN_T, "{:?} {:?}", coords, bit);
        }
        assert_eq!(
            pattern_at(&fill, IVec2::new(0, 0)).map(|p| p.terrain_peering_bit(CellNeighbor::BottomRightSide)),
            Some(TERRAIN_T)
        );
        assert_shared_bits_agree(&tile_set, &board, &region, &fill);
    }

    #[test]
    fn test_connect_on_empty_board_matches_all_bits() {
        let tile_set = terrain_tile_set();
        let board = GridStore::new();
        let centre = IVec2::new(1, 1);

        let fill = fill_connect(&tile_set, &board, &[centre], 0, TERRAIN_T, true).unwrap();
        let pattern = pattern_at(&fill, centre).unwrap();
        assert_eq!(pattern, full(TERRAIN_T));

        // The 3x3 surroundings stay empty
        assert_eq!(fill.len(), 9);
        for (coords, pattern) in &fill {
            if *coords != centre {
                assert!(pattern.is_empty(), "{:?} got {:?}", coords, pattern);
            }
        }
    }

    #[test]
    fn test_connect_keeps_conflicting_edge_when_cheaper() {
        let tile_set = tile_set_with_transition();
        let mut board = GridStore::new();
        board.set(IVec2::new(1, 0), TileMapCell::new(0, IVec2::new(1, 0), 0));

        let fill = fill_connect(&tile_set, &board, &[IVec2::ZERO], 0, TERRAIN_T, true).unwrap();
        let painted = pattern_at(&fill, IVec2::ZERO).unwrap();
        assert_eq!(painted.terrain(), TERRAIN_T);
        assert_eq!(painted.terrain_peering_bit(CellNeighbor::RightSide), TERRAIN_U);

        // The U neighbour is left untouched
        assert_eq!(pattern_at(&fill, IVec2::new(1, 0)), Some(full(TERRAIN_U)));
    }

    #[test]
    fn test_connect_without_transition_tile_pays_lowest_penalty() {
        let tile_set = terrain_tile_set();
        let mut board = GridStore::new();
        board.set(IVec2::new(1, 0), TileMapCell::new(0, IVec2::new(1, 0), 0));

        let fill = fill_connect(&tile_set, &board, &[IVec2::ZERO], 0, TERRAIN_T, true).unwrap();
        // Violating the inferred U edge costs less than giving up the paint
        assert_eq!(pattern_at(&fill, IVec2::ZERO), Some(full(TERRAIN_T)));
        assert_eq!(pattern_at(&fill, IVec2::new(1, 0)), Some(full(TERRAIN_U)));
    }

    #[test]
    fn test_path_must_be_contiguous() {
        let tile_set = terrain_tile_set();
        let board = GridStore::new();
        let path = [IVec2::new(0, 0), IVec2::new(1, 0), IVec2::new(3, 0)];
        let err = fill_path(&tile_set, &board, &path, 0, TERRAIN_T, true).unwrap_err();
        assert!(matches!(
            err,
            TerrainError::InvalidPath { from, to } if from == IVec2::new(1, 0) && to == IVec2::new(3, 0)
        ));
    }

    #[test]
    fn test_path_connects_consecutive_cells() {
        let tile_set = terrain_tile_set();
        let board = GridStore::new();
        let path = [IVec2::new(0, 0), IVec2::new(1, 0)];
        let fill = fill_path(&tile_set, &board, &path, 0, TERRAIN_T, false).unwrap();
        let first = pattern_at(&fill, IVec2::new(0, 0)).unwrap();
        assert_eq!(first.terrain(), TERRAIN_T);
        assert_eq!(first.terrain_peering_bit(CellNeighbor::RightSide), TERRAIN_T);
    }

    #[test]
    fn test_invalid_terrain_set() {
        let tile_set = terrain_tile_set();
        let board = GridStore::new();
        let err = fill_connect(&tile_set, &board, &[IVec2::ZERO], 3, TERRAIN_T, true).unwrap_err();
        assert!(matches!(err, TerrainError::InvalidTerrainSet { terrain_set: 3, count: 1 }));
    }

    #[test]
    fn test_pattern_fill_uses_given_pattern() {
        let tile_set = terrain_tile_set();
        let board = GridStore::new();
        let fill = fill_pattern(&tile_set, &board, &[IVec2::new(5, 5)], 0, &full(TERRAIN_U), true).unwrap();
        assert_eq!(pattern_at(&fill, IVec2::new(5, 5)), Some(full(TERRAIN_U)));
    }
}
