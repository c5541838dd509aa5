//! Terrain painting.
//!
//! Painting a terrain is a small constraint problem: painted cells request a
//! terrain, their neighbours would rather stay as they are, and every tile of
//! the terrain set is a candidate pattern. See [`solver`] for the scoring.

pub mod constraint;
pub mod solver;

use std::fmt;

use glam::IVec2;

use crate::tilemap::{GridStore, TileMapCell};

pub use constraint::{ConstraintSet, TerrainConstraint};
pub use solver::{fill_connect, fill_constraints, fill_path, fill_pattern};

/// Chosen pattern per cell, in the order cells were decided.
pub type TerrainFill = Vec<(IVec2, crate::tileset::TerrainsPattern)>;

/// Read access to the cells a fill looks at.
pub trait TerrainBoard {
    fn cell(&self, coords: IVec2) -> TileMapCell;
}

impl TerrainBoard for GridStore {
    fn cell(&self, coords: IVec2) -> TileMapCell {
        self.get(coords)
    }
}

#[derive(Debug)]
pub enum TerrainError {
    MissingTileSet,
    InvalidTerrainSet { terrain_set: i32, count: usize },
    /// `to` does not touch `from`.
    InvalidPath { from: IVec2, to: IVec2 },
}

impl fmt::Display for TerrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainError::MissingTileSet => write!(f, "No tile set to paint terrains with"),
            TerrainError::InvalidTerrainSet { terrain_set, count } => {
                write!(f, "Terrain set {} out of range (tile set has {})", terrain_set, count)
            }
            TerrainError::InvalidPath { from, to } => write!(
                f,
                "Invalid terrain path, ({}, {}) is not a neighboring tile of ({}, {})",
                to.x, to.y, from.x, from.y
            ),
        }
    }
}

impl std::error::Error for TerrainError {}
