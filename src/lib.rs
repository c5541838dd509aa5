//! Tile map layer library
//!
//! A sparse grid of tile references kept in sync with rendering, physics,
//! navigation and scene servers through incremental update passes.

pub mod ascii;
pub mod config;
pub mod format;
pub mod layer;
pub mod pattern;
pub mod server;
pub mod terrain;
pub mod tilemap;
pub mod tileset;
