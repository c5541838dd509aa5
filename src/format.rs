//! Tile data records.
//!
//! A layer's cells can be exported as a flat list of 32-bit words. The
//! current format packs each cell into three words: x and y as 16-bit
//! integers, then source id, atlas x, atlas y and alternative id as unsigned
//! 16-bit integers, all little endian. Older formats stored a single tile id
//! with the flip and transpose flags in its top bits; they are decoded into
//! the current representation when the `legacy_formats` feature is enabled.

use std::fmt;

use glam::IVec2;
use serde::{Deserialize, Serialize};

use crate::tilemap::TileMapCell;
use crate::tileset::TileSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileDataFormat {
    /// Coordinates and a tile id with transform flags, two words per cell.
    Format1 = 1,
    /// As format 1, plus a third word holding autotile coordinates.
    Format2 = 2,
    #[default]
    Format3 = 3,
}

impl TileDataFormat {
    /// Words per record.
    pub fn stride(self) -> usize {
        match self {
            TileDataFormat::Format1 => 2,
            TileDataFormat::Format2 | TileDataFormat::Format3 => 3,
        }
    }
}

impl TryFrom<i32> for TileDataFormat {
    type Error = TileDataError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TileDataFormat::Format1),
            2 => Ok(TileDataFormat::Format2),
            3 => Ok(TileDataFormat::Format3),
            other => Err(TileDataError::UnknownFormat(other)),
        }
    }
}

#[derive(Debug)]
pub enum TileDataError {
    /// The word count is not a multiple of the record size.
    CorruptedSize { len: usize, expected_multiple: usize },
    /// Legacy format while legacy support is compiled out.
    UnsupportedFormat(TileDataFormat),
    UnknownFormat(i32),
}

impl fmt::Display for TileDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileDataError::CorruptedSize { len, expected_multiple } => write!(
                f,
                "Corrupted tile data. Got size: {}. Expected modulo: {}",
                len, expected_multiple
            ),
            TileDataError::UnsupportedFormat(format) => write!(
                f,
                "Cannot handle deprecated tile data format {:?}, built without legacy format support",
                format
            ),
            TileDataError::UnknownFormat(value) => write!(f, "Unknown tile data format {}", value),
        }
    }
}

impl std::error::Error for TileDataError {}

const FLIP_H_BIT: u32 = 1 << 29;
const FLIP_V_BIT: u32 = 1 << 30;
const TRANSPOSE_BIT: u32 = 1 << 31;

fn word(bytes: [u8; 4]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// Low and high 16-bit halves of a little-endian word.
fn halves(word: i32) -> (u16, u16) {
    let b = word.to_le_bytes();
    (u16::from_le_bytes([b[0], b[1]]), u16::from_le_bytes([b[2], b[3]]))
}

fn fits_i16(v: i32) -> bool {
    i16::try_from(v).is_ok()
}

/// Encode cells in the current format. Empty cells are skipped.
///
/// Cells whose coordinates do not fit in 16 bits are skipped with a warning.
/// Ids are truncated to 16 bits.
pub fn encode<I>(cells: I) -> Vec<i32>
where
    I: IntoIterator<Item = (IVec2, TileMapCell)>,
{
    let mut data = Vec::new();
    for (coords, cell) in cells {
        if cell.is_empty() {
            continue;
        }
        if !fits_i16(coords.x) || !fits_i16(coords.y) {
            log::warn!(
                "Cell ({}, {}) is outside the 16-bit coordinate range of tile data, not saved",
                coords.x,
                coords.y
            );
            continue;
        }
        let x = (coords.x as i16).to_le_bytes();
        let y = (coords.y as i16).to_le_bytes();
        let source = (cell.source_id as u16).to_le_bytes();
        let atlas_x = (cell.atlas_coords.x as u16).to_le_bytes();
        let atlas_y = (cell.atlas_coords.y as u16).to_le_bytes();
        let alternative = (cell.alternative_tile as u16).to_le_bytes();
        data.push(word([x[0], x[1], y[0], y[1]]));
        data.push(word([source[0], source[1], atlas_x[0], atlas_x[1]]));
        data.push(word([atlas_y[0], atlas_y[1], alternative[0], alternative[1]]));
    }
    data
}

/// Decode records into cells.
///
/// Nothing is returned unless the whole buffer is well formed. Legacy tile
/// ids are mapped through the tile set when one is given; ids it cannot map
/// are logged and skipped.
pub fn decode(
    format: TileDataFormat,
    data: &[i32],
    tile_set: Option<&TileSet>,
) -> Result<Vec<(IVec2, TileMapCell)>, TileDataError> {
    let stride = format.stride();
    if data.len() % stride != 0 {
        return Err(TileDataError::CorruptedSize {
            len: data.len(),
            expected_multiple: stride,
        });
    }
    if format != TileDataFormat::Format3 && !cfg!(feature = "legacy_formats") {
        return Err(TileDataError::UnsupportedFormat(format));
    }

    let mut cells = Vec::with_capacity(data.len() / stride);
    for record in data.chunks_exact(stride) {
        let (x, y) = halves(record[0]);
        let coords = IVec2::new(x as i16 as i32, y as i16 as i32);

        if format == TileDataFormat::Format3 {
            let (source_id, atlas_x) = halves(record[1]);
            let (atlas_y, alternative) = halves(record[2]);
            let cell = TileMapCell::new(
                source_id as i32,
                IVec2::new(atlas_x as i32, atlas_y as i32),
                alternative as i32,
            );
            cells.push((coords, cell));
        } else if let Some(cell) = decode_legacy(format, record, tile_set) {
            cells.push((coords, cell));
        }
    }
    Ok(cells)
}

fn decode_legacy(format: TileDataFormat, record: &[i32], tile_set: Option<&TileSet>) -> Option<TileMapCell> {
    let v = record[1] as u32;
    let flip_h = v & FLIP_H_BIT != 0;
    let flip_v = v & FLIP_V_BIT != 0;
    let transpose = v & TRANSPOSE_BIT != 0;
    let tile_id = (v & (FLIP_H_BIT - 1)) as i32;

    let autotile_coords = if format == TileDataFormat::Format2 {
        let (x, y) = halves(record[2]);
        IVec2::new(x as i16 as i32, y as i16 as i32)
    } else {
        IVec2::ZERO
    };

    match tile_set {
        Some(tile_set) => {
            let cell = tile_set.compatibility_tilemap_map(tile_id, autotile_coords, flip_h, flip_v, transpose);
            if cell.is_none() {
                log::error!(
                    "No valid tile in tile set for: tile:{} coords:({}, {}) flip_h:{} flip_v:{} transpose:{}",
                    tile_id,
                    autotile_coords.x,
                    autotile_coords.y,
                    flip_h,
                    flip_v,
                    transpose
                );
            }
            cell
        }
        None => {
            let alternative = flip_h as i32 + ((flip_v as i32) << 1) + ((transpose as i32) << 2);
            Some(TileMapCell::new(tile_id, autotile_coords, alternative))
        }
    }
}
