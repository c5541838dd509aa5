//! ASCII rendering and export of a layer's cells
//!
//! Used by the CLI to show what a layer holds without a renderer.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};

use chrono::Local;
use glam::IVec2;

use crate::layer::TileMapLayer;
use crate::server::Backend;
use crate::tilemap::TileMapCell;
use crate::tileset::TileSet;

/// ASCII rendering modes
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AsciiMode {
    /// Centre terrain of each tile
    Terrain,
    /// Source id of each cell
    Source,
}

impl AsciiMode {
    pub fn name(&self) -> &'static str {
        match self {
            AsciiMode::Terrain => "Terrain",
            AsciiMode::Source => "Source",
        }
    }

    pub fn all() -> &'static [AsciiMode] {
        &[AsciiMode::Terrain, AsciiMode::Source]
    }
}

/// Get ASCII character for a terrain index: 'A' for terrain 0, 'B' for 1...
pub fn terrain_char(terrain: i32) -> char {
    match terrain {
        t if t < 0 => '-',
        t if t < 26 => (b'A' + t as u8) as char,
        _ => '#',
    }
}

/// Get ASCII character for a source id
pub fn source_char(source_id: i32) -> char {
    match source_id {
        s @ 0..=9 => (b'0' + s as u8) as char,
        s @ 10..=35 => (b'a' + (s - 10) as u8) as char,
        _ => '*',
    }
}

/// Character of one cell. '.' is empty, '?' a reference the tile set cannot
/// resolve.
pub fn cell_char(tile_set: Option<&TileSet>, cell: TileMapCell, mode: AsciiMode) -> char {
    if cell.is_empty() {
        return '.';
    }
    match mode {
        AsciiMode::Source => source_char(cell.source_id),
        AsciiMode::Terrain => match tile_set {
            Some(ts) if ts.resolves(&cell) => ts
                .atlas_tile_data(&cell)
                .map(|data| terrain_char(data.terrain))
                // Scene tiles carry no terrain
                .unwrap_or('S'),
            _ => '?',
        },
    }
}

/// Render the used rectangle of a layer, one line per row
pub fn render_ascii_map<B: Backend>(layer: &TileMapLayer<B>, mode: AsciiMode) -> String {
    let rect = layer.get_used_rect();
    let tile_set = layer.tile_set().map(|ts| ts.as_ref());
    let mut output = String::new();
    for y in rect.position.y..rect.end().y {
        for x in rect.position.x..rect.end().x {
            output.push(cell_char(tile_set, layer.get_cell(IVec2::new(x, y), false), mode));
        }
        output.push('\n');
    }
    output
}

/// Legend for a rendering mode
pub fn legend(mode: AsciiMode, tile_set: Option<&TileSet>) -> String {
    let mut legend = String::from("Legend:\n  . empty\n  ? unresolved\n");
    match mode {
        AsciiMode::Terrain => {
            legend.push_str("  - no terrain\n  S scene tile\n");
            if let Some(ts) = tile_set {
                for set in &ts.terrain_sets {
                    for (i, terrain) in set.terrains.iter().enumerate() {
                        legend.push_str(&format!("  {} {}\n", terrain_char(i as i32), terrain.name));
                    }
                }
            }
        }
        AsciiMode::Source => {
            if let Some(ts) = tile_set {
                for id in ts.sources.keys() {
                    legend.push_str(&format!("  {} source {}\n", source_char(*id), id));
                }
            }
        }
    }
    legend
}

/// Number of used cells per source id
pub fn source_stats<B: Backend>(layer: &TileMapLayer<B>) -> BTreeMap<i32, usize> {
    let mut stats = BTreeMap::new();
    for coords in layer.get_used_cells() {
        *stats.entry(layer.get_cell_source_id(coords, false)).or_insert(0) += 1;
    }
    stats
}

/// Export a layer to a text file: header, map and per-source statistics
pub fn export_layer_file<B: Backend>(layer: &TileMapLayer<B>, mode: AsciiMode, path: &str) -> io::Result<()> {
    let mut file = File::create(path)?;
    let rect = layer.get_used_rect();
    let tile_set = layer.tile_set().map(|ts| ts.as_ref());

    writeln!(file, "=== TILE MAP LAYER ===")?;
    writeln!(file, "Name: {}", layer.name())?;
    writeln!(
        file,
        "Used rect: ({}, {}) size {}x{}",
        rect.position.x, rect.position.y, rect.size.x, rect.size.y
    )?;
    writeln!(file, "Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file)?;

    writeln!(file, "=== MAP ({} View) ===", mode.name())?;
    write!(file, "{}", render_ascii_map(layer, mode))?;
    writeln!(file)?;
    write!(file, "{}", legend(mode, tile_set))?;
    writeln!(file)?;

    writeln!(file, "=== STATISTICS ===")?;
    let stats = source_stats(layer);
    let total: usize = stats.values().sum();
    writeln!(file, "Total cells: {}", total)?;
    for (source_id, count) in &stats {
        let pct = 100.0 * *count as f64 / total.max(1) as f64;
        writeln!(file, "  source {:>4} {:>6} ({:>5.1}%)", source_id, count, pct)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::config::LayerConfig;
    use crate::server::RecordingBackend;
    use crate::tileset::tests::{terrain_tile_set, TERRAIN_U};

    #[test]
    fn test_chars() {
        assert_eq!(terrain_char(0), 'A');
        assert_eq!(terrain_char(-1), '-');
        assert_eq!(source_char(3), '3');
        assert_eq!(source_char(11), 'b');
        assert_eq!(source_char(-4), '*');
    }

    #[test]
    fn test_render_used_rect() {
        let mut layer = TileMapLayer::new(RecordingBackend::new(), LayerConfig::default()).unwrap();
        layer.set_tile_set(Some(Rc::new(terrain_tile_set())));
        layer.set_cell(IVec2::new(-1, 0), TileMapCell::new(0, IVec2::new(0, 0), 0));
        layer.set_cell(IVec2::new(1, 1), TileMapCell::new(0, IVec2::new(1, 0), 0));
        layer.set_cell(IVec2::new(0, 1), TileMapCell::new(4, IVec2::new(0, 0), 0));

        assert_eq!(render_ascii_map(&layer, AsciiMode::Terrain), "A..\n.?B\n");
        assert_eq!(render_ascii_map(&layer, AsciiMode::Source), "0..\n.40\n");
        assert!(legend(AsciiMode::Terrain, layer.tile_set().map(|ts| ts.as_ref())).contains("B U"));
        assert_eq!(terrain_char(TERRAIN_U), 'B');
        assert_eq!(source_stats(&layer).get(&0), Some(&2));
    }
}
