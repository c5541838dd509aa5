use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, Subcommand};
use glam::{IVec2, Vec2};
use serde::Deserialize;

use tilemap_layer::ascii::{self, AsciiMode};
use tilemap_layer::config::LayerConfig;
use tilemap_layer::format::TileDataFormat;
use tilemap_layer::layer::TileMapLayer;
use tilemap_layer::server::recording::{HandleKind, RecordingBackend};
use tilemap_layer::tilemap::TileMapCell;
use tilemap_layer::tileset::{
    AtlasSource, AtlasTile, CellNeighbor, CollisionPolygon, NavigationLayer, NavigationPolygon, PhysicsLayer,
    Terrain, TerrainMode, TerrainSet, TileData, TilePhysics, TileSet, TileSetSource,
};

const GRASS: i32 = 0;
const WATER: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "tilemap_layer")]
#[command(about = "Drive a tile map layer against an in-memory backend")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Paint a lake into a meadow with terrain connect and show the result
    Demo {
        /// Width of the painted area in cells
        #[arg(short = 'W', long, default_value = "24")]
        width: i32,

        /// Height of the painted area in cells
        #[arg(short = 'H', long, default_value = "12")]
        height: i32,

        /// Random seed (uses random seed if not specified)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Write the ASCII export to a file
        #[arg(long)]
        export: Option<String>,
    },
    /// Apply the edits of a scene file, run a pass and print statistics
    Replay {
        scene: PathBuf,

        /// Print the grid
        #[arg(long)]
        ascii: bool,
    },
    /// Print the tile data words of a scene file after its edits
    Export { scene: PathBuf },
}

/// One edit of a scene file.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Edit {
    SetCell {
        coords: IVec2,
        source_id: i32,
        #[serde(default)]
        atlas_coords: IVec2,
        #[serde(default)]
        alternative_tile: i32,
    },
    EraseCell {
        coords: IVec2,
    },
    TerrainConnect {
        cells: Vec<IVec2>,
        terrain_set: i32,
        terrain: i32,
        #[serde(default = "default_true")]
        ignore_empty_terrains: bool,
    },
    TerrainPath {
        path: Vec<IVec2>,
        terrain_set: i32,
        terrain: i32,
        #[serde(default = "default_true")]
        ignore_empty_terrains: bool,
    },
    TileData {
        format: i32,
        data: Vec<i32>,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SceneFile {
    tile_set: TileSet,
    #[serde(default)]
    config: LayerConfig,
    #[serde(default)]
    name: String,
    #[serde(default)]
    edits: Vec<Edit>,
}

#[derive(Debug)]
enum SceneFileError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for SceneFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneFileError::Io(e) => write!(f, "Cannot read scene file: {}", e),
            SceneFileError::Parse(e) => write!(f, "Invalid scene file: {}", e),
        }
    }
}

impl std::error::Error for SceneFileError {}

impl From<std::io::Error> for SceneFileError {
    fn from(e: std::io::Error) -> Self {
        SceneFileError::Io(e)
    }
}

impl From<serde_json::Error> for SceneFileError {
    fn from(e: serde_json::Error) -> Self {
        SceneFileError::Parse(e)
    }
}

fn load_scene(path: &Path) -> Result<SceneFile, SceneFileError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Command::Demo {
            width,
            height,
            seed,
            export,
        } => run_demo(width, height, seed.unwrap_or_else(rand::random), export),
        Command::Replay { scene, ascii } => run_replay(&scene, ascii),
        Command::Export { scene } => run_export(&scene),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_demo(width: i32, height: i32, seed: u64, export: Option<String>) -> CliResult {
    println!("Painting a {}x{} layer with seed: {}", width, height, seed);

    let backend = RecordingBackend::new();
    let world = backend.create_world();
    let config = LayerConfig {
        terrain_seed: seed,
        ..LayerConfig::default()
    };
    let mut layer = TileMapLayer::new(backend.clone(), config)?;
    layer.set_name("demo");
    layer.set_tile_set(Some(Rc::new(demo_tile_set())));
    layer.enter_tree(world);

    let meadow: Vec<IVec2> = (0..height)
        .flat_map(|y| (0..width).map(move |x| IVec2::new(x, y)))
        .collect();
    layer.set_cells_terrain_connect(&meadow, 0, GRASS, true)?;

    // Elliptic lake in the middle
    let centre = Vec2::new(width as f32, height as f32) * 0.5;
    let radii = (centre * 0.6).max(Vec2::ONE);
    let lake: Vec<IVec2> = meadow
        .iter()
        .copied()
        .filter(|c| {
            let d = (c.as_vec2() + Vec2::splat(0.5) - centre) / radii;
            d.length_squared() <= 1.0
        })
        .collect();
    println!("Lake covers {} cells", lake.len());
    layer.set_cells_terrain_connect(&lake, 0, WATER, true)?;

    layer.deferred_update();
    print_stats(&layer, &backend);
    println!();
    print!("{}", ascii::render_ascii_map(&layer, AsciiMode::Terrain));
    print!("{}", ascii::legend(AsciiMode::Terrain, layer.tile_set().map(|ts| ts.as_ref())));

    if let Some(path) = export {
        ascii::export_layer_file(&layer, AsciiMode::Terrain, &path)?;
        println!("Exported layer to {}", path);
    }
    Ok(())
}

fn run_replay(path: &Path, show_ascii: bool) -> CliResult {
    let backend = RecordingBackend::new();
    let layer = replay_scene(path, &backend)?;
    print_stats(&layer, &backend);
    if show_ascii {
        println!();
        for mode in AsciiMode::all() {
            println!("=== {} ===", mode.name());
            print!("{}", ascii::render_ascii_map(&layer, *mode));
        }
    }
    Ok(())
}

fn run_export(path: &Path) -> CliResult {
    let backend = RecordingBackend::new();
    let layer = replay_scene(path, &backend)?;
    let words: Vec<String> = layer.get_tile_data().iter().map(|w| w.to_string()).collect();
    println!("{}", words.join(" "));
    Ok(())
}

fn replay_scene(
    path: &Path,
    backend: &RecordingBackend,
) -> Result<TileMapLayer<RecordingBackend>, Box<dyn std::error::Error>> {
    let scene = load_scene(path)?;
    println!("Replaying {} edits from {}", scene.edits.len(), path.display());

    let world = backend.create_world();
    let mut layer = TileMapLayer::new(backend.clone(), scene.config)?;
    layer.set_name(&scene.name);
    layer.set_tile_set(Some(Rc::new(scene.tile_set)));
    layer.enter_tree(world);

    for edit in scene.edits {
        match edit {
            Edit::SetCell {
                coords,
                source_id,
                atlas_coords,
                alternative_tile,
            } => layer.set_cell(coords, TileMapCell::new(source_id, atlas_coords, alternative_tile)),
            Edit::EraseCell { coords } => layer.erase_cell(coords),
            Edit::TerrainConnect {
                cells,
                terrain_set,
                terrain,
                ignore_empty_terrains,
            } => layer.set_cells_terrain_connect(&cells, terrain_set, terrain, ignore_empty_terrains)?,
            Edit::TerrainPath {
                path,
                terrain_set,
                terrain,
                ignore_empty_terrains,
            } => layer.set_cells_terrain_path(&path, terrain_set, terrain, ignore_empty_terrains)?,
            Edit::TileData { format, data } => layer.set_tile_data(TileDataFormat::try_from(format)?, &data)?,
        }
    }
    layer.deferred_update();
    Ok(layer)
}

fn print_stats(layer: &TileMapLayer<RecordingBackend>, backend: &RecordingBackend) {
    let used = layer.get_used_cells().len();
    let rect = layer.get_used_rect();
    println!(
        "Layer '{}': {} cells in ({}, {}) {}x{}",
        layer.name(),
        used,
        rect.position.x,
        rect.position.y,
        rect.size.x,
        rect.size.y
    );
    println!(
        "Rendering: {} quadrants, {} canvas items",
        layer.rendering_quadrant_count(),
        layer.canvas_item_count()
    );
    println!(
        "Servers: {} bodies, {} occluders, {} navigation regions, {} scenes",
        backend.live_count_of(HandleKind::Body),
        backend.live_count_of(HandleKind::Occluder),
        backend.live_count_of(HandleKind::NavigationRegion),
        backend.scene_count()
    );
    println!(
        "Backend: {} live handles, {} calls, {} invalid calls",
        backend.live_count(),
        backend.calls(),
        backend.invalid_calls()
    );
}

/// Square tile set with a grass / water "match sides" terrain set. Source 0
/// holds every combination of centre and side terrains; water centres are
/// solid and grass centres walkable.
fn demo_tile_set() -> TileSet {
    let half = 8.0;
    let square = vec![
        Vec2::new(-half, -half),
        Vec2::new(half, -half),
        Vec2::new(half, half),
        Vec2::new(-half, half),
    ];
    let sides = [
        CellNeighbor::RightSide,
        CellNeighbor::BottomSide,
        CellNeighbor::LeftSide,
        CellNeighbor::TopSide,
    ];

    let mut atlas = AtlasSource {
        texture: Some("terrain.png".to_string()),
        grid_size: IVec2::new(8, 4),
        tiles: Vec::new(),
    };
    for index in 0..32 {
        let centre = index / 16;
        let mut data = TileData {
            terrain_set: 0,
            terrain: centre,
            ..TileData::default()
        };
        for (i, bit) in sides.iter().enumerate() {
            data.set_terrain_peering_bit(*bit, (index >> i) & 1);
        }
        if centre == WATER {
            data.physics = vec![TilePhysics {
                polygons: vec![CollisionPolygon {
                    points: square.clone(),
                    ..CollisionPolygon::default()
                }],
                ..TilePhysics::default()
            }];
        } else {
            data.navigation = vec![Some(NavigationPolygon {
                vertices: square.clone(),
                polygons: vec![vec![0, 1, 2, 3]],
                outlines: Vec::new(),
            })];
        }
        // Plain tiles are the common case
        if index % 16 == 0 || index % 16 == 15 {
            data.probability = 4.0;
        }
        atlas.add_tile(AtlasTile::new(IVec2::new(index % 8, index / 8), data));
    }

    let mut tile_set = TileSet::default();
    tile_set.physics_layers.push(PhysicsLayer::default());
    tile_set.navigation_layers.push(NavigationLayer::default());
    tile_set.terrain_sets.push(TerrainSet {
        mode: TerrainMode::MatchSides,
        terrains: vec![
            Terrain {
                name: "Grass".to_string(),
                color: Default::default(),
            },
            Terrain {
                name: "Water".to_string(),
                color: Default::default(),
            },
        ],
    });
    tile_set.add_source(0, TileSetSource::Atlas(atlas));
    tile_set
}
