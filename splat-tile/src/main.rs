use clap::builder::TypedValueParser;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use splat_tile_lib::common::DEFAULT_MAX_POINTS;
use splat_tile_lib::{chunk_compressed_ply, chunk_file_async, BoundsPolicy, Tile, TilerConfig};
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process;
use std::time::Instant;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Bounds {
    /// Bound splat centers only.
    Tight,
    /// Inflate each splat by twice its largest scale.
    Splat,
}

impl From<Bounds> for BoundsPolicy {
    fn from(b: Bounds) -> Self {
        match b {
            Bounds::Tight => BoundsPolicy::Tight,
            Bounds::Splat => BoundsPolicy::SplatInflated,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "Splat Tiler",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Splits LZ4-compressed splat PLY files into octree tiles"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input compressed PLY file."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT_DIR",
        required = true,
        help = "Directory receiving the tiles and tiles.json."
    )]
    output: String,

    #[arg(
        short = 'm',
        long = "max-points",
        value_name = "MAX_POINTS",
        default_value_t = DEFAULT_MAX_POINTS,
        value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize),
        help = "Maximum number of splats per tile."
    )]
    max_points: usize,

    #[arg(
        short = 'b',
        long = "bounds",
        value_enum,
        default_value = "tight",
        help = "How splats contribute to tile bounds."
    )]
    bounds: Bounds,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Read the input asynchronously and chunk on a blocking worker."
    )]
    async_mode: bool,
}

#[derive(Serialize)]
struct ManifestEntry {
    file: String,
    points: usize,
    forced: bool,
    center: [f32; 3],
    half_extents: [f32; 3],
}

#[derive(Serialize)]
struct Manifest {
    source: String,
    max_points: usize,
    bounds: String,
    tiles: Vec<ManifestEntry>,
}

fn write_tiles(
    dir: &Path,
    cli: &Cli,
    tiles: &[Tile],
) -> Result<usize, Box<dyn Error + Send + Sync>> {
    fs::create_dir_all(dir)?;

    let mut entries = Vec::with_capacity(tiles.len());
    let mut total_bytes = 0;
    for (i, tile) in tiles.iter().enumerate() {
        let bytes = tile
            .compressed_bytes()
            .ok_or("tile carries no compressed payload")?;
        let file = format!("tile_{:04}.ply", i);
        fs::write(dir.join(&file), bytes)?;
        total_bytes += bytes.len();
        entries.push(ManifestEntry {
            file,
            points: tile.num_points,
            forced: tile.forced,
            center: tile.bounds.center().to_array(),
            half_extents: tile.bounds.half_extents().to_array(),
        });
    }

    let manifest = Manifest {
        source: cli.input.clone(),
        max_points: cli.max_points,
        bounds: format!("{:?}", cli.bounds).to_lowercase(),
        tiles: entries,
    };
    fs::write(dir.join("tiles.json"), serde_json::to_vec_pretty(&manifest)?)?;
    Ok(total_bytes)
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = TilerConfig {
        max_points: cli.max_points,
        bounds: cli.bounds.into(),
        ..TilerConfig::default()
    };

    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    println!(
        "Mode: {} Tiling\nInput: {} | Output: {} | Max points: {} | Bounds: {:?}",
        mode, cli.input, cli.output, cli.max_points, cli.bounds
    );

    let start = Instant::now();

    let tiles = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(chunk_file_async(&cli.input, &config))
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?
    } else {
        let raw_data = fs::read(&cli.input).unwrap_or_else(|e| {
            eprintln!("Error reading input file {}: {}", cli.input, e);
            process::exit(1);
        });
        chunk_compressed_ply(&raw_data, &config)
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)?
    };

    let elapsed = start.elapsed().as_millis();
    println!("Tiling Time: {} ms", elapsed);

    let total_bytes = write_tiles(Path::new(&cli.output), &cli, &tiles).unwrap_or_else(|e| {
        eprintln!("Error writing tiles to '{}': {}", cli.output, e);
        process::exit(1);
    });
    log::info!("wrote {} bytes of tile data", total_bytes);
    println!(
        "Successfully wrote {} tiles ({} points) to '{}'.",
        tiles.len(),
        tiles.iter().map(|t| t.num_points).sum::<usize>(),
        cli.output
    );

    Ok(())
}
