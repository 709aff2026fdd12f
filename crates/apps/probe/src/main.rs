use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use foundation::TileCoord;
use indexset::{IndexLoader, IndexOptions, IndexSet, LazyMode};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod decode;
mod disk_store;
mod http;

use decode::ImageDecoder;
use disk_store::DiskIndexStore;
use http::ReqwestTransport;

#[derive(Parser, Debug)]
#[command(author, version, about = "Predict tile existence from bitmap index tiles")]
struct Cli {
    #[command(flatten)]
    layer: LayerArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct LayerArgs {
    /// Layer id used for predicate matching and cache keys
    #[arg(long, default_value = "layer")]
    layer: String,

    /// Index tile URL template with {z}, {x}, {y}
    #[arg(long)]
    url: String,

    #[arg(long, default_value_t = 0)]
    min_z: u8,

    #[arg(long)]
    max_z: u8,

    #[arg(long, default_value_t = 0)]
    master_x: u32,

    #[arg(long, default_value_t = 0)]
    master_y: u32,

    /// JSON options file; flags below override its values
    #[arg(long)]
    options: Option<PathBuf>,

    /// Directory for cached index tiles
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Square tile side in pixels
    #[arg(long)]
    tile_size: Option<u32>,

    /// Maximum number of supplemental index tiles
    #[arg(long)]
    budget: Option<usize>,

    #[arg(long, value_enum)]
    lazy: Option<LazyArg>,

    /// Decode and pack on the driving task
    #[arg(long)]
    single_thread: bool,

    #[arg(long)]
    stroke_recovery: bool,

    #[arg(long)]
    shadow_recovery: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LazyArg {
    None,
    FirstTouch,
    Background,
}

impl From<LazyArg> for LazyMode {
    fn from(v: LazyArg) -> Self {
        match v {
            LazyArg::None => LazyMode::None,
            LazyArg::FirstTouch => LazyMode::OnFirstTouch,
            LazyArg::Background => LazyMode::MasterThenBackground,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer "should this tile load" for each z/x/y
    Check {
        #[arg(required = true)]
        tiles: Vec<TileCoord>,
    },

    /// Print the index set after warm-up as JSON
    Inspect,
}

impl LayerArgs {
    fn index_options(&self) -> Result<IndexOptions, Box<dyn std::error::Error>> {
        let mut opts = match &self.options {
            Some(path) => IndexOptions::from_path(path)?,
            None => IndexOptions::default(),
        };
        if let Some(side) = self.tile_size {
            opts.tile_width = side;
            opts.tile_height = side;
        }
        if let Some(budget) = self.budget {
            opts.max_supplemental_tiles = budget;
        }
        if let Some(lazy) = self.lazy {
            opts.lazy = lazy.into();
        }
        if self.single_thread {
            opts.multithreading = false;
        }
        opts.cache = opts.cache && self.cache_dir.is_some();
        opts.raster.stroke_recovery |= self.stroke_recovery;
        opts.raster.shadow_recovery |= self.shadow_recovery;
        opts.validate()?;
        Ok(opts)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("probe=info,indexset=info")),
        )
        .init();

    let cli = Cli::parse();
    let args = &cli.layer;
    let options = args.index_options()?;
    let mut set = IndexSet::new(
        args.layer.clone(),
        args.min_z,
        args.max_z,
        args.url.clone(),
        args.master_x,
        args.master_y,
        options,
    )?;

    let store = DiskIndexStore::new(
        args.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("probe-index-cache")),
    );
    let mut loader = IndexLoader::new(
        Arc::new(ReqwestTransport::new(reqwest::Client::new())),
        Arc::new(ImageDecoder),
    )
    .with_store(store)
    .on_last_modified(|stamp| info!("dataset last modified {stamp}"));

    let report = loader.initialize(&mut set).await;
    info!(
        "warm-up: {} fetched, {} cached, {} failed",
        report.fetched, report.from_cache, report.failed
    );
    if set.options().lazy == LazyMode::MasterThenBackground {
        loader.load_pending(&mut set).await;
    }

    match cli.command {
        Command::Check { tiles } => {
            for t in tiles {
                let mut load = set.should_load_tile(&args.layer, t.x, t.y, t.z, None);
                if set.has_pending_fetches() {
                    loader.load_pending(&mut set).await;
                    load = set.should_load_tile(&args.layer, t.x, t.y, t.z, None);
                }
                println!("{t} {}", if load { "load" } else { "skip" });
            }
        }
        Command::Inspect => {
            let members: Vec<_> = set
                .members()
                .map(|m| {
                    json!({
                        "tile": m.coord().to_string(),
                        "state": m.state().name(),
                        "set_pixels": m.grid().map(|g| g.count_set()),
                        "occupied": m.occupied_pixel_extent().map(|e| e.as_array()),
                    })
                })
                .collect();
            let out = json!({
                "layer": set.layer_id(),
                "state": format!("{:?}", set.state()),
                "version": loader.version(),
                "dataset_extent": set.dataset_extent().map(|e| e.as_array()),
                "selection": set.selection().map(|s| json!({
                    "tiles": s.tiles.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "complete": s.complete,
                })),
                "members": members,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
