use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atelier_contracts::events::EventLog;
use atelier_contracts::garments::GarmentItem;
use atelier_contracts::generation::TryOnRequest;
use atelier_contracts::media::ImageReference;
use atelier_contracts::outfits::{OutfitResult, TryOnResult};
use atelier_engine::config::TryOnConfig;
use atelier_engine::TryOnEngine;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "atelier-rs", version, about = "Virtual try-on compositor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Put one garment on a photo.
    Single(SingleArgs),
    /// Layer a list of garments onto a photo, in order.
    Outfit(OutfitArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Where to write the resulting image.
    #[arg(long)]
    out: PathBuf,
    /// Append JSONL events to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    /// Root directory for `/path` image references.
    #[arg(long)]
    asset_root: Option<PathBuf>,
    #[arg(long)]
    max_dimension: Option<u32>,
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Debug, Parser)]
struct SingleArgs {
    /// Person photo: data URL, `/asset/path` or http(s) URL.
    #[arg(long)]
    photo: String,
    /// Garment image: data URL, `/asset/path` or http(s) URL.
    #[arg(long)]
    garment: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct OutfitArgs {
    #[arg(long)]
    photo: String,
    /// JSON file holding an array of garment items.
    #[arg(long)]
    items: PathBuf,
    #[command(flatten)]
    common: CommonArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Single(args) => run_single(args),
        Command::Outfit(args) => run_outfit(args),
    }
}

fn run_single(args: SingleArgs) -> Result<i32> {
    init_logger(args.common.verbose);
    let engine = build_engine(&args.common)?;
    let photo = ImageReference::parse(&args.photo).context("invalid --photo")?;
    let garment = ImageReference::parse(&args.garment).context("invalid --garment")?;
    let request =
        TryOnRequest::new(photo, garment, args.name.clone()).with_description(args.description);

    match engine.generate_single_try_on(&request) {
        TryOnResult::Success { image } => {
            let bytes = image.decode_bytes().context("generated image is not valid base64")?;
            write_output(&args.common.out, &bytes)?;
            print_summary(&json!({
                "ok": true,
                "garment": args.name,
                "media_type": image.media_type,
                "digest": image.digest(),
                "out": args.common.out.display().to_string(),
            }))?;
            Ok(0)
        }
        TryOnResult::Failure(err) => {
            print_summary(&json!({
                "ok": false,
                "garment": args.name,
                "dead_link": err.is_dead_image_link(),
                "reason": err.to_string(),
            }))?;
            eprintln!("atelier-rs: {err}");
            Ok(1)
        }
    }
}

fn run_outfit(args: OutfitArgs) -> Result<i32> {
    init_logger(args.common.verbose);
    let items = read_items(&args.items)?;
    let engine = build_engine(&args.common)?;
    let photo = ImageReference::parse(&args.photo).context("invalid --photo")?;

    match engine.generate_layered_outfit(photo, &items) {
        OutfitResult::Success {
            final_image,
            applied,
            dropped,
        } => {
            let bytes = match &final_image {
                ImageReference::Inline(image) => {
                    image.decode_bytes().context("generated image is not valid base64")?
                }
                // Nothing was applied; write the normalized base photo.
                other => engine
                    .acquire(other)
                    .context("failed to load base photo")?
                    .decode_bytes()
                    .context("normalized photo is not valid base64")?,
            };
            write_output(&args.common.out, &bytes)?;
            let dropped = dropped.map(|layer| {
                json!({
                    "index": layer.index,
                    "garment": layer.item_name,
                    "reason": layer.reason,
                })
            });
            print_summary(&json!({
                "ok": true,
                "applied": applied,
                "dropped": dropped,
                "out": args.common.out.display().to_string(),
            }))?;
            Ok(0)
        }
        OutfitResult::Failure(err) => {
            print_summary(&json!({
                "ok": false,
                "reason": err.to_string(),
            }))?;
            eprintln!("atelier-rs: {err}");
            Ok(1)
        }
    }
}

fn build_engine(common: &CommonArgs) -> Result<TryOnEngine> {
    let config = apply_overrides(TryOnConfig::from_env(), common);
    info!(
        model = %config.model,
        asset_root = %config.asset_root.display(),
        "configured try-on engine"
    );
    let engine = TryOnEngine::new(config)?;
    Ok(match &common.events {
        Some(path) => {
            let events = EventLog::create(path);
            info!(path = %path.display(), outfit_id = events.outfit_id(), "recording events");
            engine.with_events(events)
        }
        None => engine,
    })
}

fn apply_overrides(mut config: TryOnConfig, common: &CommonArgs) -> TryOnConfig {
    if let Some(model) = common.model.as_deref().map(str::trim).filter(|model| !model.is_empty()) {
        config.model = model.to_string();
    }
    if let Some(root) = &common.asset_root {
        config.asset_root = root.clone();
    }
    if let Some(max_dimension) = common.max_dimension {
        config.max_dimension = max_dimension.clamp(256, 4096);
    }
    config
}

fn read_items(path: &Path) -> Result<Vec<GarmentItem>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid garment list in {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn print_summary(summary: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(summary)?);
    Ok(())
}

fn init_logger(verbose: bool) {
    let default_filter = if verbose {
        "atelier=debug,warn"
    } else {
        "atelier=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
