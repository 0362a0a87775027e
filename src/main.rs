//! PlateScanner - license plate recognition from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use plate_scanner::config::{self, AppConfig};
use plate_scanner::plate::{confidence_for, normalize, FormatValidator};
use plate_scanner::storage;
use plate_scanner::vision::models::DownloadProgressCallback;
use plate_scanner::vision::{self, save_debug_image, ModelManager, ModelType, RegionDetector};
use plate_scanner::PlateRecognizer;

/// PlateScanner - license plate recognition
#[derive(Parser, Debug)]
#[command(name = "plate-scanner")]
#[command(about = "Locate and read license plates in photographs")]
struct Args {
    /// Configuration file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run without OCR (every image reports UNKNOWN)
    #[arg(long, global = true)]
    no_ocr: bool,

    /// Binarize with histogram equalization and a bilateral filter
    #[arg(long, global = true)]
    enhance: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize the plate in an image file
    Recognize {
        /// Image file (or base64 text file with --base64)
        image: PathBuf,

        /// Treat the file as base64-encoded image bytes
        #[arg(long)]
        base64: bool,

        /// Write a copy of the image with detected regions outlined
        #[arg(long)]
        debug_image: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List candidate plate regions without running OCR
    Detect {
        image: PathBuf,

        /// Write a copy of the image with detected regions outlined
        #[arg(long)]
        debug_image: Option<PathBuf>,
    },
    /// Check text against the configured plate formats
    Validate { text: String },
    /// Show OCR model status
    Models {
        /// Download missing models
        #[arg(long)]
        download: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = load_or_create_config(args.config.as_deref())?;
    if args.no_ocr {
        config.ocr.enabled = false;
    }
    if args.enhance {
        config.preprocessing.enhance = true;
    }

    match args.command {
        Command::Recognize {
            image,
            base64,
            debug_image,
            json,
        } => run_recognize(&config, &image, base64, debug_image.as_deref(), json),
        Command::Detect { image, debug_image } => run_detect(&config, &image, debug_image.as_deref()),
        Command::Validate { text } => run_validate(&config, &text),
        Command::Models { download } => run_models(&config, download),
    }
}

/// Load the given config file, or the default one, creating it on first run
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    let config_path = storage::default_config_path()?;
    if config_path.exists() {
        let config = config::load_config(&config_path)?;
        info!("Loaded configuration from {:?}", config_path);
        return Ok(config);
    }

    let config = AppConfig::default();
    match config::save_config(&config, &config_path) {
        Ok(()) => info!("Wrote default configuration to {:?}", config_path),
        Err(e) => warn!("Could not write default configuration: {}", e),
    }
    Ok(config)
}

/// Read an image file; base64 text is decoded first
fn read_image_bytes(path: &Path, base64: bool) -> Result<Vec<u8>> {
    if base64 {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Ok(vision::decode_base64(&text)?)
    } else {
        std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
    }
}

fn write_debug_image(config: &AppConfig, bytes: &[u8], path: &Path) -> Result<()> {
    let image = vision::decode_image(bytes)?.to_rgb8();
    let regions = RegionDetector::new(config.detection.clone())?.detect(&image)?;
    save_debug_image(&image, &regions, path)?;
    Ok(())
}

fn run_recognize(
    config: &AppConfig,
    image: &Path,
    base64: bool,
    debug_image: Option<&Path>,
    json: bool,
) -> Result<()> {
    let recognizer = PlateRecognizer::from_config(config)?;

    let result = if base64 {
        let text = std::fs::read_to_string(image).with_context(|| format!("Failed to read {:?}", image))?;
        recognizer.recognize(&text)
    } else {
        let bytes = std::fs::read(image).with_context(|| format!("Failed to read {:?}", image))?;
        recognizer.recognize_bytes(&bytes)
    };

    if let Some(path) = debug_image {
        if let Err(e) = read_image_bytes(image, base64).and_then(|bytes| write_debug_image(config, &bytes, path)) {
            warn!("Could not write debug image: {:#}", e);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}  confidence={:.2}  time={:.3}s",
            result.plate_number, result.confidence, result.processing_time
        );
    }

    if result.is_error() {
        std::process::exit(2);
    }
    Ok(())
}

fn run_detect(config: &AppConfig, image: &Path, debug_image: Option<&Path>) -> Result<()> {
    let bytes = read_image_bytes(image, false)?;
    let decoded = vision::decode_image(&bytes)?.to_rgb8();
    let regions = RegionDetector::new(config.detection.clone())?.detect(&decoded)?;

    println!("{} candidate regions", regions.len());
    for (i, region) in regions.iter().enumerate() {
        println!(
            "  [{}] x={} y={} {}x{} (ratio {:.2})",
            i,
            region.x,
            region.y,
            region.width,
            region.height,
            region.aspect_ratio()
        );
    }

    if let Some(path) = debug_image {
        save_debug_image(&decoded, &regions, path)?;
    }

    Ok(())
}

fn run_validate(config: &AppConfig, text: &str) -> Result<()> {
    let validator = FormatValidator::new(config.plate.formats.as_slice())?;
    let normalized = normalize(text);

    println!("normalized: {:?}", normalized);
    match validator.matching_format(&normalized) {
        Some(index) => println!(
            "valid:      yes (format #{}, confidence {:.2})",
            index,
            confidence_for(&normalized)
        ),
        None => println!("valid:      no"),
    }
    match validator.first_valid_token(&normalized) {
        Some(token) => println!("token:      {}", token),
        None => println!("token:      none"),
    }

    Ok(())
}

fn run_models(config: &AppConfig, download: bool) -> Result<()> {
    let manager = ModelManager::from_setting(config.ocr.models_dir.as_deref())?;
    println!("Models directory: {:?}", manager.models_dir());

    if download {
        for model_type in ModelType::ALL {
            if manager.is_model_available(model_type) {
                continue;
            }

            let name = model_type.display_name();
            let progress: DownloadProgressCallback =
                Box::new(move |downloaded: u64, total: Option<u64>| match total {
                    Some(total) if total > 0 => eprint!("\r{}: {:>3}%", name, downloaded * 100 / total),
                    _ => eprint!("\r{}: {} bytes", name, downloaded),
                });
            manager.download_model_with_progress(model_type, Some(progress))?;
            eprintln!();
        }
    }

    for status in manager.get_model_status() {
        println!(
            "  {:<22} {:<10} {}",
            status.model_type.display_name(),
            if status.available { "ready" } else { "missing" },
            status
                .size_bytes
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "-".to_string())
        );
    }

    Ok(())
}
