//! # Etiqueta CLI
//!
//! Command-line interface for label printing.
//!
//! ## Usage
//!
//! ```bash
//! # List supported printer models
//! etiqueta models
//!
//! # Print a PNG over a bound RFCOMM port
//! etiqueta print label.png --model d11_h --transport serial --device /dev/rfcomm0
//!
//! # Print over BLE, discovering the printer by name prefix
//! etiqueta print label.png --model b21 --transport radio --device B21 --density 4
//!
//! # Darker threshold, continuous roll
//! etiqueta print label.png --model d110 --device /dev/rfcomm0 --threshold 160 --label-type continuous
//! ```
//!
//! Logging is controlled by `RUST_LOG` (default `info`). Ctrl-C aborts
//! discovery or cancels a running print.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use etiqueta::{
    Config, EtiquetaError, LabelPrinter, ModelSpec, RasterImage, TransportKind,
    printer::{PrintDirection, models},
    protocol::LabelType,
};

/// Etiqueta - Thermal label printer utility
#[derive(Parser, Debug)]
#[command(name = "etiqueta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported printer models
    Models,

    /// Print an image to a label printer
    Print {
        /// Image file (PNG, JPEG, ...)
        image: PathBuf,

        /// Printer model id (see `etiqueta models`)
        #[arg(long)]
        model: String,

        /// Link to the printer
        #[arg(long, value_enum, default_value_t = TransportKind::Serial)]
        transport: TransportKind,

        /// Device path (serial) or name prefix / address (radio)
        #[arg(long, default_value = "/dev/rfcomm0")]
        device: String,

        /// Print density (defaults to the model's default)
        #[arg(long)]
        density: Option<u8>,

        /// Media type: with_gaps, black, continuous, perforated, transparent, black_mark_gap
        #[arg(long)]
        label_type: Option<String>,

        /// Pixels darker than this luminance print black
        #[arg(long, default_value = "128")]
        threshold: u8,

        /// Rotate the image 90° clockwise before printing
        #[arg(long)]
        rotate: bool,

        /// JSON config file (overrides ETIQUETA_CONFIG)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("Hint: {}", e.remedy());
        std::process::exit(1);
    }
}

async fn run() -> Result<(), EtiquetaError> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Models => {
            list_models();
            Ok(())
        }
        Commands::Print {
            image,
            model,
            transport,
            device,
            density,
            label_type,
            threshold,
            rotate,
            config,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(Some(path.as_path()))?,
                None => Config::load()?,
            };
            if let Some(name) = label_type {
                config.session.label_type = LabelType::parse(&name).ok_or_else(|| {
                    EtiquetaError::InvalidConfiguration(format!("unknown label type '{}'", name))
                })?;
            }

            let spec = models::require(&model)?;
            let density = density.unwrap_or(spec.default_density);
            spec.validate_density(density)?;

            let raster = load_image(&image, threshold, rotate)?;
            warn_on_orientation(spec, &raster, rotate);
            println!(
                "Printing {} ({}x{}) on {} at density {}...",
                image.display(),
                raster.width(),
                raster.height(),
                spec.name,
                density
            );

            print(spec, config, transport, &device, &raster, density).await?;
            println!("Printed successfully!");
            Ok(())
        }
    }
}

fn list_models() {
    println!("Supported models:");
    println!(
        "  {:<6} {:<7} {:>5} {:>4} {:>8} {:>8}  direction",
        "id", "name", "dots", "dpi", "width", "density"
    );
    for spec in models::MODELS.iter() {
        let direction = match spec.print_direction {
            PrintDirection::AlongFeed => "along feed",
            PrintDirection::AcrossFeed => "across feed",
        };
        println!(
            "  {:<6} {:<7} {:>5} {:>4} {:>6.1}mm {:>4}-{} ({})  {}",
            spec.id,
            spec.name,
            spec.printhead_pixels,
            spec.dpi,
            spec.width_mm(),
            spec.density.start(),
            spec.density.end(),
            spec.default_density,
            direction
        );
    }
}

/// Load an image file and threshold it to 1 bit per pixel.
fn load_image(path: &Path, threshold: u8, rotate: bool) -> Result<RasterImage, EtiquetaError> {
    let img = image::open(path)
        .map_err(|e| EtiquetaError::Image(format!("Failed to load {}: {}", path.display(), e)))?;
    let gray = if rotate {
        image::imageops::rotate90(&img.to_luma8())
    } else {
        img.to_luma8()
    };
    Ok(RasterImage::from_luma(&gray, threshold))
}

fn warn_on_orientation(spec: &ModelSpec, raster: &RasterImage, rotate: bool) {
    let landscape = raster.width() > raster.height();
    if spec.print_direction == PrintDirection::AcrossFeed && landscape && !rotate {
        tracing::warn!(
            "{} prints across the feed; a landscape label usually needs --rotate",
            spec.name
        );
    }
}

async fn print(
    spec: &ModelSpec,
    config: Config,
    transport: TransportKind,
    device: &str,
    raster: &RasterImage,
    density: u8,
) -> Result<(), EtiquetaError> {
    let mut printer = LabelPrinter::new(spec.id, config)?;

    let cancel = printer.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling print");
            cancel.cancel();
        }
    });

    // Discovery can run for the whole discovery timeout; stop waiting on Ctrl-C.
    tokio::select! {
        connected = printer.connect(transport, device) => connected?,
        _ = tokio::signal::ctrl_c() => return Err(EtiquetaError::UserCancelled),
    }
    let result = printer.print_image(raster, density).await;
    printer.disconnect().await;
    result
}
