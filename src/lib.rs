//! # Etiqueta - Label Printer Protocol Client
//!
//! Etiqueta drives small thermal label printers over a wireless (BLE) link
//! or a serial port. It provides:
//!
//! - **Packet codec**: framing, checksum and stream reassembly
//! - **Commands**: request builders and ack parsing
//! - **Transport**: radio, serial and mock backends behind one trait
//! - **Session**: the connect → calibrate → print → finish state machine
//! - **Model registry**: printhead width, resolution and density per model
//!
//! ## Quick Start
//!
//! ```no_run
//! use etiqueta::{Config, LabelPrinter, RasterImage, TransportKind};
//!
//! # async fn demo() -> Result<(), etiqueta::EtiquetaError> {
//! let mut printer = LabelPrinter::new("b21", Config::default())?;
//! printer.connect(TransportKind::Serial, "/dev/rfcomm0").await?;
//!
//! // 384 dots across, 240 rows of diagonal stripes
//! let label = RasterImage::from_fn(384, 240, |x, y| (x + y) % 16 < 4);
//! printer.print_image(&label, 3).await?;
//!
//! printer.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet framing and command builders |
//! | [`transport`] | Communication backends |
//! | [`session`] | Print session state machine |
//! | [`client`] | `LabelPrinter` facade |
//! | [`printer`] | Model registry |
//! | [`raster`] | 1-bit images and row compression |
//! | [`config`] | Timeouts, retries and transport settings |
//! | [`error`] | Error types |

pub mod client;
pub mod config;
pub mod error;
pub mod printer;
pub mod protocol;
pub mod raster;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use client::LabelPrinter;
pub use config::Config;
pub use error::{ErrorKind, EtiquetaError, Remedy};
pub use printer::ModelSpec;
pub use raster::RasterImage;
pub use session::{CancelHandle, PrinterSession, SessionState};
pub use transport::{Transport, TransportKind};
