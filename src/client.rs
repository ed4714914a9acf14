//! # Label Printer
//!
//! Host-facing facade: pick a model, connect, print a bitmap.
//!
//! ```no_run
//! use etiqueta::{Config, LabelPrinter, RasterImage, TransportKind};
//!
//! # async fn demo() -> Result<(), etiqueta::EtiquetaError> {
//! let mut printer = LabelPrinter::new("d11_h", Config::load()?)?;
//! printer.connect(TransportKind::Radio, "D11_H").await?;
//!
//! let label = RasterImage::blank(136, 300);
//! printer.print_image(&label, 3).await?;
//! printer.disconnect().await;
//! # Ok(())
//! # }
//! ```
//!
//! Each connection prints one label. Connect again for the next one. The
//! [`CancelHandle`] stays valid across reconnects.

use crate::config::Config;
use crate::error::EtiquetaError;
use crate::printer::models::{self, ModelSpec};
use crate::raster::RasterImage;
use crate::session::{CancelHandle, PrinterSession, SessionState};
use crate::transport::{self, Transport, TransportKind};

pub struct LabelPrinter {
    model: &'static ModelSpec,
    config: Config,
    session: PrinterSession,
    cancel: CancelHandle,
}

impl LabelPrinter {
    /// Fails with `InvalidConfiguration` for unknown models or bad config.
    pub fn new(model_id: &str, config: Config) -> Result<Self, EtiquetaError> {
        let model = models::require(model_id)?;
        config.validate()?;
        let cancel = CancelHandle::default();
        let session = PrinterSession::with_cancel(config.session.clone(), cancel.clone());
        Ok(Self {
            model,
            config,
            session,
            cancel,
        })
    }

    pub fn model(&self) -> &'static ModelSpec {
        self.model
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    /// Handle for cancelling a print from another task (e.g. on Ctrl-C).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Open a transport of `kind` to `selector`.
    pub async fn connect(&mut self, kind: TransportKind, selector: &str) -> Result<(), EtiquetaError> {
        let transport = transport::open(kind, &self.config)?;
        self.connect_with(transport, selector).await
    }

    /// Connect over a transport built by the caller.
    pub async fn connect_with(
        &mut self,
        transport: Box<dyn Transport>,
        selector: &str,
    ) -> Result<(), EtiquetaError> {
        if self.session.state().is_terminal() {
            // A cancel aimed at the finished print must not carry over.
            self.cancel.reset();
            self.session =
                PrinterSession::with_cancel(self.config.session.clone(), self.cancel.clone());
        }
        self.session.connect(transport, selector).await
    }

    /// Calibrate (if needed) and print `image` at `density`.
    pub async fn print_image(&mut self, image: &RasterImage, density: u8) -> Result<(), EtiquetaError> {
        let calibrated_at = self.session.density();
        match *self.session.state() {
            SessionState::Connected => self.session.calibrate(self.model.id, density).await?,
            SessionState::Calibrated if calibrated_at != Some(density) => {
                return Err(EtiquetaError::InvalidConfiguration(format!(
                    "printer calibrated at density {}, reconnect to print at {}",
                    calibrated_at.unwrap_or_default(),
                    density
                )));
            }
            _ => {}
        }
        self.session.print_image(image, density).await
    }

    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }
}
