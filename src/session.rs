//! # Print Session
//!
//! [`PrinterSession`] sequences the request/acknowledge exchange for one
//! label on one connected transport.
//!
//! ## States
//!
//! ```text
//!   Idle ──connect──▶ Connected ──calibrate──▶ Calibrated ──start_print_job──▶ Printing
//!                                                                           │  ▲
//!                                                                  send_row │  │
//!                                                                           ▼  │
//!                                                         Completed ◀──end_print_job
//!
//!   any non-terminal state ──device/transport failure──▶ Failed(kind)
//! ```
//!
//! `Completed` and `Failed` are terminal. A new print needs a new session.
//!
//! ## Failure Policy
//!
//! - Calling an operation in the wrong state, or with bad arguments, is
//!   rejected locally: the state does not change and nothing is sent.
//! - Idempotent setup commands (SetDensity, SetLabelType, StartPrint,
//!   StartPagePrint) are retried on timeouts, framing errors and busy
//!   replies, up to `max_retries` times.
//! - Rows are never retried. Any device or transport failure moves the
//!   session to `Failed` and closes the transport.
//! - A retried command may be acked twice. The extra ack is dropped when it
//!   shows up ahead of the next reply.
//!
//! ## Example
//!
//! ```
//! use etiqueta::config::SessionConfig;
//! use etiqueta::raster::RasterImage;
//! use etiqueta::session::{PrinterSession, SessionState};
//! use etiqueta::transport::MockTransport;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut session = PrinterSession::new(SessionConfig::default());
//! session.connect(Box::new(MockTransport::acking()), "mock").await?;
//! session.calibrate("d11_h", 3).await?;
//!
//! let label = RasterImage::from_fn(136, 40, |x, y| (x + y) % 9 == 0);
//! session.print_image(&label, 3).await?;
//! assert_eq!(*session.state(), SessionState::Completed);
//!
//! session.disconnect().await;
//! # Ok::<(), etiqueta::EtiquetaError>(())
//! # }).unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::error::{ErrorKind, EtiquetaError, ProtocolError};
use crate::printer::models::{self, ModelSpec};
use crate::protocol::commands::{self, Command, DEVICE_ERROR, PrintStatus, Request};
use crate::protocol::packet::{Malformed, Packet, PacketError, PacketReader};
use crate::raster::{self, RasterImage};
use crate::transport::Transport;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Calibrated,
    Printing,
    Completed,
    Failed(ErrorKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("Idle"),
            SessionState::Connected => f.write_str("Connected"),
            SessionState::Calibrated => f.write_str("Calibrated"),
            SessionState::Printing => f.write_str("Printing"),
            SessionState::Completed => f.write_str("Completed"),
            SessionState::Failed(kind) => write!(f, "Failed({})", kind),
        }
    }
}

/// Requests cancellation of a running print from another task.
///
/// The session checks the flag before every setup command, row and status
/// poll.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a cancellation so the handle can serve the next print.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
struct Calibration {
    model: &'static ModelSpec,
    density: u8,
}

#[derive(Debug, Clone, Copy)]
struct PrintJob {
    total_rows: u16,
    rows_sent: u16,
}

/// One print on one connected printer.
pub struct PrinterSession {
    config: SessionConfig,
    transport: Option<Box<dyn Transport>>,
    reader: PacketReader,
    state: SessionState,
    calibration: Option<Calibration>,
    job: Option<PrintJob>,
    /// StartPrint acknowledged and EndPrint not yet sent.
    job_open: bool,
    /// Last command whose ack was accepted. A second copy of that ack is a
    /// late reply to an earlier attempt, not an answer to the next request.
    last_acked: Option<Command>,
    cancel: CancelHandle,
}

impl PrinterSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_cancel(config, CancelHandle::default())
    }

    /// Like [`PrinterSession::new`], observing an existing cancel flag.
    pub fn with_cancel(config: SessionConfig, cancel: CancelHandle) -> Self {
        Self {
            config,
            transport: None,
            reader: PacketReader::new(),
            state: SessionState::Idle,
            calibration: None,
            job: None,
            job_open: false,
            last_acked: None,
            cancel,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Model picked by `calibrate`.
    pub fn model(&self) -> Option<&'static ModelSpec> {
        self.calibration.map(|c| c.model)
    }

    pub fn density(&self) -> Option<u8> {
        self.calibration.map(|c| c.density)
    }

    /// Rows covered by PrintRow commands in the current job.
    pub fn rows_sent(&self) -> usize {
        self.job.map_or(0, |job| job.rows_sent as usize)
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Open `transport` to the device named by `selector`.
    ///
    /// The session owns the transport from here on.
    pub async fn connect(
        &mut self,
        mut transport: Box<dyn Transport>,
        selector: &str,
    ) -> Result<(), EtiquetaError> {
        self.require("connect", SessionState::Idle)?;
        self.config.validate()?;

        tracing::info!("Connecting to '{}' over {}", selector, transport.kind());
        match transport.connect(selector).await {
            Ok(()) => {
                self.reader.clear();
                self.last_acked = None;
                self.transport = Some(transport);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                transport.disconnect().await;
                self.state = SessionState::Failed(e.kind());
                tracing::warn!("Connection to '{}' failed: {}", selector, e);
                Err(e)
            }
        }
    }

    /// Select the printer model and set density and label type.
    pub async fn calibrate(&mut self, model_id: &str, density: u8) -> Result<(), EtiquetaError> {
        self.require("calibrate", SessionState::Connected)?;
        let model = models::require(model_id)?;
        model.validate_density(density)?;

        tracing::info!("Calibrating {} at density {}", model.name, density);
        if let Err(e) = self.setup_command(commands::set_density(density)).await {
            return Err(self.fail(e).await);
        }
        let label_type = self.config.label_type;
        if let Err(e) = self.setup_command(commands::set_label_type(label_type)).await {
            return Err(self.fail(e).await);
        }

        self.calibration = Some(Calibration { model, density });
        self.state = SessionState::Calibrated;
        Ok(())
    }

    /// Announce a single-page job of `total_rows` rows.
    pub async fn start_print_job(&mut self, total_rows: usize) -> Result<(), EtiquetaError> {
        self.require("start_print_job", SessionState::Calibrated)?;
        let model = self.calibrated_model()?;
        let rows = u16::try_from(total_rows)
            .ok()
            .filter(|&r| r > 0)
            .ok_or_else(|| {
                EtiquetaError::InvalidInput(format!(
                    "a job needs 1 to {} rows, got {}",
                    u16::MAX,
                    total_rows
                ))
            })?;

        tracing::info!("Starting job: {} rows x {} dots", rows, model.printhead_pixels);
        if let Err(e) = self.setup_command(commands::start_print(1)).await {
            return Err(self.fail(e).await);
        }
        self.job_open = true;
        let page = commands::start_page_print(rows, model.printhead_pixels);
        if let Err(e) = self.setup_command(page).await {
            return Err(self.fail(e).await);
        }

        self.job = Some(PrintJob {
            total_rows: rows,
            rows_sent: 0,
        });
        self.state = SessionState::Printing;
        Ok(())
    }

    /// Print `row` (packed, MSB = leftmost dot) `repeat` times.
    ///
    /// Rows narrower than the printhead are padded with white.
    pub async fn send_row(&mut self, row: &[u8], repeat: u8) -> Result<(), EtiquetaError> {
        self.require("send_row", SessionState::Printing)?;
        let model = self.calibrated_model()?;
        let job = self.job.ok_or_else(|| self.invalid_state("send_row"))?;

        if repeat == 0 {
            return Err(EtiquetaError::InvalidInput("repeat count must be at least 1".into()));
        }
        if job.rows_sent as usize + repeat as usize > job.total_rows as usize {
            return Err(EtiquetaError::InvalidInput(format!(
                "{} more rows would pass the job's {} rows ({} sent)",
                repeat, job.total_rows, job.rows_sent
            )));
        }
        let data = raster::pad_row(row, model.row_bytes())?;

        if self.cancel.is_cancelled() {
            return Err(self.abort_cancelled().await);
        }

        let request = commands::print_row(job.rows_sent, repeat, &data);
        let timeout = self.config.command_timeout();
        if let Err(e) = self.transact(&request, timeout).await {
            return Err(self.fail(e).await);
        }

        self.job = Some(PrintJob {
            rows_sent: job.rows_sent + repeat as u16,
            ..job
        });
        Ok(())
    }

    /// Finish the page and job, then wait for the printer to go idle.
    pub async fn end_print_job(&mut self) -> Result<(), EtiquetaError> {
        self.require("end_print_job", SessionState::Printing)?;
        if let Some(job) = self.job
            && job.rows_sent < job.total_rows
        {
            tracing::warn!(
                "Ending job after {} of {} rows",
                job.rows_sent,
                job.total_rows
            );
        }

        let timeout = self.config.end_timeout();
        for request in [commands::end_page_print(), commands::end_print()] {
            if let Err(e) = self.transact(&request, timeout).await {
                return Err(self.fail(e).await);
            }
        }
        self.job_open = false;

        if let Err(e) = self.wait_until_idle().await {
            return Err(self.fail(e).await);
        }

        tracing::info!("Print completed");
        self.state = SessionState::Completed;
        Ok(())
    }

    /// Print a whole image on a calibrated session.
    ///
    /// `density` must match the calibrated density.
    pub async fn print_image(
        &mut self,
        image: &RasterImage,
        density: u8,
    ) -> Result<(), EtiquetaError> {
        self.require("print_image", SessionState::Calibrated)?;
        let calibration = self
            .calibration
            .ok_or_else(|| self.invalid_state("print_image"))?;
        let model = calibration.model;

        if density != calibration.density {
            return Err(EtiquetaError::InvalidConfiguration(format!(
                "session calibrated at density {}, print requested {}",
                calibration.density, density
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(EtiquetaError::InvalidInput(format!(
                "image is empty ({}x{})",
                image.width(),
                image.height()
            )));
        }
        if image.width() > model.printhead_pixels as usize {
            return Err(EtiquetaError::InvalidInput(format!(
                "image is {} dots wide, {} prints {}",
                image.width(),
                model.name,
                model.printhead_pixels
            )));
        }
        if image.height() > u16::MAX as usize {
            return Err(EtiquetaError::InvalidInput(format!(
                "image is {} rows tall, at most {} fit one job",
                image.height(),
                u16::MAX
            )));
        }

        let runs = raster::compress_rows(image, model.row_bytes())?;
        tracing::debug!(
            "{}x{} image compressed to {} row commands",
            image.width(),
            image.height(),
            runs.len()
        );

        self.start_print_job(image.height()).await?;
        for run in &runs {
            self.send_row(&run.data, run.repeat).await?;
        }
        self.end_print_job().await
    }

    /// Close the transport. Safe to call in any state, any number of times.
    ///
    /// Disconnecting mid-print ends the job on the device and records it as
    /// cancelled. Before printing starts the session returns to `Idle` and
    /// may connect again.
    pub async fn disconnect(&mut self) {
        match self.state {
            SessionState::Connected | SessionState::Calibrated => {
                self.state = SessionState::Idle;
                self.calibration = None;
            }
            SessionState::Printing => {
                let _ = self.abort_cancelled().await;
            }
            _ => {}
        }
        self.close_transport().await;
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn invalid_state(&self, operation: &'static str) -> EtiquetaError {
        ProtocolError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
        .into()
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<(), EtiquetaError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn calibrated_model(&self) -> Result<&'static ModelSpec, EtiquetaError> {
        self.model()
            .ok_or_else(|| self.invalid_state("print without calibration"))
    }

    fn transport_mut(&mut self) -> Result<&mut Box<dyn Transport>, EtiquetaError> {
        self.transport
            .as_mut()
            .ok_or_else(|| EtiquetaError::Connection("session has no open transport".to_string()))
    }

    async fn close_transport(&mut self) {
        self.reader.clear();
        self.last_acked = None;
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }
    }

    /// Record a device or transport failure and close the link.
    async fn fail(&mut self, error: EtiquetaError) -> EtiquetaError {
        if matches!(error, EtiquetaError::UserCancelled) {
            return self.abort_cancelled().await;
        }
        tracing::warn!("Session failed in {}: {}", self.state, error);
        self.state = SessionState::Failed(error.kind());
        self.close_transport().await;
        error
    }

    /// Best-effort end of an open job, then `Failed(UserCancelled)`.
    async fn abort_cancelled(&mut self) -> EtiquetaError {
        if self.job_open {
            tracing::info!("Print cancelled, ending job");
            let timeout = self.config.command_timeout();
            for request in [commands::end_page_print(), commands::end_print()] {
                if let Err(e) = self.transact(&request, timeout).await {
                    tracing::debug!("Ignoring {} failure during cancel: {}", request.command, e);
                    self.reader.clear();
                }
            }
            self.job_open = false;
        } else {
            tracing::info!("Cancelled in {}", self.state);
        }
        self.state = SessionState::Failed(ErrorKind::UserCancelled);
        self.close_transport().await;
        EtiquetaError::UserCancelled
    }

    /// Send an idempotent command, retrying transient failures.
    async fn setup_command(&mut self, request: Request) -> Result<Packet, EtiquetaError> {
        debug_assert!(request.command.is_idempotent());
        let attempts = 1 + self.config.max_retries;
        let timeout = self.config.command_timeout();
        let mut attempt = 1;

        loop {
            if self.cancel.is_cancelled() {
                return Err(EtiquetaError::UserCancelled);
            }
            match self.transact(&request, timeout).await {
                Ok(packet) => return Ok(packet),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}",
                        request.command,
                        attempt,
                        attempts,
                        e
                    );
                    self.reader.clear();
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(ProtocolError::RetriesExhausted {
                        command: request.command,
                        attempts: attempt,
                        last: Box::new(e),
                    }
                    .into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one request and wait for its response.
    async fn transact(&mut self, request: &Request, timeout: Duration) -> Result<Packet, EtiquetaError> {
        let frame = request.encode()?;
        tracing::debug!(
            "→ {} ({} byte payload)",
            request.command,
            request.payload.len()
        );
        self.transport_mut()?.send(&frame).await?;
        self.await_response(request.command, timeout).await
    }

    async fn await_response(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<Packet, EtiquetaError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.reader.next_packet() {
                Ok(Some(packet)) => {
                    if let Some(previous) = self.last_acked
                        && previous != command
                        && packet.command == previous.ack_id()
                    {
                        tracing::warn!(
                            "Dropping late {} ack while waiting for {}",
                            previous,
                            command
                        );
                        continue;
                    }
                    let response = check_response(command, packet);
                    if response.is_ok() {
                        self.last_acked = Some(command);
                    }
                    return response;
                }
                Ok(None) => {}
                // Line noise ahead of a frame, already dropped by the reader.
                Err(PacketError::Malformed {
                    reason: Malformed::Garbage,
                    ..
                }) => continue,
                Err(e) => return Err(e.into()),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EtiquetaError::timeout(timeout, format!("{} ack", command)));
            }
            let bytes = self.transport_mut()?.receive(remaining).await?;
            self.reader.push(&bytes);
        }
    }

    /// Poll PrintStatus with exponential backoff until the printer is idle.
    async fn wait_until_idle(&mut self) -> Result<(), EtiquetaError> {
        let timeout = self.config.command_timeout();
        let started = Instant::now();

        for attempt in 0..self.config.status_poll_attempts {
            if self.cancel.is_cancelled() {
                return Err(EtiquetaError::UserCancelled);
            }
            match self.transact(&commands::print_status(), timeout).await {
                Ok(packet) => match PrintStatus::parse(&packet.payload) {
                    Some(status) if status.is_idle() => return Ok(()),
                    Some(status) => tracing::debug!(
                        "Printing: {}% printed, {}% fed",
                        status.print_progress,
                        status.feed_progress
                    ),
                    None => tracing::debug!("Short status payload: {:02X?}", packet.payload),
                },
                Err(e) if e.is_transient() => {
                    tracing::debug!("Status poll {} failed: {}", attempt + 1, e);
                    self.reader.clear();
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.config.poll_delay(attempt)).await;
        }

        Err(EtiquetaError::timeout(
            started.elapsed(),
            "printer to become idle",
        ))
    }
}

/// Match a response frame against the request it answers.
fn check_response(command: Command, packet: Packet) -> Result<Packet, EtiquetaError> {
    if packet.command == command.ack_id() {
        tracing::debug!("← {} ack {:02X?}", command, packet.payload);
        if command != Command::PrintStatus {
            commands::check_ack_status(command, &packet.payload)?;
        }
        return Ok(packet);
    }
    if packet.command == DEVICE_ERROR {
        let code = packet.payload.first().copied().unwrap_or(0);
        return Err(ProtocolError::DeviceFault { command, code }.into());
    }
    Err(ProtocolError::UnexpectedAck {
        command,
        expected: command.ack_id(),
        actual: packet.command,
    }
    .into())
}

// ============================================================================
// TESTS
// ============================================================================
