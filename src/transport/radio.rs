//! # Radio Transport
//!
//! Wireless (BLE-style) link to a printer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ RadioTransport (THIS FILE)                   │
//! │ - MTU chunking                               │
//! │ - notification → receive(timeout)            │
//! └─────────────────┬────────────────────────────┘
//!                   │ uses
//! ┌─────────────────▼────────────────────────────┐
//! │ RadioAdapter / RadioLink traits              │
//! │ - scan bounded by the discovery timeout      │
//! └─────────────────┬────────────────────────────┘
//!                   │ implemented by
//! ┌─────────────────▼────────────────────────────┐
//! │ ble::BleAdapter (btleplug), test fakes       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Chunked Writes
//!
//! A frame larger than the link MTU is split into MTU-sized writes sent in
//! order. The printer reassembles them; the codec never sees chunk
//! boundaries.

use std::io;
use std::time::Duration;

use async_trait::async_trait;

use super::{Transport, TransportKind};
use crate::config::RadioConfig;
use crate::error::EtiquetaError;

/// Finds and connects to a printer.
#[async_trait]
pub trait RadioAdapter: Send {
    /// Scan for a device whose name starts with, or whose address equals,
    /// `selector` (case-insensitive) and open a link to it.
    ///
    /// The scan gives up after `timeout` with [`discovery_timed_out`]. The
    /// connect that follows is not cut short, so a half-open link is always
    /// closed by the adapter itself.
    async fn discover(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RadioLink>, EtiquetaError>;
}

/// Error for a scan that found nothing matching `selector`.
pub fn discovery_timed_out(selector: &str, timeout: Duration) -> EtiquetaError {
    EtiquetaError::Connection(format!(
        "no device matching '{}' responded within {:?}",
        selector, timeout
    ))
}

/// An established wireless link.
#[async_trait]
pub trait RadioLink: Send {
    /// Largest single write the link accepts.
    fn mtu(&self) -> usize;

    /// Write one chunk of at most `mtu()` bytes.
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Wait for the next notification payload.
    ///
    /// Fails when the link drops.
    async fn next_notification(&mut self) -> io::Result<Vec<u8>>;

    async fn close(&mut self) -> io::Result<()>;
}

/// # Radio Printer Transport
pub struct RadioTransport {
    adapter: Box<dyn RadioAdapter>,
    config: RadioConfig,
    link: Option<Box<dyn RadioLink>>,
}

impl RadioTransport {
    pub fn new(adapter: Box<dyn RadioAdapter>, config: RadioConfig) -> Self {
        Self {
            adapter,
            config,
            link: None,
        }
    }

    /// Effective chunk size: the smaller of link and configured MTU.
    pub fn chunk_size(&self) -> Option<usize> {
        self.link
            .as_ref()
            .map(|link| link.mtu().min(self.config.mtu).max(1))
    }

    fn link_mut(&mut self) -> Result<&mut Box<dyn RadioLink>, EtiquetaError> {
        self.link
            .as_mut()
            .ok_or_else(|| EtiquetaError::Connection("radio link is not connected".to_string()))
    }
}

#[async_trait]
impl Transport for RadioTransport {
    async fn connect(&mut self, selector: &str) -> Result<(), EtiquetaError> {
        if self.link.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        let timeout = self.config.discovery_timeout();
        tracing::info!("Discovering '{}' (timeout {:?})", selector, timeout);

        let link = self.adapter.discover(selector, timeout).await?;

        tracing::info!("Connected to '{}' (mtu {})", selector, link.mtu());
        self.link = Some(link);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), EtiquetaError> {
        let chunk_size = self
            .chunk_size()
            .ok_or_else(|| EtiquetaError::Connection("radio link is not connected".to_string()))?;
        let delay = self.config.chunk_delay();
        let link = self.link_mut()?;

        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            link.write(chunk).await?;
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, EtiquetaError> {
        let link = self.link_mut()?;
        let bytes = tokio::time::timeout(timeout, link.next_notification())
            .await
            .map_err(|_| EtiquetaError::timeout(timeout, "radio notification"))??;
        Ok(bytes)
    }

    async fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            match link.close().await {
                Ok(()) => tracing::info!("Radio link closed"),
                Err(e) => tracing::warn!("Error closing radio link: {}", e),
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================
