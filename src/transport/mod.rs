//! # Printer Transport Layer
//!
//! This module provides communication backends for talking to printers.
//! Every backend implements [`Transport`], so the session and codec never
//! see which physical link they run on.
//!
//! ## Available Transports
//!
//! - [`serial`]: byte-stream tty (USB serial or a bound RFCOMM device),
//!   opened by path at a fixed baud rate
//! - [`radio`]: BLE-style link, connected by discovery, writes bounded by the
//!   link MTU, responses arrive as notifications
//! - [`mock`]: scripted in-memory printer for tests
//!
//! ## Ownership
//!
//! A transport is owned by exactly one session for the session's lifetime.
//! A second concurrent print opens its own transport.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::EtiquetaError;

#[cfg(feature = "ble")]
pub mod ble;
pub mod mock;
pub mod radio;
pub mod serial;

pub use mock::{MockHandle, MockTransport};
pub use radio::{RadioAdapter, RadioLink, RadioTransport};
pub use serial::SerialTransport;

/// Which physical link to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Wireless link found by discovery
    Radio,
    /// Serial / RFCOMM device opened by path
    Serial,
    /// In-memory scripted printer, library and tests only
    #[value(skip)]
    Mock,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Radio => "radio",
            TransportKind::Serial => "serial",
            TransportKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

impl FromStr for TransportKind {
    type Err = EtiquetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "radio" | "ble" | "bluetooth" => Ok(TransportKind::Radio),
            "serial" | "tty" | "usb" => Ok(TransportKind::Serial),
            "mock" => Ok(TransportKind::Mock),
            other => Err(EtiquetaError::InvalidConfiguration(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}

/// A physical link to one printer.
#[async_trait]
pub trait Transport: Send {
    /// Establish the link to the device named by `selector`.
    ///
    /// Radio: device name prefix or address to discover.
    /// Serial: device path (e.g. `/dev/ttyUSB0`, `/dev/rfcomm0`).
    async fn connect(&mut self, selector: &str) -> Result<(), EtiquetaError>;

    /// Write all of `data` to the device.
    async fn send(&mut self, data: &[u8]) -> Result<(), EtiquetaError>;

    /// Wait up to `timeout` for the next bytes from the device.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, EtiquetaError>;

    /// Close the link. Idempotent and best-effort: failures are logged.
    async fn disconnect(&mut self);

    fn kind(&self) -> TransportKind;

    fn is_connected(&self) -> bool;
}

/// Build an unconnected transport of the given kind.
pub fn open(kind: TransportKind, config: &Config) -> Result<Box<dyn Transport>, EtiquetaError> {
    match kind {
        TransportKind::Serial => Ok(Box::new(SerialTransport::new(config.serial.clone()))),
        TransportKind::Radio => open_radio(config),
        TransportKind::Mock => Ok(Box::new(MockTransport::acking())),
    }
}

#[cfg(feature = "ble")]
fn open_radio(config: &Config) -> Result<Box<dyn Transport>, EtiquetaError> {
    let adapter = ble::BleAdapter::new(&config.radio)?;
    Ok(Box::new(RadioTransport::new(
        Box::new(adapter),
        config.radio.clone(),
    )))
}

#[cfg(not(feature = "ble"))]
fn open_radio(_config: &Config) -> Result<Box<dyn Transport>, EtiquetaError> {
    Err(EtiquetaError::InvalidConfiguration(
        "radio transport requires the 'ble' feature".to_string(),
    ))
}
