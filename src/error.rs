//! # Error Types
//!
//! This module defines error types used throughout the etiqueta library.
//!
//! Every failure collapses to one [`ErrorKind`], which is what a session
//! records in its terminal `Failed` state. Host applications use
//! [`ErrorKind::remedy`] to decide what to tell the user ("pair again",
//! "reconnect", "pick a different model") instead of showing one generic
//! error.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::commands::Command;
use crate::protocol::packet::PacketError;

/// Main error type for etiqueta operations
#[derive(Debug, Error)]
pub enum EtiquetaError {
    /// Device not found, discovery cancelled, permission denied, busy port
    #[error("Connection error: {0}")]
    Connection(String),

    /// No bytes arrived before the deadline
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        after: Duration,
        waiting_for: String,
    },

    /// Checksum or framing mismatch on received bytes
    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] PacketError),

    /// Unexpected ack, device-reported fault, illegal call order
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Model or density mismatch, bad configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller misuse (zero repeat count, row wider than the printhead, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The print was cancelled while in progress
    #[error("Print cancelled by user")]
    UserCancelled,

    /// Link dropped mid-write, read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image loading error (CLI)
    #[error("Image error: {0}")]
    Image(String),
}

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("InvalidState: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("unexpected ack for {command}: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedAck {
        command: Command,
        expected: u8,
        actual: u8,
    },

    #[error("device rejected {command}")]
    DeviceRejected { command: Command },

    #[error("device busy while handling {command}")]
    DeviceBusy { command: Command },

    #[error("device fault {code:#04x} while handling {command}")]
    DeviceFault { command: Command, code: u8 },

    #[error("{command} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        command: Command,
        attempts: u32,
        #[source]
        last: Box<EtiquetaError>,
    },
}

/// The error taxonomy a failed session collapses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Timeout,
    MalformedPacket,
    Protocol,
    InvalidConfiguration,
    InvalidInput,
    UserCancelled,
    Io,
}

/// What the host application should suggest to the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
    /// Device not found or access denied: pair or plug the printer again.
    RetryPairing,
    /// The link dropped or went silent: reconnect and print again.
    Reconnect,
    /// Unsupported model or density: choose a different model/setting.
    ChooseDifferentModel,
    /// Fix the request itself (image size, arguments).
    FixRequest,
    /// Nothing to do, the user stopped the print.
    None,
}

impl EtiquetaError {
    /// Collapse this error into its taxonomy class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MalformedPacket(_) => ErrorKind::MalformedPacket,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Self::InvalidInput(_) | Self::Image(_) => ErrorKind::InvalidInput,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for `self.kind().remedy()`.
    pub fn remedy(&self) -> Remedy {
        self.kind().remedy()
    }

    pub(crate) fn timeout(after: Duration, waiting_for: impl Into<String>) -> Self {
        Self::Timeout {
            after,
            waiting_for: waiting_for.into(),
        }
    }

    /// Errors that are worth another attempt for idempotent commands.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::MalformedPacket(_)
                | Self::Protocol(ProtocolError::DeviceBusy { .. })
        )
    }
}

impl ErrorKind {
    pub fn remedy(self) -> Remedy {
        match self {
            ErrorKind::Connection => Remedy::RetryPairing,
            ErrorKind::Timeout | ErrorKind::Io | ErrorKind::MalformedPacket | ErrorKind::Protocol => {
                Remedy::Reconnect
            }
            ErrorKind::InvalidConfiguration => Remedy::ChooseDifferentModel,
            ErrorKind::InvalidInput => Remedy::FixRequest,
            ErrorKind::UserCancelled => Remedy::None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::MalformedPacket => "MalformedPacketError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::InvalidConfiguration => "InvalidConfiguration",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::UserCancelled => "UserCancelled",
            ErrorKind::Io => "IOError",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hint = match self {
            Remedy::RetryPairing => "check that the printer is on, paired and not in use, then connect again",
            Remedy::Reconnect => "the printer stopped responding; reconnect and print again",
            Remedy::ChooseDifferentModel => "pick a different printer model or density",
            Remedy::FixRequest => "check the image and arguments",
            Remedy::None => "print cancelled",
        };
        f.write_str(hint)
    }
}
