//! # Printer Commands
//!
//! Request builders and response parsers for the commands a print session
//! issues. Every request is answered by exactly one response frame whose
//! command id is the request's [`Command::ack_id`].
//!
//! ## Command Table
//!
//! | Command        | Request | Ack  | Payload                           |
//! |----------------|---------|------|-----------------------------------|
//! | SetDensity     | 0x21    | 0x31 | density                           |
//! | SetLabelType   | 0x23    | 0x33 | label type                        |
//! | StartPrint     | 0x01    | 0x02 | page count (u16 BE)               |
//! | StartPagePrint | 0x03    | 0x04 | rows (u16 BE), columns (u16 BE)   |
//! | PrintRow       | 0x85    | 0x86 | row (u16 BE), repeat, row bytes   |
//! | EndPagePrint   | 0xE3    | 0xE4 | 0x01                              |
//! | EndPrint       | 0xF3    | 0xF4 | 0x01                              |
//! | PrintStatus    | 0xA3    | 0xB3 | 0x01                              |
//!
//! A device that cannot handle a request answers with [`DEVICE_ERROR`]
//! carrying a one-byte error code instead of the ack.
//!
//! The opcode values are placeholders that follow the common layout of
//! this printer family. Validate them against the firmware before use.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::packet::{self, PacketError};
use crate::error::ProtocolError;

/// Response id the device uses to report a failed request.
pub const DEVICE_ERROR: u8 = 0xDB;

/// Ack status byte: request accepted.
pub const STATUS_OK: u8 = 0x01;

/// Ack status byte: request refused.
pub const STATUS_REJECTED: u8 = 0x00;

/// Ack status byte: device busy, try again.
pub const STATUS_BUSY: u8 = 0x02;

/// Bytes in a PrintRow payload before the row data.
pub const ROW_HEADER_LEN: usize = 3;

/// Longest row (in bytes) a PrintRow frame can carry.
pub const MAX_ROW_BYTES: usize = packet::MAX_PAYLOAD - ROW_HEADER_LEN;

/// Commands issued by a print session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SetDensity,
    SetLabelType,
    StartPrint,
    StartPagePrint,
    PrintRow,
    EndPagePrint,
    EndPrint,
    PrintStatus,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::SetDensity,
        Command::SetLabelType,
        Command::StartPrint,
        Command::StartPagePrint,
        Command::PrintRow,
        Command::EndPagePrint,
        Command::EndPrint,
        Command::PrintStatus,
    ];

    /// Request opcode.
    pub const fn id(self) -> u8 {
        match self {
            Command::SetDensity => 0x21,
            Command::SetLabelType => 0x23,
            Command::StartPrint => 0x01,
            Command::StartPagePrint => 0x03,
            Command::PrintRow => 0x85,
            Command::EndPagePrint => 0xE3,
            Command::EndPrint => 0xF3,
            Command::PrintStatus => 0xA3,
        }
    }

    /// Command id of the response acknowledging this request.
    pub const fn ack_id(self) -> u8 {
        match self {
            Command::SetDensity => 0x31,
            Command::SetLabelType => 0x33,
            Command::StartPrint => 0x02,
            Command::StartPagePrint => 0x04,
            Command::PrintRow => 0x86,
            Command::EndPagePrint => 0xE4,
            Command::EndPrint => 0xF4,
            Command::PrintStatus => 0xB3,
        }
    }

    /// Look a request up by opcode.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    /// Look a request up by the id of its ack.
    pub fn from_ack_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.ack_id() == id)
    }

    /// Whether sending this command twice leaves the device in the same
    /// state as sending it once.
    pub const fn is_idempotent(self) -> bool {
        matches!(
            self,
            Command::SetDensity
                | Command::SetLabelType
                | Command::StartPrint
                | Command::StartPagePrint
                | Command::PrintStatus
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Media loaded in the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    #[default]
    WithGaps,
    Black,
    Continuous,
    Perforated,
    Transparent,
    BlackMarkGap,
}

impl LabelType {
    pub const fn code(self) -> u8 {
        match self {
            LabelType::WithGaps => 1,
            LabelType::Black => 2,
            LabelType::Continuous => 3,
            LabelType::Perforated => 4,
            LabelType::Transparent => 5,
            LabelType::BlackMarkGap => 10,
        }
    }

    /// Parse a snake_case name as used in config files and on the CLI.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "with_gaps" | "gaps" => Some(LabelType::WithGaps),
            "black" => Some(LabelType::Black),
            "continuous" => Some(LabelType::Continuous),
            "perforated" => Some(LabelType::Perforated),
            "transparent" => Some(LabelType::Transparent),
            "black_mark_gap" => Some(LabelType::BlackMarkGap),
            _ => None,
        }
    }
}

// ============================================================================
// REQUEST BUILDERS
// ============================================================================

/// A command plus its payload, ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Request {
    fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Encode into a wire frame.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        packet::encode(self.command.id(), &self.payload)
    }
}

pub fn set_density(density: u8) -> Request {
    Request::new(Command::SetDensity, vec![density])
}

pub fn set_label_type(label_type: LabelType) -> Request {
    Request::new(Command::SetLabelType, vec![label_type.code()])
}

/// Start a job. The session always prints a single page.
pub fn start_print(pages: u16) -> Request {
    Request::new(Command::StartPrint, pages.to_be_bytes().to_vec())
}

/// Start a page of `rows` rows, each `columns` dots wide.
pub fn start_page_print(rows: u16, columns: u16) -> Request {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&rows.to_be_bytes());
    payload.extend_from_slice(&columns.to_be_bytes());
    Request::new(Command::StartPagePrint, payload)
}

/// # Print Row
///
/// ```text
/// ┌────────┬────────┬────────┬─────────────────────┐
/// │ row_hi │ row_lo │ repeat │ row bytes (MSB=left) │
/// └────────┴────────┴────────┴─────────────────────┘
/// ```
///
/// The device prints `data` `repeat` times starting at row `row`.
pub fn print_row(row: u16, repeat: u8, data: &[u8]) -> Request {
    let mut payload = Vec::with_capacity(ROW_HEADER_LEN + data.len());
    payload.extend_from_slice(&row.to_be_bytes());
    payload.push(repeat);
    payload.extend_from_slice(data);
    Request::new(Command::PrintRow, payload)
}

pub fn end_page_print() -> Request {
    Request::new(Command::EndPagePrint, vec![0x01])
}

pub fn end_print() -> Request {
    Request::new(Command::EndPrint, vec![0x01])
}

pub fn print_status() -> Request {
    Request::new(Command::PrintStatus, vec![0x01])
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Check the status byte of a command ack.
///
/// An empty payload counts as success.
pub fn check_ack_status(command: Command, payload: &[u8]) -> Result<(), ProtocolError> {
    match payload.first() {
        None | Some(&STATUS_OK) => Ok(()),
        Some(&STATUS_REJECTED) => Err(ProtocolError::DeviceRejected { command }),
        Some(&STATUS_BUSY) => Err(ProtocolError::DeviceBusy { command }),
        Some(&code) => Err(ProtocolError::DeviceFault { command, code }),
    }
}

/// Decoded PrintStatus response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintStatus {
    /// Pages finished in the current job.
    pub page: u16,
    /// Thermal printing progress, percent.
    pub print_progress: u8,
    /// Feed/cut progress, percent.
    pub feed_progress: u8,
}

impl PrintStatus {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            [page_hi, page_lo, print_progress, feed_progress, ..] => Some(Self {
                page: u16::from_be_bytes([*page_hi, *page_lo]),
                print_progress: *print_progress,
                feed_progress: *feed_progress,
            }),
            _ => None,
        }
    }

    /// Payload of an idle status after `page` finished pages.
    pub fn idle_payload(page: u16) -> Vec<u8> {
        let [hi, lo] = page.to_be_bytes();
        vec![hi, lo, 100, 100]
    }

    /// The head and feed have both finished.
    pub fn is_idle(&self) -> bool {
        self.print_progress >= 100 && self.feed_progress >= 100
    }
}

// ============================================================================
// TESTS
// ============================================================================
