//! # Label Printer Wire Protocol
//!
//! Low-level framing and command builders for the printer's binary
//! request/acknowledge protocol.
//!
//! ## Module Structure
//!
//! - [`packet`]: frame codec (header, command, length, payload, checksum,
//!   footer) and stream reassembly
//! - [`commands`]: opcodes, request builders and response parsers
//!
//! ## Usage Example
//!
//! ```
//! use etiqueta::protocol::{commands, packet};
//!
//! // Frame a SetDensity request
//! let frame = commands::set_density(3).encode().unwrap();
//!
//! // Decode it again
//! let (pkt, used) = packet::decode(&frame).unwrap();
//! assert_eq!(pkt.command, commands::Command::SetDensity.id());
//! assert_eq!(pkt.payload, vec![3]);
//! assert_eq!(used, frame.len());
//! ```

pub mod commands;
pub mod packet;

pub use commands::{Command, LabelType, PrintStatus, Request};
pub use packet::{Packet, PacketError, PacketReader};
