//! # Packet Framing
//!
//! Every command and response travels in the same frame:
//!
//! ```text
//! ┌──────┬──────┬─────────┬─────┬──────────────┬──────────┬──────┬──────┐
//! │ 0x55 │ 0x55 │ command │ len │ payload[len] │ checksum │ 0xAA │ 0xAA │
//! └──────┴──────┴─────────┴─────┴──────────────┴──────────┴──────┴──────┘
//!   header                                                  footer
//! ```
//!
//! - `len` is a single byte, so payloads are at most 255 bytes
//! - `checksum = command ^ len ^ payload[0] ^ ... ^ payload[len-1]`
//!
//! The XOR fold changes whenever any one covered byte changes, so a single
//! corrupted byte anywhere in the frame is detected: header and footer bytes
//! by the framing check, everything else by the checksum.
//!
//! ## Decoding a Stream
//!
//! [`decode`] never drops bytes silently. Leading garbage is reported as
//! [`Malformed::Garbage`] together with the number of bytes to skip to reach
//! the next header candidate; [`PacketReader`] applies the skip and resumes.

use std::fmt;

use thiserror::Error;

/// Frame header bytes.
pub const HEADER: [u8; 2] = [0x55, 0x55];

/// Frame footer bytes.
pub const FOOTER: [u8; 2] = [0xAA, 0xAA];

/// Maximum payload length representable by the length byte.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Frame size for an empty payload (header + command + len + checksum + footer).
pub const MIN_FRAME: usize = 7;

/// Frame size for the largest payload.
pub const MAX_FRAME: usize = MIN_FRAME + MAX_PAYLOAD;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl Packet {
    /// Build a packet, computing its checksum.
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge { len: payload.len() });
        }
        let checksum = checksum(command, &payload);
        Ok(Self {
            command,
            payload,
            checksum,
        })
    }

    /// Encode this packet into a frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MIN_FRAME + self.payload.len());
        frame.extend_from_slice(&HEADER);
        frame.push(self.command);
        frame.push(self.payload.len() as u8);
        frame.extend_from_slice(&self.payload);
        frame.push(self.checksum);
        frame.extend_from_slice(&FOOTER);
        frame
    }
}

/// Why a frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Bytes before the next header candidate.
    Garbage,
    /// Footer bytes missing where the length byte says the frame ends.
    Footer,
    /// Checksum byte does not match the frame contents.
    Checksum { expected: u8, actual: u8 },
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::Garbage => write!(f, "garbage before header"),
            Malformed::Footer => write!(f, "missing footer"),
            Malformed::Checksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:#04x}, got {actual:#04x}")
            }
        }
    }
}

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// More bytes are needed before a frame can be decoded. Not a failure.
    #[error("incomplete packet: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// The bytes at the front of the buffer are not a valid frame.
    /// Dropping `skip` bytes resynchronises on the next header candidate.
    #[error("{reason}")]
    Malformed { reason: Malformed, skip: usize },

    #[error("payload too large: {len} bytes (max {MAX_PAYLOAD})")]
    PayloadTooLarge { len: usize },
}

impl PacketError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, PacketError::Incomplete { .. })
    }
}

/// XOR fold over command, length and payload.
pub fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command ^ payload.len() as u8, |acc, &b| acc ^ b)
}

/// Encode `command` and `payload` into a frame.
///
/// ## Example
///
/// ```
/// use etiqueta::protocol::packet;
///
/// let frame = packet::encode(0x21, &[3]).unwrap();
/// assert_eq!(frame, vec![0x55, 0x55, 0x21, 0x01, 0x03, 0x23, 0xAA, 0xAA]);
/// ```
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    Packet::new(command, payload.to_vec()).map(|p| p.to_bytes())
}

/// Decode the frame at the front of `buf`.
///
/// Returns the packet and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<(Packet, usize), PacketError> {
    let skip = header_offset(buf);
    if skip > 0 {
        return Err(PacketError::Malformed {
            reason: Malformed::Garbage,
            skip,
        });
    }

    if buf.len() < 4 {
        return Err(PacketError::Incomplete {
            needed: MIN_FRAME - buf.len(),
        });
    }

    let command = buf[2];
    let len = buf[3] as usize;
    let total = MIN_FRAME + len;
    if buf.len() < total {
        return Err(PacketError::Incomplete {
            needed: total - buf.len(),
        });
    }

    if buf[total - 2..total] != FOOTER {
        return Err(PacketError::Malformed {
            reason: Malformed::Footer,
            skip: 1,
        });
    }

    let payload = &buf[4..4 + len];
    let expected = checksum(command, payload);
    let actual = buf[4 + len];
    if expected != actual {
        return Err(PacketError::Malformed {
            reason: Malformed::Checksum { expected, actual },
            skip: 1,
        });
    }

    Ok((
        Packet {
            command,
            payload: payload.to_vec(),
            checksum: actual,
        },
        total,
    ))
}

/// Offset of the first header candidate in `buf`.
///
/// A trailing lone header byte counts as a candidate, it may be completed by
/// the next read.
fn header_offset(buf: &[u8]) -> usize {
    if let Some(pos) = buf.windows(2).position(|w| w == HEADER) {
        return pos;
    }
    match buf.last() {
        Some(&b) if b == HEADER[0] => buf.len() - 1,
        _ => buf.len(),
    }
}

// ============================================================================
// STREAM REASSEMBLY
// ============================================================================

/// Accumulates received bytes and yields complete packets.
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Try to take the next packet from the buffer.
    ///
    /// `Ok(None)` means more input is needed. On a malformed frame the
    /// offending bytes are dropped before the error is returned, so the next
    /// call resumes on the following header candidate.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, PacketError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        match decode(&self.buf) {
            Ok((packet, used)) => {
                self.buf.drain(..used);
                Ok(Some(packet))
            }
            Err(PacketError::Incomplete { .. }) => Ok(None),
            Err(PacketError::Malformed { reason, skip }) => {
                tracing::warn!("Dropping {} bytes: {}", skip, reason);
                self.buf.drain(..skip.min(self.buf.len()));
                Err(PacketError::Malformed { reason, skip })
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0x01, &[0x00, 0x01]).unwrap();
        assert_eq!(
            frame,
            vec![0x55, 0x55, 0x01, 0x02, 0x00, 0x01, 0x01 ^ 0x02 ^ 0x01, 0xAA, 0xAA]
        );
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode(0xA3, &[]).unwrap();
        assert_eq!(frame.len(), MIN_FRAME);
        assert_eq!(frame[4], 0xA3);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = encode(0x85, &[0u8; 256]).unwrap_err();
        assert_eq!(err, PacketError::PayloadTooLarge { len: 256 });
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let mut buf = encode(0x31, &[0x01]).unwrap();
        buf.extend(encode(0x33, &[0x01]).unwrap());

        let (packet, used) = decode(&buf).unwrap();
        assert_eq!(packet.command, 0x31);
        assert_eq!(used, 8);

        let (packet, _) = decode(&buf[used..]).unwrap();
        assert_eq!(packet.command, 0x33);
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = encode(0x31, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(decode(&[]), Err(PacketError::Incomplete { needed: 7 }));
        assert_eq!(decode(&[0x55]), Err(PacketError::Incomplete { needed: 6 }));
        assert_eq!(
            decode(&frame[..5]),
            Err(PacketError::Incomplete {
                needed: frame.len() - 5
            })
        );
    }

    #[test]
    fn test_decode_garbage_prefix() {
        let mut buf = vec![0x00, 0x13, 0x37];
        buf.extend(encode(0x31, &[0x01]).unwrap());

        assert_eq!(
            decode(&buf),
            Err(PacketError::Malformed {
                reason: Malformed::Garbage,
                skip: 3
            })
        );
        let (packet, _) = decode(&buf[3..]).unwrap();
        assert_eq!(packet.command, 0x31);
    }

    #[test]
    fn test_decode_keeps_trailing_header_byte() {
        assert_eq!(
            decode(&[0x01, 0x02, 0x55]),
            Err(PacketError::Malformed {
                reason: Malformed::Garbage,
                skip: 2
            })
        );
    }

    #[test]
    fn test_decode_bad_footer() {
        let mut frame = encode(0x31, &[0x01]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;
        assert_eq!(
            decode(&frame),
            Err(PacketError::Malformed {
                reason: Malformed::Footer,
                skip: 1
            })
        );
    }

    #[test]
    fn test_decode_bad_checksum() {
        let mut frame = encode(0x31, &[0x01]).unwrap();
        frame[5] ^= 0xFF;
        assert!(matches!(
            decode(&frame),
            Err(PacketError::Malformed {
                reason: Malformed::Checksum { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_payload_may_contain_frame_bytes() {
        let payload = [0x55, 0x55, 0xAA, 0xAA, 0x55];
        let frame = encode(0x86, &payload).unwrap();
        let (packet, _) = decode(&frame).unwrap();
        assert_eq!(packet.payload, payload);
    }

    #[test]
    fn test_round_trip_every_payload_length() {
        for len in 0..=MAX_PAYLOAD {
            let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let frame = encode(0x85, &payload).unwrap();
            let (packet, used) = decode(&frame).unwrap();
            assert_eq!(packet.command, 0x85);
            assert_eq!(packet.payload, payload);
            assert_eq!(used, frame.len());
        }
    }

    // ========== Reader Tests ==========

    #[test]
    fn test_reader_reassembles_split_frames() {
        let frame = encode(0xB3, &[0x00, 0x01, 0x64, 0x64]).unwrap();
        let mut reader = PacketReader::new();

        for byte in &frame[..frame.len() - 1] {
            reader.push(&[*byte]);
            assert_eq!(reader.next_packet(), Ok(None));
        }
        reader.push(&frame[frame.len() - 1..]);

        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.command, 0xB3);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_reader_resyncs_after_garbage() {
        let mut reader = PacketReader::new();
        reader.push(&[0xDE, 0xAD]);
        reader.push(&encode(0x02, &[0x01]).unwrap());

        assert!(matches!(
            reader.next_packet(),
            Err(PacketError::Malformed {
                reason: Malformed::Garbage,
                skip: 2
            })
        ));
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.command, 0x02);
    }

    #[test]
    fn test_reader_resyncs_after_corrupt_frame() {
        let mut corrupt = encode(0x31, &[0x01]).unwrap();
        corrupt[4] ^= 0x10;
        let mut reader = PacketReader::new();
        reader.push(&corrupt);
        reader.push(&encode(0x33, &[0x01]).unwrap());

        let mut errors = 0;
        let packet = loop {
            match reader.next_packet() {
                Ok(Some(p)) => break p,
                Ok(None) => panic!("valid frame should be decodable"),
                Err(_) => errors += 1,
            }
        };
        assert!(errors >= 1);
        assert_eq!(packet.command, 0x33);
    }

    // ========== Properties ==========

    proptest! {
        #[test]
        fn prop_round_trip(command in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD)) {
            let frame = encode(command, &payload).unwrap();
            let (packet, used) = decode(&frame).unwrap();
            prop_assert_eq!(packet.command, command);
            prop_assert_eq!(packet.payload, payload);
            prop_assert_eq!(used, frame.len());
        }

        #[test]
        fn prop_single_byte_corruption_is_malformed(
            command in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let mut frame = encode(command, &payload).unwrap();
            let at = index.index(frame.len());
            frame[at] ^= mask;
            // A grown length byte only shows up once the claimed frame end
            // is available, so pad to the longest possible frame.
            frame.resize(MAX_FRAME + 1, 0);

            let result = decode(&frame);
            prop_assert!(
                matches!(result, Err(PacketError::Malformed { .. })),
                "byte {} ^ {:#04x} decoded as {:?}", at, mask, result
            );
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
            let mut reader = PacketReader::new();
            reader.push(&bytes);
            for _ in 0..bytes.len() + 1 {
                match reader.next_packet() {
                    Ok(None) => break,
                    _ => continue,
                }
            }
        }
    }
}
