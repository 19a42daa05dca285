//! Message header types and constants.

use crate::error::{DecodeError, WireResult};

/// Magic number identifying tickdiff messages.
///
/// This value is fixed and must never change across versions.
pub const MAGIC: u16 = 0x5444; // "TD" in ASCII

/// Current wire format version.
pub const VERSION: u8 = 1;

/// Header size in bytes (14 total).
pub const HEADER_SIZE: usize = 2 + 1 + 1 + 8 + 2;

/// The three message kinds the protocol puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Complete framed snapshot.
    Full = 1,
    /// Word-level difference against an acknowledged snapshot.
    Diff = 2,
    /// Receiver acknowledgment of a reconstructed snapshot.
    Ack = 3,
}

impl MessageKind {
    /// Parses a message kind from a raw byte.
    pub fn parse(kind: u8) -> Result<Self, DecodeError> {
        match kind {
            1 => Ok(Self::Full),
            2 => Ok(Self::Diff),
            3 => Ok(Self::Ack),
            _ => Err(DecodeError::UnknownKind { kind }),
        }
    }
}

/// Message header.
///
/// `sequence` is the envelope label for `Full`/`Diff` and the acknowledged
/// id for `Ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Wire format version.
    pub version: u8,
    /// Message kind.
    pub kind: MessageKind,
    /// Payload type fingerprint for compatibility checking.
    pub fingerprint: u64,
    /// Sequence id carried by the message.
    pub sequence: u16,
}

impl MessageHeader {
    /// Creates a header at the current version.
    #[must_use]
    pub const fn new(kind: MessageKind, fingerprint: u64, sequence: u16) -> Self {
        Self {
            version: VERSION,
            kind,
            fingerprint,
            sequence,
        }
    }
}

/// Appends an encoded header to `out`.
pub fn encode_header(header: &MessageHeader, out: &mut Vec<u8>) -> usize {
    out.reserve(HEADER_SIZE);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.push(header.version);
    out.push(header.kind as u8);
    out.extend_from_slice(&header.fingerprint.to_le_bytes());
    out.extend_from_slice(&header.sequence.to_le_bytes());
    HEADER_SIZE
}

/// Decodes and validates the header at the start of `buf`.
pub fn decode_header(buf: &[u8]) -> WireResult<MessageHeader> {
    let Some(raw) = buf.get(..HEADER_SIZE) else {
        return Err(DecodeError::MessageTooSmall {
            actual: buf.len(),
            required: HEADER_SIZE,
        });
    };

    let magic = u16::from_le_bytes([raw[0], raw[1]]);
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic { found: magic });
    }

    let version = raw[2];
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }

    let kind = MessageKind::parse(raw[3])?;
    let mut fingerprint = [0u8; 8];
    fingerprint.copy_from_slice(&raw[4..12]);
    let sequence = u16::from_le_bytes([raw[12], raw[13]]);

    Ok(MessageHeader {
        version,
        kind,
        fingerprint: u64::from_le_bytes(fingerprint),
        sequence,
    })
}
