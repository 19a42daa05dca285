//! Error types for wire format operations.

use thiserror::Error;

use crate::header::MessageKind;

/// Result type for wire format operations.
pub type WireResult<T> = Result<T, DecodeError>;

/// High-level decode errors for message framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Message is too small to contain the required header.
    #[error("message too small: {actual} bytes, need at least {required}")]
    MessageTooSmall { actual: usize, required: usize },

    /// Invalid magic number in message header.
    #[error("invalid magic number: 0x{found:04X}")]
    InvalidMagic { found: u16 },

    /// Unsupported wire version.
    #[error("unsupported wire version: {found}")]
    UnsupportedVersion { found: u8 },

    /// Unknown message kind.
    #[error("unknown message kind: {kind}")]
    UnknownKind { kind: u8 },

    /// Limits exceeded.
    #[error("{kind} limit exceeded: {actual} > {limit}")]
    LimitsExceeded {
        kind: LimitKind,
        limit: usize,
        actual: usize,
    },

    /// The number of words does not match the set bits of the mask.
    #[error("diff word count mismatch: mask has {expected} bits set, body holds {actual_bytes} word bytes")]
    WordCountMismatch { expected: usize, actual_bytes: usize },

    /// Body had bytes left after parsing.
    #[error("trailing data after {kind:?} body: {remaining} bytes")]
    TrailingData { kind: MessageKind, remaining: usize },

    /// Body framing error.
    #[error("body framing error: {0}")]
    Framing(#[from] FramingError),
}

/// Specific wire limits that can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    MessageBytes,
    MaskBytes,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MessageBytes => "message bytes",
            Self::MaskBytes => "mask bytes",
        };
        write!(f, "{name}")
    }
}

/// Errors that can occur while reading a message body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid varint")]
    InvalidVarint,
    #[error("truncated body: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("length overflow: {length}")]
    LengthOverflow { length: usize },
    #[error("diff word count mismatch: mask has {expected} bits set, got {actual} words")]
    WordCountMismatch { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display_invalid_magic() {
        let err = DecodeError::InvalidMagic { found: 0xBEEF };
        let msg = err.to_string();
        assert!(msg.contains("BEEF"));
    }

    #[test]
    fn decode_error_display_limits_exceeded() {
        let err = DecodeError::LimitsExceeded {
            kind: LimitKind::MaskBytes,
            limit: 4,
            actual: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("mask bytes"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn framing_display() {
        let err = FramingError::Truncated {
            needed: 10,
            available: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("truncated"));
        assert!(msg.contains("10"));
    }

    #[test]
    fn framing_converts_into_decode_error() {
        let err: DecodeError = FramingError::InvalidVarint.into();
        assert!(matches!(err, DecodeError::Framing(FramingError::InvalidVarint)));
    }

    #[test]
    fn encode_error_display() {
        let err = EncodeError::WordCountMismatch {
            expected: 3,
            actual: 2,
        };
        assert!(err.to_string().contains("3 bits set"));
    }
}
