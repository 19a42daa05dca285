//! Error types for codec operations.
//!
//! Only infrastructure failures live here. Stale messages, missing diff
//! bases and out-of-order acks are expected on an unreliable transport and
//! are reported through outcome enums instead.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or applying messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Wire format error.
    #[error("wire error: {0}")]
    Wire(#[from] wire::DecodeError),

    /// Wire encoding error.
    #[error("wire encode error: {0}")]
    WireEncode(#[from] wire::EncodeError),

    /// Payload serialization or deserialization failed.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Session configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Peer was built with a different payload type or registration.
    #[error("payload fingerprint mismatch: expected 0x{expected:016X}, found 0x{found:016X}")]
    FingerprintMismatch { expected: u64, found: u64 },

    /// Snapshot length prefix disagrees with the available bytes.
    #[error("snapshot framing invalid: {reason}")]
    SnapshotFraming { reason: FramingReason },

    /// Snapshot larger than the configured maximum.
    #[error("snapshot too large: {actual} > {limit} bytes")]
    SnapshotTooLarge { limit: usize, actual: usize },

    /// Diff body is internally inconsistent.
    #[error("invalid diff: {reason}")]
    InvalidDiff { reason: DiffReason },

    /// A message of the wrong kind arrived at this endpoint.
    #[error("unexpected {kind:?} message")]
    UnexpectedMessage { kind: wire::MessageKind },
}

/// Details for snapshot framing errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingReason {
    #[error("missing length prefix ({available} bytes)")]
    MissingPrefix { available: usize },
    #[error("length prefix {declared} exceeds {available} available bytes")]
    Truncated { declared: usize, available: usize },
    #[error("{trailing} bytes after a {declared}-byte payload")]
    Trailing { declared: usize, trailing: usize },
}

/// Details for invalid diff errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiffReason {
    #[error("mask has {mask_bits} bits set but {words} words were supplied")]
    WordCountMismatch { mask_bits: usize, words: usize },
    #[error("merged snapshot would span {needed} bytes, limit is {limit}")]
    MergedTooLarge { needed: usize, limit: usize },
}

/// Payload codec failure.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("serialize failed: {0}")]
    Serialize(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("deserialize failed: {0}")]
    Deserialize(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("payload of {len} bytes does not fit a u32 length prefix")]
    TooLong { len: usize },
}

/// Session configuration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("history capacity must be at least 1")]
    EmptyHistory,
    #[error("history capacity {history} exceeds {max}, sequence comparison would be ambiguous")]
    HistoryTooLarge { history: usize, max: usize },
    #[error("max snapshot bytes must be non-zero")]
    ZeroSnapshotLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_display_is_hex() {
        let err = CodecError::FingerprintMismatch {
            expected: 0xAB,
            found: 0xCD,
        };
        let msg = err.to_string();
        assert!(msg.contains("00000000000000AB"));
        assert!(msg.contains("00000000000000CD"));
    }

    #[test]
    fn wire_error_converts() {
        let err: CodecError = wire::DecodeError::InvalidMagic { found: 1 }.into();
        assert!(matches!(err, CodecError::Wire(_)));
        assert!(err.to_string().starts_with("wire error"));
    }

    #[test]
    fn config_error_display() {
        let err: CodecError = ConfigError::HistoryTooLarge {
            history: 40_000,
            max: 32_767,
        }
        .into();
        assert!(err.to_string().contains("40000"));
    }

    #[test]
    fn framing_reason_display() {
        let err = CodecError::SnapshotFraming {
            reason: FramingReason::Truncated {
                declared: 10,
                available: 4,
            },
        };
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn payload_error_keeps_source() {
        let inner: Box<dyn std::error::Error + Send + Sync> = "boom".into();
        let err = PayloadError::Deserialize(inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
