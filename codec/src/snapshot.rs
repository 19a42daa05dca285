//! Payload codecs and snapshot framing.
//!
//! A snapshot is the framed serialization of one payload value:
//!
//! ```text
//! [len: u32 LE][payload bytes; len]
//! ```
//!
//! The length prefix occupies word 0, so payload words stay aligned to the
//! 4-byte diff granularity and a receiver can find the end of the payload
//! inside a merge buffer that is longer than the snapshot.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use blake3::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult, FramingReason, PayloadError};

/// Size of the snapshot length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Serializes and deserializes payload values of type `T`.
///
/// Implementations must be deterministic: equal values produce equal bytes,
/// and structurally similar values should produce similar byte layouts so
/// the word-level diff stays small.
pub trait PayloadCodec<T>: Send + Sync {
    /// Appends the serialization of `value` to `out`.
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), PayloadError>;

    /// Reconstructs a value from exactly the bytes `encode` produced.
    fn decode(&self, bytes: &[u8]) -> Result<T, PayloadError>;

    /// Identifies the payload type on the wire. Peers with different
    /// fingerprints refuse each other's messages.
    fn fingerprint(&self) -> u64;
}

/// [`PayloadCodec`] backed by serde and bincode's fixed-width encoding.
pub struct BincodeCodec<T> {
    fingerprint: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Creates a codec fingerprinted by the payload type name.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fingerprint: payload_fingerprint::<T>(None),
            _marker: PhantomData,
        }
    }

    /// Creates a codec whose fingerprint also covers `tag`.
    ///
    /// Use a tag to keep two layouts of a type with the same name apart,
    /// e.g. a protocol revision string.
    #[must_use]
    pub fn with_tag(tag: &str) -> Self {
        Self {
            fingerprint: payload_fingerprint::<T>(Some(tag)),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BincodeCodec")
            .field("type", &type_name::<T>())
            .field("fingerprint", &format_args!("0x{:016X}", self.fingerprint))
            .finish()
    }
}

impl<T> PayloadCodec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T, out: &mut Vec<u8>) -> Result<(), PayloadError> {
        bincode::serialize_into(out, value).map_err(|err| PayloadError::Serialize(err))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, PayloadError> {
        bincode::deserialize(bytes).map_err(|err| PayloadError::Deserialize(err))
    }

    fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Computes the wire fingerprint for payload type `T`.
#[must_use]
pub fn payload_fingerprint<T>(tag: Option<&str>) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(type_name::<T>().as_bytes());
    if let Some(tag) = tag {
        hasher.update(&[0]);
        hasher.update(tag.as_bytes());
    }
    let hash = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

/// Serializes `value` into `out` as a framed snapshot, replacing its contents.
pub fn encode_snapshot<T, P>(codec: &P, value: &T, out: &mut Vec<u8>) -> CodecResult<()>
where
    P: PayloadCodec<T> + ?Sized,
{
    out.clear();
    out.extend_from_slice(&[0; LENGTH_PREFIX]);
    codec.encode(value, out)?;
    let len = out.len() - LENGTH_PREFIX;
    let prefix = u32::try_from(len).map_err(|_| PayloadError::TooLong { len })?;
    out[..LENGTH_PREFIX].copy_from_slice(&prefix.to_le_bytes());
    Ok(())
}

/// Returns the framed length (prefix included) declared by `bytes`.
///
/// `bytes` may extend past the snapshot; it must not end before it.
pub fn framed_len(bytes: &[u8]) -> CodecResult<usize> {
    let Some(prefix) = bytes.get(..LENGTH_PREFIX) else {
        return Err(CodecError::SnapshotFraming {
            reason: FramingReason::MissingPrefix {
                available: bytes.len(),
            },
        });
    };
    let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let available = bytes.len() - LENGTH_PREFIX;
    if declared > available {
        return Err(CodecError::SnapshotFraming {
            reason: FramingReason::Truncated {
                declared,
                available,
            },
        });
    }
    Ok(LENGTH_PREFIX + declared)
}

/// Decodes a framed snapshot. The buffer must hold exactly one snapshot.
pub fn decode_snapshot<T, P>(codec: &P, bytes: &[u8]) -> CodecResult<T>
where
    P: PayloadCodec<T> + ?Sized,
{
    let end = framed_len(bytes)?;
    if end != bytes.len() {
        return Err(CodecError::SnapshotFraming {
            reason: FramingReason::Trailing {
                declared: end - LENGTH_PREFIX,
                trailing: bytes.len() - end,
            },
        });
    }
    Ok(codec.decode(&bytes[LENGTH_PREFIX..])?)
}
