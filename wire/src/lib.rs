//! Wire framing for tickdiff messages.
//!
//! This crate handles the binary layout of the three protocol messages:
//! full snapshots, word-level diffs and acknowledgments. It knows nothing
//! about sequence arithmetic or snapshot history, only where the bytes go.
//!
//! # Design Principles
//!
//! - **Stable wire format** - The format is versioned; the magic never changes.
//! - **Bounded decoding** - Lengths are checked against [`Limits`] before use.
//! - **Zero-copy decode** - Decoded messages borrow from the input datagram.
//! - **Buffer reuse** - Encoders append to caller-owned vectors.

mod error;
mod header;
mod limits;
mod message;

pub use error::{DecodeError, EncodeError, FramingError, LimitKind, WireResult};
pub use header::{
    decode_header, encode_header, MessageHeader, MessageKind, HEADER_SIZE, MAGIC, VERSION,
};
pub use limits::Limits;
pub use message::{
    decode_message, diff_body_len, encode_ack, encode_diff, encode_full, mask_popcount,
    WireDiff, WireMessage, WORD_SIZE,
};
