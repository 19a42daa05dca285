//! Acknowledgment-driven snapshot diffing for tickdiff.
//!
//! A sender produces one serialized snapshot of a payload type per tick and
//! ships either the whole snapshot or a word-level diff against the newest
//! snapshot the receiver has acknowledged. Receivers rebuild values, ack
//! every snapshot they store and deliver values newest-first-wins, so
//! lost, duplicated and reordered messages never roll application state
//! backwards.
//!
//! # Features
//!
//! - Wraparound-safe 16-bit sequence ids
//! - Fixed-capacity snapshot history per session
//! - Word-level diffs with full-snapshot fallback
//! - Per-connection sender registry over any [`Transport`]
//! - Receiver sessions with ordered subscriber dispatch
//!
//! # Design Principles
//!
//! - **Loss is normal** - Stale messages and acks are outcomes, not errors.
//! - **No corrupt state** - A failed or discarded message changes nothing.
//! - **Reuse buffers** - History slots and diff vectors keep their allocations.

mod config;
mod diff;
mod envelope;
mod error;
mod receiver;
mod registry;
mod ring;
mod scratch;
mod sender;
mod snapshot;
mod types;

pub use config::{SessionConfig, MAX_HISTORY};
pub use diff::{encode_diff, mask_len, merge_diff, word_count, DiffMessage};
pub use envelope::{decode_message, AckMessage, Body, Envelope, Message};
pub use error::{
    CodecError, CodecResult, ConfigError, DiffReason, FramingReason, PayloadError,
};
pub use receiver::{DiscardReason, ReceiveOutcome, ReceiverSession, SubscriberId};
pub use registry::{DispatchReport, SessionRegistry, Transport, TransportError};
pub use ring::SnapshotRing;
pub use scratch::DiffScratch;
pub use sender::{AckOutcome, SenderSession, SenderState};
pub use snapshot::{
    decode_snapshot, encode_snapshot, framed_len, payload_fingerprint, BincodeCodec,
    PayloadCodec, LENGTH_PREFIX,
};
pub use types::SequenceId;
pub use wire::Limits as WireLimits;
