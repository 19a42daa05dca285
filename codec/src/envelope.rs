//! Owned protocol messages and their wire conversion.

use wire::{Limits, WireMessage, HEADER_SIZE};

use crate::diff::DiffMessage;
use crate::error::{CodecError, CodecResult};
use crate::SequenceId;

/// Body of a snapshot envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// The complete framed snapshot.
    Full(Vec<u8>),
    /// A diff against an earlier snapshot.
    Diff(DiffMessage),
}

/// A labelled snapshot message, sent from sender to receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub label: SequenceId,
    pub body: Body,
}

impl Envelope {
    /// Returns `true` for a full snapshot.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self.body, Body::Full(_))
    }

    /// Returns `true` for a diff.
    #[must_use]
    pub const fn is_diff(&self) -> bool {
        matches!(self.body, Body::Diff(_))
    }

    /// Encoded size including the message header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + match &self.body {
                Body::Full(snapshot) => snapshot.len(),
                Body::Diff(diff) => diff.encoded_len(),
            }
    }

    /// Appends the wire encoding to `out` and returns the bytes written.
    pub fn encode(&self, fingerprint: u64, out: &mut Vec<u8>) -> CodecResult<usize> {
        let label = self.label.raw();
        match &self.body {
            Body::Full(snapshot) => Ok(wire::encode_full(fingerprint, label, snapshot, out)),
            Body::Diff(diff) => Ok(wire::encode_diff(
                fingerprint,
                label,
                diff.base_id.raw(),
                &diff.mask,
                &diff.words,
                out,
            )?),
        }
    }
}

/// Acknowledges that the receiver stored the snapshot `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    pub id: SequenceId,
}

impl AckMessage {
    /// Appends the wire encoding to `out` and returns the bytes written.
    pub fn encode(&self, fingerprint: u64, out: &mut Vec<u8>) -> usize {
        wire::encode_ack(fingerprint, self.id.raw(), out)
    }
}

/// Any message a session can receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Envelope(Envelope),
    Ack(AckMessage),
}

/// Decodes a wire message, rejecting foreign payload fingerprints.
pub fn decode_message(buf: &[u8], fingerprint: u64, limits: &Limits) -> CodecResult<Message> {
    let msg = wire::decode_message(buf, limits)?;
    check_fingerprint(msg.header().fingerprint, fingerprint)?;
    let label = SequenceId::new(msg.header().sequence);
    Ok(match msg {
        WireMessage::Full { snapshot, .. } => Message::Envelope(Envelope {
            label,
            body: Body::Full(snapshot.to_vec()),
        }),
        WireMessage::Diff { diff, .. } => Message::Envelope(Envelope {
            label,
            body: Body::Diff(DiffMessage::from_wire(&diff)),
        }),
        WireMessage::Ack { .. } => Message::Ack(AckMessage { id: label }),
    })
}

pub(crate) const fn check_fingerprint(found: u64, expected: u64) -> CodecResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(CodecError::FingerprintMismatch { expected, found })
    }
}
