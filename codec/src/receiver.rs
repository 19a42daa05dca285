//! Receiving side of a diff session.

use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, info, trace};
use wire::Limits;

use crate::config::SessionConfig;
use crate::diff::merge_diff;
use crate::envelope::{decode_message, AckMessage, Body, Envelope, Message};
use crate::error::{CodecError, CodecResult};
use crate::ring::SnapshotRing;
use crate::scratch::DiffScratch;
use crate::snapshot::{decode_snapshot, framed_len, BincodeCodec, PayloadCodec};
use crate::SequenceId;

/// Why an envelope was dropped without an ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The label is older than anything the session can still place.
    Stale {
        label: SequenceId,
        current: SequenceId,
    },
    /// The diff base is no longer in the history.
    MissingBase { base: SequenceId },
}

/// Result of processing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome<T> {
    /// Nothing changed; no ack is owed.
    Discarded(DiscardReason),
    /// Stored as a future diff base but older than the current value.
    Cached { ack: AckMessage },
    /// Stored and dispatched to subscribers as the newest value.
    Accepted { ack: AckMessage, value: T },
}

impl<T> ReceiveOutcome<T> {
    /// The ack to send back, if any.
    #[must_use]
    pub const fn ack(&self) -> Option<AckMessage> {
        match self {
            Self::Discarded(_) => None,
            Self::Cached { ack } | Self::Accepted { ack, .. } => Some(*ack),
        }
    }

    /// The newly accepted value, if any.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Accepted { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Handle returned by [`ReceiverSession::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscriber<C, T> = Box<dyn FnMut(&C, &T) + Send>;

/// Per-connection receiver state.
///
/// Rebuilds payload values from full snapshots and diffs, acknowledges every
/// snapshot it stores and hands only values newer than the last delivered
/// one to subscribers, in registration order.
pub struct ReceiverSession<T, C, P = BincodeCodec<T>> {
    codec: Arc<P>,
    config: SessionConfig,
    history: NonZeroUsize,
    limits: Limits,
    ring: SnapshotRing,
    cur_pos: Option<SequenceId>,
    scratch: DiffScratch,
    subscribers: Vec<(SubscriberId, Subscriber<C, T>)>,
    next_subscriber: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T, C, P> ReceiverSession<T, C, P>
where
    P: PayloadCodec<T>,
{
    /// Creates a session, validating `config` eagerly.
    pub fn new(codec: Arc<P>, config: SessionConfig) -> CodecResult<Self> {
        let history = config.validate()?;
        Ok(Self {
            codec,
            limits: config.wire_limits(),
            config,
            history,
            ring: SnapshotRing::new(history),
            cur_pos: None,
            scratch: DiffScratch::new(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            _payload: PhantomData,
        })
    }

    /// Registers a callback for newly accepted values.
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriberId
    where
        F: FnMut(&C, &T) + Send + 'static,
    {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    /// Removes a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    /// Decodes a wire message from `source` and processes it.
    pub fn handle_packet(&mut self, source: &C, bytes: &[u8]) -> CodecResult<ReceiveOutcome<T>> {
        match decode_message(bytes, self.codec.fingerprint(), &self.limits)? {
            Message::Envelope(envelope) => self.process(source, &envelope),
            Message::Ack(_) => Err(CodecError::UnexpectedMessage {
                kind: wire::MessageKind::Ack,
            }),
        }
    }

    /// Processes one envelope from `source`.
    ///
    /// Errors leave the session exactly as it was.
    pub fn process(&mut self, source: &C, envelope: &Envelope) -> CodecResult<ReceiveOutcome<T>> {
        let label = envelope.label;
        if let Some(current) = self.cur_pos {
            if !label.is_newer_than(current) && !label.within_window(current, self.history.get()) {
                info!(%label, %current, "discarding too old message");
                return Ok(ReceiveOutcome::Discarded(DiscardReason::Stale { label, current }));
            }
        }
        if let Some(occupant) = self.ring.occupant(label) {
            if occupant.is_newer_than(label) {
                info!(%label, %occupant, "discarding message older than its history slot");
                return Ok(ReceiveOutcome::Discarded(DiscardReason::Stale {
                    label,
                    current: occupant,
                }));
            }
        }

        let value = match &envelope.body {
            Body::Full(snapshot) => {
                check_size(self.config.max_snapshot_bytes, snapshot.len())?;
                let value = decode_snapshot(&*self.codec, snapshot)?;
                self.ring.put(label, snapshot);
                value
            }
            Body::Diff(diff) => {
                let Some(base) = self.ring.get(diff.base_id) else {
                    debug!(%label, base = %diff.base_id, "diff base missing, discarding");
                    return Ok(ReceiveOutcome::Discarded(DiscardReason::MissingBase {
                        base: diff.base_id,
                    }));
                };
                let limit = self.config.max_snapshot_bytes;
                let merged = self.scratch.merge_buf();
                merge_diff(base, diff, merged, limit)?;
                let end = framed_len(merged)?;
                check_size(limit, end)?;
                merged.truncate(end);
                let value = decode_snapshot(&*self.codec, merged)?;
                trace!(%label, base = %diff.base_id, words = diff.words.len(), "diff applied");
                self.ring.put(label, self.scratch.merge_buf());
                value
            }
        };

        let ack = AckMessage { id: label };
        let is_new = self.cur_pos.map_or(true, |current| label.is_newer_than(current));
        if !is_new {
            debug!(%label, current = ?self.cur_pos, "old message cached, not dispatched");
            return Ok(ReceiveOutcome::Cached { ack });
        }

        self.cur_pos = Some(label);
        for (_, subscriber) in &mut self.subscribers {
            subscriber(source, &value);
        }
        Ok(ReceiveOutcome::Accepted { ack, value })
    }

    /// Id of the newest value delivered to subscribers.
    #[must_use]
    pub const fn current(&self) -> Option<SequenceId> {
        self.cur_pos
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// The codec fingerprint expected on incoming messages.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.codec.fingerprint()
    }

    /// Encodes `ack` for the wire, appending to `out`.
    pub fn encode_ack(&self, ack: AckMessage, out: &mut Vec<u8>) -> usize {
        ack.encode(self.codec.fingerprint(), out)
    }
}

const fn check_size(limit: usize, len: usize) -> CodecResult<()> {
    if len > limit {
        return Err(CodecError::SnapshotTooLarge { limit, actual: len });
    }
    Ok(())
}

impl<T, C, P> std::fmt::Debug for ReceiverSession<T, C, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverSession")
            .field("history", &self.history)
            .field("cur_pos", &self.cur_pos)
            .field("stored", &self.ring.len())
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}
