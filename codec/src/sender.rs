//! Sending side of a diff session.

use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::diff::encode_diff;
use crate::envelope::{Body, Envelope};
use crate::error::{CodecError, CodecResult, FramingReason};
use crate::ring::SnapshotRing;
use crate::scratch::DiffScratch;
use crate::snapshot::{encode_snapshot, framed_len, BincodeCodec, PayloadCodec, LENGTH_PREFIX};
use crate::SequenceId;

/// Acknowledgment state of a sender session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// No ack has been accepted; every snapshot goes out in full.
    NoAckYet,
    /// The receiver has confirmed at least one snapshot.
    Synced { ack: SequenceId },
}

/// Result of [`SenderSession::register_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The ack became the new diff base.
    Accepted,
    /// The ack is not newer than the current base and was ignored.
    Stale { current: SequenceId },
    /// The ack names an id this session never generated and was ignored.
    NotGenerated,
}

/// Per-connection sender state.
///
/// Assigns sequence ids, keeps the last `history` snapshots and decides per
/// tick whether the receiver gets a full snapshot or a diff against the
/// newest snapshot it acknowledged.
pub struct SenderSession<T, P = BincodeCodec<T>> {
    codec: Arc<P>,
    config: SessionConfig,
    history: NonZeroUsize,
    ring: SnapshotRing,
    next_id: SequenceId,
    last_sent: Option<SequenceId>,
    ack_pos: Option<SequenceId>,
    sent: u32,
    scratch: DiffScratch,
    snapshot: Vec<u8>,
    _payload: PhantomData<fn(&T)>,
}

impl<T, P> SenderSession<T, P>
where
    P: PayloadCodec<T>,
{
    /// Creates a session, validating `config` eagerly.
    pub fn new(codec: Arc<P>, config: SessionConfig) -> CodecResult<Self> {
        let history = config.validate()?;
        Ok(Self {
            codec,
            config,
            history,
            ring: SnapshotRing::new(history),
            next_id: SequenceId::ZERO,
            last_sent: None,
            ack_pos: None,
            sent: 0,
            scratch: DiffScratch::new(),
            snapshot: Vec::new(),
            _payload: PhantomData,
        })
    }

    /// Serializes `value` and produces the envelope for the next tick.
    pub fn generate_snapshot(&mut self, value: &T) -> CodecResult<Envelope> {
        let mut snapshot = std::mem::take(&mut self.snapshot);
        let result = encode_snapshot(&*self.codec, value, &mut snapshot)
            .and_then(|()| self.push_snapshot(&snapshot));
        self.snapshot = snapshot;
        result
    }

    /// Produces the envelope for an already framed snapshot.
    ///
    /// Lets a caller serialize one value once and feed it to many sessions.
    pub fn push_snapshot(&mut self, snapshot: &[u8]) -> CodecResult<Envelope> {
        if snapshot.len() > self.config.max_snapshot_bytes {
            return Err(CodecError::SnapshotTooLarge {
                limit: self.config.max_snapshot_bytes,
                actual: snapshot.len(),
            });
        }
        let end = framed_len(snapshot)?;
        if end != snapshot.len() {
            return Err(CodecError::SnapshotFraming {
                reason: FramingReason::Trailing {
                    declared: end - LENGTH_PREFIX,
                    trailing: snapshot.len() - end,
                },
            });
        }

        let id = self.next_id;
        self.ring.put(id, snapshot);
        self.next_id = id.next();
        self.last_sent = Some(id);
        self.sent = self.sent.saturating_add(1);

        let body = self.select_body(id, snapshot);
        Ok(Envelope { label: id, body })
    }

    fn select_body(&mut self, id: SequenceId, snapshot: &[u8]) -> Body {
        let Some(ack) = self.ack_pos else {
            return Body::Full(snapshot.to_vec());
        };
        if !id.within_window(ack, self.history.get()) {
            debug!(%id, %ack, history = self.history.get(), "ack outside history, sending full snapshot");
            return Body::Full(snapshot.to_vec());
        }
        let Some(base) = self.ring.get(ack) else {
            debug!(%id, %ack, "ack base overwritten, sending full snapshot");
            return Body::Full(snapshot.to_vec());
        };
        match encode_diff(ack, snapshot, base, self.config.always_diff, &mut self.scratch) {
            Some(diff) => {
                trace!(%id, %ack, words = diff.words.len(), "sending diff");
                Body::Diff(diff)
            }
            None => {
                debug!(%id, %ack, "diff not smaller than snapshot, sending full snapshot");
                Body::Full(snapshot.to_vec())
            }
        }
    }

    /// Records that the receiver stored snapshot `id`.
    ///
    /// Only acks newer than the current base are taken; stale, duplicate and
    /// out-of-order acks are expected and leave the session unchanged.
    pub fn register_ack(&mut self, id: SequenceId) -> AckOutcome {
        let Some(last) = self.last_sent else {
            debug!(%id, "ack before any snapshot was sent, ignoring");
            return AckOutcome::NotGenerated;
        };
        if id.is_newer_than(last) {
            debug!(%id, %last, "ack for an id that was never sent, ignoring");
            return AckOutcome::NotGenerated;
        }
        if let Some(current) = self.ack_pos {
            if !id.is_newer_than(current) {
                debug!(%id, %current, "stale ack, ignoring");
                return AckOutcome::Stale { current };
            }
        }
        trace!(%id, "ack accepted");
        self.ack_pos = Some(id);
        AckOutcome::Accepted
    }

    /// Number of sent snapshots the receiver has not confirmed yet.
    ///
    /// Zero before anything was sent; the number of snapshots sent while no
    /// ack has arrived.
    #[must_use]
    pub fn lag(&self) -> u32 {
        match (self.last_sent, self.ack_pos) {
            (None, _) => 0,
            (Some(_), None) => self.sent,
            (Some(last), Some(ack)) => last.distance(ack).unsigned_abs(),
        }
    }

    /// Current acknowledgment state.
    #[must_use]
    pub const fn state(&self) -> SenderState {
        match self.ack_pos {
            None => SenderState::NoAckYet,
            Some(ack) => SenderState::Synced { ack },
        }
    }

    /// Id of the most recently generated snapshot.
    #[must_use]
    pub const fn last_sent(&self) -> Option<SequenceId> {
        self.last_sent
    }

    /// The codec fingerprint stamped on outgoing messages.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.codec.fingerprint()
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns a sent envelope's buffers to the session for reuse.
    pub fn recycle(&mut self, envelope: Envelope) {
        if let Body::Diff(diff) = envelope.body {
            self.scratch.recycle(diff);
        }
    }
}

impl<T, P> std::fmt::Debug for SenderSession<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderSession")
            .field("history", &self.history)
            .field("next_id", &self.next_id)
            .field("last_sent", &self.last_sent)
            .field("ack_pos", &self.ack_pos)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    struct Fields {
        a: u32,
        b: u32,
        c: u32,
        d: u32,
        e: u32,
        f: u32,
    }

    fn fields(a: u32) -> Fields {
        Fields {
            a,
            b: 2,
            c: 3,
            d: 4,
            e: 5,
            f: 6,
        }
    }

    fn session(config: SessionConfig) -> SenderSession<Fields> {
        SenderSession::new(Arc::new(BincodeCodec::new()), config).unwrap()
    }

    fn id(raw: u16) -> SequenceId {
        SequenceId::new(raw)
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SessionConfig::default().with_history(0);
        let result = SenderSession::<Fields>::new(Arc::new(BincodeCodec::new()), config);
        assert!(matches!(result, Err(CodecError::Config(_))));
    }

    #[test]
    fn full_until_first_ack() {
        let mut sender = session(SessionConfig::for_testing().with_always_diff(true));
        for expected in 0..3u16 {
            let envelope = sender.generate_snapshot(&fields(1)).unwrap();
            assert_eq!(envelope.label, id(expected));
            assert!(envelope.is_full());
        }
        assert_eq!(sender.state(), SenderState::NoAckYet);
    }

    #[test]
    fn diff_after_ack() {
        let mut sender = session(SessionConfig::for_testing());
        for _ in 0..3 {
            sender.generate_snapshot(&fields(1)).unwrap();
        }
        assert_eq!(sender.register_ack(id(0)), AckOutcome::Accepted);
        assert_eq!(sender.state(), SenderState::Synced { ack: id(0) });

        let envelope = sender.generate_snapshot(&fields(9)).unwrap();
        assert_eq!(envelope.label, id(3));
        let Body::Diff(diff) = &envelope.body else {
            panic!("expected diff, got {envelope:?}");
        };
        assert_eq!(diff.base_id, id(0));
        assert_eq!(diff.words, vec![9]);
        assert!(diff.encoded_len() < 28);
    }

    #[test]
    fn ack_monotonicity() {
        let mut sender = session(SessionConfig::for_testing());
        for _ in 0..4 {
            sender.generate_snapshot(&fields(1)).unwrap();
        }
        assert_eq!(sender.register_ack(id(2)), AckOutcome::Accepted);
        assert_eq!(
            sender.register_ack(id(1)),
            AckOutcome::Stale { current: id(2) }
        );
        assert_eq!(
            sender.register_ack(id(2)),
            AckOutcome::Stale { current: id(2) }
        );
        assert_eq!(sender.state(), SenderState::Synced { ack: id(2) });
    }

    #[test]
    fn ignores_ack_for_unsent_id() {
        let mut sender = session(SessionConfig::for_testing());
        assert_eq!(sender.register_ack(id(0)), AckOutcome::NotGenerated);
        sender.generate_snapshot(&fields(1)).unwrap();
        assert_eq!(sender.register_ack(id(5)), AckOutcome::NotGenerated);
        assert_eq!(sender.state(), SenderState::NoAckYet);
    }

    #[test]
    fn window_fallback_ignores_always_diff() {
        let mut sender = session(SessionConfig::for_testing().with_always_diff(true));
        sender.generate_snapshot(&fields(1)).unwrap();
        sender.register_ack(id(0));
        for _ in 0..4 {
            sender.generate_snapshot(&fields(1)).unwrap();
        }
        // id 5 is more than 4 ticks past the ack at 0.
        let envelope = sender.generate_snapshot(&fields(1)).unwrap();
        assert_eq!(envelope.label, id(5));
        assert!(envelope.is_full());
        assert_eq!(sender.state(), SenderState::Synced { ack: id(0) });
    }

    #[test]
    fn overwritten_base_falls_back_to_full() {
        let mut sender = session(SessionConfig::for_testing().with_always_diff(true));
        sender.generate_snapshot(&fields(1)).unwrap();
        sender.register_ack(id(0));
        for _ in 0..3 {
            assert!(sender.generate_snapshot(&fields(1)).unwrap().is_diff());
        }
        // id 4 is exactly 4 ticks away and lands in the ack's slot.
        let envelope = sender.generate_snapshot(&fields(1)).unwrap();
        assert_eq!(envelope.label, id(4));
        assert!(envelope.is_full());
    }

    #[test]
    fn full_when_diff_not_smaller() {
        let mut sender: SenderSession<[u32; 8]> =
            SenderSession::new(Arc::new(BincodeCodec::new()), SessionConfig::for_testing()).unwrap();
        sender.generate_snapshot(&[0; 8]).unwrap();
        sender.register_ack(id(0));
        let envelope = sender.generate_snapshot(&[1; 8]).unwrap();
        assert!(envelope.is_full());
    }

    #[test]
    fn lag_tracks_unacknowledged_snapshots() {
        let mut sender = session(SessionConfig::for_testing());
        assert_eq!(sender.lag(), 0);
        for _ in 0..3 {
            sender.generate_snapshot(&fields(1)).unwrap();
        }
        assert_eq!(sender.lag(), 3);
        sender.register_ack(id(1));
        assert_eq!(sender.lag(), 1);
        sender.register_ack(id(2));
        assert_eq!(sender.lag(), 0);
    }

    #[test]
    fn sequence_wraps() {
        let mut sender = session(SessionConfig::for_testing());
        sender.next_id = id(65535);
        assert_eq!(sender.generate_snapshot(&fields(1)).unwrap().label, id(65535));
        sender.register_ack(id(65535));
        let envelope = sender.generate_snapshot(&fields(2)).unwrap();
        assert_eq!(envelope.label, id(0));
        assert!(envelope.is_diff());
    }

    #[test]
    fn rejects_oversized_snapshot() {
        let mut sender = session(SessionConfig::for_testing().with_max_snapshot_bytes(8));
        let err = sender.generate_snapshot(&fields(1)).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SnapshotTooLarge { limit: 8, actual: 28 }
        ));
        assert_eq!(sender.last_sent(), None);
    }

    #[test]
    fn push_rejects_unframed_bytes() {
        let mut sender = session(SessionConfig::for_testing());
        assert!(sender.push_snapshot(&[1, 0, 0, 0, 1, 2]).is_err());
        assert!(sender.push_snapshot(&[]).is_err());
        assert_eq!(sender.lag(), 0);
    }

    #[test]
    fn recycle_pools_diff_buffers() {
        let mut sender = session(SessionConfig::for_testing());
        sender.generate_snapshot(&fields(1)).unwrap();
        sender.register_ack(id(0));
        let envelope = sender.generate_snapshot(&fields(2)).unwrap();
        assert!(envelope.is_diff());
        sender.recycle(envelope);
        assert_eq!(sender.scratch.pooled(), (1, 1));
    }
}
