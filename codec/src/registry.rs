//! Sender sessions for every connection of a server.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use wire::Limits;

use crate::config::SessionConfig;
use crate::envelope::{decode_message, Body, Message};
use crate::error::{CodecError, CodecResult};
use crate::sender::{AckOutcome, SenderSession};
use crate::snapshot::{encode_snapshot, BincodeCodec, PayloadCodec};
use crate::SequenceId;

/// Error reported by a transport send.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Unreliable, unordered message transport to a set of connections.
pub trait Transport<C> {
    /// Connections currently open.
    fn connections(&self) -> Vec<C>;

    /// Sends one framed message to `connection`.
    fn send(&self, connection: &C, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Counters for one dispatch call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Full snapshots produced.
    pub full: usize,
    /// Diffs produced.
    pub diffs: usize,
    /// Bytes handed to the transport successfully.
    pub bytes: usize,
    /// Sends the transport rejected.
    pub failed: usize,
    /// Sessions whose lag exceeded the warning threshold.
    pub lagging: usize,
}

impl DispatchReport {
    /// Number of envelopes produced.
    #[must_use]
    pub const fn messages(&self) -> usize {
        self.full + self.diffs
    }
}

type SharedSession<T, P> = Arc<Mutex<SenderSession<T, P>>>;

/// Map of per-connection sender sessions.
///
/// The map lock is held only to find, create or remove a session; encoding
/// happens under that session's own lock, so connections never contend with
/// each other.
pub struct SessionRegistry<C, T, P = BincodeCodec<T>> {
    codec: Arc<P>,
    config: SessionConfig,
    limits: Limits,
    sessions: RwLock<HashMap<C, SharedSession<T, P>>>,
}

impl<C, T, P> SessionRegistry<C, T, P>
where
    C: Eq + Hash + Clone + Debug,
    P: PayloadCodec<T>,
{
    /// Creates an empty registry, validating `config` eagerly.
    pub fn new(codec: Arc<P>, config: SessionConfig) -> CodecResult<Self> {
        config.validate()?;
        Ok(Self {
            codec,
            limits: config.wire_limits(),
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Sends `value` to every connection the transport reports.
    pub fn dispatch_to_all<X>(&self, transport: &X, value: &T) -> CodecResult<DispatchReport>
    where
        X: Transport<C> + ?Sized,
    {
        let targets = transport.connections();
        self.dispatch(transport, &targets, value)
    }

    /// Sends `value` to those of `connections` that are still open.
    pub fn dispatch_to<X>(
        &self,
        transport: &X,
        connections: &[C],
        value: &T,
    ) -> CodecResult<DispatchReport>
    where
        X: Transport<C> + ?Sized,
    {
        let live = transport.connections();
        let targets: Vec<C> = connections
            .iter()
            .filter(|connection| live.contains(connection))
            .cloned()
            .collect();
        self.dispatch(transport, &targets, value)
    }

    fn dispatch<X>(&self, transport: &X, targets: &[C], value: &T) -> CodecResult<DispatchReport>
    where
        X: Transport<C> + ?Sized,
    {
        let mut report = DispatchReport::default();
        if targets.is_empty() {
            return Ok(report);
        }

        let mut snapshot = Vec::new();
        encode_snapshot(&*self.codec, value, &mut snapshot)?;
        if snapshot.len() > self.config.max_snapshot_bytes {
            return Err(CodecError::SnapshotTooLarge {
                limit: self.config.max_snapshot_bytes,
                actual: snapshot.len(),
            });
        }

        let fingerprint = self.codec.fingerprint();
        let mut out = Vec::with_capacity(wire::HEADER_SIZE + snapshot.len());
        for connection in targets {
            let session = self.session(connection)?;
            let (written, lag) = {
                let mut session = session.lock();
                let envelope = session.push_snapshot(&snapshot)?;
                out.clear();
                let written = envelope.encode(fingerprint, &mut out)?;
                match envelope.body {
                    Body::Full(_) => report.full += 1,
                    Body::Diff(_) => report.diffs += 1,
                }
                session.recycle(envelope);
                (written, session.lag())
            };

            match transport.send(connection, &out) {
                Ok(()) => report.bytes += written,
                Err(err) => {
                    warn!(?connection, error = %err, "send failed");
                    report.failed += 1;
                }
            }
            if lag > self.config.lag_warn_threshold {
                warn!(?connection, lag, "connection is lagging badly");
                report.lagging += 1;
            }
        }
        Ok(report)
    }

    fn session(&self, connection: &C) -> CodecResult<SharedSession<T, P>> {
        if let Some(session) = self.sessions.read().get(connection) {
            return Ok(Arc::clone(session));
        }
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(connection) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(Mutex::new(SenderSession::new(
            Arc::clone(&self.codec),
            self.config.clone(),
        )?));
        sessions.insert(connection.clone(), Arc::clone(&session));
        debug!(?connection, "sender session created");
        Ok(session)
    }

    fn existing(&self, connection: &C) -> Option<SharedSession<T, P>> {
        self.sessions.read().get(connection).map(Arc::clone)
    }

    /// Applies an ack from `connection`. Returns `None` if the connection
    /// has no session.
    pub fn register_ack(&self, connection: &C, id: SequenceId) -> Option<AckOutcome> {
        let Some(session) = self.existing(connection) else {
            debug!(?connection, %id, "ack for unknown connection, ignoring");
            return None;
        };
        let outcome = session.lock().register_ack(id);
        Some(outcome)
    }

    /// Decodes an ack packet from `connection` and applies it.
    pub fn handle_packet(&self, connection: &C, bytes: &[u8]) -> CodecResult<Option<AckOutcome>> {
        match decode_message(bytes, self.codec.fingerprint(), &self.limits)? {
            Message::Ack(ack) => Ok(self.register_ack(connection, ack.id)),
            Message::Envelope(envelope) => Err(CodecError::UnexpectedMessage {
                kind: if envelope.is_full() {
                    wire::MessageKind::Full
                } else {
                    wire::MessageKind::Diff
                },
            }),
        }
    }

    /// Lag of `connection`'s session in ticks.
    pub fn lag(&self, connection: &C) -> Option<u32> {
        let Some(session) = self.existing(connection) else {
            warn!(?connection, "lag requested for a connection without a session");
            return None;
        };
        let lag = session.lock().lag();
        Some(lag)
    }

    /// Drops `connection`'s session. Returns `false` if there was none.
    pub fn disconnect(&self, connection: &C) -> bool {
        let removed = self.sessions.write().remove(connection).is_some();
        if removed {
            debug!(?connection, "sender session removed");
        }
        removed
    }

    /// Returns `true` if `connection` has a session.
    pub fn contains(&self, connection: &C) -> bool {
        self.sessions.read().contains_key(connection)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no connection has a session.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// The codec fingerprint stamped on outgoing messages.
    pub fn fingerprint(&self) -> u64 {
        self.codec.fingerprint()
    }
}

impl<C, T, P> Debug for SessionRegistry<C, T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .field("sessions", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}
