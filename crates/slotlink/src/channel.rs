//! Envelope channel.
//!
//! Wraps an unordered, unacknowledged transport. Outbound envelopes are
//! serialized and stamped with the local origin; inbound frames are accepted
//! only when their origin equals the configured peer origin, then decoded and
//! handed to the handlers registered for their kind.
//!
//! Nothing here retries, reorders or deduplicates. A send that the transport
//! refuses is logged and forgotten.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ChannelConfig;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{ErrorScope, Result, SlotError};

/// One message as the transport carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Identity of the sender.
    pub origin: String,
    /// Serialized envelope.
    pub body: String,
}

/// A postable-message primitive towards the peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(&self, frame: Frame) -> anyhow::Result<()>;
}

/// Frames addressed to this end.
pub type Inbox = mpsc::UnboundedReceiver<Frame>;

/// In-process transport backed by an unbounded tokio channel.
///
/// Clones post into the same peer inbox, which is also how tests play the
/// part of untrusted code in the hosting document.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    peer: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn post(&self, frame: Frame) -> anyhow::Result<()> {
        self.peer
            .send(frame)
            .map_err(|_| anyhow::anyhow!("peer endpoint is closed"))
    }
}

/// One end of a local transport pair.
#[derive(Debug)]
pub struct Endpoint {
    pub transport: LocalTransport,
    pub inbox: Inbox,
}

/// Two connected endpoints; whatever one posts, the other receives.
pub fn local_pair() -> (Endpoint, Endpoint) {
    let (to_a, inbox_a) = mpsc::unbounded_channel();
    let (to_b, inbox_b) = mpsc::unbounded_channel();
    (
        Endpoint {
            transport: LocalTransport { peer: to_b },
            inbox: inbox_a,
        },
        Endpoint {
            transport: LocalTransport { peer: to_a },
            inbox: inbox_b,
        },
    )
}

type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

pub struct EnvelopeChannel<T> {
    config: ChannelConfig,
    transport: T,
    handlers: DashMap<EnvelopeKind, Vec<Handler>>,
}

impl<T: Transport> EnvelopeChannel<T> {
    pub fn new(config: ChannelConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            handlers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Fire-and-forget send to the peer.
    pub async fn send(&self, envelope: &Envelope) {
        let kind = envelope.kind();
        let body = match envelope.encode() {
            Ok(body) => body,
            Err(err) => {
                warn!(%kind, error = %err, "envelope could not be encoded");
                return;
            }
        };
        let frame = Frame {
            origin: self.config.local_origin.clone(),
            body,
        };
        match self.transport.post(frame).await {
            Ok(()) => debug!(%kind, peer = %self.config.peer_origin, "envelope sent"),
            Err(err) => warn!(%kind, error = %err, "envelope dropped by transport"),
        }
    }

    /// Registers a handler for every inbound envelope.
    pub fn on_receive<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        for kind in EnvelopeKind::ALL {
            self.handlers.entry(kind).or_default().push(Arc::clone(&handler));
        }
    }

    /// Registers a handler for one envelope kind.
    pub fn on_kind<F>(&self, kind: EnvelopeKind, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    /// Authenticates and decodes a frame without dispatching it.
    pub fn open(&self, frame: &Frame) -> Result<Envelope> {
        if frame.origin != self.config.peer_origin {
            return Err(SlotError::PeerUnauthenticated {
                expected: self.config.peer_origin.clone(),
                actual: frame.origin.clone(),
            });
        }
        Envelope::decode(&frame.body)
    }

    /// Opens a frame and runs the handlers registered for its kind.
    ///
    /// Rejected frames are logged here; callers only need the result for
    /// bookkeeping.
    pub fn deliver(&self, frame: &Frame) -> Result<EnvelopeKind> {
        let envelope = match self.open(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                match err.scope() {
                    ErrorScope::Silent => debug!(error = %err, "frame discarded"),
                    _ => warn!(origin = %frame.origin, error = %err, "frame discarded"),
                }
                return Err(err);
            }
        };

        let kind = envelope.kind();
        // Clone out of the map so a handler may register further handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .get(&kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        if handlers.is_empty() {
            debug!(%kind, "no handler registered");
        }
        for handler in &handlers {
            handler(&envelope);
        }
        Ok(kind)
    }
}
