//! Session runtime.
//!
//! A [`Session`] decides; the runtime executes. Sessions are synchronous
//! state machines with no IO: they turn inbound envelopes and user intents
//! into a [`Step`]. The runtime owns the session exclusively, performs the
//! step's send, broadcasts its notices and schedules its follow-up.
//!
//! ```text
//! transport inbox ─► EnvelopeChannel.deliver() ─► handler ─┐
//!                                                          ▼
//! SessionHandle.submit() ───────────────────────► SessionRuntime.run()
//!        ▲                                                 │
//!        │ follow-up timer                                 ├─► session.on_envelope / on_intent
//!        └──────────────────────────────── schedule ◄──────┤
//!                                                          ├─► channel.send(outbound)
//!                                                          └─► broadcast SessionEvent
//! ```
//!
//! Only the runtime task touches the session, so no locks guard a balance
//! mirror. The runtime suspends only while waiting for input; the settle
//! delay runs on a detached timer so the session keeps answering (and
//! refusing concurrent spins) meanwhile.

use std::fmt;
use std::time::Duration;

use smallvec::SmallVec;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{EnvelopeChannel, Inbox, Transport};
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::{ErrorScope, Result, SlotError};

/// Notices buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A pure, single-owner state machine driven by a [`SessionRuntime`].
pub trait Session: Send + 'static {
    type Intent: fmt::Debug + Send + 'static;
    type Notice: fmt::Debug + Clone + Send + 'static;

    /// Envelope kinds this session subscribes to on its channel.
    const ACCEPTS: &'static [EnvelopeKind];

    fn name(&self) -> &'static str;

    fn on_envelope(&mut self, envelope: Envelope) -> Result<Step<Self::Intent, Self::Notice>>;

    fn on_intent(&mut self, intent: Self::Intent) -> Result<Step<Self::Intent, Self::Notice>>;
}

/// An intent the runtime feeds back to the session after a delay.
#[derive(Debug)]
pub struct FollowUp<I> {
    pub after: Duration,
    pub intent: I,
}

/// What a session wants done after handling one input.
#[derive(Debug)]
pub struct Step<I, N> {
    pub outbound: Option<Envelope>,
    pub notices: SmallVec<[N; 2]>,
    pub follow_up: Option<FollowUp<I>>,
}

impl<I, N> Default for Step<I, N> {
    fn default() -> Self {
        Self {
            outbound: None,
            notices: SmallVec::new(),
            follow_up: None,
        }
    }
}

impl<I, N> Step<I, N> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn notice(notice: N) -> Self {
        Self::default().with_notice(notice)
    }

    pub fn with_notice(mut self, notice: N) -> Self {
        self.notices.push(notice);
        self
    }

    pub fn send(mut self, envelope: Envelope) -> Self {
        self.outbound = Some(envelope);
        self
    }

    pub fn then(mut self, after: Duration, intent: I) -> Self {
        self.follow_up = Some(FollowUp { after, intent });
        self
    }
}

/// What subscribers of a session observe.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<N> {
    Notice(N),
    Rejected(SlotError),
}

/// UI-side handle: submit intents, subscribe to events.
pub struct SessionHandle<S: Session> {
    intents: mpsc::UnboundedSender<S::Intent>,
    events: broadcast::Sender<SessionEvent<S::Notice>>,
}

impl<S: Session> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            intents: self.intents.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: Session> SessionHandle<S> {
    pub fn submit(&self, intent: S::Intent) -> anyhow::Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| anyhow::anyhow!("session runtime has stopped"))
    }

    /// Events published after this call. Slow subscribers may miss events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent<S::Notice>> {
        self.events.subscribe()
    }
}

pub struct SessionRuntime<S: Session, T: Transport> {
    session: S,
    channel: EnvelopeChannel<T>,
    inbox: Inbox,
    envelopes: mpsc::UnboundedReceiver<Envelope>,
    intents: mpsc::UnboundedReceiver<S::Intent>,
    follow_ups: mpsc::WeakUnboundedSender<S::Intent>,
    events: broadcast::Sender<SessionEvent<S::Notice>>,
}

impl<S: Session, T: Transport> SessionRuntime<S, T> {
    pub fn new(session: S, channel: EnvelopeChannel<T>, inbox: Inbox) -> (Self, SessionHandle<S>) {
        let (envelope_tx, envelopes) = mpsc::unbounded_channel();
        for kind in S::ACCEPTS {
            let tx = envelope_tx.clone();
            channel.on_kind(*kind, move |envelope| {
                let _ = tx.send(envelope.clone());
            });
        }

        let (intent_tx, intents) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let handle = SessionHandle {
            intents: intent_tx.clone(),
            events: events.clone(),
        };

        let runtime = Self {
            session,
            channel,
            inbox,
            envelopes,
            intents,
            follow_ups: intent_tx.downgrade(),
            events,
        };
        (runtime, handle)
    }

    /// The channel, for registering extra observers before the runtime starts.
    pub fn channel(&self) -> &EnvelopeChannel<T> {
        &self.channel
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn spawn(self) -> JoinHandle<S> {
        tokio::spawn(self.run())
    }

    /// Runs until every handle is dropped and no follow-up is pending,
    /// then returns the session.
    pub async fn run(mut self) -> S {
        let mut inbox_open = true;
        info!(session = self.session.name(), "session runtime started");
        loop {
            tokio::select! {
                biased;
                Some(envelope) = self.envelopes.recv() => {
                    let step = self.session.on_envelope(envelope);
                    self.finish(step).await;
                }
                frame = self.inbox.recv(), if inbox_open => match frame {
                    Some(frame) => {
                        let _ = self.channel.deliver(&frame);
                    }
                    None => {
                        debug!(session = self.session.name(), "transport inbox closed");
                        inbox_open = false;
                    }
                },
                intent = self.intents.recv() => match intent {
                    Some(intent) => {
                        debug!(session = self.session.name(), ?intent, "intent");
                        let step = self.session.on_intent(intent);
                        self.finish(step).await;
                    }
                    None => break,
                },
            }
        }
        info!(session = self.session.name(), "session runtime stopped");
        self.session
    }

    async fn finish(&mut self, step: Result<Step<S::Intent, S::Notice>>) {
        let step = match step {
            Ok(step) => step,
            Err(err) => {
                self.reject(err);
                return;
            }
        };

        // Send first: authority moves when the envelope leaves, not when
        // subscribers hear about it.
        if let Some(envelope) = step.outbound {
            self.channel.send(&envelope).await;
        }
        for notice in step.notices {
            let _ = self.events.send(SessionEvent::Notice(notice));
        }
        if let Some(follow_up) = step.follow_up {
            self.schedule(follow_up);
        }
    }

    fn reject(&self, err: SlotError) {
        let session = self.session.name();
        match err.scope() {
            ErrorScope::Local => debug!(session, error = %err, "intent rejected"),
            ErrorScope::Protocol => warn!(session, error = %err, "peer update discarded"),
            ErrorScope::External => warn!(session, error = %err, "collaborator failed"),
            ErrorScope::Silent => debug!(session, error = %err, "discarded"),
        }
        if err.is_surfaced() {
            let _ = self.events.send(SessionEvent::Rejected(err));
        }
    }

    fn schedule(&self, follow_up: FollowUp<S::Intent>) {
        let Some(tx) = self.follow_ups.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(follow_up.after).await;
            let _ = tx.send(follow_up.intent);
        });
    }
}
