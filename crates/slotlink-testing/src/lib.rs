//! Testing utilities for slotlink sessions.
//!
//! - [`RecordingTransport`] captures every frame a channel posts
//! - [`FaultyTransport`] loses or holds back chosen envelope kinds
//! - [`ScriptedEntropy`] replays fixed multipliers into the outcome engine
//! - [`FixedCatalog`] / [`FailingCatalog`] stand in for the catalog source
//! - [`next_notice`] / [`wait_for`] read session events with a deadline

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use slotlink::{
    Amount, CatalogSource, EntropySource, Envelope, EnvelopeKind, Frame, Item, ItemSelection,
    SessionEvent, Transport,
};
use tokio::sync::broadcast;

/// Deadline used by the event helpers.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport that keeps what it is given instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    /// Recorded frames decoded back into envelopes.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.frames()
            .iter()
            .map(|frame| Envelope::decode(&frame.body).expect("recorded frame decodes"))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn post(&self, frame: Frame) -> anyhow::Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    drop_next: HashMap<EnvelopeKind, usize>,
    holding: HashSet<EnvelopeKind>,
    held: Vec<Frame>,
    dropped: usize,
}

/// Wraps a transport and misbehaves on request: drops the next frames of a
/// kind, or holds every frame of a kind until released.
///
/// Clones share the same fault plan.
#[derive(Debug, Clone)]
pub struct FaultyTransport<T> {
    inner: T,
    faults: Arc<Mutex<Faults>>,
}

impl<T: Transport> FaultyTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Arc::default(),
        }
    }

    /// Loses the next frame carrying `kind`.
    pub fn drop_next(&self, kind: EnvelopeKind) {
        *self.faults.lock().unwrap().drop_next.entry(kind).or_default() += 1;
    }

    /// Holds back every frame carrying `kind` until [`release`](Self::release).
    pub fn hold(&self, kind: EnvelopeKind) {
        self.faults.lock().unwrap().holding.insert(kind);
    }

    /// Stops holding and delivers held frames in the order they were sent.
    pub async fn release(&self) -> anyhow::Result<()> {
        let held = self.take_held();
        self.deliver(held).await
    }

    /// Stops holding and delivers held frames newest first.
    pub async fn release_reversed(&self) -> anyhow::Result<()> {
        let mut held = self.take_held();
        held.reverse();
        self.deliver(held).await
    }

    pub fn dropped(&self) -> usize {
        self.faults.lock().unwrap().dropped
    }

    pub fn held(&self) -> usize {
        self.faults.lock().unwrap().held.len()
    }

    fn take_held(&self) -> Vec<Frame> {
        let mut faults = self.faults.lock().unwrap();
        faults.holding.clear();
        std::mem::take(&mut faults.held)
    }

    async fn deliver(&self, frames: Vec<Frame>) -> anyhow::Result<()> {
        for frame in frames {
            self.inner.post(frame).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for FaultyTransport<T> {
    async fn post(&self, frame: Frame) -> anyhow::Result<()> {
        let Ok(envelope) = Envelope::decode(&frame.body) else {
            return self.inner.post(frame).await;
        };
        let kind = envelope.kind();
        {
            let mut guard = self.faults.lock().unwrap();
            let faults = &mut *guard;
            if let Some(pending) = faults.drop_next.get_mut(&kind).filter(|n| **n > 0) {
                *pending -= 1;
                faults.dropped += 1;
                return Ok(());
            }
            if faults.holding.contains(&kind) {
                faults.held.push(frame);
                return Ok(());
            }
        }
        self.inner.post(frame).await
    }
}

/// Multipliers handed out in order; `0` once the script runs dry.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEntropy {
    script: VecDeque<i32>,
}

impl ScriptedEntropy {
    pub fn new(multipliers: impl IntoIterator<Item = i32>) -> Self {
        Self {
            script: multipliers.into_iter().collect(),
        }
    }
}

impl EntropySource for ScriptedEntropy {
    fn multiplier(&mut self, _range: RangeInclusive<i32>) -> i32 {
        self.script.pop_front().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct FixedCatalog(pub Vec<Item>);

#[async_trait]
impl CatalogSource for FixedCatalog {
    async fn fetch_items(&self) -> anyhow::Result<Vec<Item>> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct FailingCatalog(pub String);

#[async_trait]
impl CatalogSource for FailingCatalog {
    async fn fetch_items(&self) -> anyhow::Result<Vec<Item>> {
        anyhow::bail!("{}", self.0)
    }
}

pub fn units(values: &[i64]) -> Vec<Amount> {
    values.iter().map(|v| Amount::from_units(*v)).collect()
}

pub fn item(id: i64, name: &str, options: &[i64]) -> Item {
    Item::new(id, name, units(options))
}

pub fn selection(item: &Item, balance: Amount) -> ItemSelection {
    ItemSelection {
        id: item.id,
        name: item.name.clone(),
        wager_options: item.wager_options.clone(),
        balance_at_handoff: balance,
        handoff: None,
    }
}

/// A frame carrying `envelope` as if posted from `origin`.
pub fn frame_from(origin: &str, envelope: &Envelope) -> Frame {
    Frame {
        origin: origin.to_string(),
        body: serde_json::to_string(envelope).expect("envelope serializes"),
    }
}

/// The next event on `rx`, panicking after [`EVENT_TIMEOUT`].
pub async fn next_notice<N: Clone>(rx: &mut broadcast::Receiver<SessionEvent<N>>) -> SessionEvent<N> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("session event channel closed")
}

/// Skips events until one matches `predicate`.
pub async fn wait_for<N, F>(rx: &mut broadcast::Receiver<SessionEvent<N>>, mut predicate: F) -> SessionEvent<N>
where
    N: Clone,
    F: FnMut(&SessionEvent<N>) -> bool,
{
    loop {
        let event = next_notice(rx).await;
        if predicate(&event) {
            return event;
        }
    }
}
