//! Catalog session.
//!
//! Owns the long-lived balance mirror. Selecting an item hands the balance to
//! the player together with a fresh [`HandoffToken`]; from that send on, the
//! catalog's mirror is stale until a [`BalanceDelta`] comes back.
//!
//! Handoffs are numbered in the order they are minted. A delta echoing a
//! token confirms that handoff and everything before it; a later delta that
//! echoes an older token than the confirmed one was overtaken in transit and
//! is refused. Every other absolute balance overwrites the mirror.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::amount::Amount;
use crate::config::{CatalogConfig, ReselectPolicy};
use crate::envelope::{BalanceDelta, Envelope, EnvelopeKind, HandoffToken, ItemSelection};
use crate::error::{Result, SlotError};
use crate::runtime::{Session, SessionHandle, SessionRuntime, Step};
use crate::source::{CatalogSource, Item};

/// Which side the catalog believes holds the live balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Held,
    HandedOff(HandoffToken),
}

#[derive(Debug)]
pub enum CatalogIntent {
    Loaded(Vec<Item>),
    LoadFailed(String),
    Select(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogNotice {
    CatalogLoaded(Vec<Item>),
    HandedOff {
        item: i64,
        balance: Amount,
        token: HandoffToken,
    },
    BalanceUpdated {
        balance: Amount,
        delta: Amount,
    },
}

type CatalogStep = Step<CatalogIntent, CatalogNotice>;

#[derive(Debug)]
pub struct CatalogSession {
    reselect: ReselectPolicy,
    items: Vec<Item>,
    balance: Amount,
    authority: Authority,
    /// Handoffs not yet overtaken by a confirmed one, by mint order.
    issued: HashMap<HandoffToken, u64>,
    next_handoff: u64,
}

impl CatalogSession {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            reselect: config.reselect,
            items: Vec::new(),
            balance: config.opening_balance,
            authority: Authority::Held,
            issued: HashMap::new(),
            next_handoff: 0,
        }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Replaces the item list, dropping items nobody could ever play.
    pub fn load(&mut self, items: Vec<Item>) -> &[Item] {
        let (playable, broken): (Vec<Item>, Vec<Item>) =
            items.into_iter().partition(Item::is_well_formed);
        for item in &broken {
            warn!(item = item.id, "catalog item has no positive wager options; skipped");
        }
        info!(items = playable.len(), "catalog loaded");
        self.items = playable;
        &self.items
    }

    /// Builds the handoff for `item` and relinquishes authority.
    ///
    /// The caller must send the returned selection; nothing is sent when this
    /// fails.
    pub fn select_item(&mut self, item: &Item) -> Result<(HandoffToken, ItemSelection)> {
        if let (Authority::HandedOff(_), ReselectPolicy::AwaitDelta) =
            (self.authority, self.reselect)
        {
            return Err(SlotError::HandoffOutstanding);
        }
        let min = item
            .min_wager()
            .ok_or_else(|| SlotError::invalid_wager(format!("{} offers no wagers", item.name)))?;
        if self.balance < min {
            return Err(SlotError::InsufficientBalance {
                required: min,
                available: self.balance,
            });
        }

        let token = HandoffToken::new();
        self.issued.insert(token, self.next_handoff);
        self.next_handoff += 1;
        self.authority = Authority::HandedOff(token);
        info!(item = item.id, balance = %self.balance, %token, "balance handed off");
        let selection = ItemSelection {
            id: item.id,
            name: item.name.clone(),
            wager_options: item.wager_options.clone(),
            balance_at_handoff: self.balance,
            handoff: Some(token),
        };
        Ok((token, selection))
    }

    /// Absorbs a player report and resumes authority.
    ///
    /// An absolute `resulting_balance` overwrites the mirror unless its token
    /// was overtaken. A bare delta that would go negative is refused and the
    /// mirror is left alone.
    pub fn on_balance_delta(&mut self, payload: BalanceDelta) -> Result<Amount> {
        let confirms = match payload.handoff {
            Some(token) => match self.issued.get(&token) {
                Some(seq) => Some(*seq),
                None => return Err(SlotError::StaleHandoff { token }),
            },
            None => None,
        };

        let next = match payload.resulting_balance {
            Some(balance) => balance,
            None => self
                .balance
                .checked_add(payload.delta)
                .ok_or_else(|| SlotError::malformed(format!("delta {} overflows", payload.delta)))?,
        };
        if next.is_negative() {
            return Err(SlotError::InsufficientFunds {
                balance: self.balance,
                delta: payload.delta,
            });
        }

        if let Some(seq) = confirms {
            // The player has seen this handoff; older ones can only arrive late.
            self.issued.retain(|_, issued| *issued >= seq);
            debug!(handoff = seq, outstanding = self.issued.len(), "handoff confirmed");
        }
        self.balance = next;
        self.authority = Authority::Held;
        info!(balance = %next, delta = %payload.delta, "balance absorbed");
        Ok(next)
    }
}

impl Session for CatalogSession {
    type Intent = CatalogIntent;
    type Notice = CatalogNotice;

    const ACCEPTS: &'static [EnvelopeKind] = &[EnvelopeKind::BalanceDelta];

    fn name(&self) -> &'static str {
        "catalog"
    }

    fn on_envelope(&mut self, envelope: Envelope) -> Result<CatalogStep> {
        match envelope {
            Envelope::BalanceDelta(payload) => {
                let delta = payload.delta;
                let balance = self.on_balance_delta(payload)?;
                Ok(Step::notice(CatalogNotice::BalanceUpdated { balance, delta }))
            }
            Envelope::SelectItem(selection) => Err(SlotError::malformed(format!(
                "catalog received a selection for item {}",
                selection.id
            ))),
        }
    }

    fn on_intent(&mut self, intent: CatalogIntent) -> Result<CatalogStep> {
        match intent {
            CatalogIntent::Loaded(items) => {
                let items = self.load(items).to_vec();
                Ok(Step::notice(CatalogNotice::CatalogLoaded(items)))
            }
            CatalogIntent::LoadFailed(reason) => Err(SlotError::CatalogUnavailable { reason }),
            CatalogIntent::Select(id) => {
                let item = self
                    .items
                    .iter()
                    .find(|item| item.id == id)
                    .cloned()
                    .ok_or(SlotError::UnknownItem { id })?;
                let (token, selection) = self.select_item(&item)?;
                let notice = CatalogNotice::HandedOff {
                    item: id,
                    balance: selection.balance_at_handoff,
                    token,
                };
                Ok(Step::notice(notice).send(Envelope::SelectItem(selection)))
            }
        }
    }
}

/// Fetches the catalog once and feeds the result to a running session.
///
/// A failed fetch reaches subscribers as `CatalogUnavailable`; no retry.
pub async fn refresh_catalog<C>(source: &C, handle: &SessionHandle<CatalogSession>) -> anyhow::Result<()>
where
    C: CatalogSource + ?Sized,
{
    match source.fetch_items().await {
        Ok(items) => handle.submit(CatalogIntent::Loaded(items)),
        Err(err) => {
            warn!(error = %err, "catalog fetch failed");
            handle.submit(CatalogIntent::LoadFailed(err.to_string()))
        }
    }
}

/// A catalog runtime over any transport.
pub type CatalogRuntime<T> = SessionRuntime<CatalogSession, T>;
