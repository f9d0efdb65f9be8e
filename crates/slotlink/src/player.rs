//! Player session.
//!
//! Holds the player's balance mirror while it has authority and runs the
//! wager state machine:
//!
//! ```text
//! Idle ─SelectItem─► ItemLoaded ─SelectWager─► WagerSelected ─Spin─► Spinning
//!                        ▲                                              │
//!                        └──────────── Settle (after settle delay) ◄────┘
//! ```
//!
//! A spin debits the wager up front and credits `wager + outcome` on
//! settlement, then reports the round to the catalog. The machine itself
//! refuses overlapping spins; no UI lock is assumed.
//!
//! The first selection seeds the mirror from `balanceAtHandoff`. After that
//! the catalog only ever learns the balance from this session's reports, so a
//! later selection changes the item but never rewinds the mirror. A selection
//! that lands mid-spin is held and applied once the spin settles.

use std::time::Duration;

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::amount::Amount;
use crate::config::PlayerConfig;
use crate::envelope::{BalanceDelta, Envelope, EnvelopeKind, HandoffToken, ItemSelection};
use crate::error::{Result, SlotError};
use crate::outcome::{EntropySource, OutcomeEngine};
use crate::runtime::{Session, SessionRuntime, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    ItemLoaded,
    WagerSelected,
    Spinning,
}

/// `committed` is true only between accepting a spin and settling it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WagerState {
    pub selected: Option<Amount>,
    pub committed: bool,
}

/// An accepted spin waiting for its settle delay.
#[derive(Debug)]
pub struct SpinTicket {
    round: u64,
    wager: Amount,
    outcome: Amount,
}

impl SpinTicket {
    pub fn wager(&self) -> Amount {
        self.wager
    }

    pub fn outcome(&self) -> Amount {
        self.outcome
    }
}

#[derive(Debug)]
pub enum PlayerIntent {
    SelectWager(Amount),
    Spin,
    /// Scheduled by the session itself when a spin is accepted.
    Settle(SpinTicket),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerNotice {
    ItemLoaded {
        id: i64,
        name: String,
        offered: Vec<Amount>,
        balance: Amount,
    },
    WagerSelected {
        wager: Amount,
    },
    SpinStarted {
        wager: Amount,
        balance: Amount,
    },
    Settled {
        wager: Amount,
        outcome: Amount,
        balance: Amount,
        offered: Vec<Amount>,
    },
    /// No offered wager fits the balance; nothing can be played until a new
    /// selection arrives.
    Unplayable {
        reason: SlotError,
    },
}

type PlayerStep = Step<PlayerIntent, PlayerNotice>;

#[derive(Debug)]
struct LoadedItem {
    id: i64,
    name: String,
    wager_options: Vec<Amount>,
    handoff: Option<HandoffToken>,
}

#[derive(Debug)]
pub struct PlayerSession<E = fastrand::Rng> {
    settle_delay: Duration,
    engine: OutcomeEngine<E>,
    balance: Amount,
    item: Option<LoadedItem>,
    wager: WagerState,
    state: PlayerState,
    round: u64,
    /// Latest selection received while spinning.
    deferred: Option<ItemSelection>,
}

impl PlayerSession<fastrand::Rng> {
    pub fn new(config: &PlayerConfig) -> Self {
        Self::with_engine(config, OutcomeEngine::from_seed(config.seed))
    }
}

impl<E: EntropySource> PlayerSession<E> {
    pub fn with_engine(config: &PlayerConfig, engine: OutcomeEngine<E>) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            engine,
            balance: Amount::ZERO,
            item: None,
            wager: WagerState::default(),
            state: PlayerState::Idle,
            round: 0,
            deferred: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn wager(&self) -> WagerState {
        self.wager
    }

    pub fn item_id(&self) -> Option<i64> {
        self.item.as_ref().map(|item| item.id)
    }

    /// The loaded item's options that the current balance covers, in the
    /// order the catalog listed them.
    pub fn offered(&self) -> SmallVec<[Amount; 8]> {
        self.item
            .as_ref()
            .map(|item| {
                item.wager_options
                    .iter()
                    .copied()
                    .filter(|option| *option <= self.balance)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Takes over a selection from the catalog.
    ///
    /// While spinning the selection is held until settlement; a newer one
    /// replaces a held one.
    pub fn load(&mut self, selection: ItemSelection) -> Result<PlayerStep> {
        if self.state == PlayerState::Spinning {
            debug!(item = selection.id, "selection held until the spin settles");
            self.deferred = Some(selection);
            return Ok(Step::none());
        }
        Ok(self.install(selection))
    }

    fn install(&mut self, selection: ItemSelection) -> PlayerStep {
        let ItemSelection {
            id,
            name,
            wager_options,
            balance_at_handoff,
            handoff,
        } = selection;
        if self.item.is_none() {
            self.balance = balance_at_handoff;
        } else if balance_at_handoff != self.balance {
            debug!(
                handed_off = %balance_at_handoff,
                balance = %self.balance,
                "catalog mirror was behind; keeping the live balance"
            );
        }
        self.engine.bind(id, name.clone());
        self.item = Some(LoadedItem {
            id,
            name: name.clone(),
            wager_options,
            handoff,
        });
        self.wager = WagerState::default();
        self.state = PlayerState::ItemLoaded;

        let offered = self.offered();
        info!(item = id, balance = %self.balance, offered = offered.len(), "item loaded");
        let step = Step::notice(PlayerNotice::ItemLoaded {
            id,
            name,
            offered: offered.to_vec(),
            balance: self.balance,
        });
        self.flag_unplayable(step, &offered)
    }

    pub fn select_wager(&mut self, amount: Amount) -> Result<PlayerStep> {
        let item = match self.state {
            PlayerState::Spinning => return Err(SlotError::SessionBusy),
            PlayerState::Idle => return Err(SlotError::invalid_wager("no item loaded")),
            PlayerState::ItemLoaded | PlayerState::WagerSelected => self
                .item
                .as_ref()
                .ok_or_else(|| SlotError::invalid_wager("no item loaded"))?,
        };
        if !amount.is_positive() || !item.wager_options.contains(&amount) {
            return Err(SlotError::invalid_wager(format!(
                "{amount} is not offered by {}",
                item.name
            )));
        }
        if amount > self.balance {
            return Err(SlotError::InsufficientBalance {
                required: amount,
                available: self.balance,
            });
        }

        self.wager.selected = Some(amount);
        self.state = PlayerState::WagerSelected;
        Ok(Step::notice(PlayerNotice::WagerSelected { wager: amount }))
    }

    /// Accepts a spin: draws the outcome, debits the wager and schedules the
    /// settlement.
    pub fn spin(&mut self) -> Result<PlayerStep> {
        let wager = match (self.state, self.wager.selected) {
            (PlayerState::Spinning, _) => return Err(SlotError::SessionBusy),
            (PlayerState::Idle, _) => return Err(SlotError::invalid_wager("no item loaded")),
            (PlayerState::WagerSelected, Some(wager)) => wager,
            _ => return Err(SlotError::invalid_wager("no wager selected")),
        };
        if wager > self.balance {
            return Err(SlotError::InsufficientBalance {
                required: wager,
                available: self.balance,
            });
        }

        let outcome = self.engine.compute_outcome(wager)?;
        self.balance = self.balance - wager;
        self.wager.committed = true;
        self.state = PlayerState::Spinning;
        self.round += 1;

        info!(round = self.round, %wager, balance = %self.balance, "spin started");
        let ticket = SpinTicket {
            round: self.round,
            wager,
            outcome,
        };
        Ok(Step::notice(PlayerNotice::SpinStarted {
            wager,
            balance: self.balance,
        })
        .then(self.settle_delay, PlayerIntent::Settle(ticket)))
    }

    /// Credits a spin and reports it to the catalog.
    pub fn settle(&mut self, ticket: SpinTicket) -> Result<PlayerStep> {
        if self.state != PlayerState::Spinning || ticket.round != self.round {
            debug!(round = ticket.round, "stale settlement ignored");
            return Ok(Step::none());
        }

        // outcome >= -wager, so the credit is never negative.
        self.balance = self.balance + ticket.wager + ticket.outcome;
        self.wager = WagerState::default();
        self.state = PlayerState::ItemLoaded;

        let delta = BalanceDelta {
            delta: ticket.outcome,
            resulting_balance: Some(self.balance),
            handoff: self.item.as_ref().and_then(|item| item.handoff),
        };
        let offered = self.offered();
        info!(
            round = ticket.round,
            wager = %ticket.wager,
            outcome = %ticket.outcome,
            balance = %self.balance,
            "spin settled"
        );

        let step = Step::notice(PlayerNotice::Settled {
            wager: ticket.wager,
            outcome: ticket.outcome,
            balance: self.balance,
            offered: offered.to_vec(),
        })
        .send(Envelope::BalanceDelta(delta));

        let Some(selection) = self.deferred.take() else {
            return Ok(self.flag_unplayable(step, &offered));
        };
        let loaded = self.install(selection);
        Ok(loaded.notices.into_iter().fold(step, Step::with_notice))
    }

    fn flag_unplayable(&self, step: PlayerStep, offered: &[Amount]) -> PlayerStep {
        if !offered.is_empty() {
            return step;
        }
        let required = self
            .item
            .as_ref()
            .and_then(|item| item.wager_options.iter().copied().min())
            .unwrap_or(Amount::ZERO);
        step.with_notice(PlayerNotice::Unplayable {
            reason: SlotError::InsufficientBalance {
                required,
                available: self.balance,
            },
        })
    }
}

impl<E: EntropySource + 'static> Session for PlayerSession<E> {
    type Intent = PlayerIntent;
    type Notice = PlayerNotice;

    const ACCEPTS: &'static [EnvelopeKind] = &[EnvelopeKind::SelectItem];

    fn name(&self) -> &'static str {
        "player"
    }

    fn on_envelope(&mut self, envelope: Envelope) -> Result<PlayerStep> {
        match envelope {
            Envelope::SelectItem(selection) => self.load(selection),
            Envelope::BalanceDelta(_) => {
                debug!("player does not consume balance deltas");
                Ok(Step::none())
            }
        }
    }

    fn on_intent(&mut self, intent: PlayerIntent) -> Result<PlayerStep> {
        match intent {
            PlayerIntent::SelectWager(amount) => self.select_wager(amount),
            PlayerIntent::Spin => self.spin(),
            PlayerIntent::Settle(ticket) => self.settle(ticket),
        }
    }
}

/// A player runtime over any transport.
pub type PlayerRuntime<T, E = fastrand::Rng> = SessionRuntime<PlayerSession<E>, T>;
