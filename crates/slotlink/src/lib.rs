//! # Slotlink
//!
//! Keeps one consistent player balance across two surfaces that never share
//! memory: a catalog that lists items with their wager options, and a player
//! that runs wager rounds on the selected item. The surfaces talk only through
//! an asynchronous channel with no ordering, no acknowledgements and no
//! delivery guarantee, which untrusted code in the hosting document can also
//! post into.
//!
//! ## Authority handoff
//!
//! Each surface keeps its own balance *mirror*. Exactly one mirror is live at
//! a time, and authority moves when an envelope is sent:
//!
//! ```text
//! CatalogSession (live)                        PlayerSession (stale)
//!     │  SELECT_ITEM { item, balanceAtHandoff, handoff }
//!     ├───────────────────────────────────────────►│
//! (stale)                                        (live)
//!     │                                 spin: debit wager
//!     │                                 settle: credit wager + outcome
//!     │  BALANCE_DELTA { delta, resultingBalance, handoff }
//!     │◄───────────────────────────────────────────┤
//! (live)                                           │
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Mirrors are private** - Only a session's own runtime task mutates its
//!    mirror; the other side only ever sees values carried in envelopes
//! 2. **Mirrors never go negative** - The player filters and re-validates
//!    wagers; the catalog refuses deltas that would underflow
//! 3. **One spin at a time** - The player state machine refuses overlapping
//!    spins with [`SlotError::SessionBusy`]
//! 4. **Absolute wins** - A delta carrying `resultingBalance` overwrites the
//!    catalog mirror, which makes duplicate delivery harmless
//! 5. **Origins are checked** - Inbound frames from anything but the
//!    configured peer origin are dropped without a trace to the user
//!
//! ## Guarantees
//!
//! - **At-most-once delivery**: a lost envelope means nothing happened
//! - **No ordering**: sessions stay correct under reordering of distinct kinds
//! - **No persistence**: balances live as long as the process
//!
//! ## Example
//!
//! ```ignore
//! use slotlink::{
//!     local_pair, refresh_catalog, Amount, CatalogIntent, CatalogSession, EnvelopeChannel,
//!     MockCatalog, PlayerIntent, PlayerSession, SessionRuntime, SlotConfig,
//! };
//!
//! let config = SlotConfig::default();
//! let (catalog_end, player_end) = local_pair();
//!
//! let (catalog, catalog_handle) = SessionRuntime::new(
//!     CatalogSession::new(&config.catalog),
//!     EnvelopeChannel::new(config.catalog_channel(), catalog_end.transport),
//!     catalog_end.inbox,
//! );
//! let (player, player_handle) = SessionRuntime::new(
//!     PlayerSession::new(&config.player),
//!     EnvelopeChannel::new(config.player_channel(), player_end.transport),
//!     player_end.inbox,
//! );
//! catalog.spawn();
//! player.spawn();
//!
//! refresh_catalog(&MockCatalog::from_config(&config.catalog), &catalog_handle).await?;
//! catalog_handle.submit(CatalogIntent::Select(1))?;
//! player_handle.submit(PlayerIntent::SelectWager(Amount::from_units(20)))?;
//! player_handle.submit(PlayerIntent::Spin)?;
//! ```

// Core modules
mod amount;
mod catalog;
mod channel;
mod config;
mod envelope;
mod error;
mod outcome;
mod player;
mod runtime;
mod source;


pub use crate::amount::Amount;

pub use crate::catalog::{
    refresh_catalog, Authority, CatalogIntent, CatalogNotice, CatalogRuntime, CatalogSession,
};

pub use crate::channel::{local_pair, Endpoint, EnvelopeChannel, Frame, Inbox, LocalTransport, Transport};

pub use crate::config::{
    CatalogConfig, ChannelConfig, Origins, PlayerConfig, ReselectPolicy, SlotConfig,
    DEFAULT_ORIGIN,
};

pub use crate::envelope::{BalanceDelta, Envelope, EnvelopeKind, HandoffToken, ItemSelection};

pub use crate::error::{ErrorScope, Result, SlotError};

pub use crate::outcome::{scale, EntropySource, OutcomeEngine, MAX_MULTIPLIER, MIN_MULTIPLIER};

pub use crate::player::{
    PlayerIntent, PlayerNotice, PlayerRuntime, PlayerSession, PlayerState, SpinTicket, WagerState,
};

pub use crate::runtime::{
    FollowUp, Session, SessionEvent, SessionHandle, SessionRuntime, Step, DEFAULT_EVENT_CAPACITY,
};

pub use crate::source::{default_items, CatalogSource, Item, MockCatalog};

// Re-export commonly used external types
pub use async_trait::async_trait;
