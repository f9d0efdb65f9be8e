//! # Slot Demo
//!
//! Runs a catalog and a player in one process, joined by a local transport
//! pair, and plays a few scripted rounds on two machines.
//!
//! Environment:
//!
//!   SLOTLINK_CONFIG   Path to a JSON config file (defaults apply otherwise)
//!   RUST_LOG          Log filter (default: info)

use std::time::Duration;

use anyhow::{bail, Result};
use slotlink::{
    local_pair, refresh_catalog, Amount, CatalogIntent, CatalogNotice, CatalogSession,
    EnvelopeChannel, Item, MockCatalog, PlayerIntent, PlayerNotice, PlayerSession, SessionEvent,
    SessionHandle, SessionRuntime, SlotConfig, SlotError,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

// ============================================================================
// Constants
// ============================================================================

const CONFIG_ENV: &str = "SLOTLINK_CONFIG";
const ROUNDS_PER_ITEM: usize = 3;
const ITEMS_TO_PLAY: usize = 2;
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

type CatalogEvents = broadcast::Receiver<SessionEvent<CatalogNotice>>;
type PlayerEvents = broadcast::Receiver<SessionEvent<PlayerNotice>>;

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => SlotConfig::load(&path)?,
        Err(_) => SlotConfig::default(),
    };

    let (catalog_end, player_end) = local_pair();
    let (catalog_runtime, catalog) = SessionRuntime::new(
        CatalogSession::new(&config.catalog),
        EnvelopeChannel::new(config.catalog_channel(), catalog_end.transport),
        catalog_end.inbox,
    );
    let (player_runtime, player) = SessionRuntime::new(
        PlayerSession::new(&config.player),
        EnvelopeChannel::new(config.player_channel(), player_end.transport),
        player_end.inbox,
    );
    let catalog_task = catalog_runtime.spawn();
    let player_task = player_runtime.spawn();

    let mut catalog_events = catalog.subscribe();
    let mut player_events = player.subscribe();

    let source = MockCatalog::from_config(&config.catalog);
    refresh_catalog(&source, &catalog).await?;

    let items = match next_event(&mut catalog_events).await? {
        SessionEvent::Notice(CatalogNotice::CatalogLoaded(items)) => items,
        SessionEvent::Rejected(SlotError::CatalogUnavailable { reason }) => {
            error!(%reason, "catalog unavailable; nothing to play");
            Vec::new()
        }
        other => bail!("unexpected catalog event: {other:?}"),
    };

    for item in items.iter().take(ITEMS_TO_PLAY) {
        play_item(&catalog, &player, &mut catalog_events, &mut player_events, item).await?;
    }

    drop(catalog);
    drop(player);
    let catalog_session = catalog_task.await?;
    let player_session = player_task.await?;
    info!(
        catalog = %catalog_session.balance(),
        player = %player_session.balance(),
        "demo finished"
    );
    Ok(())
}

// ============================================================================
// Scripted play
// ============================================================================

async fn play_item(
    catalog: &SessionHandle<CatalogSession>,
    player: &SessionHandle<PlayerSession>,
    catalog_events: &mut CatalogEvents,
    player_events: &mut PlayerEvents,
    item: &Item,
) -> Result<()> {
    catalog.submit(CatalogIntent::Select(item.id))?;
    match next_event(catalog_events).await? {
        SessionEvent::Notice(CatalogNotice::HandedOff { balance, token, .. }) => {
            info!(item = %item.name, %balance, %token, "handed off");
        }
        SessionEvent::Rejected(err) => {
            warn!(item = %item.name, error = %err, "selection refused");
            return Ok(());
        }
        other => bail!("unexpected catalog event: {other:?}"),
    }

    let mut offered = loop {
        match next_event(player_events).await? {
            SessionEvent::Notice(PlayerNotice::ItemLoaded { offered, .. }) => break offered,
            other => info!(?other, "player event"),
        }
    };

    for round in 1..=ROUNDS_PER_ITEM {
        // Cheapest affordable option keeps the demo going longest.
        let Some(wager) = offered.iter().copied().min() else {
            warn!(item = %item.name, "no affordable wager left");
            break;
        };
        player.submit(PlayerIntent::SelectWager(wager))?;
        player.submit(PlayerIntent::Spin)?;
        if round == 1 {
            // Overlapping spin; the player refuses it with SessionBusy.
            player.submit(PlayerIntent::Spin)?;
        }
        offered = settle_round(player_events, round, wager).await?;

        match next_event(catalog_events).await? {
            SessionEvent::Notice(CatalogNotice::BalanceUpdated { balance, delta }) => {
                info!(%balance, %delta, "catalog mirror updated");
            }
            other => warn!(?other, "catalog event"),
        }
    }
    Ok(())
}

/// Waits for the round to settle; returns what the new balance can afford.
async fn settle_round(events: &mut PlayerEvents, round: usize, wager: Amount) -> Result<Vec<Amount>> {
    loop {
        match next_event(events).await? {
            SessionEvent::Notice(PlayerNotice::Settled {
                outcome,
                balance,
                offered,
                ..
            }) => {
                info!(round, %wager, %outcome, %balance, "round settled");
                return Ok(offered);
            }
            SessionEvent::Rejected(SlotError::SessionBusy) => {
                info!(round, "overlapping spin refused");
            }
            SessionEvent::Rejected(err) => bail!("round {round} failed: {err}"),
            SessionEvent::Notice(notice) => info!(round, ?notice, "player event"),
        }
    }
}

async fn next_event<N: Clone>(events: &mut broadcast::Receiver<SessionEvent<N>>) -> Result<SessionEvent<N>> {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await {
            Ok(Ok(event)) => return Ok(event),
            Ok(Err(RecvError::Lagged(skipped))) => warn!(skipped, "event subscriber lagged"),
            Ok(Err(RecvError::Closed)) => bail!("session stopped"),
            Err(_) => bail!("no session event within {EVENT_TIMEOUT:?}"),
        }
    }
}
