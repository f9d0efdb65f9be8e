//! Both sessions running on a local transport pair.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use slotlink::{
    local_pair, refresh_catalog, Amount, Authority, BalanceDelta, CatalogIntent, CatalogNotice,
    CatalogSession, Envelope, EnvelopeChannel, EnvelopeKind, Item, LocalTransport, MockCatalog,
    OutcomeEngine, Origins, PlayerIntent, PlayerNotice, PlayerSession, PlayerState, SessionEvent,
    SessionHandle, SessionRuntime, SlotConfig, SlotError, Transport,
};
use slotlink_testing::{
    frame_from, item, next_notice, selection, units, wait_for, FailingCatalog, FaultyTransport,
    FixedCatalog, RecordingTransport, ScriptedEntropy,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const CATALOG: &str = "https://catalog.test";
const PLAYER: &str = "https://player.test";

fn config() -> SlotConfig {
    SlotConfig {
        origins: Origins {
            catalog: CATALOG.to_string(),
            player: PLAYER.to_string(),
        },
        ..SlotConfig::default()
    }
    .with_settle_delay(Duration::from_millis(1_000))
}

struct Harness {
    catalog: SessionHandle<CatalogSession>,
    player: SessionHandle<PlayerSession<ScriptedEntropy>>,
    catalog_task: JoinHandle<CatalogSession>,
    player_task: JoinHandle<PlayerSession<ScriptedEntropy>>,
    /// Posts straight into the catalog inbox with any origin.
    into_catalog: LocalTransport,
    /// What the catalog sends toward the player.
    to_player: FaultyTransport<LocalTransport>,
    /// What the player sends toward the catalog.
    to_catalog: FaultyTransport<LocalTransport>,
    /// Authenticated deltas the catalog channel dispatched.
    deltas: Arc<AtomicUsize>,
}

impl Harness {
    fn start(config: &SlotConfig, multipliers: impl IntoIterator<Item = i32>) -> Self {
        let (catalog_end, player_end) = local_pair();
        let into_catalog = player_end.transport.clone();
        let to_player = FaultyTransport::new(catalog_end.transport);
        let to_catalog = FaultyTransport::new(player_end.transport);

        let (catalog_runtime, catalog) = SessionRuntime::new(
            CatalogSession::new(&config.catalog),
            EnvelopeChannel::new(config.catalog_channel(), to_player.clone()),
            catalog_end.inbox,
        );
        let deltas = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deltas);
        catalog_runtime
            .channel()
            .on_kind(EnvelopeKind::BalanceDelta, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let engine = OutcomeEngine::new(ScriptedEntropy::new(multipliers));
        let (player_runtime, player) = SessionRuntime::new(
            PlayerSession::with_engine(&config.player, engine),
            EnvelopeChannel::new(config.player_channel(), to_catalog.clone()),
            player_end.inbox,
        );

        Self {
            catalog,
            player,
            catalog_task: catalog_runtime.spawn(),
            player_task: player_runtime.spawn(),
            into_catalog,
            to_player,
            to_catalog,
            deltas,
        }
    }

    /// Loads one item and hands it to the player.
    async fn hand_off(&self, options: &[i64]) {
        self.hand_off_first(vec![item(1, "Slot Machine A", options)]).await;
    }

    /// Loads `items` and hands the one with id 1 to the player.
    async fn hand_off_first(&self, items: Vec<Item>) {
        let mut catalog_events = self.catalog.subscribe();
        let mut player_events = self.player.subscribe();

        refresh_catalog(&FixedCatalog(items), &self.catalog)
            .await
            .unwrap();
        wait_for(&mut catalog_events, |e| {
            matches!(e, SessionEvent::Notice(CatalogNotice::CatalogLoaded(_)))
        })
        .await;

        self.catalog.submit(CatalogIntent::Select(1)).unwrap();
        wait_for(&mut player_events, |e| {
            matches!(e, SessionEvent::Notice(PlayerNotice::ItemLoaded { .. }))
        })
        .await;
    }

    async fn finish(self) -> (CatalogSession, PlayerSession<ScriptedEntropy>) {
        drop(self.catalog);
        drop(self.player);
        (self.catalog_task.await.unwrap(), self.player_task.await.unwrap())
    }
}

// ============================================================================
// Full rounds
// ============================================================================

#[tokio::test(start_paused = true)]
async fn losing_round_moves_the_balance_back_to_the_catalog() {
    let harness = Harness::start(&config(), [-25]);
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    refresh_catalog(
        &FixedCatalog(vec![item(1, "Slot Machine A", &[1, 5, 10, 20])]),
        &harness.catalog,
    )
    .await
    .unwrap();
    harness.catalog.submit(CatalogIntent::Select(1)).unwrap();

    let handed = wait_for(&mut catalog_events, |e| {
        matches!(e, SessionEvent::Notice(CatalogNotice::HandedOff { .. }))
    })
    .await;
    let SessionEvent::Notice(CatalogNotice::HandedOff { balance, token, .. }) = handed else {
        unreachable!()
    };
    assert_eq!(balance, Amount::from_units(100));
    let catalog_authority_during_play = Authority::HandedOff(token);

    assert_eq!(
        wait_for(&mut player_events, |e| matches!(
            e,
            SessionEvent::Notice(PlayerNotice::ItemLoaded { .. })
        ))
        .await,
        SessionEvent::Notice(PlayerNotice::ItemLoaded {
            id: 1,
            name: "Slot Machine A".to_string(),
            offered: units(&[1, 5, 10, 20]),
            balance: Amount::from_units(100),
        })
    );

    harness
        .player
        .submit(PlayerIntent::SelectWager(Amount::from_units(20)))
        .unwrap();
    harness.player.submit(PlayerIntent::Spin).unwrap();

    assert_eq!(
        wait_for(&mut player_events, |e| matches!(
            e,
            SessionEvent::Notice(PlayerNotice::SpinStarted { .. })
        ))
        .await,
        SessionEvent::Notice(PlayerNotice::SpinStarted {
            wager: Amount::from_units(20),
            balance: Amount::from_units(80),
        })
    );
    let settled = wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::Settled { .. }))
    })
    .await;
    assert_eq!(
        settled,
        SessionEvent::Notice(PlayerNotice::Settled {
            wager: Amount::from_units(20),
            outcome: Amount::from_units(-5),
            balance: Amount::from_units(95),
            offered: units(&[1, 5, 10, 20]),
        })
    );

    assert_eq!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Notice(CatalogNotice::BalanceUpdated {
            balance: Amount::from_units(95),
            delta: Amount::from_units(-5),
        })
    );

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(95));
    assert_eq!(catalog.authority(), Authority::Held);
    assert_eq!(player.balance(), Amount::from_units(95));
    assert_eq!(player.state(), PlayerState::ItemLoaded);
    assert_ne!(catalog.authority(), catalog_authority_during_play);
}

#[tokio::test(start_paused = true)]
async fn spin_during_settlement_is_refused_and_reported_once() {
    let harness = Harness::start(&config(), [10, 200]);
    harness.hand_off(&[1, 5, 10, 20]).await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness
        .player
        .submit(PlayerIntent::SelectWager(Amount::from_units(10)))
        .unwrap();
    harness.player.submit(PlayerIntent::Spin).unwrap();
    harness.player.submit(PlayerIntent::Spin).unwrap();

    wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Rejected(SlotError::SessionBusy))
    })
    .await;
    let settled = wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::Settled { .. }))
    })
    .await;
    let SessionEvent::Notice(PlayerNotice::Settled { balance, .. }) = settled else {
        unreachable!()
    };
    assert_eq!(balance, Amount::from_units(101));

    wait_for(&mut catalog_events, |e| {
        matches!(e, SessionEvent::Notice(CatalogNotice::BalanceUpdated { .. }))
    })
    .await;

    // Well past any settle delay a second spin would have needed.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.deltas.load(Ordering::SeqCst), 1);

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(101));
    assert_eq!(player.balance(), Amount::from_units(101));
}

#[tokio::test(start_paused = true)]
async fn mock_catalog_serves_the_default_items() {
    let harness = Harness::start(&config(), []);
    let mut catalog_events = harness.catalog.subscribe();

    let source = MockCatalog::new().with_failure_rate(0.0).with_seed(7);
    refresh_catalog(&source, &harness.catalog).await.unwrap();

    let SessionEvent::Notice(CatalogNotice::CatalogLoaded(items)) =
        next_notice(&mut catalog_events).await
    else {
        panic!("catalog did not load");
    };
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].name, "Slot Machine A");

    harness.finish().await;
}

// ============================================================================
// Handoffs under loss and reordering
// ============================================================================

async fn play_round(
    harness: &Harness,
    events: &mut broadcast::Receiver<SessionEvent<PlayerNotice>>,
    wager: i64,
) -> Amount {
    harness
        .player
        .submit(PlayerIntent::SelectWager(Amount::from_units(wager)))
        .unwrap();
    harness.player.submit(PlayerIntent::Spin).unwrap();
    let settled = wait_for(events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::Settled { .. }))
    })
    .await;
    let SessionEvent::Notice(PlayerNotice::Settled { balance, .. }) = settled else {
        unreachable!()
    };
    balance
}

fn balance_updated(balance: i64, delta: i64) -> SessionEvent<CatalogNotice> {
    SessionEvent::Notice(CatalogNotice::BalanceUpdated {
        balance: Amount::from_units(balance),
        delta: Amount::from_units(delta),
    })
}

#[tokio::test(start_paused = true)]
async fn reselect_during_a_spin_keeps_both_mirrors_equal() {
    let harness = Harness::start(&config(), [-100, -100]);
    harness
        .hand_off_first(vec![
            item(1, "Slot Machine A", &[1, 5, 10, 20]),
            item(2, "Slot Machine B", &[5, 10, 20]),
        ])
        .await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness
        .player
        .submit(PlayerIntent::SelectWager(Amount::from_units(20)))
        .unwrap();
    harness.player.submit(PlayerIntent::Spin).unwrap();
    wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::SpinStarted { .. }))
    })
    .await;

    harness.catalog.submit(CatalogIntent::Select(2)).unwrap();
    let handed = next_notice(&mut catalog_events).await;
    let SessionEvent::Notice(CatalogNotice::HandedOff { item, balance, .. }) = handed else {
        panic!("expected a handoff, got {handed:?}");
    };
    assert_eq!(item, 2);
    // The catalog has not heard about the spin yet.
    assert_eq!(balance, Amount::from_units(100));

    let settled = wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::Settled { .. }))
    })
    .await;
    let SessionEvent::Notice(PlayerNotice::Settled { balance, .. }) = settled else {
        unreachable!()
    };
    assert_eq!(balance, Amount::from_units(80));
    assert_eq!(
        next_notice(&mut player_events).await,
        SessionEvent::Notice(PlayerNotice::ItemLoaded {
            id: 2,
            name: "Slot Machine B".to_string(),
            offered: units(&[5, 10, 20]),
            balance: Amount::from_units(80),
        })
    );
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(80, -20));

    assert_eq!(
        play_round(&harness, &mut player_events, 20).await,
        Amount::from_units(60)
    );
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(60, -20));

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(60));
    assert_eq!(player.balance(), Amount::from_units(60));
    assert_eq!(catalog.authority(), Authority::Held);
}

#[tokio::test(start_paused = true)]
async fn lost_selection_leaves_the_player_on_its_item() {
    let harness = Harness::start(&config(), [50]);
    harness.hand_off(&[1, 5, 10, 20]).await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness.to_player.drop_next(EnvelopeKind::SelectItem);
    harness.catalog.submit(CatalogIntent::Select(1)).unwrap();
    wait_for(&mut catalog_events, |e| {
        matches!(e, SessionEvent::Notice(CatalogNotice::HandedOff { .. }))
    })
    .await;
    assert_eq!(harness.to_player.dropped(), 1);

    // Reported under the first handoff, which the catalog still honours.
    assert_eq!(
        play_round(&harness, &mut player_events, 10).await,
        Amount::from_units(105)
    );
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(105, 5));

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), player.balance());
    assert_eq!(catalog.authority(), Authority::Held);
}

#[tokio::test(start_paused = true)]
async fn lost_report_is_repaired_by_the_next_one() {
    let harness = Harness::start(&config(), [-25, 0]);
    harness.hand_off(&[1, 5, 10, 20]).await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness.to_catalog.drop_next(EnvelopeKind::BalanceDelta);
    assert_eq!(
        play_round(&harness, &mut player_events, 20).await,
        Amount::from_units(95)
    );
    assert_eq!(
        play_round(&harness, &mut player_events, 10).await,
        Amount::from_units(95)
    );

    // The first event is the second report; its absolute balance carries the lost loss.
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(95, 0));
    assert_eq!(harness.to_catalog.dropped(), 1);
    assert_eq!(harness.deltas.load(Ordering::SeqCst), 1);

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(95));
    assert_eq!(player.balance(), Amount::from_units(95));
}

#[tokio::test(start_paused = true)]
async fn report_overtaken_by_a_newer_handoff_cannot_rewind_the_catalog() {
    let harness = Harness::start(&config(), [50, 100]);
    harness.hand_off(&[1, 5, 10, 20]).await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness.to_catalog.hold(EnvelopeKind::BalanceDelta);
    assert_eq!(
        play_round(&harness, &mut player_events, 20).await,
        Amount::from_units(110)
    );

    // Reselected from a mirror that never saw the win.
    harness.catalog.submit(CatalogIntent::Select(1)).unwrap();
    let handed = next_notice(&mut catalog_events).await;
    let SessionEvent::Notice(CatalogNotice::HandedOff { balance, .. }) = handed else {
        panic!("expected a handoff, got {handed:?}");
    };
    assert_eq!(balance, Amount::from_units(100));
    let loaded = wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::ItemLoaded { .. }))
    })
    .await;
    let SessionEvent::Notice(PlayerNotice::ItemLoaded { balance, .. }) = loaded else {
        unreachable!()
    };
    assert_eq!(balance, Amount::from_units(110));

    assert_eq!(
        play_round(&harness, &mut player_events, 10).await,
        Amount::from_units(120)
    );
    assert_eq!(harness.to_catalog.held(), 2);
    harness.to_catalog.release_reversed().await.unwrap();

    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(120, 10));
    assert!(matches!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Rejected(SlotError::StaleHandoff { .. })
    ));

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(120));
    assert_eq!(player.balance(), Amount::from_units(120));
}

#[tokio::test(start_paused = true)]
async fn reports_released_in_order_all_land() {
    let harness = Harness::start(&config(), [50, 100]);
    harness.hand_off(&[1, 5, 10, 20]).await;
    let mut catalog_events = harness.catalog.subscribe();
    let mut player_events = harness.player.subscribe();

    harness.to_catalog.hold(EnvelopeKind::BalanceDelta);
    play_round(&harness, &mut player_events, 20).await;
    harness.catalog.submit(CatalogIntent::Select(1)).unwrap();
    wait_for(&mut player_events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::ItemLoaded { .. }))
    })
    .await;
    play_round(&harness, &mut player_events, 10).await;
    harness.to_catalog.release().await.unwrap();

    wait_for(&mut catalog_events, |e| {
        matches!(e, SessionEvent::Notice(CatalogNotice::HandedOff { .. }))
    })
    .await;
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(110, 10));
    assert_eq!(next_notice(&mut catalog_events).await, balance_updated(120, 10));

    let (catalog, player) = harness.finish().await;
    assert_eq!(catalog.balance(), player.balance());
}

// ============================================================================
// Hostile and malformed input
// ============================================================================

#[tokio::test(start_paused = true)]
async fn frames_from_foreign_origins_are_ignored() {
    let harness = Harness::start(&config(), []);
    let mut catalog_events = harness.catalog.subscribe();

    let forged = Envelope::BalanceDelta(BalanceDelta {
        delta: Amount::from_units(1_000_000),
        resulting_balance: Some(Amount::from_units(1_000_100)),
        handoff: None,
    });
    for origin in ["https://evil.test", "https://player.test.evil", CATALOG] {
        harness
            .into_catalog
            .post(frame_from(origin, &forged))
            .await
            .unwrap();
    }

    let genuine = Envelope::BalanceDelta(BalanceDelta::relative(Amount::from_units(-5)));
    harness
        .into_catalog
        .post(frame_from(PLAYER, &genuine))
        .await
        .unwrap();

    // The inbox is FIFO, so the first event proves the forgeries went nowhere.
    assert_eq!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Notice(CatalogNotice::BalanceUpdated {
            balance: Amount::from_units(95),
            delta: Amount::from_units(-5),
        })
    );
    assert_eq!(harness.deltas.load(Ordering::SeqCst), 1);

    let (catalog, _) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(95));
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_from_the_peer_are_dropped() {
    let harness = Harness::start(&config(), []);
    let mut catalog_events = harness.catalog.subscribe();

    for body in [
        r#"{"type":"SPIN_RESULT","data":{"result":3,"newBalance":10}}"#,
        r#"{"type":"BALANCE_DELTA","data":{"delta":-5,"resultingBalance":-5}}"#,
        "{",
    ] {
        harness
            .into_catalog
            .post(slotlink::Frame {
                origin: PLAYER.to_string(),
                body: body.to_string(),
            })
            .await
            .unwrap();
    }
    harness
        .into_catalog
        .post(frame_from(
            PLAYER,
            &Envelope::BalanceDelta(BalanceDelta::relative(Amount::from_units(-500))),
        ))
        .await
        .unwrap();

    // Decodable but unaffordable: surfaced, mirror untouched.
    assert_eq!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Rejected(SlotError::InsufficientFunds {
            balance: Amount::from_units(100),
            delta: Amount::from_units(-500),
        })
    );

    let (catalog, _) = harness.finish().await;
    assert_eq!(catalog.balance(), Amount::from_units(100));
    assert_eq!(catalog.authority(), Authority::Held);
}

// ============================================================================
// Refusals that send nothing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn unaffordable_selection_never_reaches_the_transport() {
    let config = config().with_opening_balance(Amount::from_units(3));
    let recording = RecordingTransport::new();
    let (_peer, inbox) = mpsc::unbounded_channel();
    let (runtime, catalog) = SessionRuntime::new(
        CatalogSession::new(&config.catalog),
        EnvelopeChannel::new(config.catalog_channel(), recording.clone()),
        inbox,
    );
    let task = runtime.spawn();
    let mut events = catalog.subscribe();

    refresh_catalog(&FixedCatalog(vec![item(2, "Pricey", &[5, 10])]), &catalog)
        .await
        .unwrap();
    catalog.submit(CatalogIntent::Select(2)).unwrap();

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::Rejected(_))).await,
        SessionEvent::Rejected(SlotError::InsufficientBalance {
            required: Amount::from_units(5),
            available: Amount::from_units(3),
        })
    );
    assert!(recording.frames().is_empty());

    drop(catalog);
    let session = task.await.unwrap();
    assert_eq!(session.authority(), Authority::Held);
    assert_eq!(session.balance(), Amount::from_units(3));
}

#[tokio::test(start_paused = true)]
async fn player_flags_a_selection_it_cannot_play() {
    let config = config();
    let recording = RecordingTransport::new();
    let (peer, inbox) = mpsc::unbounded_channel();
    let (runtime, player) = SessionRuntime::new(
        PlayerSession::with_engine(&config.player, OutcomeEngine::new(ScriptedEntropy::default())),
        EnvelopeChannel::new(config.player_channel(), recording.clone()),
        inbox,
    );
    let task = runtime.spawn();
    let mut events = player.subscribe();

    let pricey = item(2, "Pricey", &[5, 10]);
    let envelope = Envelope::SelectItem(selection(&pricey, Amount::from_units(3)));
    peer.send(frame_from(CATALOG, &envelope)).unwrap();

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Notice(PlayerNotice::ItemLoaded { .. }))
    })
    .await;
    assert_eq!(
        next_notice(&mut events).await,
        SessionEvent::Notice(PlayerNotice::Unplayable {
            reason: SlotError::InsufficientBalance {
                required: Amount::from_units(5),
                available: Amount::from_units(3),
            },
        })
    );

    player.submit(PlayerIntent::Spin).unwrap();
    assert!(matches!(
        next_notice(&mut events).await,
        SessionEvent::Rejected(SlotError::InvalidWager { .. })
    ));
    assert!(recording.frames().is_empty());

    drop(player);
    let session = task.await.unwrap();
    assert_eq!(session.balance(), Amount::from_units(3));
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_surfaces_catalog_unavailable() {
    let harness = Harness::start(&config(), []);
    let mut catalog_events = harness.catalog.subscribe();

    refresh_catalog(&FailingCatalog("backend down".to_string()), &harness.catalog)
        .await
        .unwrap();

    assert_eq!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Rejected(SlotError::CatalogUnavailable {
            reason: "backend down".to_string(),
        })
    );

    harness.catalog.submit(CatalogIntent::Select(1)).unwrap();
    assert_eq!(
        next_notice(&mut catalog_events).await,
        SessionEvent::Rejected(SlotError::UnknownItem { id: 1 })
    );

    harness.finish().await;
}
