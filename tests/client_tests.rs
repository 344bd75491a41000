//! End-to-end tests for the session client: scripted server flows, the
//! fallback draw timer under paused time, and bounded reconnection.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{mock_transport, MockConnector, MockServer};
use loteria_stb_client::protocol::{Card, ClientCommand, Player, ServerEvent, Winner};
use loteria_stb_client::{
    LoteriaClient, LoteriaConfig, LoteriaEvent, Phase, ReconnectPolicy,
};

fn player(id: &str, name: &str) -> Player {
    Player {
        id: id.into(),
        name: name.into(),
        is_ready: false,
    }
}

fn card(id: u32, name_es: &str) -> Card {
    Card {
        id,
        name_es: name_es.into(),
        name_en: String::new(),
        verse_es: String::new(),
        verse_en: String::new(),
        image: format!("cards/{id}.png"),
        vo_es: String::new(),
        vo_en: String::new(),
    }
}

fn started(draw_speed: u32) -> ServerEvent {
    ServerEvent::GameStarted {
        win_patterns: vec!["line".into()],
        draw_speed,
        total_cards: 54,
        player_count: 1,
    }
}

async fn next_event(events: &mut mpsc::Receiver<LoteriaEvent>) -> LoteriaEvent {
    events.recv().await.expect("event channel closed early")
}

/// Start a client over a single mock connection and swallow the leading
/// `Connected` event.
async fn start_connected() -> (
    LoteriaClient,
    mpsc::Receiver<LoteriaEvent>,
    MockServer,
) {
    let (transport, server) = mock_transport();
    let (connector, _) = MockConnector::new(vec![Some(transport)]);
    let (client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));
    (client, events, server)
}

/// Push one player into the lobby and swallow the two roster events.
async fn seat_player(
    server: &MockServer,
    events: &mut mpsc::Receiver<LoteriaEvent>,
    id: &str,
    name: &str,
) {
    server.push(&ServerEvent::PlayerJoined {
        player: player(id, name),
        player_count: 1,
    });
    assert!(matches!(next_event(events).await, LoteriaEvent::PlayerJoined { .. }));
    assert!(matches!(next_event(events).await, LoteriaEvent::RosterUpdated { .. }));
}

// ── Full session flow ───────────────────────────────────────────────

#[tokio::test]
async fn full_session_flow_with_manual_draws() {
    common::init_tracing();
    let (mut client, mut events, server) = start_connected().await;

    client.create_room().unwrap();
    server.push(&ServerEvent::RoomCreated {
        room_code: "AB12".into(),
    });
    let ev = next_event(&mut events).await;
    assert!(matches!(ev, LoteriaEvent::RoomCreated { ref room_code } if room_code == "AB12"));

    seat_player(&server, &mut events, "p1", "Ana").await;
    assert_eq!(client.players().await.len(), 1);

    client.start_game(vec!["line".into()], 0).unwrap();
    server.push(&started(0));
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::GameStarted { draw_speed: 0, .. }));
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::PhaseChanged { phase: Phase::Playing }
    ));

    client.draw_next_card().unwrap();
    server.push(&ServerEvent::CardDrawn {
        card: card(45, "El Sol"),
        card_number: 1,
        total_cards: 54,
        drawn_card_ids: BTreeSet::from([45]),
    });
    let ev = next_event(&mut events).await;
    assert!(matches!(
        ev,
        LoteriaEvent::CardDrawn { ref card, card_number: 1, total_cards: 54 } if card.id == 45
    ));

    server.push(&ServerEvent::GameOver {
        reason: "win".into(),
        winner: Some(Winner {
            id: "p1".into(),
            name: "Ana".into(),
            pattern: vec![0, 1, 2, 3, 4],
        }),
    });
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::WinnerDeclared { ref winner } if winner.name == "Ana"
    ));
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::GameOver { ref reason } if reason == "win"
    ));
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::PhaseChanged { phase: Phase::Finished }
    ));
    let session = client.session().await;
    assert!(session.current_card.is_none());
    assert_eq!(session.winner.as_ref().unwrap().id, "p1");

    client.reset_game().unwrap();
    server.push(&ServerEvent::GameReset);
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::GameReset));
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::PhaseChanged { phase: Phase::Waiting }
    ));
    // Room and roster survive a reset.
    assert_eq!(client.room_code().await.as_deref(), Some("AB12"));
    assert_eq!(client.players().await.len(), 1);

    assert_eq!(
        server.sent_commands(),
        vec![
            ClientCommand::CreateRoom,
            ClientCommand::StartGame {
                win_patterns: vec!["line".into()],
                draw_speed: 0,
            },
            ClientCommand::DrawCard,
            ClientCommand::ResetGame,
        ]
    );

    client.shutdown().await;
}

#[tokio::test]
async fn pause_and_resume_round_trip() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    server.push(&started(0));
    let _ = next_event(&mut events).await; // GameStarted
    let _ = next_event(&mut events).await; // PhaseChanged(Playing)

    client.pause_game().unwrap();
    server.push(&ServerEvent::GamePaused);
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::PhaseChanged { phase: Phase::Paused }
    ));

    client.resume_game().unwrap();
    server.push(&ServerEvent::GameResumed);
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::PhaseChanged { phase: Phase::Playing }
    ));

    client.shutdown().await;
}

// ── Fallback draw timer ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn auto_draw_timer_requests_a_card_each_period() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    server.push(&started(8));
    let _ = next_event(&mut events).await; // GameStarted
    let _ = next_event(&mut events).await; // PhaseChanged(Playing)
    assert_eq!(server.sent_count(), 0);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(server.sent_commands(), vec![ClientCommand::DrawCard]);

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(
        server.sent_commands(),
        vec![ClientCommand::DrawCard, ClientCommand::DrawCard]
    );

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_draw_speed_never_fires_the_timer() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    server.push(&started(0));
    let _ = next_event(&mut events).await;
    let _ = next_event(&mut events).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.sent_count(), 0);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_the_timer_and_resume_restarts_it() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    server.push(&started(5));
    server.push(&ServerEvent::GamePaused);
    let _ = next_event(&mut events).await; // GameStarted
    let _ = next_event(&mut events).await; // PhaseChanged(Playing)
    let _ = next_event(&mut events).await; // PhaseChanged(Paused)

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.sent_count(), 0, "paused round must not draw");

    server.push(&ServerEvent::GameResumed);
    let _ = next_event(&mut events).await; // PhaseChanged(Playing)

    // The countdown restarts from resume, not from where pause cut it off.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(server.sent_commands(), vec![ClientCommand::DrawCard]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_draw_stops_the_timer_locally() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    client.set_auto_draw(false).unwrap();
    server.push(&started(5));
    let _ = next_event(&mut events).await;
    let _ = next_event(&mut events).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.sent_count(), 0);

    // Re-enabling mid-round arms the timer again.
    client.set_auto_draw(true).unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(server.sent_commands(), vec![ClientCommand::DrawCard]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn game_over_stops_the_timer() {
    let (mut client, mut events, server) = start_connected().await;
    seat_player(&server, &mut events, "p1", "Ana").await;

    server.push(&started(5));
    server.push(&ServerEvent::GameOver {
        reason: "host-ended".into(),
        winner: None,
    });
    let _ = next_event(&mut events).await; // GameStarted
    let _ = next_event(&mut events).await; // PhaseChanged(Playing)
    let _ = next_event(&mut events).await; // GameOver
    let _ = next_event(&mut events).await; // PhaseChanged(Finished)

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.sent_count(), 0);

    client.shutdown().await;
}

// ── Reconnection ────────────────────────────────────────────────────

#[tokio::test]
async fn mock_transport_recv_is_cancel_safe() {
    use loteria_stb_client::Transport;

    let (mut transport, server) = mock_transport();

    // Poll once with nothing pending, then cancel.
    let mut pending = tokio_test::task::spawn(transport.recv());
    tokio_test::assert_pending!(pending.poll());
    drop(pending);

    // The cancelled poll must not have eaten the next frame.
    server.push_raw("frame");
    assert_eq!(transport.recv().await.unwrap().unwrap(), "frame");
}

#[tokio::test(start_paused = true)]
async fn clean_server_close_reconnects_and_resumes() {
    common::init_tracing();
    let (transport1, mut server1) = mock_transport();
    let (transport2, server2) = mock_transport();
    let (connector, attempts) = MockConnector::new(vec![Some(transport1), Some(transport2)]);
    let (mut client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    server1.close();

    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::Reconnecting { attempt: 1 }
    ));
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Reconnected));
    assert!(client.is_connected());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // Traffic flows over the fresh connection.
    client.create_room().unwrap();
    server2.push(&ServerEvent::RoomCreated {
        room_code: "ZZ99".into(),
    });
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::RoomCreated { .. }));
    assert_eq!(server2.sent_commands(), vec![ClientCommand::CreateRoom]);
    assert_eq!(server1.sent_count(), 0);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn receive_error_triggers_reconnect() {
    let (transport1, server1) = mock_transport();
    let (transport2, _server2) = mock_transport();
    let (connector, _) = MockConnector::new(vec![Some(transport1), Some(transport2)]);
    let (mut client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    server1.push_error("connection reset by peer");

    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::Reconnecting { attempt: 1 }
    ));
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Reconnected));

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_bounded_attempts() {
    let (transport1, mut server1) = mock_transport();
    let (connector, attempts) = MockConnector::new(vec![Some(transport1)]);
    let config = LoteriaConfig::new().with_reconnect_policy(ReconnectPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(5),
    });
    let (client, mut events) = LoteriaClient::start(connector, config);
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    server1.close();

    let mut seen = Vec::new();
    loop {
        match next_event(&mut events).await {
            LoteriaEvent::Reconnecting { attempt } => seen.push(attempt),
            LoteriaEvent::Disconnected { reason } => {
                assert!(reason.is_none() || reason.unwrap().contains("exhausted"));
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(seen, vec![1, 2, 3]);
    // Initial connect plus three failed redials.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(!client.is_connected());

    // The loop is gone; commands now fail fast.
    assert!(client.create_room().is_err());
}

#[tokio::test(start_paused = true)]
async fn commands_are_dropped_not_queued_while_disconnected() {
    let (transport1, mut server1) = mock_transport();
    let (transport2, server2) = mock_transport();
    let (connector, _) = MockConnector::new(vec![Some(transport1), Some(transport2)]);
    let (mut client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    server1.close();
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::Reconnecting { attempt: 1 }
    ));

    // Issued during the backoff window: must never reach either connection.
    client.draw_next_card().unwrap();

    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Reconnected));

    client.pause_game().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(server1.sent_count(), 0);
    assert_eq!(server2.sent_commands(), vec![ClientCommand::PauseGame]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_snapshot_after_reconnect_rebuilds_the_mirror() {
    let (transport1, mut server1) = mock_transport();
    let (transport2, server2) = mock_transport();
    let (connector, _) = MockConnector::new(vec![Some(transport1), Some(transport2)]);
    let (mut client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    server1.push(&ServerEvent::RoomCreated {
        room_code: "AB12".into(),
    });
    let _ = next_event(&mut events).await;
    server1.close();

    let _ = next_event(&mut events).await; // Reconnecting
    let _ = next_event(&mut events).await; // Reconnected

    // The mirror froze in its last known state across the gap.
    assert_eq!(client.room_code().await.as_deref(), Some("AB12"));

    // Server re-pushes the lobby; the roster snaps to it.
    server2.push(&ServerEvent::UpdateLobby {
        players: vec![player("p1", "Ana"), player("p2", "Beto")],
        host_id: None,
    });
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::RosterUpdated { ref players } if players.len() == 2
    ));
    assert_eq!(client.players().await.len(), 2);

    client.shutdown().await;
}

// ── Event channel backpressure ──────────────────────────────────────

#[tokio::test]
async fn overflow_drops_events_but_disconnected_still_arrives() {
    let (transport, server) = mock_transport();
    let (connector, _) = MockConnector::new(vec![Some(transport)]);
    let config = LoteriaConfig::new().with_event_channel_capacity(2);
    let (mut client, mut events) = LoteriaClient::start(connector, config);
    assert!(matches!(next_event(&mut events).await, LoteriaEvent::Connected));

    // Five notifications into a 2-slot channel nobody is reading.
    for i in 0..5 {
        server.push(&ServerEvent::GameError {
            message: format!("error {i}"),
        });
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut buffered = 0;
    while events.try_recv().is_ok() {
        buffered += 1;
    }
    assert_eq!(buffered, 2, "channel holds at most its capacity");

    // Disconnected is delivered with a blocking send and is never dropped.
    client.shutdown().await;
    assert!(matches!(
        next_event(&mut events).await,
        LoteriaEvent::Disconnected { .. }
    ));
}
