//! The session state machine: a local mirror of authoritative server state.
//!
//! [`Session`] is mutated exclusively by [`Session::apply`] in reaction to
//! inbound [`ServerEvent`]s — commands sent to the server never mutate it
//! optimistically. Every mutation returns the [`LoteriaEvent`] notifications
//! the view layer needs, so consumers never have to poll.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::event::LoteriaEvent;
use crate::protocol::{Card, Player, ServerEvent, Winner};

/// The state-machine phase of the current session.
///
/// `Waiting → Playing ⇄ Paused → Finished`, with `game-reset` returning any
/// phase to `Waiting`. There is no terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Lobby: room exists, players are joining.
    #[default]
    Waiting,
    /// Cards are being drawn.
    Playing,
    /// Round suspended; the draw timer is frozen.
    Paused,
    /// Round over; a winner may be attached.
    Finished,
}

/// Local mirror of the server's game state for one room.
///
/// Exactly one `Session` exists per client; it is created on connect, reset
/// by `game-reset`, and frozen in its last known state on disconnect.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Short room code shown on the shared screen; `None` only before
    /// `room-created` arrives.
    pub room_code: Option<String>,
    /// Current phase.
    pub phase: Phase,
    /// Roster in join order. Replaced wholesale by `update-lobby` snapshots.
    pub players: Vec<Player>,
    /// The card currently on screen. Non-`None` only while `phase` is
    /// `Playing` or `Paused` and at least one card has been drawn.
    pub current_card: Option<Card>,
    /// Number of cards drawn this round. Never exceeds `total_cards`.
    pub cards_drawn: u32,
    /// Deck size for this round.
    pub total_cards: u32,
    /// Ids of every card drawn so far this round.
    pub drawn_card_ids: BTreeSet<u32>,
    /// Verified winner, attached on `game-over`.
    pub winner: Option<Winner>,
    /// Win pattern names in play (e.g. `"line"`, `"corners"`).
    pub win_patterns: Vec<String>,
    /// Seconds between automatic draws; `0` means manual draw.
    pub draw_speed: u32,
    /// Local toggle for the fallback auto-draw timer. Independent of
    /// `draw_speed`: turning this off never changes server behavior.
    pub auto_draw: bool,
}

impl Session {
    /// A fresh session in `Waiting` with auto-draw enabled.
    pub fn new() -> Self {
        Self {
            auto_draw: true,
            ..Self::default()
        }
    }

    /// `true` while the fallback draw timer should be running.
    pub fn timer_armed(&self) -> bool {
        self.phase == Phase::Playing && self.draw_speed > 0 && self.auto_draw
    }

    /// Look up a player by server-assigned id.
    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    /// Apply one inbound server event, returning the notifications to emit.
    ///
    /// This is the only mutation path for the session. The returned
    /// notifications are ordered: a [`LoteriaEvent::PhaseChanged`] always
    /// follows the specific notification for the transition that caused it.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<LoteriaEvent> {
        let mut out = Vec::new();
        let prior_phase = self.phase;

        match event {
            ServerEvent::RoomCreated { room_code } => {
                debug!(room_code = %room_code, "room created");
                let auto_draw = self.auto_draw;
                *self = Self {
                    room_code: Some(room_code.clone()),
                    auto_draw,
                    ..Self::default()
                };
                out.push(LoteriaEvent::RoomCreated { room_code });
            }
            ServerEvent::PlayerJoined { player, .. } => {
                debug!(id = %player.id, name = %player.name, "player joined");
                // A rejoin under the same id replaces the stale entry instead
                // of duplicating it.
                match self.players.iter_mut().find(|p| p.id == player.id) {
                    Some(existing) => *existing = player.clone(),
                    None => self.players.push(player.clone()),
                }
                out.push(LoteriaEvent::PlayerJoined { player });
                out.push(LoteriaEvent::RosterUpdated {
                    players: self.players.clone(),
                });
            }
            ServerEvent::PlayerLeft {
                player_id,
                player_name,
                ..
            } => {
                debug!(id = %player_id, name = %player_name, "player left");
                self.players.retain(|p| p.id != player_id);
                out.push(LoteriaEvent::PlayerLeft {
                    player_id,
                    player_name,
                });
                out.push(LoteriaEvent::RosterUpdated {
                    players: self.players.clone(),
                });
            }
            ServerEvent::UpdateLobby { players, .. } => {
                debug!(count = players.len(), "lobby snapshot");
                self.players = players;
                out.push(LoteriaEvent::RosterUpdated {
                    players: self.players.clone(),
                });
            }
            ServerEvent::GameStarted {
                win_patterns,
                draw_speed,
                total_cards,
                ..
            } => {
                debug!(draw_speed, total_cards, "game started");
                self.phase = Phase::Playing;
                self.total_cards = total_cards;
                self.cards_drawn = 0;
                self.current_card = None;
                self.drawn_card_ids.clear();
                self.winner = None;
                if !win_patterns.is_empty() {
                    self.win_patterns = win_patterns;
                }
                self.draw_speed = draw_speed;
                out.push(LoteriaEvent::GameStarted {
                    win_patterns: self.win_patterns.clone(),
                    draw_speed,
                    total_cards,
                });
            }
            ServerEvent::CardDrawn {
                card,
                card_number,
                total_cards,
                drawn_card_ids,
            } => {
                if self.phase != Phase::Playing {
                    // The server is authoritative; mirror the draw anyway but
                    // flag the unexpected ordering.
                    warn!(phase = ?self.phase, "card-drawn outside Playing");
                    self.phase = Phase::Playing;
                }
                self.total_cards = total_cards;
                self.cards_drawn = card_number.min(total_cards);
                if drawn_card_ids.is_empty() {
                    self.drawn_card_ids.insert(card.id);
                } else {
                    self.drawn_card_ids = drawn_card_ids;
                }
                self.current_card = Some(card.clone());
                out.push(LoteriaEvent::CardDrawn {
                    card,
                    card_number: self.cards_drawn,
                    total_cards,
                });
            }
            ServerEvent::GamePaused => {
                debug!("game paused");
                self.phase = Phase::Paused;
            }
            ServerEvent::GameResumed => {
                debug!("game resumed");
                self.phase = Phase::Playing;
            }
            ServerEvent::GameOver { reason, winner } => {
                debug!(reason = %reason, has_winner = winner.is_some(), "game over");
                self.phase = Phase::Finished;
                self.current_card = None;
                self.winner = winner.clone();
                if let Some(winner) = winner {
                    out.push(LoteriaEvent::WinnerDeclared { winner });
                }
                out.push(LoteriaEvent::GameOver { reason });
            }
            ServerEvent::GameReset => {
                debug!("game reset");
                let room_code = self.room_code.take();
                let players = std::mem::take(&mut self.players);
                let auto_draw = self.auto_draw;
                *self = Self {
                    room_code,
                    players,
                    auto_draw,
                    ..Self::default()
                };
                out.push(LoteriaEvent::GameReset);
            }
            ServerEvent::GameError { message } => {
                warn!(message = %message, "server game error");
                // Notification only; state untouched.
                out.push(LoteriaEvent::Error { message });
            }
        }

        if self.phase != prior_phase {
            out.push(LoteriaEvent::PhaseChanged { phase: self.phase });
        }
        out
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str) -> Player {
        Player {
            id: id.into(),
            name: name.into(),
            is_ready: false,
        }
    }

    fn card(id: u32) -> Card {
        Card {
            id,
            name_es: format!("Carta {id}"),
            name_en: format!("Card {id}"),
            verse_es: String::new(),
            verse_en: String::new(),
            image: String::new(),
            vo_es: String::new(),
            vo_en: String::new(),
        }
    }

    fn started(draw_speed: u32, total_cards: u32) -> ServerEvent {
        ServerEvent::GameStarted {
            win_patterns: vec!["line".into()],
            draw_speed,
            total_cards,
            player_count: 1,
        }
    }

    fn drawn(card_id: u32, card_number: u32, total_cards: u32) -> ServerEvent {
        ServerEvent::CardDrawn {
            card: card(card_id),
            card_number,
            total_cards,
            drawn_card_ids: BTreeSet::new(),
        }
    }

    #[test]
    fn new_session_is_waiting_and_empty() {
        let session = Session::new();
        assert_eq!(session.phase, Phase::Waiting);
        assert!(session.room_code.is_none());
        assert!(session.players.is_empty());
        assert!(session.current_card.is_none());
        assert!(session.auto_draw);
    }

    #[test]
    fn room_created_resets_everything_but_auto_draw() {
        let mut session = Session::new();
        session.auto_draw = false;
        session.players.push(player("p9", "Ghost"));
        session.cards_drawn = 3;

        let events = session.apply(ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        });

        assert_eq!(session.room_code.as_deref(), Some("AB12"));
        assert_eq!(session.phase, Phase::Waiting);
        assert!(session.players.is_empty());
        assert_eq!(session.cards_drawn, 0);
        assert!(!session.auto_draw, "auto_draw is a local toggle, not state");
        assert!(matches!(
            events.as_slice(),
            [LoteriaEvent::RoomCreated { room_code }] if room_code == "AB12"
        ));
    }

    #[test]
    fn player_join_and_leave_mutate_roster_in_join_order() {
        let mut session = Session::new();
        session.apply(ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        session.apply(ServerEvent::PlayerJoined {
            player: player("p2", "Beto"),
            player_count: 2,
        });
        assert_eq!(session.players[0].name, "Ana");
        assert_eq!(session.players[1].name, "Beto");

        let events = session.apply(ServerEvent::PlayerLeft {
            player_id: "p1".into(),
            player_name: "Ana".into(),
            player_count: 1,
        });
        assert_eq!(session.players.len(), 1);
        assert_eq!(session.players[0].id, "p2");
        assert!(matches!(
            events.first(),
            Some(LoteriaEvent::PlayerLeft { player_name, .. }) if player_name == "Ana"
        ));
    }

    #[test]
    fn rejoin_with_same_id_does_not_duplicate() {
        let mut session = Session::new();
        session.apply(ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        let mut rejoined = player("p1", "Ana");
        rejoined.is_ready = true;
        session.apply(ServerEvent::PlayerJoined {
            player: rejoined,
            player_count: 1,
        });
        assert_eq!(session.players.len(), 1);
        assert!(session.players[0].is_ready);
    }

    #[test]
    fn update_lobby_snapshot_is_idempotent() {
        let mut session = Session::new();
        let snapshot = ServerEvent::UpdateLobby {
            players: vec![player("p1", "Ana"), player("p2", "Beto")],
            host_id: Some("p1".into()),
        };
        session.apply(snapshot.clone());
        session.apply(snapshot);
        assert_eq!(session.players.len(), 2);
        assert_eq!(session.players[0].id, "p1");
    }

    #[test]
    fn game_started_enters_playing_and_resets_counters() {
        let mut session = Session::new();
        session.apply(ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        let events = session.apply(started(8, 54));

        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.total_cards, 54);
        assert_eq!(session.cards_drawn, 0);
        assert_eq!(session.draw_speed, 8);
        assert_eq!(session.win_patterns, vec!["line".to_string()]);
        assert!(session.timer_armed());
        // GameStarted first, PhaseChanged last.
        assert!(matches!(events.first(), Some(LoteriaEvent::GameStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(LoteriaEvent::PhaseChanged { phase: Phase::Playing })
        ));
    }

    #[test]
    fn manual_draw_speed_never_arms_timer() {
        let mut session = Session::new();
        session.apply(started(0, 54));
        assert_eq!(session.phase, Phase::Playing);
        assert!(!session.timer_armed());
    }

    #[test]
    fn auto_draw_toggle_disarms_timer() {
        let mut session = Session::new();
        session.apply(started(8, 54));
        assert!(session.timer_armed());
        session.auto_draw = false;
        assert!(!session.timer_armed());
    }

    #[test]
    fn card_drawn_advances_mirror() {
        let mut session = Session::new();
        session.apply(started(0, 54));
        let events = session.apply(drawn(7, 1, 54));

        assert_eq!(session.cards_drawn, 1);
        assert_eq!(session.current_card.as_ref().unwrap().id, 7);
        assert!(session.drawn_card_ids.contains(&7));
        assert!(matches!(
            events.as_slice(),
            [LoteriaEvent::CardDrawn { card_number: 1, .. }]
        ));
    }

    #[test]
    fn card_drawn_server_id_list_is_authoritative() {
        let mut session = Session::new();
        session.apply(started(0, 54));
        session.apply(ServerEvent::CardDrawn {
            card: card(9),
            card_number: 3,
            total_cards: 54,
            drawn_card_ids: BTreeSet::from([2, 5, 9]),
        });
        assert_eq!(session.drawn_card_ids, BTreeSet::from([2, 5, 9]));
        assert_eq!(session.cards_drawn, 3);
    }

    #[test]
    fn cards_drawn_never_exceeds_total() {
        let mut session = Session::new();
        session.apply(started(0, 10));
        session.apply(drawn(1, 99, 10));
        assert_eq!(session.cards_drawn, 10);
    }

    #[test]
    fn pause_and_resume_toggle_phase_and_keep_card() {
        let mut session = Session::new();
        session.apply(started(8, 54));
        session.apply(drawn(7, 1, 54));

        let events = session.apply(ServerEvent::GamePaused);
        assert_eq!(session.phase, Phase::Paused);
        assert!(session.current_card.is_some());
        assert!(!session.timer_armed());
        assert!(matches!(
            events.as_slice(),
            [LoteriaEvent::PhaseChanged { phase: Phase::Paused }]
        ));

        session.apply(ServerEvent::GameResumed);
        assert_eq!(session.phase, Phase::Playing);
        assert!(session.timer_armed());
    }

    #[test]
    fn game_over_attaches_winner_and_clears_card() {
        let mut session = Session::new();
        session.apply(started(8, 54));
        session.apply(drawn(7, 1, 54));

        let events = session.apply(ServerEvent::GameOver {
            reason: "win".into(),
            winner: Some(Winner {
                id: "p1".into(),
                name: "Ana".into(),
                pattern: vec![0, 1, 2, 3, 4],
            }),
        });

        assert_eq!(session.phase, Phase::Finished);
        assert!(session.current_card.is_none());
        assert_eq!(session.winner.as_ref().unwrap().name, "Ana");
        assert!(matches!(events.first(), Some(LoteriaEvent::WinnerDeclared { .. })));
        assert!(matches!(
            events.last(),
            Some(LoteriaEvent::PhaseChanged { phase: Phase::Finished })
        ));
    }

    #[test]
    fn game_over_without_winner_emits_no_winner_event() {
        let mut session = Session::new();
        session.apply(started(0, 54));
        let events = session.apply(ServerEvent::GameOver {
            reason: "host-ended".into(),
            winner: None,
        });
        assert!(session.winner.is_none());
        assert!(!events
            .iter()
            .any(|e| matches!(e, LoteriaEvent::WinnerDeclared { .. })));
    }

    #[test]
    fn game_reset_returns_to_waiting_and_keeps_room_and_roster() {
        let mut session = Session::new();
        session.apply(ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        });
        session.apply(ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        session.apply(started(8, 54));
        session.apply(drawn(7, 1, 54));
        session.apply(ServerEvent::GameOver {
            reason: "win".into(),
            winner: Some(Winner {
                id: "p1".into(),
                name: "Ana".into(),
                pattern: vec![],
            }),
        });

        session.apply(ServerEvent::GameReset);

        assert_eq!(session.phase, Phase::Waiting);
        assert_eq!(session.room_code.as_deref(), Some("AB12"));
        assert_eq!(session.players.len(), 1);
        assert!(session.current_card.is_none());
        assert_eq!(session.cards_drawn, 0);
        assert!(session.winner.is_none());
        assert!(session.drawn_card_ids.is_empty());
    }

    #[test]
    fn game_error_is_notification_only() {
        let mut session = Session::new();
        session.apply(started(8, 54));
        let before = session.clone();

        let events = session.apply(ServerEvent::GameError {
            message: "deck empty".into(),
        });

        assert_eq!(session.phase, before.phase);
        assert_eq!(session.cards_drawn, before.cards_drawn);
        assert!(matches!(
            events.as_slice(),
            [LoteriaEvent::Error { message }] if message == "deck empty"
        ));
    }

    #[test]
    fn full_round_scenario() {
        let mut session = Session::new();

        session.apply(ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        });
        assert_eq!(session.phase, Phase::Waiting);
        assert_eq!(session.room_code.as_deref(), Some("AB12"));
        assert!(session.players.is_empty());

        session.apply(ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        assert_eq!(session.players.len(), 1);
        assert_eq!(session.players[0].name, "Ana");

        session.apply(started(0, 54));
        assert_eq!(session.phase, Phase::Playing);
        assert_eq!(session.draw_speed, 0);
        assert!(!session.timer_armed());

        session.apply(drawn(7, 1, 54));
        assert_eq!(session.current_card.as_ref().unwrap().id, 7);
        assert_eq!(session.cards_drawn, 1);

        session.apply(ServerEvent::GameOver {
            reason: "win".into(),
            winner: Some(Winner {
                id: "p1".into(),
                name: "Ana".into(),
                pattern: vec![0, 1, 2, 3, 4],
            }),
        });
        assert_eq!(session.phase, Phase::Finished);
        assert_eq!(session.winner.as_ref().unwrap().name, "Ana");

        session.apply(ServerEvent::GameReset);
        assert_eq!(session.phase, Phase::Waiting);
        assert!(session.current_card.is_none());
        assert_eq!(session.cards_drawn, 0);
        assert!(session.winner.is_none());
    }
}
