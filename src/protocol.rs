//! Wire types for the Party Lotería set-top-box protocol.
//!
//! Every frame on the connection is a JSON object of the shape
//! `{"event": "<name>", "data": { ... }}`. Event names are kebab-case and
//! payload fields are camelCase, matching the game server exactly. The one
//! exception is [`Card`], whose localization fields keep their snake_cased
//! wire names (`name_es`, `verse_en`, ...).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ── Data model ──────────────────────────────────────────────────────

/// Two-letter language code used by the card deck (`"es"` or `"en"`).
pub const DEFAULT_LANGUAGE: &str = "es";

/// One card of the Lotería deck, as pushed by the server with `card-drawn`.
///
/// Immutable once received; the [`Session`](crate::session::Session) holds it
/// for as long as it is the current card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Deck-wide card id (stable across games).
    pub id: u32,
    /// Spanish card name (e.g. "El Gallo").
    pub name_es: String,
    /// English card name.
    pub name_en: String,
    /// Spanish announcer verse.
    #[serde(default)]
    pub verse_es: String,
    /// English announcer verse.
    #[serde(default)]
    pub verse_en: String,
    /// Relative path of the card artwork, resolved by the view layer.
    #[serde(default)]
    pub image: String,
    /// Spanish voice-over clip reference.
    #[serde(default)]
    pub vo_es: String,
    /// English voice-over clip reference.
    #[serde(default)]
    pub vo_en: String,
}

impl Card {
    /// Card name for the given language code; falls back to Spanish.
    pub fn name(&self, language: &str) -> &str {
        if language == "en" {
            &self.name_en
        } else {
            &self.name_es
        }
    }

    /// Announcer verse for the given language code; falls back to Spanish.
    pub fn verse(&self, language: &str) -> &str {
        if language == "en" {
            &self.verse_en
        } else {
            &self.verse_es
        }
    }
}

/// A mobile player in the room, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Server-assigned id, unique within the session.
    pub id: String,
    /// Display name chosen on the mobile client.
    pub name: String,
    /// Lobby readiness flag.
    #[serde(default)]
    pub is_ready: bool,
}

/// The verified winner attached to a `game-over` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    /// Id of the winning player.
    pub id: String,
    /// Display name of the winning player.
    pub name: String,
    /// Board cell indices of the winning pattern, for the view layer.
    #[serde(default)]
    pub pattern: Vec<u32>,
}

// ── Inbound events (server → set-top-box) ───────────────────────────

/// Events pushed by the game server.
///
/// Deserialized from `{"event": "...", "data": {...}}` frames; events without
/// a payload (`game-paused`, `game-resumed`, `game-reset`) omit `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A room was created for this display; enter `Waiting` with a fresh session.
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_code: String },
    /// A mobile player joined the lobby.
    #[serde(rename_all = "camelCase")]
    PlayerJoined { player: Player, player_count: u32 },
    /// A player left (or was dropped by) the room.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        player_id: String,
        player_name: String,
        player_count: u32,
    },
    /// Full roster snapshot. Authoritative: replaces the local roster wholesale.
    #[serde(rename_all = "camelCase")]
    UpdateLobby {
        players: Vec<Player>,
        #[serde(default)]
        host_id: Option<String>,
    },
    /// The game started; enter `Playing`.
    #[serde(rename_all = "camelCase")]
    GameStarted {
        win_patterns: Vec<String>,
        /// Seconds between automatic draws; `0` means manual draw.
        draw_speed: u32,
        total_cards: u32,
        player_count: u32,
    },
    /// The server drew the next card.
    #[serde(rename_all = "camelCase")]
    CardDrawn {
        card: Card,
        /// 1-based position of this card in the draw order.
        card_number: u32,
        total_cards: u32,
        /// Ids of every card drawn so far, for late-join reconciliation.
        #[serde(default)]
        drawn_card_ids: BTreeSet<u32>,
    },
    /// The round was paused.
    GamePaused,
    /// The round was resumed.
    GameResumed,
    /// The round ended; enter `Finished`.
    GameOver {
        reason: String,
        #[serde(default)]
        winner: Option<Winner>,
    },
    /// The session was reset back to the lobby; enter `Waiting`.
    GameReset,
    /// A server-reported game error. Notification only, never mutates state.
    GameError { message: String },
}

// ── Outbound commands (set-top-box → server) ────────────────────────

/// Commands emitted by the set-top-box. All fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Request a new room for this display.
    CreateRoom,
    /// Start the round with the given win patterns and draw speed.
    #[serde(rename_all = "camelCase")]
    StartGame {
        win_patterns: Vec<String>,
        /// Seconds between automatic draws; `0` requests manual draw.
        draw_speed: u32,
    },
    /// Request the next card draw.
    DrawCard,
    /// Pause the round.
    PauseGame,
    /// Resume a paused round.
    ResumeGame,
    /// Reset the session back to the lobby.
    ResetGame,
    /// Tell the server this display is going away; the room closes.
    DisconnectSetTopBox,
    /// Debug override: force a win for the given player.
    #[serde(rename_all = "camelCase")]
    DebugForceWin { player_id: String },
    /// Debug override: press the Lotería button on behalf of the given player.
    #[serde(rename_all = "camelCase")]
    DebugTriggerLoteria { player_id: String },
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

    fn sample_card() -> Card {
        Card {
            id: 7,
            name_es: "El Gallo".into(),
            name_en: "The Rooster".into(),
            verse_es: "El que le cantó a San Pedro".into(),
            verse_en: "The one that crowed for Saint Peter".into(),
            image: "cards/07.png".into(),
            vo_es: "vo/es/07.ogg".into(),
            vo_en: "vo/en/07.ogg".into(),
        }
    }

    #[test]
    fn server_event_names_are_kebab_case() {
        let json = serde_json::to_value(&ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "room-created");
        assert_eq!(json["data"]["roomCode"], "AB12");

        let json = serde_json::to_value(&ServerEvent::GameReset).unwrap();
        assert_eq!(json["event"], "game-reset");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn client_command_names_match_server_contract() {
        let cases = [
            (ClientCommand::CreateRoom, "create-room"),
            (ClientCommand::DrawCard, "draw-card"),
            (ClientCommand::PauseGame, "pause-game"),
            (ClientCommand::ResumeGame, "resume-game"),
            (ClientCommand::ResetGame, "reset-game"),
            (
                ClientCommand::DisconnectSetTopBox,
                "disconnect-set-top-box",
            ),
        ];
        for (cmd, name) in cases {
            let json = serde_json::to_value(&cmd).unwrap();
            assert_eq!(json["event"], name, "wrong wire name for {cmd:?}");
        }
    }

    #[test]
    fn start_game_payload_is_camel_case() {
        let json = serde_json::to_value(&ClientCommand::StartGame {
            win_patterns: vec!["line".into(), "corners".into()],
            draw_speed: 8,
        })
        .unwrap();
        assert_eq!(json["event"], "start-game");
        assert_eq!(json["data"]["winPatterns"][0], "line");
        assert_eq!(json["data"]["drawSpeed"], 8);
    }

    #[test]
    fn debug_commands_carry_player_id() {
        let json = serde_json::to_value(&ClientCommand::DebugForceWin {
            player_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "debug-force-win");
        assert_eq!(json["data"]["playerId"], "p1");

        let json = serde_json::to_value(&ClientCommand::DebugTriggerLoteria {
            player_id: "p2".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "debug-trigger-loteria");
        assert_eq!(json["data"]["playerId"], "p2");
    }

    #[test]
    fn card_drawn_round_trips() {
        let event = ServerEvent::CardDrawn {
            card: sample_card(),
            card_number: 3,
            total_cards: 54,
            drawn_card_ids: BTreeSet::from([2, 5, 7]),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn card_drawn_tolerates_missing_drawn_card_ids() {
        let json = r#"{
            "event": "card-drawn",
            "data": {
                "card": {"id": 1, "name_es": "El Sol", "name_en": "The Sun"},
                "cardNumber": 1,
                "totalCards": 54
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        if let ServerEvent::CardDrawn {
            card,
            drawn_card_ids,
            ..
        } = event
        {
            assert_eq!(card.id, 1);
            assert!(drawn_card_ids.is_empty());
            assert!(card.verse_es.is_empty());
        } else {
            panic!("expected CardDrawn, got {event:?}");
        }
    }

    #[test]
    fn update_lobby_tolerates_missing_host_id() {
        let json = r#"{
            "event": "update-lobby",
            "data": {"players": [{"id": "p1", "name": "Ana", "isReady": true}]}
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        if let ServerEvent::UpdateLobby { players, host_id } = event {
            assert_eq!(players.len(), 1);
            assert_eq!(players[0].name, "Ana");
            assert!(players[0].is_ready);
            assert!(host_id.is_none());
        } else {
            panic!("expected UpdateLobby, got {event:?}");
        }
    }

    #[test]
    fn game_over_without_winner() {
        let json = r#"{"event": "game-over", "data": {"reason": "deck-exhausted"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ServerEvent::GameOver {
                reason: "deck-exhausted".into(),
                winner: None,
            }
        );
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        let json = r#"{"event": "confetti-cannon", "data": {}}"#;
        assert!(serde_json::from_str::<ServerEvent>(json).is_err());
    }

    #[test]
    fn card_localization_accessors() {
        let card = sample_card();
        assert_eq!(card.name("es"), "El Gallo");
        assert_eq!(card.name("en"), "The Rooster");
        // Unknown languages fall back to Spanish.
        assert_eq!(card.name("fr"), "El Gallo");
        assert_eq!(card.verse("en"), "The one that crowed for Saint Peter");
    }
}
