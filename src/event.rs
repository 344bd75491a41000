//! Typed domain notifications delivered to the view layer.
//!
//! All client output flows through a single enumerable channel of
//! [`LoteriaEvent`]s: every session mutation is immediately followed by one
//! or more of these, so consumers never poll.

use crate::protocol::{Card, Player, Winner};
use crate::session::Phase;

/// Notifications emitted by the client on the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LoteriaEvent {
    /// The transport connected for the first time.
    Connected,
    /// An automatic reconnect attempt is starting (1-based index).
    Reconnecting { attempt: u32 },
    /// A reconnect attempt succeeded. The server is expected to re-push a
    /// full lobby/game snapshot; missed events are not replayed locally.
    Reconnected,
    /// The transport is down and no further automatic attempts will be made.
    /// Always the last event on the channel.
    Disconnected { reason: Option<String> },

    /// A room was created; the session is in `Waiting`.
    RoomCreated { room_code: String },
    /// A player joined the roster.
    PlayerJoined { player: Player },
    /// A player left the roster.
    PlayerLeft {
        player_id: String,
        player_name: String,
    },
    /// The roster changed (join, leave, or lobby snapshot). Carries the full
    /// roster so the view layer can re-render without reading the session.
    RosterUpdated { players: Vec<Player> },
    /// The session phase changed. Accompanies every transition.
    PhaseChanged { phase: Phase },
    /// The round started.
    GameStarted {
        win_patterns: Vec<String>,
        draw_speed: u32,
        total_cards: u32,
    },
    /// A card was drawn (`card_number` is 1-based).
    CardDrawn {
        card: Card,
        card_number: u32,
        total_cards: u32,
    },
    /// The server verified a winner.
    WinnerDeclared { winner: Winner },
    /// The round ended, with the server's reason string.
    GameOver { reason: String },
    /// The session was reset back to the lobby.
    GameReset,
    /// A surfaced error: either a server `game-error` or a local command
    /// precondition failure. Never accompanied by a state change.
    Error { message: String },
}
