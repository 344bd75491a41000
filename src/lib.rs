//! Async session client for a Party Lotería set-top-box display.
//!
//! The set-top box is the shared screen of the game: it creates a room,
//! shows the join code, and renders the deck as the server draws cards for
//! the phones in the room. This crate implements the networking half of that
//! display — connection lifecycle, the session state mirror, and the debug
//! override bridge — leaving rendering to the embedding application.
//!
//! # Architecture
//!
//! [`LoteriaClient::start`] spawns a background session loop and hands back a
//! thin command handle plus a bounded receiver of [`LoteriaEvent`]s. The loop
//! owns the transport and the [`Session`] mirror: inbound server events are
//! parsed, applied, and re-emitted as notifications from that single task, so
//! handlers never observe a half-applied update. Commands are fire-and-forget;
//! the mirror only advances when the server's echo arrives.
//!
//! On an unexpected disconnect the loop redials through its
//! [`Connector`](transport::Connector) with bounded, growing backoff
//! (10 attempts, 1 s doubling to a 5 s cap, by default). Commands issued
//! while disconnected are dropped with a log line, never queued.
//!
//! While a round is running with a positive draw speed, the loop also runs a
//! local fallback timer that requests the next card each period, so the deck
//! keeps moving even if the server-side cadence stalls.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use loteria_stb_client::{LoteriaClient, LoteriaConfig, LoteriaEvent, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), loteria_stb_client::LoteriaError> {
//!     let connector = WebSocketConnector::new("ws://localhost:3001/stb");
//!     let (client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
//!
//!     client.create_room()?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             LoteriaEvent::RoomCreated { room_code } => {
//!                 println!("join at {room_code}");
//!                 client.start_game(vec!["line".into()], 8)?;
//!             }
//!             LoteriaEvent::CardDrawn { card, card_number, total_cards } => {
//!                 println!("{} ({card_number}/{total_cards})", card.name("es"));
//!             }
//!             LoteriaEvent::Disconnected { reason } => {
//!                 println!("session over: {reason:?}");
//!                 break;
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! | Feature               | Default | Description                           |
//! |-----------------------|---------|---------------------------------------|
//! | `transport-websocket` | yes     | WebSocket transport and connector     |
//!
//! With default features disabled the crate is transport-free; supply your
//! own [`Transport`](transport::Transport) and
//! [`Connector`](transport::Connector) implementations.

pub mod client;
pub mod error;
pub mod event;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

pub use client::{LoteriaClient, LoteriaConfig, ReconnectPolicy};
pub use error::{LoteriaError, Result};
pub use event::LoteriaEvent;
pub use protocol::{Card, ClientCommand, Player, ServerEvent, Winner};
pub use session::{Phase, Session};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::websocket::{WebSocketConnector, WebSocketTransport};
