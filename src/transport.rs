//! Transport abstraction for the set-top-box connection.
//!
//! The [`Transport`] trait defines a bidirectional text frame channel between
//! the set-top-box and the game server. The protocol uses JSON text frames,
//! so every transport implementation must handle message framing internally
//! (WebSocket frames, length-prefixed TCP, and so on).
//!
//! # Reconnection
//!
//! A `Transport` represents one live connection and cannot be revived once it
//! drops. Automatic reconnection therefore needs a factory: the [`Connector`]
//! trait produces a fresh connected `Transport` per attempt, and the session
//! loop in [`client`](crate::client) owns the retry/backoff policy. Backends
//! are selected at startup by constructing the right connector — there is no
//! compile-time branching in the core.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use loteria_stb_client::error::LoteriaError;
//! use loteria_stb_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), LoteriaError> {
//!         // Send one JSON text frame over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LoteriaError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection closes cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), LoteriaError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::LoteriaError;

/// A bidirectional text frame transport to the game server.
///
/// Implementors shuttle serialized JSON strings between the set-top-box and
/// the server. Each call to [`send`](Transport::send) transmits one complete
/// frame; each call to [`recv`](Transport::recv) returns one complete frame,
/// in the order the server sent them (FIFO per connection — the session state
/// machine depends on this).
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling
/// it again must not lose frames. Channel-based implementations are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::TransportSend`] if the frame could not be sent
    /// (connection broken, write buffer full).
    async fn send(&mut self, frame: String) -> Result<(), LoteriaError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, LoteriaError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), LoteriaError>;
}

/// Factory for establishing (and re-establishing) transport connections.
///
/// The session loop calls [`connect`](Connector::connect) once at startup and
/// again for every reconnect attempt after an unexpected disconnect. Each
/// successful call must yield an independent, live [`Transport`].
#[async_trait]
pub trait Connector: Send + 'static {
    /// The transport type this connector produces.
    type Transport: Transport;

    /// Establish a new connection to the server.
    ///
    /// # Errors
    ///
    /// Returns the underlying connection error; the session loop treats any
    /// error as a failed attempt and applies its backoff policy.
    async fn connect(&mut self) -> Result<Self::Transport, LoteriaError>;
}
