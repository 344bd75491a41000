//! Concrete transports, behind feature gates.
//!
//! | Feature               | Types                                        |
//! |-----------------------|----------------------------------------------|
//! | `transport-websocket` | [`WebSocketTransport`], [`WebSocketConnector`] |
//!
//! The session client itself is transport-agnostic: anything implementing
//! [`Connector`](crate::transport::Connector) can drive it, which is also how
//! the tests plug in channel-backed mocks.

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
