//! WebSocket transport backed by `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the Lotería JSON frame protocol over a
//! WebSocket connection; [`WebSocketConnector`] is the matching
//! [`Connector`](crate::transport::Connector) that redials the same URL so
//! the session loop can reconnect after a drop.
//!
//! Both `ws://` and `wss://` URLs work; TLS is handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream). Only available with
//! the `transport-websocket` feature (enabled by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::error::LoteriaError;
use crate::transport::{Connector, Transport};

/// The underlying WebSocket stream type.
///
/// Public so callers with custom TLS or proxy setup can build the stream
/// themselves and hand it to [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] carrying Lotería frames as WebSocket text messages.
///
/// Binary, ping, and pong frames are skipped (tungstenite answers pings
/// itself); a close frame ends the stream cleanly.
///
/// # Cancel safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before
/// completion loses no frames, so it is safe inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Dial the given `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::Io`] when the URL is invalid or the server is
    /// unreachable. The [`ErrorKind`](std::io::ErrorKind) of an underlying
    /// I/O failure is preserved.
    pub async fn connect(url: &str) -> Result<Self, LoteriaError> {
        debug!(url = %url, "dialing WebSocket server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            LoteriaError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Like [`connect`](Self::connect) but bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::Timeout`] when the deadline elapses, or any
    /// [`connect`](Self::connect) error.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, LoteriaError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| LoteriaError::Timeout)?
    }

    /// Wrap an already-established stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<(), LoteriaError> {
        if self.closed {
            return Err(LoteriaError::TransportClosed);
        }
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| LoteriaError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LoteriaError>> {
        loop {
            match self.stream.next().await? {
                // `Utf8Bytes` does not give up its buffer by value, so copy.
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // tungstenite queues the pong reply itself.
                }
                Ok(Message::Binary(_)) => {
                    warn!("skipping unexpected binary WebSocket frame");
                }
                Ok(Message::Frame(_)) => {
                    // Never produced by the read half; arm kept for
                    // exhaustiveness.
                    debug!("skipping raw WebSocket frame");
                }
                Err(e) => return Some(Err(LoteriaError::TransportReceive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), LoteriaError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| LoteriaError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] that redials a fixed URL for every (re)connection.
///
/// # Example
///
/// ```rust,ignore
/// use loteria_stb_client::{LoteriaClient, LoteriaConfig, WebSocketConnector};
///
/// let connector = WebSocketConnector::new("ws://localhost:3001/stb");
/// let (client, events) = LoteriaClient::start(connector, LoteriaConfig::new());
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// Connector for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: None,
        }
    }

    /// Bound every dial attempt by `timeout`.
    ///
    /// Without this, a dial blocks until the OS gives up, which on a
    /// black-holed host can stall the reconnect loop for a long time.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The URL this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn connect(&mut self) -> Result<WebSocketTransport, LoteriaError> {
        match self.connect_timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(&self.url, timeout).await,
            None => WebSocketTransport::connect(&self.url).await,
        }
    }
}

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
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
        assert_send::<WebSocketConnector>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url").await;
        assert!(matches!(result.unwrap_err(), LoteriaError::Io(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketTransport::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result.unwrap_err(), LoteriaError::Io(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_receives_text_frames_in_order() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"event":"game-paused"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"event":"game-resumed"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"game-paused"}"#
        );
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"game-resumed"}"#
        );
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        // Second close stays Ok.
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, LoteriaError::TransportClosed));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"event":"draw-card"}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            transport.recv().await.unwrap().unwrap(),
            r#"{"event":"draw-card"}"#
        );
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable TEST-NET-1 address to guarantee a timeout.
        let result = WebSocketTransport::connect_with_timeout(
            "ws://192.0.2.1:1",
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result.unwrap_err(), LoteriaError::Timeout));
    }

    #[tokio::test]
    async fn connector_dials_its_url() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("hi".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut connector = WebSocketConnector::new(url.clone());
        assert_eq!(connector.url(), url);

        let mut transport = connector.connect().await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "hi");
    }

    #[tokio::test]
    async fn connector_applies_connect_timeout() {
        let mut connector =
            WebSocketConnector::new("ws://192.0.2.1:1").with_connect_timeout(Duration::from_millis(50));
        let result = connector.connect().await;
        assert!(matches!(result.unwrap_err(), LoteriaError::Timeout));
    }
}
