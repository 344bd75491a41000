//! Shared test doubles: a channel-backed mock transport and a scripted
//! connector.
//!
//! The test holds a [`MockServer`] handle per transport and plays the server
//! side by pushing frames; dropping the handle (or calling
//! [`MockServer::close`]) models a clean server-side close.

#![allow(dead_code)]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use loteria_stb_client::protocol::{ClientCommand, ServerEvent};
use loteria_stb_client::transport::{Connector, Transport};
use loteria_stb_client::LoteriaError;

pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, LoteriaError>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Test-side handle for one [`MockTransport`].
pub struct MockServer {
    tx: Option<mpsc::UnboundedSender<Result<String, LoteriaError>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Deliver a server event to the client.
    pub fn push(&self, event: &ServerEvent) {
        let json = serde_json::to_string(event).unwrap();
        self.push_raw(&json);
    }

    /// Deliver a raw frame, valid or not.
    pub fn push_raw(&self, raw: &str) {
        self.tx
            .as_ref()
            .expect("server already closed")
            .send(Ok(raw.to_string()))
            .unwrap();
    }

    /// Surface a receive error on the client side.
    pub fn push_error(&self, message: &str) {
        self.tx
            .as_ref()
            .expect("server already closed")
            .send(Err(LoteriaError::TransportReceive(message.to_string())))
            .unwrap();
    }

    /// Close the connection cleanly.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Everything the client sent, parsed back into commands.
    pub fn sent_commands(&self) -> Vec<ClientCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|json| serde_json::from_str(json).unwrap())
            .collect()
    }

    /// Number of frames the client sent.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Whether the client closed this transport.
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Route client logs to the test writer; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build one connected mock transport and its server-side handle.
pub fn mock_transport() -> (MockTransport, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            incoming: rx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        },
        MockServer {
            tx: Some(tx),
            sent,
            closed,
        },
    )
}

/// Connector handing out prepared transports in order.
///
/// A `None` entry, or exhaustion, refuses the connection with an I/O error,
/// which is how tests script failed reconnect attempts.
pub struct MockConnector {
    outcomes: VecDeque<Option<MockTransport>>,
    attempts: Arc<AtomicU32>,
}

impl MockConnector {
    pub fn new(outcomes: Vec<Option<MockTransport>>) -> (Self, Arc<AtomicU32>) {
        let attempts = Arc::new(AtomicU32::new(0));
        (
            Self {
                outcomes: outcomes.into(),
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&mut self) -> Result<MockTransport, LoteriaError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.pop_front().flatten() {
            Some(transport) => Ok(transport),
            None => Err(LoteriaError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock connection refused",
            ))),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), LoteriaError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LoteriaError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), LoteriaError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
