//! Async session client for the Party Lotería set-top-box.
//!
//! [`LoteriaClient`] is a thin handle that communicates with a background
//! session loop task via an unbounded MPSC channel. Domain notifications are
//! emitted on a bounded channel ([`tokio::sync::mpsc::Receiver<LoteriaEvent>`])
//! returned from [`LoteriaClient::start`].
//!
//! The loop owns the [`Session`] mirror: every inbound server event is parsed,
//! applied, and re-emitted as notifications from this single task, so no two
//! handlers ever mutate session state concurrently. On unexpected disconnects
//! the loop reconnects through the [`Connector`] with bounded, growing
//! backoff; while disconnected, outbound commands are dropped with a log
//! line, never queued.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:3001/stb");
//! let (client, mut events) = LoteriaClient::start(connector, LoteriaConfig::new());
//!
//! client.create_room()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LoteriaEvent::RoomCreated { room_code } => { /* show QR code */ }
//!         LoteriaEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::{LoteriaError, Result};
use crate::event::LoteriaEvent;
use crate::protocol::{ClientCommand, Player, ServerEvent};
use crate::session::{Phase, Session};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Reconnect policy ────────────────────────────────────────────────

/// Bounded-retry policy applied after an unexpected disconnect.
///
/// The delay before attempt `n` starts at `initial_delay` and doubles per
/// attempt up to `max_delay`. After `max_attempts` consecutive failures the
/// client gives up and emits a final
/// [`Disconnected`](LoteriaEvent::Disconnected).
///
/// Defaults match the original set-top-box build: 10 attempts, 1 s initial
/// delay, 5 s cap.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive reconnect attempts. `0` disables
    /// automatic reconnection.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for the growing delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`LoteriaClient`].
///
/// All fields have sensible defaults.
///
/// # Example
///
/// ```
/// use loteria_stb_client::client::{LoteriaConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = LoteriaConfig::new()
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoteriaConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up with incoming server events,
    /// notifications are dropped (with a warning logged) to avoid blocking
    /// the session loop. The final `Disconnected` event is always delivered
    /// regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`LoteriaClient::shutdown`] is called, the session loop is given
    /// this much time to close the transport and emit a final `Disconnected`
    /// event. If the timeout expires the task is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Reconnection policy for unexpected disconnects.
    pub reconnect: ReconnectPolicy,
}

impl LoteriaConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Set the capacity of the bounded event channel.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the reconnection policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

// ── Commands ────────────────────────────────────────────────────────

/// Commands queued from the handle to the session loop.
///
/// Kept separate from [`ClientCommand`] so the loop can validate local
/// preconditions against the session before anything touches the wire.
#[derive(Debug)]
enum Command {
    CreateRoom,
    StartGame {
        win_patterns: Vec<String>,
        draw_speed: u32,
    },
    DrawCard,
    PauseGame,
    ResumeGame,
    ResetGame,
    CloseRoom,
    SetAutoDraw(bool),
    DebugForceWin { player_id: String },
    DebugTriggerLoteria { player_id: String },
}

// ── Shared state ────────────────────────────────────────────────────

/// Internal shared state between the client handle and the session loop.
struct ClientState {
    connected: AtomicBool,
    session: Mutex<Session>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            session: Mutex::new(Session::new()),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle for the Lotería set-top-box session client.
///
/// Created via [`LoteriaClient::start`], which spawns the background session
/// loop and returns this handle together with an event receiver.
///
/// All command methods queue a [`Command`] to the loop and return immediately
/// (no round-trip await). State changes are observed only through the event
/// receiver once the server's echo arrives — commands never mutate the local
/// mirror optimistically.
pub struct LoteriaClient {
    /// Sender half of the command channel to the session loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// Shared state updated by the session loop.
    state: Arc<ClientState>,
    /// Handle to the background session loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the session loop to shut down gracefully.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl LoteriaClient {
    /// Start the session loop and return a handle plus event receiver.
    ///
    /// The loop connects through the given [`Connector`] (retrying per the
    /// configured [`ReconnectPolicy`] if the first attempt fails) and emits
    /// [`LoteriaEvent::Connected`] once the connection is up.
    ///
    /// # Returns
    ///
    /// A tuple of `(client_handle, event_receiver)`. The event receiver
    /// yields [`LoteriaEvent`]s until the transport is permanently down or
    /// the client shuts down.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: LoteriaConfig,
    ) -> (Self, mpsc::Receiver<LoteriaEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<LoteriaEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let state = Arc::new(ClientState::new());
        let loop_state = Arc::clone(&state);
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(session_loop(
            connector,
            cmd_rx,
            event_tx,
            loop_state,
            shutdown_rx,
            config,
        ));

        let client = Self {
            cmd_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Session commands ────────────────────────────────────────────

    /// Request a new room for this display.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn create_room(&self) -> Result<()> {
        self.send(Command::CreateRoom)
    }

    /// Start the round with the given win patterns and draw speed
    /// (`draw_speed` in seconds; `0` requests manual draw).
    ///
    /// Requires at least one player in the roster; otherwise a local
    /// [`Error`](LoteriaEvent::Error) notification is emitted and no network
    /// call is made.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn start_game(&self, win_patterns: Vec<String>, draw_speed: u32) -> Result<()> {
        self.send(Command::StartGame {
            win_patterns,
            draw_speed,
        })
    }

    /// Request the next card draw.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn draw_next_card(&self) -> Result<()> {
        self.send(Command::DrawCard)
    }

    /// Pause the round.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn pause_game(&self) -> Result<()> {
        self.send(Command::PauseGame)
    }

    /// Resume a paused round.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn resume_game(&self) -> Result<()> {
        self.send(Command::ResumeGame)
    }

    /// Reset the session back to the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn reset_game(&self) -> Result<()> {
        self.send(Command::ResetGame)
    }

    /// Tell the server this display is going away; the room closes.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn close_room(&self) -> Result<()> {
        self.send(Command::CloseRoom)
    }

    /// Enable or disable the local fallback auto-draw timer. Purely local;
    /// the server keeps its own draw speed.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn set_auto_draw(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetAutoDraw(enabled))
    }

    // ── Debug override bridge ───────────────────────────────────────

    /// Debug override: force a win for the given player.
    ///
    /// Valid only while the phase is `Playing` or `Paused` and the target id
    /// is in the roster; otherwise rejected locally with a descriptive
    /// [`Error`](LoteriaEvent::Error) notification and no network call.
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn debug_force_win(&self, player_id: impl Into<String>) -> Result<()> {
        self.send(Command::DebugForceWin {
            player_id: player_id.into(),
        })
    }

    /// Debug override: press the Lotería button on behalf of the given
    /// player, triggering the server's win-claim verification.
    ///
    /// Same validity rules as [`debug_force_win`](Self::debug_force_win).
    ///
    /// # Errors
    ///
    /// Returns [`LoteriaError::NotConnected`] if the session loop has exited.
    pub fn debug_trigger_loteria(&self, player_id: impl Into<String>) -> Result<()> {
        self.send(Command::DebugTriggerLoteria {
            player_id: player_id.into(),
        })
    }

    /// Shut down the client, closing the transport and stopping the loop.
    ///
    /// After calling this method, the event receiver will yield `None` once
    /// the session loop exits.
    pub async fn shutdown(&mut self) {
        debug!("LoteriaClient: shutdown requested");

        // Signal the session loop to shut down gracefully.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the session loop with a timeout. If it doesn't exit in time,
        // abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Snapshot of the full session mirror.
    pub async fn session(&self) -> Session {
        self.state.session.lock().await.clone()
    }

    /// The current phase.
    pub async fn phase(&self) -> Phase {
        self.state.session.lock().await.phase
    }

    /// The current room code, if a room exists.
    pub async fn room_code(&self) -> Option<String> {
        self.state.session.lock().await.room_code.clone()
    }

    /// The current roster, in join order.
    pub async fn players(&self) -> Vec<Player> {
        self.state.session.lock().await.players.clone()
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Queue a [`Command`] to the session loop.
    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| LoteriaError::NotConnected)
    }
}

impl std::fmt::Debug for LoteriaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoteriaClient")
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for LoteriaClient {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown.
        // The only safe action is to abort the spawned task, which causes
        // the session loop future to be dropped immediately. The
        // `shutdown_tx` oneshot is intentionally *not* sent here: sending
        // it would trigger a graceful path that calls async `transport.close()`,
        // but there is no executor context to drive it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Why a live connection ended.
enum ConnectionEnd {
    /// Graceful shutdown was requested via the oneshot.
    Shutdown,
    /// The client handle was dropped (command channel closed).
    HandleDropped,
    /// The transport failed or the server closed the connection.
    Lost(Option<String>),
}

/// Outcome of a bounded connect/reconnect cycle.
enum Establish<T> {
    Connected(T),
    GaveUp(String),
    Shutdown,
}

/// Background session loop: connects, multiplexes commands / inbound events /
/// draw-timer ticks, and reconnects with bounded backoff when the connection
/// drops unexpectedly.
async fn session_loop<C: Connector>(
    mut connector: C,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<LoteriaEvent>,
    state: Arc<ClientState>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    config: LoteriaConfig,
) {
    debug!("session loop started");
    let policy = config.reconnect;

    let mut transport = match establish(
        &mut connector,
        &policy,
        &mut cmd_rx,
        &event_tx,
        &mut shutdown_rx,
        true,
    )
    .await
    {
        Establish::Connected(transport) => transport,
        Establish::GaveUp(reason) => {
            emit_disconnected(&event_tx, &state, Some(reason)).await;
            return;
        }
        Establish::Shutdown => {
            emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
            return;
        }
    };
    state.connected.store(true, Ordering::Release);
    emit_event(&event_tx, LoteriaEvent::Connected).await;

    loop {
        let end = run_connection(
            &mut transport,
            &mut cmd_rx,
            &event_tx,
            &state,
            &mut shutdown_rx,
        )
        .await;
        state.connected.store(false, Ordering::Release);

        match end {
            ConnectionEnd::Shutdown => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }
            ConnectionEnd::HandleDropped => {
                debug!("command channel closed, shutting down session loop");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &state, Some("client shut down".into())).await;
                break;
            }
            ConnectionEnd::Lost(reason) => {
                warn!(
                    reason = reason.as_deref().unwrap_or("connection closed by server"),
                    "connection lost; reconnecting"
                );
                match establish(
                    &mut connector,
                    &policy,
                    &mut cmd_rx,
                    &event_tx,
                    &mut shutdown_rx,
                    false,
                )
                .await
                {
                    Establish::Connected(fresh) => {
                        transport = fresh;
                        state.connected.store(true, Ordering::Release);
                        // The server re-pushes a full snapshot after a
                        // reconnect; missed events are not replayed locally.
                        emit_event(&event_tx, LoteriaEvent::Reconnected).await;
                    }
                    Establish::GaveUp(gave_up) => {
                        emit_disconnected(&event_tx, &state, reason.or(Some(gave_up))).await;
                        break;
                    }
                    Establish::Shutdown => {
                        emit_disconnected(&event_tx, &state, Some("client shut down".into()))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    debug!("session loop exited");
}

/// Drive one live connection until it ends.
async fn run_connection<T: Transport>(
    transport: &mut T,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::Sender<LoteriaEvent>,
    state: &ClientState,
    shutdown_rx: &mut tokio::sync::oneshot::Receiver<()>,
) -> ConnectionEnd {
    // Rebuild the fallback timer from the session, so a reconnect mid-round
    // resumes auto-draw until the server's snapshot says otherwise.
    let mut draw_timer: Option<Interval> = {
        let session = state.session.lock().await;
        session
            .timer_armed()
            .then(|| draw_interval(session.draw_speed))
    };

    loop {
        tokio::select! {
            // Branch 1: command from the client handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => {
                        if let Err(e) =
                            handle_command(cmd, transport, event_tx, state, &mut draw_timer).await
                        {
                            error!("transport send error: {e}");
                            return ConnectionEnd::Lost(Some(format!("transport send error: {e}")));
                        }
                    }
                    None => return ConnectionEnd::HandleDropped,
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => return ConnectionEnd::Shutdown,

            // Branch 3: inbound frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                apply_server_event(event, state, event_tx, &mut draw_timer).await;
                            }
                            Err(e) => {
                                // One malformed frame never kills the loop.
                                warn!("failed to deserialize server event: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return ConnectionEnd::Lost(Some(format!("transport receive error: {e}")));
                    }
                    None => {
                        debug!("transport closed by server");
                        return ConnectionEnd::Lost(None);
                    }
                }
            }

            // Branch 4: fallback auto-draw timer; pends forever while disarmed
            _ = tick(&mut draw_timer) => {
                debug!("draw timer fired; requesting card draw");
                // Convenience request only — the mirror advances solely on
                // the inbound card-drawn echo, so a duplicate or late request
                // is a server-side no-op and never double-applies locally.
                if let Err(e) = send_wire(transport, &ClientCommand::DrawCard).await {
                    error!("transport send error: {e}");
                    return ConnectionEnd::Lost(Some(format!("transport send error: {e}")));
                }
            }
        }
    }
}

/// Apply one inbound server event to the session and emit its notifications,
/// then rearm or disarm the draw timer to match the new state.
async fn apply_server_event(
    event: ServerEvent,
    state: &ClientState,
    event_tx: &mpsc::Sender<LoteriaEvent>,
    draw_timer: &mut Option<Interval>,
) {
    // game-started and game-resumed restart the countdown even when the
    // period is unchanged.
    let restart = matches!(
        event,
        ServerEvent::GameStarted { .. } | ServerEvent::GameResumed
    );

    let (notifications, wanted) = {
        let mut session = state.session.lock().await;
        let notifications = session.apply(event);
        let wanted = session.timer_armed().then_some(session.draw_speed);
        (notifications, wanted)
    };

    let current = draw_timer
        .as_ref()
        .map(|interval| interval.period().as_secs() as u32);
    if restart || wanted != current {
        *draw_timer = wanted.map(draw_interval);
    }

    for notification in notifications {
        emit_event(event_tx, notification).await;
    }
}

/// Validate and execute one queued command.
///
/// Precondition failures are converted to local [`Error`](LoteriaEvent::Error)
/// notifications and make no network call. Returns `Err` only for transport
/// send failures, which end the connection.
async fn handle_command<T: Transport>(
    cmd: Command,
    transport: &mut T,
    event_tx: &mpsc::Sender<LoteriaEvent>,
    state: &ClientState,
    draw_timer: &mut Option<Interval>,
) -> Result<()> {
    let wire = match cmd {
        Command::CreateRoom => ClientCommand::CreateRoom,
        Command::StartGame {
            win_patterns,
            draw_speed,
        } => {
            let no_players = state.session.lock().await.players.is_empty();
            if no_players {
                warn!("start-game rejected locally: no players in roster");
                emit_event(
                    event_tx,
                    LoteriaEvent::Error {
                        message: "need at least 1 player to start".into(),
                    },
                )
                .await;
                return Ok(());
            }
            ClientCommand::StartGame {
                win_patterns,
                draw_speed,
            }
        }
        Command::DrawCard => ClientCommand::DrawCard,
        Command::PauseGame => ClientCommand::PauseGame,
        Command::ResumeGame => ClientCommand::ResumeGame,
        Command::ResetGame => ClientCommand::ResetGame,
        Command::CloseRoom => {
            // The room is gone as far as this display is concerned; the
            // server sends no echo for its own departure.
            state.session.lock().await.room_code = None;
            ClientCommand::DisconnectSetTopBox
        }
        Command::SetAutoDraw(enabled) => {
            let wanted = {
                let mut session = state.session.lock().await;
                session.auto_draw = enabled;
                session.timer_armed().then_some(session.draw_speed)
            };
            debug!(enabled, "auto-draw toggled");
            *draw_timer = match (wanted, draw_timer.take()) {
                // Keep an already-running countdown when staying armed.
                (Some(_), Some(existing)) => Some(existing),
                (Some(speed), None) => Some(draw_interval(speed)),
                (None, _) => None,
            };
            return Ok(());
        }
        Command::DebugForceWin { player_id } => {
            match validate_debug_target(state, &player_id).await {
                Ok(()) => ClientCommand::DebugForceWin { player_id },
                Err(message) => {
                    warn!(message = %message, "debug-force-win rejected locally");
                    emit_event(event_tx, LoteriaEvent::Error { message }).await;
                    return Ok(());
                }
            }
        }
        Command::DebugTriggerLoteria { player_id } => {
            match validate_debug_target(state, &player_id).await {
                Ok(()) => ClientCommand::DebugTriggerLoteria { player_id },
                Err(message) => {
                    warn!(message = %message, "debug-trigger-loteria rejected locally");
                    emit_event(event_tx, LoteriaEvent::Error { message }).await;
                    return Ok(());
                }
            }
        }
    };

    send_wire(transport, &wire).await
}

/// Check the debug-override preconditions: round in progress, target known.
async fn validate_debug_target(
    state: &ClientState,
    player_id: &str,
) -> std::result::Result<(), String> {
    let session = state.session.lock().await;
    if !matches!(session.phase, Phase::Playing | Phase::Paused) {
        return Err(format!(
            "cannot target player while phase is {:?}; game must be Playing or Paused",
            session.phase
        ));
    }
    if session.player(player_id).is_none() {
        return Err(format!("no player with id {player_id} in the room"));
    }
    Ok(())
}

/// Serialize and send one wire command.
async fn send_wire<T: Transport>(transport: &mut T, cmd: &ClientCommand) -> Result<()> {
    debug!("sending client command: {:?}", std::mem::discriminant(cmd));
    match serde_json::to_string(cmd) {
        Ok(json) => transport.send(json).await,
        Err(e) => {
            // Serialization errors are programming bugs; don't kill the loop.
            error!("failed to serialize ClientCommand: {e}");
            Ok(())
        }
    }
}

/// Bounded connect/reconnect cycle.
///
/// For the initial connection one immediate attempt is made before the retry
/// loop. Each retry emits [`Reconnecting`](LoteriaEvent::Reconnecting) with
/// its 1-based attempt index, waits the policy delay, then dials. Commands
/// arriving while disconnected are dropped with a warning — outbound traffic
/// is never queued for later delivery.
async fn establish<C: Connector>(
    connector: &mut C,
    policy: &ReconnectPolicy,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    event_tx: &mpsc::Sender<LoteriaEvent>,
    shutdown_rx: &mut tokio::sync::oneshot::Receiver<()>,
    initial: bool,
) -> Establish<C::Transport> {
    if initial {
        match connector.connect().await {
            Ok(transport) => return Establish::Connected(transport),
            Err(e) => warn!("initial connect failed: {e}"),
        }
    }

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(
                attempts = policy.max_attempts,
                "reconnect attempts exhausted; giving up"
            );
            return Establish::GaveUp("reconnect attempts exhausted".into());
        }

        emit_event(event_tx, LoteriaEvent::Reconnecting { attempt }).await;
        let delay = policy.delay_for(attempt);
        debug!(attempt, ?delay, "waiting before reconnect attempt");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                _ = &mut *shutdown_rx => return Establish::Shutdown,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => warn!(?cmd, "not connected; dropping command"),
                    None => return Establish::Shutdown,
                },
            }
        }

        match connector.connect().await {
            Ok(transport) => {
                debug!(attempt, "reconnect succeeded");
                return Establish::Connected(transport);
            }
            Err(e) => warn!(attempt, "reconnect attempt failed: {e}"),
        }
    }
}

/// A fresh draw countdown: first tick after one full period, then periodic.
fn draw_interval(seconds: u32) -> Interval {
    let period = Duration::from_secs(u64::from(seconds.max(1)));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Await the next tick of an armed timer; pend forever when disarmed.
async fn tick(draw_timer: &mut Option<Interval>) {
    match draw_timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the session loop.
async fn emit_event(event_tx: &mpsc::Sender<LoteriaEvent>, event: LoteriaEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Disconnected`](LoteriaEvent::Disconnected) event and update state.
///
/// Uses `send().await` (blocking) instead of `try_send` because `Disconnected`
/// is always the last event on the channel and must never be silently dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<LoteriaEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    let event = LoteriaEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
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
    use crate::protocol::ServerEvent;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport & connector ──────────────────────────────────

    /// Channel-fed mock transport: the test pushes frames through `server`,
    /// the client loop receives them via `recv()`.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<std::result::Result<String, LoteriaError>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    /// Test-side handle for one mock transport.
    struct MockServer {
        tx: mpsc::UnboundedSender<std::result::Result<String, LoteriaError>>,
        sent: Arc<StdMutex<Vec<String>>>,
        #[allow(dead_code)]
        closed: Arc<AtomicBool>,
    }

    impl MockServer {
        fn push(&self, event: &ServerEvent) {
            let json = serde_json::to_string(event).unwrap();
            self.tx.send(Ok(json)).unwrap();
        }

        fn push_raw(&self, raw: &str) {
            self.tx.send(Ok(raw.to_string())).unwrap();
        }

        fn sent_commands(&self) -> Vec<ClientCommand> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|json| serde_json::from_str(json).unwrap())
                .collect()
        }
    }

    fn mock_transport() -> (MockTransport, MockServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        (
            MockTransport {
                incoming: rx,
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            },
            MockServer { tx, sent, closed },
        )
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), LoteriaError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, LoteriaError>> {
            // `None` (sender dropped) models a clean server-side close.
            self.incoming.recv().await
        }

        async fn close(&mut self) -> std::result::Result<(), LoteriaError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Connector yielding prepared transports in order; `None` entries and
    /// exhaustion refuse the connection.
    struct MockConnector {
        outcomes: std::collections::VecDeque<Option<MockTransport>>,
        attempts: Arc<AtomicU32>,
    }

    impl MockConnector {
        fn new(outcomes: Vec<Option<MockTransport>>) -> (Self, Arc<AtomicU32>) {
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

        async fn connect(&mut self) -> std::result::Result<MockTransport, LoteriaError> {
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

    fn start_single() -> (
        LoteriaClient,
        mpsc::Receiver<LoteriaEvent>,
        MockServer,
    ) {
        let (transport, server) = mock_transport();
        let (connector, _attempts) = MockConnector::new(vec![Some(transport)]);
        let (client, events) = LoteriaClient::start(connector, LoteriaConfig::new());
        (client, events, server)
    }

    async fn drain_until_connected(events: &mut mpsc::Receiver<LoteriaEvent>) {
        let ev = events.recv().await.unwrap();
        assert!(
            matches!(ev, LoteriaEvent::Connected),
            "expected Connected first, got {ev:?}"
        );
    }

    fn player(id: &str, name: &str) -> Player {
        Player {
            id: id.into(),
            name: name.into(),
            is_ready: false,
        }
    }

    // ── Config & policy ─────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = LoteriaConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn config_builder_methods() {
        let config = LoteriaConfig::new()
            .with_event_channel_capacity(512)
            .with_shutdown_timeout(Duration::from_secs(5))
            .with_reconnect_policy(ReconnectPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(400),
            });
        assert_eq!(config.event_channel_capacity, 512);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = LoteriaConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event() {
        let (mut client, mut events, _server) = start_single();

        drain_until_connected(&mut events).await;
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn create_room_sends_wire_command() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        client.create_room().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(server.sent_commands(), vec![ClientCommand::CreateRoom]);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn room_created_updates_session_mirror() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        });

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, LoteriaEvent::RoomCreated { ref room_code } if room_code == "AB12"));
        assert_eq!(client.room_code().await.as_deref(), Some("AB12"));
        assert_eq!(client.phase().await, Phase::Waiting);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn start_game_with_zero_players_is_rejected_locally() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        client.start_game(vec!["line".into()], 8).unwrap();

        let ev = events.recv().await.unwrap();
        assert!(
            matches!(ev, LoteriaEvent::Error { ref message } if message.contains("at least 1 player")),
            "expected local validation error, got {ev:?}"
        );
        assert!(
            server.sent.lock().unwrap().is_empty(),
            "no wire traffic expected"
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn start_game_with_roster_sends_start_game() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        let _ = events.recv().await; // PlayerJoined
        let _ = events.recv().await; // RosterUpdated

        client.start_game(vec!["line".into()], 8).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            server.sent_commands(),
            vec![ClientCommand::StartGame {
                win_patterns: vec!["line".into()],
                draw_speed: 8,
            }]
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_loop_survives() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push_raw("{not json");
        server.push_raw(r#"{"event":"no-such-event","data":{}}"#);
        server.push(&ServerEvent::RoomCreated {
            room_code: "OK99".into(),
        });

        // The bad frames produce no events; the good one still arrives.
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, LoteriaEvent::RoomCreated { ref room_code } if room_code == "OK99"));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn game_error_is_surfaced_without_state_change() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::GameError {
            message: "bad move".into(),
        });

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, LoteriaEvent::Error { ref message } if message == "bad move"));
        assert_eq!(client.phase().await, Phase::Waiting);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_force_win_rejected_outside_round() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        client.debug_force_win("p1").unwrap();

        let ev = events.recv().await.unwrap();
        assert!(
            matches!(ev, LoteriaEvent::Error { ref message } if message.contains("Playing or Paused")),
            "expected phase rejection, got {ev:?}"
        );
        assert!(server.sent.lock().unwrap().is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_force_win_rejected_for_unknown_player() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        server.push(&ServerEvent::GameStarted {
            win_patterns: vec!["line".into()],
            draw_speed: 0,
            total_cards: 54,
            player_count: 1,
        });
        // PlayerJoined, RosterUpdated, GameStarted, PhaseChanged
        for _ in 0..4 {
            let _ = events.recv().await;
        }

        client.debug_force_win("ghost").unwrap();

        let ev = events.recv().await.unwrap();
        assert!(
            matches!(ev, LoteriaEvent::Error { ref message } if message.contains("ghost")),
            "expected unknown-player rejection, got {ev:?}"
        );
        assert!(server.sent.lock().unwrap().is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_overrides_sent_while_playing() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::PlayerJoined {
            player: player("p1", "Ana"),
            player_count: 1,
        });
        server.push(&ServerEvent::GameStarted {
            win_patterns: vec!["line".into()],
            draw_speed: 0,
            total_cards: 54,
            player_count: 1,
        });
        for _ in 0..4 {
            let _ = events.recv().await;
        }

        client.debug_force_win("p1").unwrap();
        client.debug_trigger_loteria("p1").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            server.sent_commands(),
            vec![
                ClientCommand::DebugForceWin {
                    player_id: "p1".into()
                },
                ClientCommand::DebugTriggerLoteria {
                    player_id: "p1".into()
                },
            ]
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn close_room_clears_room_code_and_notifies_server() {
        let (mut client, mut events, server) = start_single();
        drain_until_connected(&mut events).await;

        server.push(&ServerEvent::RoomCreated {
            room_code: "AB12".into(),
        });
        let _ = events.recv().await; // RoomCreated

        client.close_room().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            server.sent_commands(),
            vec![ClientCommand::DisconnectSetTopBox]
        );
        assert!(client.room_code().await.is_none());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_disconnected_last() {
        let (mut client, mut events, _server) = start_single();
        drain_until_connected(&mut events).await;

        client.shutdown().await;

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, LoteriaEvent::Disconnected { .. }));
        if let LoteriaEvent::Disconnected { reason } = ev {
            assert_eq!(reason.as_deref(), Some("client shut down"));
        }
        assert!(!client.is_connected());

        let result = client.create_room();
        assert!(matches!(result, Err(LoteriaError::NotConnected)));
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (mut client, mut events, _server) = start_single();
        drain_until_connected(&mut events).await;

        client.shutdown().await;
        client.shutdown().await; // should not panic
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (client, mut events, _server) = start_single();
        drain_until_connected(&mut events).await;

        drop(client);

        // The session loop should exit; the event channel closes. We just
        // verify we don't hang or panic while draining.
        while let Some(_event) = events.recv().await {}
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (mut client, mut events, _server) = start_single();
        drain_until_connected(&mut events).await;

        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("LoteriaClient"));
        assert!(debug_str.contains("connected"));

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_failure_retries_then_gives_up() {
        let (connector, attempts) = MockConnector::new(vec![]);
        let config = LoteriaConfig::new().with_reconnect_policy(ReconnectPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        });
        let (client, mut events) = LoteriaClient::start(connector, config);

        let mut seen_attempts = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                LoteriaEvent::Reconnecting { attempt } => seen_attempts.push(attempt),
                LoteriaEvent::Disconnected { reason } => {
                    assert!(reason.unwrap().contains("exhausted"));
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(seen_attempts, vec![1, 2, 3]);
        // One immediate initial attempt plus three retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(!client.is_connected());
    }
}
