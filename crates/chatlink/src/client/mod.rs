//! Reconnecting chat transport client.
//!
//! [`ChatClient`] owns at most one socket at a time. Every socket it creates
//! gets a generation number; callbacks from a socket whose generation is no
//! longer current are ignored, so a replaced or disconnected socket can never
//! move the state machine.
//!
//! Listener dispatch always happens with no lock held, so listeners are free
//! to call back into the client.

mod message_id;
mod reconnect;
mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;

use chatlink_protocol::frames::is_terminal_kind;
use chatlink_protocol::{ABNORMAL_CLOSURE, NORMAL_CLOSURE, OutboundFrame, is_normal_closure};

use crate::config::ChatClientConfig;
use crate::emitter::{EventEmitter, Listener};
use crate::error::{ChatError, ChatResult};
use crate::socket::{ReadyState, Socket, SocketCallbacks, SocketFactory};

pub use message_id::generate_message_id;
pub use reconnect::{ReconnectPolicy, ScheduledAttempt};
pub use state::ConnectionState;

/// Event names the client emits besides the frame types it forwards.
pub mod events {
    /// `{connected: bool, code?, reason?}`
    pub const CONNECTION: &str = "connection";
    /// `{raw: string, error: string}`
    pub const PARSE_ERROR: &str = "parse_error";
    /// `{message: string}`
    pub const SOCKET_ERROR: &str = "error";
    /// `{attempt: u32, delay_ms: u64}`
    pub const RECONNECTING: &str = "reconnecting";
    /// `{attempts: u32}`
    pub const RECONNECT_FAILED: &str = "reconnect_failed";

    pub use chatlink_protocol::frames::{
        METADATA, STREAM_END, STREAM_ERROR, STREAM_START, STREAM_TOKEN,
    };
}

/// Close reason sent by [`ChatClient::disconnect`].
pub const DISCONNECT_REASON: &str = "Client disconnect";

const REPLACED_REASON: &str = "Replaced by a new connection";

/// Reconnect deadline used when the backoff delay overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A message waiting for its response stream to finish.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub message_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Streaming chat client bound to one socket factory.
///
/// Cloning is cheap and clones share the same connection. Two clients built
/// with [`ChatClient::new`] are fully independent.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ChatClientConfig,
    factory: Arc<dyn SocketFactory>,
    emitter: EventEmitter,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

struct Shared {
    state: ConnectionState,
    /// Set by connect, cleared by disconnect. Reconnects only happen while set.
    session_id: Option<String>,
    socket: Option<CurrentSocket>,
    generation: u64,
    policy: ReconnectPolicy,
    reconnect_timer: Option<AbortHandle>,
    pending_connect: Option<oneshot::Sender<ChatResult<()>>>,
    pending_messages: HashMap<String, PendingMessage>,
    /// Generation whose socket opened while `create` was still running.
    opened_unstored: Option<u64>,
    /// Latest generation whose socket has closed.
    closed_generation: Option<u64>,
}

struct CurrentSocket {
    session_id: String,
    socket: Arc<dyn Socket>,
}

enum AfterClose {
    Nothing,
    Retry(ScheduledAttempt),
    GiveUp(u32),
}

impl Shared {
    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            debug!("Cancelling pending reconnect");
            timer.abort();
        }
    }
}

impl ChatClient {
    /// Create a disconnected client.
    pub fn new(config: ChatClientConfig, factory: Arc<dyn SocketFactory>) -> Self {
        let policy = ReconnectPolicy::new(config.max_reconnect_attempts, config.reconnect_interval());
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(ClientInner {
                config,
                factory,
                emitter: EventEmitter::new(),
                shared: Mutex::new(Shared {
                    state: ConnectionState::Idle,
                    session_id: None,
                    socket: None,
                    generation: 0,
                    policy,
                    reconnect_timer: None,
                    pending_connect: None,
                    pending_messages: HashMap::new(),
                    opened_unstored: None,
                    closed_generation: None,
                }),
                state_tx,
            }),
        }
    }

    /// Connect to the chat endpoint for `session_id`.
    ///
    /// Returns immediately if a socket for the same session is already open.
    /// Otherwise any previous socket is closed, a pending reconnect is
    /// cancelled and the call completes once the new socket opens or fails.
    pub async fn connect(&self, session_id: &str) -> ChatResult<()> {
        let (previous, generation, opened) = {
            let mut shared = self.inner.shared.lock();
            if let Some(current) = &shared.socket
                && current.session_id == session_id
                && current.socket.ready_state() == ReadyState::Open
            {
                debug!("Already connected to session {}", session_id);
                return Ok(());
            }

            shared.cancel_reconnect();
            shared.policy.reset();
            shared.session_id = Some(session_id.to_string());
            let generation = shared.next_generation();
            let (tx, rx) = oneshot::channel();
            shared.pending_connect = Some(tx);
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            (shared.socket.take(), generation, rx)
        };

        if let Some(previous) = previous {
            debug!("Closing socket for session {}", previous.session_id);
            previous.socket.close(NORMAL_CLOSURE, REPLACED_REASON);
        }

        info!("Connecting chat session {}", session_id);
        self.inner.open_socket(session_id, generation)?;

        opened.await.unwrap_or(Err(ChatError::ConnectionFailed))
    }

    /// Send a user message and mark the client as streaming.
    ///
    /// Fails synchronously with [`ChatError::NotConnected`] when no socket is
    /// open; callers must check the result rather than assume delivery.
    /// Returns the generated message id that response frames will carry.
    pub fn send_message(&self, content: &str) -> ChatResult<String> {
        let inner = &self.inner;
        let (socket, session_id, message_id) = {
            let mut shared = inner.shared.lock();
            let (socket, session_id) = match (&shared.socket, &shared.session_id) {
                (Some(current), Some(session_id))
                    if current.socket.ready_state() == ReadyState::Open =>
                {
                    (Arc::clone(&current.socket), session_id.clone())
                }
                _ => return Err(ChatError::NotConnected),
            };

            let message_id = generate_message_id();
            shared.pending_messages.insert(
                message_id.clone(),
                PendingMessage {
                    message_id: message_id.clone(),
                    content: content.to_string(),
                    sent_at: Utc::now(),
                },
            );
            inner.set_state(&mut shared, ConnectionState::Streaming);
            (socket, session_id, message_id)
        };

        let sent = serde_json::to_string(&OutboundFrame::message(content, &session_id, &message_id))
            .map_err(ChatError::from)
            .and_then(|payload| socket.send(payload));

        if let Err(e) = sent {
            warn!("Failed to send message {}: {}", message_id, e);
            let mut shared = inner.shared.lock();
            shared.pending_messages.remove(&message_id);
            if shared.pending_messages.is_empty() && shared.state == ConnectionState::Streaming {
                inner.set_state(&mut shared, ConnectionState::Idle);
            }
            return Err(e);
        }

        debug!("Sent message {} on session {}", message_id, session_id);
        Ok(message_id)
    }

    /// Close the socket with code 1000 and stop reconnecting.
    pub fn disconnect(&self) {
        let (socket, pending) = {
            let mut shared = self.inner.shared.lock();
            shared.cancel_reconnect();
            shared.policy.reset();
            shared.session_id = None;
            shared.next_generation();
            shared.pending_messages.clear();
            self.inner.set_state(&mut shared, ConnectionState::Idle);
            (shared.socket.take(), shared.pending_connect.take())
        };

        // An in-flight connect() resolves as failed.
        drop(pending);

        if let Some(current) = socket {
            info!("Disconnecting chat session {}", current.session_id);
            current.socket.close(NORMAL_CLOSURE, DISCONNECT_REASON);
            self.inner.emit(
                events::CONNECTION,
                &json!({"connected": false, "code": NORMAL_CLOSURE, "reason": DISCONNECT_REASON}),
            );
        }
    }

    /// Register a listener for an event or frame type.
    pub fn on(&self, event: &str, listener: Listener) {
        self.inner.emitter.on(event, listener);
    }

    /// Remove a listener registered with [`on`](Self::on).
    pub fn off(&self, event: &str, listener: &Listener) {
        self.inner.emitter.off(event, listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Watch state transitions, e.g. to wait for a stream to finish.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the current socket is open.
    pub fn is_connected(&self) -> bool {
        self.inner
            .shared
            .lock()
            .socket
            .as_ref()
            .is_some_and(|current| current.socket.ready_state() == ReadyState::Open)
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.shared.lock().session_id.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.shared.lock().policy.attempts()
    }

    /// Messages whose response stream has not finished yet, oldest first.
    pub fn pending_messages(&self) -> Vec<PendingMessage> {
        let mut pending: Vec<_> = self
            .inner
            .shared
            .lock()
            .pending_messages
            .values()
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.sent_at);
        pending
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.inner.config
    }
}

impl ClientInner {
    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            debug!("Chat state {} -> {}", shared.state, next);
            shared.state = next;
            self.state_tx.send_replace(next);
        }
    }

    /// Dispatch to listeners, logging instead of propagating listener errors.
    fn emit(&self, event: &str, payload: &Value) {
        if let Err(e) = self.emitter.emit(event, payload) {
            error!("Listener error while dispatching '{}': {}", event, e);
        }
    }

    /// Create the socket for `generation` and make it current.
    fn open_socket(self: &Arc<Self>, session_id: &str, generation: u64) -> ChatResult<()> {
        let url = self.config.connection_url(session_id);

        match self.factory.create(&url, self.callbacks(generation)) {
            Ok(socket) => {
                let mut shared = self.shared.lock();
                if shared.generation != generation {
                    drop(shared);
                    debug!("Socket for {} superseded before it was stored", url);
                    socket.close(NORMAL_CLOSURE, REPLACED_REASON);
                    return Ok(());
                }
                if shared.closed_generation == Some(generation) {
                    debug!("Socket for {} closed before it was stored", url);
                    return Ok(());
                }
                shared.socket = Some(CurrentSocket {
                    session_id: session_id.to_string(),
                    socket,
                });
                let opened = shared.opened_unstored.take() == Some(generation);
                drop(shared);

                if opened {
                    self.handle_open(generation);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to create socket for {}: {}", url, e);
                let mut shared = self.shared.lock();
                if shared.generation == generation {
                    self.set_state(&mut shared, ConnectionState::Error);
                    shared.pending_connect = None;
                }
                Err(e)
            }
        }
    }

    fn callbacks(self: &Arc<Self>, generation: u64) -> SocketCallbacks {
        let on_open = Arc::downgrade(self);
        let on_close = Arc::downgrade(self);
        let on_message = Arc::downgrade(self);
        let on_error = Arc::downgrade(self);

        SocketCallbacks {
            on_open: Box::new(move |_: ()| {
                if let Some(inner) = on_open.upgrade() {
                    inner.handle_open(generation);
                }
            }),
            on_close: Box::new(move |(code, reason): (u16, String)| {
                if let Some(inner) = on_close.upgrade() {
                    inner.handle_close(generation, code, &reason);
                }
            }),
            on_message: Box::new(move |data: String| {
                if let Some(inner) = on_message.upgrade() {
                    inner.handle_message(generation, &data);
                }
            }),
            on_error: Box::new(move |message: String| {
                if let Some(inner) = on_error.upgrade() {
                    inner.handle_error(generation, &message);
                }
            }),
        }
    }

    fn handle_open(&self, generation: u64) {
        let pending = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            if shared.socket.is_none() {
                // Finished by open_socket once create() has returned.
                shared.opened_unstored = Some(generation);
                return;
            }
            shared.policy.reset();
            self.set_state(&mut shared, ConnectionState::Idle);
            shared.pending_connect.take()
        };

        info!("Chat socket open");
        if let Some(tx) = pending {
            let _ = tx.send(Ok(()));
        }
        self.emit(events::CONNECTION, &json!({"connected": true}));
    }

    fn handle_error(&self, generation: u64, message: &str) {
        let pending = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            self.set_state(&mut shared, ConnectionState::Error);
            shared.pending_connect.take()
        };

        warn!("Chat socket error: {}", message);
        if let Some(tx) = pending {
            let _ = tx.send(Err(ChatError::ConnectionFailed));
        }
        self.emit(events::SOCKET_ERROR, &json!({"message": message}));
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: &str) {
        let (pending, next) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.socket = None;
            shared.opened_unstored = None;
            shared.closed_generation = Some(generation);
            let pending = shared.pending_connect.take();

            let state = shared.state;
            match state {
                ConnectionState::Connecting => self.set_state(&mut shared, ConnectionState::Error),
                ConnectionState::Streaming => self.set_state(&mut shared, ConnectionState::Idle),
                _ => {}
            }
            if !shared.pending_messages.is_empty() {
                warn!(
                    "Connection closed with {} unfinished message stream(s)",
                    shared.pending_messages.len()
                );
                shared.pending_messages.clear();
            }

            let next = if is_normal_closure(code) || shared.session_id.is_none() {
                AfterClose::Nothing
            } else {
                let scheduled = shared
                    .policy
                    .next_attempt()
                    .and_then(|attempt| {
                        let timer = self.schedule_reconnect(generation, attempt.delay)?;
                        Some((attempt, timer))
                    });
                match scheduled {
                    Some((attempt, timer)) => {
                        shared.reconnect_timer = Some(timer);
                        AfterClose::Retry(attempt)
                    }
                    None => AfterClose::GiveUp(shared.policy.attempts()),
                }
            };
            (pending, next)
        };

        info!("Chat socket closed ({}): {}", code, reason);
        if let Some(tx) = pending {
            let _ = tx.send(Err(ChatError::ConnectionFailed));
        }
        self.emit(
            events::CONNECTION,
            &json!({"connected": false, "code": code, "reason": reason}),
        );

        match next {
            AfterClose::Retry(attempt) => {
                let delay_ms = attempt.delay_ms();
                info!("Reconnecting in {}ms (attempt {})", delay_ms, attempt.attempt);
                self.emit(
                    events::RECONNECTING,
                    &json!({"attempt": attempt.attempt, "delay_ms": delay_ms}),
                );
            }
            AfterClose::GiveUp(attempts) => {
                error!("Giving up after {} reconnect attempt(s)", attempts);
                self.emit(events::RECONNECT_FAILED, &json!({"attempts": attempts}));
            }
            AfterClose::Nothing => {}
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64, delay: Duration) -> Option<AbortHandle> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot schedule reconnect without a tokio runtime: {}", e);
                return None;
            }
        };

        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        let inner = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = inner.upgrade() {
                inner.reconnect(generation);
            }
        });
        Some(task.abort_handle())
    }

    fn reconnect(self: &Arc<Self>, closed_generation: u64) {
        let (session_id, generation, attempt) = {
            let mut shared = self.shared.lock();
            if shared.generation != closed_generation {
                return;
            }
            shared.reconnect_timer = None;
            let Some(session_id) = shared.session_id.clone() else {
                return;
            };
            let generation = shared.next_generation();
            self.set_state(&mut shared, ConnectionState::Connecting);
            (session_id, generation, shared.policy.attempts())
        };

        info!(
            "Reconnecting chat session {} (attempt {}/{})",
            session_id, attempt, self.config.max_reconnect_attempts
        );
        if let Err(e) = self.open_socket(&session_id, generation) {
            self.handle_close(generation, ABNORMAL_CLOSURE, &e.to_string());
        }
    }

    fn handle_message(&self, generation: u64, data: &str) {
        if self.shared.lock().generation != generation {
            return;
        }

        let frame: Value = match serde_json::from_str(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unparseable chat frame: {}", e);
                self.emit(
                    events::PARSE_ERROR,
                    &json!({"raw": data, "error": e.to_string()}),
                );
                return;
            }
        };

        let Some(kind) = frame.get("type").and_then(Value::as_str).map(str::to_owned) else {
            warn!("Dropping chat frame without a type");
            self.emit(
                events::PARSE_ERROR,
                &json!({"raw": data, "error": "frame has no type field"}),
            );
            return;
        };

        if is_terminal_kind(&kind) {
            let mut shared = self.shared.lock();
            if shared.generation == generation {
                if let Some(message_id) = frame.get("message_id").and_then(Value::as_str) {
                    shared.pending_messages.remove(message_id);
                }
                self.set_state(&mut shared, ConnectionState::Idle);
            }
        }

        self.emit(&kind, &frame);
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        shared.cancel_reconnect();
        if let Some(current) = shared.socket.take() {
            current.socket.close(NORMAL_CLOSURE, DISCONNECT_REASON);
        }
    }
}
