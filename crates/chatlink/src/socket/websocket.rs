//! WebSocket transport on tokio-tungstenite.
//!
//! Each socket is one spawned task that owns the connection. The handle the
//! client holds only talks to that task over a channel, so `send` and `close`
//! never block.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use chatlink_protocol::ABNORMAL_CLOSURE;

use super::{ReadyState, Socket, SocketCallbacks, SocketFactory};
use crate::error::{ChatError, ChatResult};

/// Close code reported when the peer closed without a status code.
const NO_STATUS_RECEIVED: u16 = 1005;

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Production socket factory. Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteSocketFactory;

impl TungsteniteSocketFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SocketFactory for TungsteniteSocketFactory {
    fn create(&self, url: &str, callbacks: SocketCallbacks) -> ChatResult<Arc<dyn Socket>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChatError::Socket(format!("no tokio runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(CONNECTING));

        runtime.spawn(run_socket(url.to_string(), rx, Arc::clone(&state), callbacks));

        Ok(Arc::new(TungsteniteSocket { tx, state }))
    }
}

enum Outgoing {
    Text(String),
    Close(u16, String),
}

struct TungsteniteSocket {
    tx: mpsc::UnboundedSender<Outgoing>,
    state: Arc<AtomicU8>,
}

impl Socket for TungsteniteSocket {
    fn send(&self, data: String) -> ChatResult<()> {
        if self.state.load(Ordering::SeqCst) != OPEN {
            return Err(ChatError::NotConnected);
        }
        self.tx
            .send(Outgoing::Text(data))
            .map_err(|_| ChatError::Socket("socket task has stopped".to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        let previous = self.state.fetch_max(CLOSING, Ordering::SeqCst);
        if previous >= CLOSING {
            return;
        }
        let _ = self.tx.send(Outgoing::Close(code, reason.to_string()));
    }

    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            CONNECTING => ReadyState::Connecting,
            OPEN => ReadyState::Open,
            CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// Connect, then pump frames in both directions until either side closes.
async fn run_socket(
    url: String,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    state: Arc<AtomicU8>,
    callbacks: SocketCallbacks,
) {
    debug!("Connecting WebSocket to {}", url);

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        command = rx.recv() => {
            // Closed (or dropped) before the handshake finished.
            state.store(CLOSED, Ordering::SeqCst);
            if let Some(Outgoing::Close(code, reason)) = command {
                callbacks.close(code, reason);
            }
            return;
        }
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!("WebSocket connect to {} failed: {}", url, e);
            state.store(CLOSED, Ordering::SeqCst);
            callbacks.error(e.to_string());
            callbacks.close(ABNORMAL_CLOSURE, e.to_string());
            return;
        }
    };

    // A close requested during the handshake already moved the state on.
    if state
        .compare_exchange(CONNECTING, OPEN, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("WebSocket to {} closed during handshake", url);
    } else {
        info!("WebSocket connected to {}", url);
        callbacks.open();
    }

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("WebSocket send to {} failed: {}", url, e);
                        state.store(CLOSED, Ordering::SeqCst);
                        callbacks.error(e.to_string());
                        callbacks.close(ABNORMAL_CLOSURE, e.to_string());
                        return;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!("WebSocket close frame to {} not delivered: {}", url, e);
                    }
                    state.store(CLOSED, Ordering::SeqCst);
                    callbacks.close(code, reason);
                    return;
                }
                None => {
                    // Handle dropped: nobody is listening any more.
                    let _ = sink.close().await;
                    state.store(CLOSED, Ordering::SeqCst);
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => callbacks.message(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => callbacks.message(text),
                    Err(_) => debug!("Dropping non-UTF-8 binary frame from {}", url),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    info!("WebSocket {} closed by peer ({}): {}", url, code, reason);
                    state.store(CLOSED, Ordering::SeqCst);
                    callbacks.close(code, reason);
                    return;
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("WebSocket error on {}: {}", url, e);
                    state.store(CLOSED, Ordering::SeqCst);
                    callbacks.error(e.to_string());
                    callbacks.close(ABNORMAL_CLOSURE, e.to_string());
                    return;
                }
                None => {
                    state.store(CLOSED, Ordering::SeqCst);
                    callbacks.close(ABNORMAL_CLOSURE, "connection reset");
                    return;
                }
            },
        }
    }
}
