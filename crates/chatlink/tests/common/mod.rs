//! Test utilities and common setup.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chatlink::{
    ChatClient, ChatClientConfig, ChatError, ChatResult, ReadyState, Socket, SocketCallbacks,
    SocketFactory, listener,
};
use parking_lot::Mutex;
use serde_json::Value;

/// In-memory socket driven by the test.
///
/// `close` only records the call; the close callback fires when the test
/// calls [`MockSocket::drop_connection`] or [`MockSocket::fail`].
pub struct MockSocket {
    url: String,
    state: Mutex<ReadyState>,
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<(u16, String)>>,
    callbacks: SocketCallbacks,
}

impl MockSocket {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn open(&self) {
        *self.state.lock() = ReadyState::Open;
        self.callbacks.open();
    }

    pub fn receive(&self, data: &str) {
        self.callbacks.message(data);
    }

    /// Transport failure: error followed by an abnormal close.
    pub fn fail(&self, message: &str) {
        *self.state.lock() = ReadyState::Closed;
        self.callbacks.error(message);
        self.callbacks.close(1006, message);
    }

    pub fn drop_connection(&self, code: u16) {
        *self.state.lock() = ReadyState::Closed;
        self.callbacks.close(code, "dropped");
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.closes.lock().clone()
    }
}

impl Socket for MockSocket {
    fn send(&self, data: String) -> ChatResult<()> {
        if *self.state.lock() != ReadyState::Open {
            return Err(ChatError::NotConnected);
        }
        self.sent.lock().push(data);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
        *self.state.lock() = ReadyState::Closed;
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.lock()
    }
}

/// Factory handing out [`MockSocket`]s and remembering each one.
#[derive(Default)]
pub struct MockSocketFactory {
    sockets: Mutex<Vec<Arc<MockSocket>>>,
    refuse: AtomicBool,
    during_create: Mutex<Option<CreateHook>>,
}

type CreateHook = Box<dyn Fn(&MockSocket) + Send + Sync>;

impl MockSocketFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `create` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Drive each new socket before `create` returns it, as a fast
    /// transport thread can.
    pub fn during_create(&self, hook: impl Fn(&MockSocket) + Send + Sync + 'static) {
        *self.during_create.lock() = Some(Box::new(hook));
    }

    pub fn count(&self) -> usize {
        self.sockets.lock().len()
    }

    pub fn socket(&self, index: usize) -> Arc<MockSocket> {
        self.sockets.lock()[index].clone()
    }

    pub fn last(&self) -> Arc<MockSocket> {
        self.sockets
            .lock()
            .last()
            .cloned()
            .expect("no socket created yet")
    }
}

impl SocketFactory for MockSocketFactory {
    fn create(&self, url: &str, callbacks: SocketCallbacks) -> ChatResult<Arc<dyn Socket>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChatError::Socket("connection refused".to_string()));
        }
        let socket = Arc::new(MockSocket {
            url: url.to_string(),
            state: Mutex::new(ReadyState::Connecting),
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            callbacks,
        });
        self.sockets.lock().push(socket.clone());
        if let Some(hook) = self.during_create.lock().as_ref() {
            hook(&socket);
        }
        Ok(socket)
    }
}

pub fn test_config() -> ChatClientConfig {
    ChatClientConfig {
        ws_base_url: "ws://chat.test".to_string(),
        chat_endpoint: "ws/chat".to_string(),
        max_reconnect_attempts: 3,
        reconnect_interval_ms: 1000,
    }
}

pub fn create_test_client() -> (ChatClient, Arc<MockSocketFactory>) {
    let factory = MockSocketFactory::new();
    let client = ChatClient::new(test_config(), factory.clone());
    (client, factory)
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Connect and open the socket the connect created.
pub async fn connect_open(client: &ChatClient, factory: &MockSocketFactory, session_id: &str) {
    let task = tokio::spawn({
        let client = client.clone();
        let session_id = session_id.to_string();
        async move { client.connect(&session_id).await }
    });
    settle().await;
    factory.last().open();
    task.await.unwrap().unwrap();
}

/// Collect every payload emitted for `event`.
pub fn record(client: &ChatClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on(
        event,
        listener(move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        }),
    );
    seen
}

pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}
