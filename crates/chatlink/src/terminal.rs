//! Terminal front end: prints streamed answers and reads user input.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chatlink::client::events;
use chatlink::session::SessionManager;
use chatlink::{ChatClient, Listener, listener};
use chatlink_protocol::{ChatHistory, StreamEnd, StreamError, StreamMetadata, StreamToken};

const HELP: &str = "Commands: /new (start a new session), /history, /help, /quit";
const CONNECTION_LOST: &str = "connection lost before the answer finished";

/// How waiting for a response stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamOutcome {
    /// `stream_end` arrived.
    Finished,
    /// `stream_error` arrived.
    Failed,
    /// The socket closed before either frame.
    ConnectionLost,
    TimedOut,
    Interrupted,
}

/// Watches the client for the frame that ends one answer.
///
/// Attach before sending so nothing can slip past; listeners are removed on
/// drop.
struct StreamWatch {
    client: ChatClient,
    listeners: Vec<(&'static str, Listener)>,
    outcomes: mpsc::UnboundedReceiver<StreamOutcome>,
}

impl StreamWatch {
    fn attach(client: &ChatClient) -> Self {
        let (tx, outcomes) = mpsc::unbounded_channel();

        let report = |outcome: StreamOutcome| {
            let tx = tx.clone();
            listener(move |_| {
                let _ = tx.send(outcome);
                Ok(())
            })
        };
        let lost = {
            let tx = tx.clone();
            listener(move |payload| {
                if payload["connected"] == false {
                    let _ = tx.send(StreamOutcome::ConnectionLost);
                }
                Ok(())
            })
        };

        let listeners = vec![
            (events::STREAM_END, report(StreamOutcome::Finished)),
            (events::STREAM_ERROR, report(StreamOutcome::Failed)),
            (events::CONNECTION, lost),
        ];
        for (event, handler) in &listeners {
            client.on(event, handler.clone());
        }

        Self {
            client: client.clone(),
            listeners,
            outcomes,
        }
    }

    /// Wait for the first terminal event, the timeout or Ctrl-C.
    async fn wait(&mut self, timeout: Duration) -> StreamOutcome {
        let next = async {
            self.outcomes
                .recv()
                .await
                .unwrap_or(StreamOutcome::ConnectionLost)
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, next) => {
                result.unwrap_or(StreamOutcome::TimedOut)
            }
            _ = tokio::signal::ctrl_c() => StreamOutcome::Interrupted,
        }
    }
}

impl Drop for StreamWatch {
    fn drop(&mut self) {
        for (event, handler) in &self.listeners {
            self.client.off(event, handler);
        }
    }
}

/// Interactive chat loop on stdin.
pub async fn run_chat(
    client: &ChatClient,
    sessions: &SessionManager,
    session_id: String,
    timeout: Duration,
) -> Result<()> {
    attach_printer(client);
    client
        .connect(&session_id)
        .await
        .with_context(|| format!("connecting to {}", client.config().connection_url(&session_id)))?;

    println!("Connected to session {session_id}");
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/history" => match client.session_id() {
                Some(id) => match sessions.history(Some(&id)).await {
                    Ok(history) => print_history(&history),
                    Err(e) => eprintln!("Failed to fetch history: {e}"),
                },
                None => eprintln!("No active session"),
            },
            "/new" => {
                let id = sessions.new_session().await?;
                client.connect(&id).await.context("connecting to new session")?;
                println!("Started session {id}");
            }
            text => {
                let mut watch = StreamWatch::attach(client);
                if let Err(e) = client.send_message(text) {
                    eprintln!("{e}");
                    continue;
                }
                match watch.wait(timeout).await {
                    StreamOutcome::Finished | StreamOutcome::Failed => {}
                    StreamOutcome::ConnectionLost => eprintln!("\n{CONNECTION_LOST}"),
                    StreamOutcome::TimedOut => {
                        eprintln!("\nNo complete answer within {}s", timeout.as_secs())
                    }
                    StreamOutcome::Interrupted => {
                        println!();
                        break;
                    }
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

/// Send one message, print the answer and return once it has finished.
pub async fn send_once(
    client: &ChatClient,
    session_id: &str,
    message: &str,
    timeout: Duration,
) -> Result<()> {
    attach_printer(client);

    client
        .connect(session_id)
        .await
        .with_context(|| format!("connecting to {}", client.config().connection_url(session_id)))?;

    let mut watch = StreamWatch::attach(client);
    client.send_message(message)?;
    let outcome = watch.wait(timeout).await;
    drop(watch);
    client.disconnect();

    match outcome {
        StreamOutcome::Finished => Ok(()),
        StreamOutcome::Failed => bail!("the server answered with an error"),
        StreamOutcome::ConnectionLost => bail!(CONNECTION_LOST),
        StreamOutcome::TimedOut => bail!("no complete answer within {}s", timeout.as_secs()),
        StreamOutcome::Interrupted => bail!("interrupted"),
    }
}

pub fn print_history(history: &ChatHistory) {
    if history.messages.is_empty() {
        println!("(no messages in session {})", history.session_id);
        return;
    }
    for message in &history.messages {
        match &message.timestamp {
            Some(ts) => println!("[{}] {}: {}", ts, message.role, message.content),
            None => println!("{}: {}", message.role, message.content),
        }
    }
}

/// Print streamed frames and connection changes as they arrive.
fn attach_printer(client: &ChatClient) {
    client.on(
        events::STREAM_TOKEN,
        listener(|frame| {
            let Some(token) = decode::<StreamToken>(frame) else {
                return Ok(());
            };
            let mut stdout = io::stdout().lock();
            write!(stdout, "{}", token.token)?;
            stdout.flush()?;
            Ok(())
        }),
    );

    client.on(
        events::STREAM_END,
        listener(|frame| {
            let Some(end) = decode::<StreamEnd>(frame) else {
                return Ok(());
            };
            println!();
            println!(
                "  [{} tokens, {:.0} ms]",
                end.total_tokens, end.processing_time_ms
            );
            Ok(())
        }),
    );

    client.on(
        events::STREAM_ERROR,
        listener(|frame| {
            let Some(error) = decode::<StreamError>(frame) else {
                return Ok(());
            };
            eprintln!();
            eprintln!("Error [{}]: {}", error.error_code, error.message);
            for solution in &error.solutions {
                eprintln!("  - {solution}");
            }
            Ok(())
        }),
    );

    client.on(
        events::METADATA,
        listener(|frame| {
            let Some(meta) = decode::<StreamMetadata>(frame) else {
                return Ok(());
            };
            debug!(
                "search results: {}, ranked: {}, reranked: {}",
                meta.search_results, meta.ranked_results, meta.reranking_applied
            );
            Ok(())
        }),
    );

    client.on(
        events::RECONNECTING,
        listener(|payload| {
            eprintln!(
                "\nConnection lost, reconnecting in {}ms (attempt {})",
                payload["delay_ms"], payload["attempt"]
            );
            Ok(())
        }),
    );

    client.on(
        events::RECONNECT_FAILED,
        listener(|payload| {
            eprintln!(
                "\nCould not reconnect after {} attempts; restart to try again",
                payload["attempts"]
            );
            Ok(())
        }),
    );

    client.on(
        events::PARSE_ERROR,
        listener(|payload| {
            warn!("Ignored malformed frame: {}", payload["error"]);
            Ok(())
        }),
    );
}

/// Decode a frame for display. Malformed frames are logged and skipped so
/// later listeners still see them.
fn decode<T: serde::de::DeserializeOwned>(frame: &Value) -> Option<T> {
    match serde_json::from_value(frame.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Cannot display {} frame: {}", frame["type"], e);
            None
        }
    }
}

fn prompt() {
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "> ");
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use chatlink::{
        ChatClientConfig, ChatError, ChatResult, ReadyState, Socket, SocketCallbacks,
        SocketFactory,
    };
    use parking_lot::Mutex;
    use tokio::task::JoinHandle;

    use super::*;

    #[derive(Default)]
    struct FakeSocket {
        open: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl Socket for FakeSocket {
        fn send(&self, data: String) -> ChatResult<()> {
            if !self.open.load(Ordering::SeqCst) {
                return Err(ChatError::NotConnected);
            }
            self.sent.lock().push(data);
            Ok(())
        }

        fn close(&self, _code: u16, _reason: &str) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn ready_state(&self) -> ReadyState {
            if self.open.load(Ordering::SeqCst) {
                ReadyState::Open
            } else {
                ReadyState::Closed
            }
        }
    }

    /// Keeps the callbacks of the one socket it creates so the test can play
    /// the server.
    #[derive(Default)]
    struct FakeServer {
        connection: Mutex<Option<(Arc<FakeSocket>, SocketCallbacks)>>,
    }

    impl FakeServer {
        fn with(&self, f: impl FnOnce(&FakeSocket, &SocketCallbacks)) {
            let connection = self.connection.lock();
            let (socket, callbacks) = connection.as_ref().expect("no socket created");
            f(socket, callbacks);
        }

        fn accept(&self) {
            self.with(|socket, callbacks| {
                socket.open.store(true, Ordering::SeqCst);
                callbacks.open();
            });
        }

        fn push(&self, frame: Value) {
            self.with(|_, callbacks| callbacks.message(frame.to_string()));
        }

        fn drop_connection(&self, code: u16) {
            self.with(|socket, callbacks| {
                socket.open.store(false, Ordering::SeqCst);
                callbacks.close(code, "dropped");
            });
        }

        fn sent(&self) -> usize {
            self.with_sent(|sent| sent.len())
        }

        fn with_sent<T>(&self, f: impl FnOnce(&[String]) -> T) -> T {
            let connection = self.connection.lock();
            let (socket, _) = connection.as_ref().expect("no socket created");
            f(&socket.sent.lock())
        }
    }

    impl SocketFactory for FakeServer {
        fn create(&self, _url: &str, callbacks: SocketCallbacks) -> ChatResult<Arc<dyn Socket>> {
            let socket = Arc::new(FakeSocket::default());
            *self.connection.lock() = Some((socket.clone(), callbacks));
            Ok(socket)
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Start `send_once` and let it connect and send.
    async fn start_send() -> (Arc<FakeServer>, JoinHandle<Result<()>>) {
        let server = Arc::new(FakeServer::default());
        let client = ChatClient::new(ChatClientConfig::default(), server.clone());
        let task = tokio::spawn(async move {
            send_once(&client, "sess-1", "What is Rust?", Duration::from_secs(5)).await
        });

        settle().await;
        server.accept();
        settle().await;
        assert_eq!(server.sent(), 1);
        (server, task)
    }

    fn token(text: &str) -> Value {
        serde_json::json!({"type": "stream_token", "message_id": "m", "token": text})
    }

    #[tokio::test]
    async fn test_send_once_succeeds_on_stream_end() {
        let (server, task) = start_send().await;

        server.push(token("A systems language"));
        server.push(serde_json::json!({
            "type": "stream_end",
            "message_id": "m",
            "total_tokens": 3,
            "processing_time_ms": 8.0,
        }));

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_send_once_fails_on_stream_error() {
        let (server, task) = start_send().await;

        server.push(serde_json::json!({
            "type": "stream_error",
            "message_id": "m",
            "error_code": "LLM_TIMEOUT",
            "message": "the model did not answer",
            "solutions": [],
        }));

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "the server answered with an error");
    }

    #[tokio::test]
    async fn test_send_once_fails_when_connection_drops_mid_answer() {
        let (server, task) = start_send().await;

        server.push(token("partial"));
        server.drop_connection(1006);

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), CONNECTION_LOST);
    }

    #[tokio::test]
    async fn test_send_once_fails_on_normal_close_mid_answer() {
        let (server, task) = start_send().await;

        server.drop_connection(1000);

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), CONNECTION_LOST);
    }

    #[tokio::test]
    async fn test_malformed_end_frame_still_finishes() {
        let (server, task) = start_send().await;

        // Missing `message_id`: the printer cannot show it, the watch still ends.
        server.push(serde_json::json!({"type": "stream_end"}));

        task.await.unwrap().unwrap();
    }
}
