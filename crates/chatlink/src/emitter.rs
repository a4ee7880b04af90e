//! Listener registry keyed by event name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ChatError, ChatResult};

/// A registered event handler.
///
/// Listeners are identified by their `Arc` allocation: keep a clone of the
/// `Arc` you pass to [`EventEmitter::on`] to remove it later.
pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Synchronous pub/sub keyed by event name.
///
/// Listeners run in registration order. The first listener that returns an
/// error aborts the rest of that dispatch and the error is handed back to the
/// caller of [`emit`](Self::emit).
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Registering the same listener twice makes it fire twice.
    pub fn on(&self, event: &str, listener: Listener) {
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove every registration of `listener` under `event`.
    pub fn off(&self, event: &str, listener: &Listener) {
        let mut listeners = self.listeners.lock();
        if let Some(registered) = listeners.get_mut(event) {
            registered.retain(|l| !same_listener(l, listener));
            if registered.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Call the listeners registered for `event` with `payload`.
    ///
    /// The registry is snapshotted before dispatch, so listeners may register
    /// or remove listeners; changes take effect from the next emit.
    pub fn emit(&self, event: &str, payload: &Value) -> ChatResult<()> {
        let snapshot = match self.listeners.lock().get(event) {
            Some(registered) => registered.clone(),
            None => return Ok(()),
        };

        for listener in snapshot {
            listener(payload).map_err(|source| ChatError::Listener {
                event: event.to_string(),
                source: source.into(),
            })?;
        }
        Ok(())
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Drop all listeners for all events.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

/// Compare listeners by allocation, ignoring vtable pointers.
fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
