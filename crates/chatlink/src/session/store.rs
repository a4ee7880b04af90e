//! Persistence of the current session id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use tokio::fs;

use super::SessionResult;

/// Remembers which session the client is bound to.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The stored session id, if any.
    async fn load(&self) -> SessionResult<Option<String>>;

    /// Replace the stored session id.
    async fn save(&self, session_id: &str) -> SessionResult<()>;

    /// Forget the stored session id. Clearing an empty store is not an error.
    async fn clear(&self) -> SessionResult<()>;
}

/// Session id kept in a plain text file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> SessionResult<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, format!("{}\n", session_id)).await?;
        debug!("Stored session {} in {}", session_id, self.path.display());
        Ok(())
    }

    async fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session_id: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Mutex::new(Some(session_id.into())),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> SessionResult<Option<String>> {
        Ok(self.session_id.lock().clone())
    }

    async fn save(&self, session_id: &str) -> SessionResult<()> {
        *self.session_id.lock() = Some(session_id.to_string());
        Ok(())
    }

    async fn clear(&self) -> SessionResult<()> {
        *self.session_id.lock() = None;
        Ok(())
    }
}
