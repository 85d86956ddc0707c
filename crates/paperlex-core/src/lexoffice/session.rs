use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::auth::{AuthState, Credentials};
use super::error::UploadError;
use super::provider::AuthProvider;

/// Default session file name in the cache directory
pub const SESSION_FILE: &str = "session.json";

/// Persisted sessions older than this are not reused.
/// lexoffice drops idle web sessions after a few hours.
pub const DEFAULT_SESSION_MAX_AGE_MINUTES: i64 = 240;

#[derive(Default)]
struct Slot {
    state: Option<AuthState>,
    /// The store is read at most once per process. After a discard the
    /// on-disk copy is the session just rejected, even if clearing it failed.
    store_consulted: bool,
}

/// Single-slot cache for the lexoffice session.
///
/// The slot lock is held across "check, else authenticate, then store", so
/// concurrent uploads never trigger more than one login at a time: callers
/// queued behind a login pick up the state it produced.
pub struct SessionCache {
    provider: AuthProvider,
    slot: Mutex<Slot>,
    store: Option<SessionStore>,
}

impl SessionCache {
    pub fn new(provider: AuthProvider) -> Self {
        Self {
            provider,
            slot: Mutex::new(Slot::default()),
            store: None,
        }
    }

    /// Persist the session across restarts
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Current session, logging in with `credentials` when the slot is empty.
    /// `None` when there is no session and none could be created.
    pub async fn get(&self, credentials: Option<&Credentials>) -> Option<AuthState> {
        match self.acquire(credentials).await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(error = %e, "No lexoffice session available");
                None
            }
        }
    }

    /// Like `get`, but says why no session is available.
    pub async fn acquire(&self, credentials: Option<&Credentials>) -> Result<AuthState, UploadError> {
        let mut slot = self.slot.lock().await;

        if let Some(state) = slot.state.as_ref() {
            return Ok(state.clone());
        }

        if !slot.store_consulted {
            slot.store_consulted = true;
            if let Some(state) = self.load_persisted().await {
                slot.state = Some(state.clone());
                return Ok(state);
            }
        }

        let Some(credentials) = credentials else {
            return Err(UploadError::AuthUnavailable);
        };

        let state = self.provider.authenticate(credentials).await?;
        self.persist(&state).await;
        slot.state = Some(state.clone());
        Ok(state)
    }

    /// Drop the cached session unconditionally.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        slot.store_consulted = true;
        if slot.state.take().is_some() {
            info!("lexoffice session invalidated");
        }
        self.clear_persisted().await;
    }

    /// Drop the cached session only if it is still `stale`.
    ///
    /// A concurrent upload may already have replaced the session after the
    /// same 401; that newer session is kept.
    pub async fn discard(&self, stale: &AuthState) {
        let mut slot = self.slot.lock().await;
        if slot.state.as_ref() == Some(stale) {
            slot.state = None;
            self.clear_persisted().await;
            info!("lexoffice session invalidated");
        } else {
            debug!("Stale lexoffice session already replaced");
        }
    }

    /// Replace the cached session wholesale.
    pub async fn replace(&self, state: AuthState) {
        let mut slot = self.slot.lock().await;
        self.persist(&state).await;
        slot.state = Some(state);
        slot.store_consulted = true;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.slot.lock().await.state.is_some()
    }

    async fn load_persisted(&self) -> Option<AuthState> {
        let store = self.store.as_ref()?;
        match store.load().await {
            Ok(Some(state)) => {
                info!(obtained_at = %state.obtained_at(), age_minutes = state.age().num_minutes(), "Reusing persisted lexoffice session");
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session file");
                None
            }
        }
    }

    async fn persist(&self, state: &AuthState) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(state).await {
                warn!(error = %e, "Failed to save lexoffice session");
            }
        }
    }

    async fn clear_persisted(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!(path = %store.path().display(), error = %e, "Failed to remove session file");
            }
        }
    }
}

/// On-disk copy of the session so a restart does not force a new login.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: Duration::minutes(DEFAULT_SESSION_MAX_AGE_MINUTES),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the session from disk. Expired or empty sessions are ignored.
    pub async fn load(&self) -> Result<Option<AuthState>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read session file"),
        };
        let state: AuthState = serde_json::from_str(&contents).context("Failed to parse session file")?;

        if state.is_empty() || state.age() > self.max_age {
            debug!(path = %self.path.display(), "Persisted session expired");
            return Ok(None);
        }
        Ok(Some(state))
    }

    pub async fn save(&self, state: &AuthState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&self.path, contents)
            .await
            .context("Failed to write session file")?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}
