//! Identity/session state and where it is persisted.

use std::{
    fs,
    path::PathBuf,
    sync::{Mutex, PoisonError, RwLock},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ClientError, Result},
    http::AuthContext,
    models::{SessionTokens, UserProfile},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub csrf_token: String,
    pub user: Option<UserProfile>,
}

impl Default for Session {
    fn default() -> Self {
        Session {
            access_token: None,
            refresh_token: None,
            csrf_token: new_csrf_token(),
            user: None,
        }
    }
}

pub fn new_csrf_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Durable storage for the session, the desktop counterpart of browser
/// local storage.
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file on disk.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage { path: path.into() }
    }
}

impl TokenStorage for FileStorage {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ClientError::Storage(format!("{}: {}", self.path.display(), e)))?;
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                log::warn!("Ignoring unreadable session file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string_pretty(session)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        fs::write(&self.path, raw)
            .map_err(|e| ClientError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(ClientError::Storage(format!("{}: {}", self.path.display(), e)))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<Session>>,
}

impl TokenStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// `exp` claim of a JWT, read without verifying the signature.
pub fn token_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Expiry {
        exp: i64,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<Expiry>(&bytes).ok().map(|claims| claims.exp)
}

/// In-memory session backed by a [`TokenStorage`]. Writes go through to
/// storage; storage failures are logged and never lose the in-memory state.
pub struct SessionStore {
    state: RwLock<Session>,
    storage: Box<dyn TokenStorage>,
}

impl SessionStore {
    pub fn new(storage: Box<dyn TokenStorage>) -> Self {
        let session = match storage.load() {
            Ok(session) => session.unwrap_or_default(),
            Err(e) => {
                log::warn!("Could not restore session: {}", e);
                Session::default()
            }
        };
        SessionStore {
            state: RwLock::new(session),
            storage,
        }
    }

    pub fn in_memory() -> Self {
        SessionStore::new(Box::new(MemoryStorage::default()))
    }

    pub fn snapshot(&self) -> Session {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Immutable auth headers for one request.
    pub fn context(&self) -> AuthContext {
        let session = self.state.read().unwrap_or_else(PoisonError::into_inner);
        AuthContext {
            access_token: session.access_token.clone(),
            csrf_token: Some(session.csrf_token.clone()),
        }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_token
            .clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).user.clone()
    }

    fn update(&self, apply: impl FnOnce(&mut Session)) {
        let snapshot = {
            let mut session = self.state.write().unwrap_or_else(PoisonError::into_inner);
            apply(&mut session);
            session.clone()
        };
        if let Err(e) = self.storage.save(&snapshot) {
            log::warn!("Could not persist session: {}", e);
        }
    }

    pub fn set_tokens(&self, tokens: SessionTokens) {
        self.update(|session| {
            session.access_token = Some(tokens.access_token);
            session.refresh_token = Some(tokens.refresh_token);
            session.csrf_token = tokens.csrf_token;
        });
    }

    pub fn set_user(&self, user: UserProfile) {
        self.update(|session| session.user = Some(user));
    }

    /// Drops tokens and user, and rotates the CSRF token.
    pub fn clear(&self) {
        {
            let mut session = self.state.write().unwrap_or_else(PoisonError::into_inner);
            *session = Session::default();
        }
        if let Err(e) = self.storage.clear() {
            log::warn!("Could not clear stored session: {}", e);
        }
    }

    /// True iff an access token is present and its `exp` is in the future.
    /// The refresh token plays no part.
    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .as_deref()
            .and_then(token_expiry)
            .is_some_and(|exp| exp > Utc::now().timestamp())
    }
}
