//! Session state and its persistence.
//!
//! The [`Session`] value is held by a [`SessionHandle`], created by the session
//! controller and handed to the request gateway and the realtime channel at
//! construction.  Nothing reads the session from ambient storage.  State
//! transitions are published on a `watch` channel so observers (a router, the
//! reducer loop) can react when the session ends.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{from_reader, to_writer_pretty};
use tokio::sync::watch;
use utf8path::Path;

use crate::error::{Error, Result};
use crate::types::User;

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The authenticated user.
    pub user: User,

    /// Opaque, short-lived bearer token.
    pub access_token: String,
}

impl Session {
    /// Creates a new session.
    pub fn new(user: User, access_token: impl Into<String>) -> Self {
        Self {
            user,
            access_token: access_token.into(),
        }
    }
}

/// Lifecycle of the session as seen by the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has been restored yet.
    Unknown,
    /// A session is present.  It may still be rejected by the server.
    Authenticated,
    /// No session; a login is required.
    Unauthenticated,
}

///////////////////////////////////////////// TokenStore /////////////////////////////////////////////

/// Persistence for the session across restarts.
pub trait TokenStore: Send + Sync {
    /// Reads the persisted session, if any.
    fn load(&self) -> Result<Option<Session>>;

    /// Persists the session, replacing any previous one.
    fn save(&self, session: &Session) -> Result<()>;

    /// Removes the persisted session.  Removing an absent session succeeds.
    fn clear(&self) -> Result<()>;
}

/// A token store that forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: Mutex<Option<Session>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `session`.
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.session.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.session.lock() = None;
        Ok(())
    }
}

/// A token store backed by a JSON file.
#[derive(Clone)]
pub struct FileTokenStore {
    path: Path<'static>,
}

impl FileTokenStore {
    /// Creates a store persisting to `path`.
    pub fn new(path: Path<'static>) -> Self {
        Self { path }
    }

    /// Returns the file backing this store.
    pub fn path(&self) -> &Path<'static> {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Session>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io("failed to open session file", err)),
        };
        let reader = BufReader::new(file);
        let stored: SessionFile = from_reader(reader).map_err(|err| {
            Error::serialization("failed to parse session file", Some(Box::new(err)))
        })?;
        Ok(Some(stored.session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // The file holds a bearer token; only the owner may read it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(&self.path)
            .map_err(|err| Error::io("failed to create session file", err))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|err| Error::io("failed to restrict session file", err))?;
        }
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &SessionFile::new(session)).map_err(|err| {
            Error::serialization("failed to serialize session", Some(Box::new(err)))
        })
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::io("failed to remove session file", err)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SessionFile {
    version: u8,
    session: Session,
}

impl SessionFile {
    fn new(session: &Session) -> Self {
        Self {
            version: 1,
            session: session.clone(),
        }
    }
}

//////////////////////////////////////////// SessionHandle ////////////////////////////////////////////

/// Shared, explicit holder of the current session.
///
/// Cloning a handle yields another reference to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    current: RwLock<Option<Session>>,
    state: watch::Sender<SessionState>,
    tokens: Arc<dyn TokenStore>,
}

impl SessionHandle {
    /// Creates a handle in the [`SessionState::Unknown`] state.
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        Self {
            inner: Arc::new(SessionInner {
                current: RwLock::new(None),
                state,
                tokens,
            }),
        }
    }

    /// Loads the persisted session without contacting the server.
    ///
    /// A persisted session is trusted as-is; a revoked token is only discovered
    /// when the first authorized call is rejected.
    pub fn restore(&self) -> Result<SessionState> {
        let restored = match self.inner.tokens.load() {
            Ok(restored) => restored,
            Err(err) => {
                self.inner.state.send_replace(SessionState::Unauthenticated);
                return Err(err);
            }
        };
        let state = if restored.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        *self.inner.current.write() = restored;
        self.inner.state.send_replace(state);
        Ok(state)
    }

    /// Installs a freshly authenticated session and persists it.
    pub fn establish(&self, session: Session) -> Result<()> {
        self.inner.tokens.save(&session)?;
        *self.inner.current.write() = Some(session);
        self.inner.state.send_replace(SessionState::Authenticated);
        Ok(())
    }

    /// Replaces the access token of the current session.
    ///
    /// The in-memory token is replaced even when persisting it fails.
    pub fn update_token(&self, access_token: &str) -> Result<()> {
        let updated = {
            let mut current = self.inner.current.write();
            let Some(session) = current.as_mut() else {
                return Err(Error::unauthenticated(
                    "session ended before the token could be renewed",
                ));
            };
            session.access_token = access_token.to_string();
            session.clone()
        };
        self.inner.tokens.save(&updated)
    }

    /// Ends the session locally and clears persisted state.
    pub fn terminate(&self) {
        *self.inner.current.write() = None;
        if let Err(err) = self.inner.tokens.clear() {
            tracing::warn!(error = %err, "failed to clear persisted session");
        }
        self.inner.state.send_replace(SessionState::Unauthenticated);
    }

    /// Moves an undecided session to [`SessionState::Unauthenticated`].
    pub(crate) fn settle_unauthenticated(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Unknown {
                *state = SessionState::Unauthenticated;
                true
            } else {
                false
            }
        });
    }

    /// Returns the current access token, if a session is present.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .current
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    /// Returns the authenticated user, if a session is present.
    pub fn user(&self) -> Option<User> {
        self.inner.current.read().as_ref().map(|s| s.user.clone())
    }

    /// Returns a copy of the current session.
    pub fn current(&self) -> Option<Session> {
        self.inner.current.read().clone()
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Subscribes to session state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("user", &self.user())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Session {
        Session::new(User::new("1", "test@gmail.com"), "token-1")
    }

    #[test]
    fn restore_without_persisted_session() {
        let handle = SessionHandle::new(Arc::new(MemoryTokenStore::new()));
        assert_eq!(handle.state(), SessionState::Unknown);
        assert_eq!(handle.restore().unwrap(), SessionState::Unauthenticated);
        assert!(handle.access_token().is_none());
    }

    #[test]
    fn restore_trusts_persisted_session() {
        let handle = SessionHandle::new(Arc::new(MemoryTokenStore::with_session(alice())));
        assert_eq!(handle.restore().unwrap(), SessionState::Authenticated);
        assert_eq!(handle.access_token().as_deref(), Some("token-1"));
        assert_eq!(handle.user().unwrap().email, "test@gmail.com");
    }

    #[test]
    fn update_token_persists() {
        let tokens = Arc::new(MemoryTokenStore::new());
        let handle = SessionHandle::new(tokens.clone());
        handle.establish(alice()).unwrap();
        handle.update_token("token-2").unwrap();
        assert_eq!(handle.access_token().as_deref(), Some("token-2"));
        assert_eq!(tokens.load().unwrap().unwrap().access_token, "token-2");
    }

    #[test]
    fn update_token_after_terminate_fails() {
        let handle = SessionHandle::new(Arc::new(MemoryTokenStore::new()));
        handle.establish(alice()).unwrap();
        handle.terminate();
        assert!(handle.update_token("token-2").unwrap_err().is_unauthenticated());
        assert!(handle.access_token().is_none());
    }

    #[test]
    fn terminate_clears_store_and_notifies() {
        let tokens = Arc::new(MemoryTokenStore::new());
        let handle = SessionHandle::new(tokens.clone());
        let mut state = handle.subscribe();
        handle.establish(alice()).unwrap();
        assert_eq!(*state.borrow_and_update(), SessionState::Authenticated);

        handle.terminate();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), SessionState::Unauthenticated);
        assert!(tokens.load().unwrap().is_none());
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let path = std::env::temp_dir().join(format!("yatri-session-{}.json", std::process::id()));
        let path = Path::from(path.to_string_lossy().into_owned());
        let store = FileTokenStore::new(path);

        assert!(store.load().unwrap().is_none());
        store.save(&alice()).unwrap();
        assert_eq!(store.load().unwrap(), Some(alice()));
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("yatri-private-{}.json", std::process::id()));
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let store = FileTokenStore::new(Path::from(path.to_string_lossy().into_owned()));

        store.save(&alice()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        store.clear().unwrap();
        assert_eq!(mode & 0o777, 0o600);
    }
}
