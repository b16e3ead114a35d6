//! The session controller.
//!
//! [`SessionController`] owns the session lifecycle.  Logging in starts the
//! realtime channel and the reducer task that applies its events to the
//! [`ConversationStore`]; logging out, or losing the session to a failed
//! refresh, stops both and clears the store.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utf8path::Path;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::gateway::RequestGateway;
use crate::realtime::{ChannelState, EventSource, RealtimeChannel, ReconnectPolicy, SseEventSource};
use crate::session::{
    FileTokenStore, MemoryTokenStore, Session, SessionHandle, SessionState, TokenStore,
};
use crate::store::{AppendOutcome, ConversationStore, StoreChange};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::types::{
    Connection, FileAttachment, Message, MessageId, RealtimeEvent, SendMessageRequest,
    StatusMessage, User, UserId,
};

const CHANGE_CAPACITY: usize = 256;

/// Result of [`SessionController::connect_by_email`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// The user that was found.
    pub user: User,
    /// False if the two users were already connected.
    pub created: bool,
}

/// Result of [`SessionController::load_history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// The history was installed; these are the visible messages.
    Loaded(Vec<Message>),
    /// The focus moved before the history arrived, so it was dropped.
    Superseded,
}

struct SyncTask {
    channel: RealtimeChannel,
    reducer: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Orchestrates login, logout, restore and the realtime sync loop.
pub struct SessionController {
    config: ClientConfig,
    session: SessionHandle,
    gateway: Arc<RequestGateway>,
    source: Arc<dyn EventSource>,
    store: Arc<Mutex<ConversationStore>>,
    changes: broadcast::Sender<StoreChange>,
    sync: Mutex<Option<SyncTask>>,
}

impl SessionController {
    /// Creates a controller from explicit collaborators.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        source: Arc<dyn EventSource>,
        tokens: Arc<dyn TokenStore>,
    ) -> Self {
        let session = SessionHandle::new(tokens);
        let gateway = Arc::new(RequestGateway::new(transport, session.clone()));
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            config,
            session,
            gateway,
            source,
            store: Arc::new(Mutex::new(ConversationStore::new())),
            changes,
            sync: Mutex::new(None),
        }
    }

    /// Creates a controller that talks to the configured server.
    ///
    /// The session is persisted to `session_file` when one is configured.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let source = Arc::new(SseEventSource::new(&config)?);
        let tokens: Arc<dyn TokenStore> = match &config.session_file {
            Some(path) => Arc::new(FileTokenStore::new(Path::from(path.clone()))),
            None => Arc::new(MemoryTokenStore::new()),
        };
        Ok(Self::new(config, transport, source, tokens))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the session handle.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Returns the request gateway.
    pub fn gateway(&self) -> &Arc<RequestGateway> {
        &self.gateway
    }

    /// Reads the persisted session and, if there is one, starts syncing.
    ///
    /// The server is not contacted; an expired token is discovered by the
    /// first rejected call.
    pub async fn restore(&self) -> Result<SessionState> {
        let state = self.session.restore()?;
        if state == SessionState::Authenticated {
            tracing::info!("restored persisted session");
            self.start_sync();
        }
        Ok(state)
    }

    /// Signs in and starts syncing.
    ///
    /// On failure the session state is left as it was (or settled to
    /// unauthenticated if it was still unknown) and the server's message is
    /// returned.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let response = match self.gateway.signin(email, password).await {
            Ok(response) => response,
            Err(err) => {
                self.session.settle_unauthenticated();
                tracing::warn!(%email, error = %err, "login failed");
                return Err(err);
            }
        };

        self.stop_sync().await;
        self.clear_store();
        let user = response.user.clone();
        self.session
            .establish(Session::new(response.user, response.access_token))?;
        tracing::info!(user = %user.email, "logged in");
        self.start_sync();
        Ok(user)
    }

    /// Ends the session.
    ///
    /// The server is told on a best-effort basis; local state is cleared
    /// whether or not that succeeds.
    pub async fn logout(&self) {
        if self.session.access_token().is_some() {
            if let Err(err) = self.gateway.logout().await {
                tracing::warn!(error = %err, "server logout failed");
            }
        }
        self.stop_sync().await;
        self.clear_store();
        self.session.terminate();
        tracing::info!("logged out");
    }

    /// Registers a new account.  Session state is not affected.
    pub async fn signup(&self, email: &str, password: &str) -> Result<StatusMessage> {
        self.gateway.signup(email, password).await
    }

    /// Confirms an account with its one-time password.
    pub async fn verify(&self, email: &str, otp: &str) -> Result<StatusMessage> {
        self.gateway.verify(email, otp).await
    }

    /// Returns the current session state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Subscribes to session state transitions.
    ///
    /// A move to [`SessionState::Unauthenticated`] is the cue to return to the
    /// login screen.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Returns the logged-in user.
    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    /// Subscribes to store changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Returns a copy of the visible messages.
    pub fn messages(&self) -> Vec<Message> {
        self.store.lock().messages().to_vec()
    }

    /// Returns a copy of the connection list.
    pub fn connections(&self) -> Vec<Connection> {
        self.store.lock().connections().to_vec()
    }

    /// Returns the focused recipient.
    pub fn focus(&self) -> Option<UserId> {
        self.store.lock().focus().cloned()
    }

    /// Returns the realtime channel state, if syncing.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.sync.lock().as_ref().map(|sync| sync.channel.state())
    }

    /// Reloads the connection list from the server.
    pub async fn refresh_connections(&self) -> Result<Vec<Connection>> {
        let connections = self.gateway.list_connections().await?;
        let mut store = self.store.lock();
        store.replace_connections(connections);
        Ok(store.connections().to_vec())
    }

    /// Looks a user up by email.
    pub async fn search_user(&self, email: &str) -> Result<User> {
        self.gateway.search_user(email).await
    }

    /// Finds a user, connects with them and opens their conversation.
    ///
    /// An existing connection is not an error.
    pub async fn connect_by_email(&self, email: &str) -> Result<ConnectOutcome> {
        let user = self.gateway.search_user(email).await?;
        let created = match self.gateway.create_connection(&user.id).await {
            Ok(_) => true,
            Err(err) if err.is_connection_already_exists() => {
                tracing::debug!(user = %user.email, "already connected");
                false
            }
            Err(err) => return Err(err),
        };
        self.refresh_connections().await?;
        self.load_history(&user.id).await?;
        Ok(ConnectOutcome { user, created })
    }

    /// Focuses `recipient` and loads the conversation history.
    ///
    /// Realtime messages for other conversations are ignored from this point
    /// on.  If the focus moves again before the response arrives, the
    /// response is dropped and [`HistoryOutcome::Superseded`] is returned.
    pub async fn load_history(&self, recipient: &UserId) -> Result<HistoryOutcome> {
        let ticket = self.store.lock().set_focus(recipient.clone());
        let history = match self.gateway.history(recipient).await {
            Ok(history) => history,
            Err(err) => {
                self.store.lock().abandon_history(&ticket);
                return Err(err);
            }
        };
        let loaded = {
            let mut store = self.store.lock();
            if store.apply_history(&ticket, history) {
                Some(store.messages().to_vec())
            } else {
                None
            }
        };
        match loaded {
            Some(messages) => {
                let _ = self.changes.send(StoreChange::HistoryLoaded {
                    recipient: recipient.clone(),
                    count: messages.len(),
                });
                Ok(HistoryOutcome::Loaded(messages))
            }
            None => Ok(HistoryOutcome::Superseded),
        }
    }

    /// Uploads an attachment to be referenced by a later message.
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: impl Into<Bytes>,
    ) -> Result<FileAttachment> {
        self.gateway.upload_file(file_name, bytes).await
    }

    /// Reads `path` and uploads it as an attachment.
    pub async fn upload_path(&self, path: &Path<'_>) -> Result<FileAttachment> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| Error::io(format!("failed to read {path}"), err))?;
        let name = path
            .as_str()
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("attachment")
            .to_string();
        self.upload_file(&name, bytes).await
    }

    /// Sends a message to the focused recipient.
    ///
    /// The message is added to the store only once the server acknowledges
    /// it, and at most once however the realtime echo interleaves.
    pub async fn send_message(
        &self,
        content: &str,
        attachment: Option<&FileAttachment>,
    ) -> Result<Message> {
        let Some(recipient) = self.focus() else {
            return Err(Error::validation(
                "no conversation is open",
                Some("receiver_id".to_string()),
            ));
        };
        let content = match (content.trim().is_empty(), attachment) {
            (true, None) => {
                return Err(Error::validation(
                    "message is empty",
                    Some("content".to_string()),
                ));
            }
            (true, Some(file)) => format!("Sent an attachment: {}", file.original_name),
            (false, _) => content.to_string(),
        };

        let request = SendMessageRequest {
            receiver_id: recipient,
            content,
            file_id: attachment.map(|file| file.id.clone()),
        };
        let message = self.gateway.send_message(&request).await?;
        let outcome = self.store.lock().append(message.clone());
        if outcome == AppendOutcome::Appended {
            let _ = self.changes.send(StoreChange::MessageAppended(message.clone()));
        }
        Ok(message)
    }

    /// Deletes a message on the server, then locally.
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        self.gateway.delete_message(id).await?;
        let removed = self.store.lock().remove(id);
        if removed {
            let _ = self.changes.send(StoreChange::MessageRemoved(id.clone()));
        }
        Ok(())
    }

    fn start_sync(&self) {
        let mut sync = self.sync.lock();
        if let Some(task) = sync.as_ref() {
            if !task.cancel.is_cancelled() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            self.source.clone(),
            self.gateway.clone(),
            ReconnectPolicy::from_config(&self.config),
            events_tx,
            cancel.child_token(),
        );
        let reducer = tokio::spawn(reduce(
            events_rx,
            self.store.clone(),
            self.changes.clone(),
            self.session.subscribe(),
            cancel.clone(),
        ));
        *sync = Some(SyncTask {
            channel,
            reducer,
            cancel,
        });
    }

    async fn stop_sync(&self) {
        let task = self.sync.lock().take();
        if let Some(mut task) = task {
            task.cancel.cancel();
            task.channel.close().await;
            if let Err(err) = (&mut task.reducer).await {
                tracing::warn!(error = %err, "reducer task ended abnormally");
            }
        }
    }

    fn clear_store(&self) {
        self.store.lock().clear();
        let _ = self.changes.send(StoreChange::Cleared);
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish()
    }
}

/// Applies realtime events to the store until cancelled or the session ends.
async fn reduce(
    mut events: mpsc::UnboundedReceiver<RealtimeEvent>,
    store: Arc<Mutex<ConversationStore>>,
    changes: broadcast::Sender<StoreChange>,
    mut session: watch::Receiver<SessionState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let change = store.lock().apply(event);
                if let Some(change) = change {
                    let _ = changes.send(change);
                }
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *session.borrow_and_update();
                if state == SessionState::Unauthenticated {
                    tracing::info!("session ended; clearing conversation state");
                    store.lock().clear();
                    let _ = changes.send(StoreChange::Cleared);
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}
