//! The realtime channel.
//!
//! One persistent, bearer-authenticated event stream per session.  Decoded
//! [`RealtimeEvent`]s are pushed onto a single consumer queue; the channel
//! never touches the conversation store itself.  Lost connections are
//! re-established with capped exponential backoff.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client as ReqwestClient;
use reqwest::header::{self, HeaderValue};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::gateway::{RequestGateway, process_error_response};
use crate::observability::{
    REALTIME_BACKOFF, REALTIME_CONNECTS, REALTIME_EVENTS, REALTIME_PARSE_ERRORS,
    REALTIME_RECONNECTS,
};
use crate::sse::{SseFrame, process_sse};
use crate::transport::ApiResponse;
use crate::types::RealtimeEvent;

/// SSE event name every push event is published under.
pub const EVENT_NAME: &str = "new_message";

/// A stream of decoded push events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RealtimeEvent>> + Send>>;

/// Opens authenticated event streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens a stream authenticated with `access_token`.
    ///
    /// A handshake the server rejects for its credentials must fail with
    /// [`Error::Authentication`].  Undecodable events are yielded as
    /// [`Error::Serialization`] items; any other error item ends the stream.
    async fn connect(&self, access_token: &str) -> Result<EventStream>;
}

////////////////////////////////////////// SseEventSource //////////////////////////////////////////

/// [`EventSource`] over Server-Sent Events.
#[derive(Debug, Clone)]
pub struct SseEventSource {
    client: ReqwestClient,
    url: Url,
}

impl SseEventSource {
    /// Creates a source for the configured realtime endpoint.
    ///
    /// The stream is long-lived, so only the connect phase is bounded by the
    /// configured timeout.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            url: config.realtime_url()?,
        })
    }

    /// Returns the URL of the event stream.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self, access_token: &str) -> Result<EventStream> {
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(access_token)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.bytes().await.unwrap_or_default();
            return Err(process_error_response(&ApiResponse {
                status,
                retry_after: None,
                body,
            }));
        }

        let frames = process_sse(response.bytes_stream());
        Ok(Box::pin(frames.filter_map(|frame| async move { decode_frame(frame) })))
    }
}

/// Decodes one SSE frame.  Keep-alives and foreign event names yield `None`.
pub fn decode_frame(frame: Result<SseFrame>) -> Option<Result<RealtimeEvent>> {
    let frame = match frame {
        Ok(frame) => frame,
        Err(err) => return Some(Err(err)),
    };
    match frame.name() {
        EVENT_NAME | "message" => Some(serde_json::from_str(&frame.data).map_err(|e| {
            Error::serialization(
                format!("Failed to parse realtime event: {e}"),
                Some(Box::new(e)),
            )
        })),
        "ping" => None,
        other => {
            tracing::debug!(event = other, "ignoring realtime event");
            None
        }
    }
}

////////////////////////////////////////////// Backoff //////////////////////////////////////////////

/// Bounds of the reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// First delay after a lost connection.
    pub initial: Duration,
    /// Upper bound of the delay.
    pub max: Duration,
}

impl ReconnectPolicy {
    /// Reads the bounds from `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            initial: config.reconnect_initial(),
            max: config.reconnect_max(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Doubling delay sequence, capped by the policy.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    /// Starts a sequence at the policy's initial delay.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            next: policy.initial,
            attempt: 0,
        }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.policy.max);
        self.next = delay.saturating_mul(2).min(self.policy.max);
        self.attempt += 1;
        delay
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Restarts the sequence.
    pub fn reset(&mut self) {
        self.next = self.policy.initial;
        self.attempt = 0;
    }
}

////////////////////////////////////////// RealtimeChannel //////////////////////////////////////////

/// Connection state of a [`RealtimeChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// A handshake is in progress.
    Connecting,
    /// Events are flowing.
    Open,
    /// Waiting `delay` before reconnect attempt number `attempt`.
    Reconnecting {
        /// Attempts since the last successful open.
        attempt: u32,
        /// Time until the next handshake.
        delay: Duration,
    },
    /// The channel stopped and will not reconnect.
    Closed,
}

/// A running realtime connection and its reconnect loop.
pub struct RealtimeChannel {
    state: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    /// Starts the channel for the session of `gateway`.
    ///
    /// Each handshake uses the token current at connect time.  A rejected
    /// handshake goes through the gateway's single-flight refresh; if that
    /// fails the session is already terminated and the channel closes.
    pub fn spawn(
        source: Arc<dyn EventSource>,
        gateway: Arc<RequestGateway>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<RealtimeEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state) = watch::channel(ChannelState::Connecting);
        let task = tokio::spawn(run(
            source,
            gateway,
            policy,
            events,
            cancel.clone(),
            state_tx,
        ));
        Self {
            state,
            cancel,
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Closes the channel and waits for its task to finish.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "realtime task ended abnormally");
            }
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("state", &self.state())
            .finish()
    }
}

enum StreamEnd {
    Cancelled,
    ConsumerGone,
    Lost(Option<Error>),
}

async fn run(
    source: Arc<dyn EventSource>,
    gateway: Arc<RequestGateway>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    cancel: CancellationToken,
    state: watch::Sender<ChannelState>,
) {
    let session = gateway.session().clone();
    let mut backoff = Backoff::new(policy);
    // Set only for the handshake that directly follows a successful refresh.
    let mut renewed = false;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(token) = session.access_token() else {
            tracing::info!("no session; realtime channel closing");
            break;
        };

        state.send_replace(ChannelState::Connecting);
        REALTIME_CONNECTS.click();
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = source.connect(&token) => connected,
        };
        let just_renewed = std::mem::take(&mut renewed);

        match connected {
            Ok(stream) => {
                tracing::info!("realtime channel open");
                state.send_replace(ChannelState::Open);
                backoff.reset();
                match pump(stream, &events, &cancel).await {
                    StreamEnd::Cancelled | StreamEnd::ConsumerGone => break,
                    StreamEnd::Lost(Some(err)) => {
                        tracing::warn!(error = %err, "realtime stream lost");
                    }
                    StreamEnd::Lost(None) => {
                        tracing::info!("realtime stream ended by server");
                    }
                }
            }
            Err(err) if err.is_authentication() && just_renewed => {
                tracing::warn!(error = %err, "renewed token rejected at handshake; ending session");
                session.terminate();
                break;
            }
            Err(err) if err.is_authentication() => {
                tracing::info!("realtime handshake rejected; renewing token");
                match gateway.refresh_token(&token).await {
                    Ok(_) => {
                        renewed = true;
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "realtime channel closing");
                        break;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "realtime connect failed");
            }
        }

        let delay = backoff.next_delay();
        REALTIME_RECONNECTS.click();
        REALTIME_BACKOFF.add(delay.as_secs_f64());
        state.send_replace(ChannelState::Reconnecting {
            attempt: backoff.attempt(),
            delay,
        });
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    state.send_replace(ChannelState::Closed);
    tracing::info!("realtime channel closed");
}

async fn pump(
    mut stream: EventStream,
    events: &mpsc::UnboundedSender<RealtimeEvent>,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                REALTIME_EVENTS.click();
                tracing::debug!(kind = event.kind(), "realtime event");
                if events.send(event).is_err() {
                    return StreamEnd::ConsumerGone;
                }
            }
            Some(Err(err)) if err.is_serialization() => {
                REALTIME_PARSE_ERRORS.click();
                tracing::warn!(error = %err, "dropping undecodable realtime event");
            }
            Some(Err(err)) => return StreamEnd::Lost(Some(err)),
            None => return StreamEnd::Lost(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::session::{MemoryTokenStore, Session, SessionHandle, SessionState};
    use crate::transport::{ApiRequest, HttpTransport};
    use crate::types::{Connection, MessageId, User};

    enum Outcome {
        Fail(Error),
        Open(Vec<Result<RealtimeEvent>>, bool),
    }

    /// Plays back scripted handshakes; an empty script refuses connections.
    struct ScriptedSource {
        script: Mutex<Vec<Outcome>>,
        connects: Mutex<Vec<(Instant, String)>>,
    }

    impl ScriptedSource {
        fn new(mut script: Vec<Outcome>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                connects: Mutex::new(Vec::new()),
            })
        }

        fn connects(&self) -> Vec<(Instant, String)> {
            self.connects.lock().clone()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self, access_token: &str) -> Result<EventStream> {
            self.connects
                .lock()
                .push((Instant::now(), access_token.to_string()));
            let outcome = self.script.lock().pop();
            match outcome {
                None => Err(Error::connection("refused", None)),
                Some(Outcome::Fail(err)) => Err(err),
                Some(Outcome::Open(items, hold)) => {
                    let items = stream::iter(items);
                    if hold {
                        Ok(Box::pin(items.chain(stream::pending())))
                    } else {
                        Ok(Box::pin(items))
                    }
                }
            }
        }
    }

    /// Answers `auth/refresh` only.
    struct RefreshServer {
        succeeds: bool,
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for RefreshServer {
        async fn execute(&self, _: &ApiRequest) -> Result<ApiResponse> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.succeeds {
                Ok(ApiResponse::json(200, &json!({"accessToken": "token-1"})))
            } else {
                Ok(ApiResponse::json(401, &json!({"message": "expired"})))
            }
        }
    }

    fn gateway(refresh_succeeds: bool) -> Arc<RequestGateway> {
        gateway_with(Arc::new(RefreshServer {
            succeeds: refresh_succeeds,
            refreshes: AtomicUsize::new(0),
        }))
    }

    fn gateway_with(server: Arc<RefreshServer>) -> Arc<RequestGateway> {
        let session = SessionHandle::new(Arc::new(MemoryTokenStore::with_session(Session::new(
            User::new("1", "test@gmail.com"),
            "token-0",
        ))));
        session.restore().unwrap();
        Arc::new(RequestGateway::new(server, session))
    }

    fn policy(initial: u64, max: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_secs(initial),
            max: Duration::from_secs(max),
        }
    }

    fn gaps(connects: &[(Instant, String)]) -> Vec<u64> {
        connects
            .windows(2)
            .map(|w| (w[1].0 - w[0].0).as_secs())
            .collect()
    }

    async fn wait_for(source: &ScriptedSource, count: usize) {
        while source.connects().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_for_state(channel: &RealtimeChannel, want: ChannelState) {
        let mut state = channel.watch_state();
        while *state.borrow_and_update() != want {
            if state.changed().await.is_err() {
                break;
            }
        }
        assert_eq!(channel.state(), want);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff.attempt(), 7);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn keep_alives_are_not_events() {
        let ping = SseFrame {
            event: Some("ping".to_string()),
            data: "{}".to_string(),
            id: None,
        };
        assert!(decode_frame(Ok(ping)).is_none());

        let bad = SseFrame {
            event: Some(EVENT_NAME.to_string()),
            data: "{\"type\":\"TYPING\"}".to_string(),
            id: None,
        };
        assert!(decode_frame(Ok(bad)).unwrap().unwrap_err().is_serialization());

        let delete = SseFrame {
            event: None,
            data: "{\"type\":\"DELETE_MESSAGE\",\"messageId\":4}".to_string(),
            id: None,
        };
        assert_eq!(
            decode_frame(Ok(delete)).unwrap().unwrap(),
            RealtimeEvent::DeleteMessage {
                message_id: MessageId::from(4),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_double_up_to_cap() {
        let source = ScriptedSource::new(Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway(true),
            policy(1, 4),
            tx,
            CancellationToken::new(),
        );
        wait_for(&source, 6).await;
        channel.close().await;
        assert_eq!(gaps(&source.connects())[..5], [1, 2, 4, 4, 4]);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_resets_backoff() {
        let source = ScriptedSource::new(vec![
            Outcome::Fail(Error::connection("down", None)),
            Outcome::Fail(Error::connection("down", None)),
            Outcome::Open(Vec::new(), false),
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway(true),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        wait_for(&source, 5).await;
        channel.close().await;
        assert_eq!(gaps(&source.connects())[..4], [1, 2, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_events_and_skips_undecodable_ones() {
        let first = RealtimeEvent::NewConnection {
            connection: Connection::new("5", "carol@x.com"),
        };
        let second = RealtimeEvent::DeleteMessage {
            message_id: MessageId::from("9"),
        };
        let source = ScriptedSource::new(vec![Outcome::Open(
            vec![
                Ok(first.clone()),
                Err(Error::serialization("bad event", None)),
                Ok(second.clone()),
            ],
            true,
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway(true),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(source.connects().len(), 1);
        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_refreshes_and_reconnects_at_once() {
        let source = ScriptedSource::new(vec![
            Outcome::Fail(Error::authentication("jwt expired")),
            Outcome::Open(Vec::new(), true),
        ]);
        let gateway = gateway(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway.clone(),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        wait_for_state(&channel, ChannelState::Open).await;
        let connects = source.connects();
        assert_eq!(connects[0].1, "token-0");
        assert_eq!(connects[1].1, "token-1");
        assert_eq!(gaps(&connects), vec![0]);
        assert_eq!(gateway.session().access_token().as_deref(), Some("token-1"));
        channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_closes_channel() {
        let source = ScriptedSource::new(vec![Outcome::Fail(Error::authentication("expired"))]);
        let gateway = gateway(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway.clone(),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        wait_for_state(&channel, ChannelState::Closed).await;
        assert_eq!(gateway.session().state(), SessionState::Unauthenticated);
        assert_eq!(source.connects().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_token_rejected_ends_session() {
        let source = ScriptedSource::new(vec![
            Outcome::Fail(Error::authentication("jwt expired")),
            Outcome::Fail(Error::authentication("jwt malformed")),
        ]);
        let server = Arc::new(RefreshServer {
            succeeds: true,
            refreshes: AtomicUsize::new(0),
        });
        let gateway = gateway_with(server.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway.clone(),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        wait_for_state(&channel, ChannelState::Closed).await;
        assert_eq!(gateway.session().state(), SessionState::Unauthenticated);
        assert_eq!(server.refreshes.load(Ordering::SeqCst), 1);
        let tokens: Vec<String> = source.connects().into_iter().map(|(_, t)| t).collect();
        assert_eq!(tokens, vec!["token-0", "token-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_after_unrelated_failure_refreshes_again() {
        let source = ScriptedSource::new(vec![
            Outcome::Fail(Error::authentication("jwt expired")),
            Outcome::Fail(Error::connection("down", None)),
            Outcome::Fail(Error::authentication("jwt expired")),
            Outcome::Open(Vec::new(), true),
        ]);
        let server = Arc::new(RefreshServer {
            succeeds: true,
            refreshes: AtomicUsize::new(0),
        });
        let gateway = gateway_with(server.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = RealtimeChannel::spawn(
            source.clone(),
            gateway.clone(),
            policy(1, 30),
            tx,
            CancellationToken::new(),
        );
        wait_for_state(&channel, ChannelState::Open).await;
        assert_eq!(gateway.session().state(), SessionState::Authenticated);
        assert_eq!(server.refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(source.connects().len(), 4);
        channel.close().await;
    }
}
