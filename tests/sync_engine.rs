//! End-to-end tests of the sync engine against an in-process backend.
//! No network access is required.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::stream;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio::sync::{Notify, broadcast, mpsc};

    use yatri::{
        ApiRequest, ApiResponse, ClientConfig, EventSource, EventStream, HistoryOutcome,
        HttpTransport, MemoryTokenStore, Message, Method, RealtimeEvent, Result,
        SessionController, SessionState, StoreChange, UserId,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn message(id: i64, from: i64, to: i64, content: &str) -> Value {
        json!({
            "id": id,
            "sender_id": from,
            "receiver_id": to,
            "content": content,
            "created_at": format!("2025-03-01T10:{:02}:00Z", id % 60),
        })
    }

    fn push(id: i64, from: i64, to: i64, content: &str) -> RealtimeEvent {
        let message: Message = serde_json::from_value(message(id, from, to, content)).unwrap();
        RealtimeEvent::NewMessage { message }
    }

    /// A backend with two users besides the logged-in one: bob (#2) and
    /// carol (#3).
    #[derive(Default)]
    struct Backend {
        calls: Mutex<Vec<String>>,
        /// Session calls with this token are rejected with a 401.
        rejected_token: Mutex<Option<String>>,
        /// Token handed out by `auth/refresh`; `None` makes the refresh fail.
        refreshed_token: Mutex<Option<String>>,
        /// Holds `GET messages/2` until notified.
        history_gate: Option<Arc<Notify>>,
    }

    impl Backend {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Backend {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
            let method = match request.method {
                Method::Get => "GET",
                Method::Post => "POST",
                Method::Delete => "DELETE",
            };
            self.calls.lock().push(format!("{method} {}", request.path));

            if request.requires_session
                && request.bearer.is_some()
                && request.bearer == *self.rejected_token.lock()
            {
                return Ok(ApiResponse::json(401, &json!({"message": "jwt expired"})));
            }

            let response = match (request.method, request.path.as_str()) {
                (Method::Post, "auth/signin") => ApiResponse::json(
                    200,
                    &json!({"accessToken": "tok-0", "user": {"id": 1, "email": "test@gmail.com"}}),
                ),
                (Method::Post, "auth/refresh") => match self.refreshed_token.lock().clone() {
                    Some(token) => ApiResponse::json(200, &json!({"accessToken": token})),
                    None => ApiResponse::json(401, &json!({"message": "refresh token expired"})),
                },
                (Method::Post, "auth/logout") => ApiResponse::empty(200),
                (Method::Get, "auth/search") => {
                    let email = request
                        .query
                        .iter()
                        .find(|(key, _)| key == "email")
                        .map(|(_, value)| value.as_str());
                    match email {
                        Some("bob@x.com") => {
                            ApiResponse::json(200, &json!({"user": {"id": 2, "email": "bob@x.com"}}))
                        }
                        Some("carol@x.com") => ApiResponse::json(
                            200,
                            &json!({"user": {"id": 3, "email": "carol@x.com"}}),
                        ),
                        _ => ApiResponse::json(404, &json!({"message": "User not found"})),
                    }
                }
                (Method::Post, "connections") => {
                    ApiResponse::json(400, &json!({"message": "Connection already exists"}))
                }
                (Method::Get, "connections") => ApiResponse::json(
                    200,
                    &json!({"connections": [{"connected_user_id": 2, "email": "bob@x.com"}]}),
                ),
                (Method::Get, "messages/2") => {
                    if let Some(gate) = &self.history_gate {
                        gate.notified().await;
                    }
                    ApiResponse::json(
                        200,
                        &json!({"data": [message(10, 2, 1, "hello"), message(11, 1, 2, "hey bob")]}),
                    )
                }
                (Method::Get, "messages/3") => {
                    ApiResponse::json(200, &json!({"data": [message(20, 3, 1, "hi from carol")]}))
                }
                (Method::Post, "messages") => {
                    ApiResponse::json(201, &json!({"data": message(100, 1, 2, "hi")}))
                }
                _ => ApiResponse::json(404, &json!({"message": "Not found"})),
            };
            Ok(response)
        }
    }

    /// Hands out one stream fed by the test; later connects stay silent.
    struct Pushes {
        events: Mutex<Option<mpsc::UnboundedReceiver<Result<RealtimeEvent>>>>,
        tokens: Mutex<Vec<String>>,
    }

    impl Pushes {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<RealtimeEvent>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(Self {
                events: Mutex::new(Some(rx)),
                tokens: Mutex::new(Vec::new()),
            });
            (source, tx)
        }
    }

    #[async_trait]
    impl EventSource for Pushes {
        async fn connect(&self, access_token: &str) -> Result<EventStream> {
            self.tokens.lock().push(access_token.to_string());
            match self.events.lock().take() {
                Some(rx) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                }))),
                None => Ok(Box::pin(stream::pending())),
            }
        }
    }

    type Harness = (
        Arc<SessionController>,
        Arc<Backend>,
        Arc<Pushes>,
        mpsc::UnboundedSender<Result<RealtimeEvent>>,
    );

    fn controller(backend: Backend) -> Harness {
        let backend = Arc::new(backend);
        let (source, pushes) = Pushes::new();
        let controller = SessionController::new(
            ClientConfig::new().with_api_url("http://localhost:5000"),
            backend.clone(),
            source.clone(),
            Arc::new(MemoryTokenStore::new()),
        );
        (Arc::new(controller), backend, source, pushes)
    }

    async fn wait_for(
        changes: &mut broadcast::Receiver<StoreChange>,
        mut matches: impl FnMut(&StoreChange) -> bool,
    ) -> StoreChange {
        tokio::time::timeout(WAIT, async {
            loop {
                let change = changes.recv().await.unwrap();
                if matches(&change) {
                    return change;
                }
            }
        })
        .await
        .unwrap()
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn login_connect_send_and_echo() {
        let (controller, backend, source, pushes) = controller(Backend::default());
        let mut changes = controller.subscribe();

        let user = controller.login("test@gmail.com", "Test@123").await.unwrap();
        assert_eq!(user.email, "test@gmail.com");
        assert_eq!(controller.state(), SessionState::Authenticated);

        let outcome = controller.connect_by_email("bob@x.com").await.unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.user.id, UserId::from(2));
        assert_eq!(controller.focus(), Some(UserId::from(2)));
        assert_eq!(contents(&controller.messages()), vec!["hello", "hey bob"]);
        assert_eq!(controller.connections().len(), 1);

        let sent = controller.send_message("hi", None).await.unwrap();
        pushes.send(Ok(push(100, 1, 2, "hi"))).unwrap();
        pushes.send(Ok(push(101, 2, 1, "hi back"))).unwrap();
        wait_for(&mut changes, |change| {
            matches!(change, StoreChange::MessageAppended(m) if m.content == "hi back")
        })
        .await;

        let messages = controller.messages();
        assert_eq!(
            contents(&messages),
            vec!["hello", "hey bob", "hi", "hi back"]
        );
        let me = UserId::from(1);
        assert_eq!(
            messages
                .iter()
                .filter(|m| m.content == "hi" && m.is_from(&me))
                .count(),
            1
        );
        assert_eq!(messages[2].id, sent.id);
        assert_eq!(source.tokens.lock().first().map(String::as_str), Some("tok-0"));
        assert!(backend.calls().contains(&"POST messages".to_string()));

        controller.logout().await;
    }

    #[tokio::test]
    async fn pushes_for_other_conversations_are_ignored() {
        let (controller, _, _, pushes) = controller(Backend::default());
        let mut changes = controller.subscribe();
        controller.login("test@gmail.com", "Test@123").await.unwrap();
        controller.load_history(&UserId::from(2)).await.unwrap();

        pushes.send(Ok(push(30, 3, 1, "psst"))).unwrap();
        pushes.send(Ok(push(31, 2, 1, "still here"))).unwrap();
        wait_for(&mut changes, |change| {
            matches!(change, StoreChange::MessageAppended(m) if m.content == "still here")
        })
        .await;

        assert_eq!(
            contents(&controller.messages()),
            vec!["hello", "hey bob", "still here"]
        );
        controller.logout().await;
    }

    #[tokio::test]
    async fn realtime_connection_is_announced() {
        let (controller, _, _, pushes) = controller(Backend::default());
        let mut changes = controller.subscribe();
        controller.login("test@gmail.com", "Test@123").await.unwrap();
        controller.refresh_connections().await.unwrap();

        pushes
            .send(Ok(RealtimeEvent::NewConnection {
                connection: yatri::Connection::new(3, "carol@x.com"),
            }))
            .unwrap();
        let change = wait_for(&mut changes, |change| {
            matches!(change, StoreChange::ConnectionAdded(_))
        })
        .await;
        assert_eq!(
            change,
            StoreChange::ConnectionAdded(yatri::Connection::new(3, "carol@x.com"))
        );
        let emails: Vec<String> = controller
            .connections()
            .into_iter()
            .map(|c| c.email)
            .collect();
        assert_eq!(emails, vec!["carol@x.com", "bob@x.com"]);
        controller.logout().await;
    }

    #[tokio::test]
    async fn stale_history_is_discarded() {
        let gate = Arc::new(Notify::new());
        let (controller, backend, _, _) = controller(Backend {
            history_gate: Some(gate.clone()),
            ..Backend::default()
        });
        controller.login("test@gmail.com", "Test@123").await.unwrap();

        let slow = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_history(&UserId::from(2)).await }
        });
        tokio::time::timeout(WAIT, async {
            while !backend.calls().contains(&"GET messages/2".to_string()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let fast = controller.load_history(&UserId::from(3)).await.unwrap();
        assert!(matches!(fast, HistoryOutcome::Loaded(ref m) if m.len() == 1));

        gate.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow, HistoryOutcome::Superseded);
        assert_eq!(controller.focus(), Some(UserId::from(3)));
        assert_eq!(contents(&controller.messages()), vec!["hi from carol"]);
        controller.logout().await;
    }

    #[tokio::test]
    async fn expired_token_is_renewed_transparently() {
        let (controller, backend, _, _) = controller(Backend::default());
        controller.login("test@gmail.com", "Test@123").await.unwrap();
        *backend.rejected_token.lock() = Some("tok-0".to_string());
        *backend.refreshed_token.lock() = Some("tok-1".to_string());

        let connections = controller.refresh_connections().await.unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(controller.session().access_token().as_deref(), Some("tok-1"));
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|call| *call == "GET connections")
                .count(),
            2
        );
        assert_eq!(controller.state(), SessionState::Authenticated);
        controller.logout().await;
    }

    #[tokio::test]
    async fn failed_refresh_ends_the_session() {
        let (controller, backend, _, _) = controller(Backend::default());
        controller.login("test@gmail.com", "Test@123").await.unwrap();
        controller.connect_by_email("bob@x.com").await.unwrap();
        assert!(!controller.messages().is_empty());
        let mut changes = controller.subscribe();
        let mut state = controller.watch_state();

        *backend.rejected_token.lock() = Some("tok-0".to_string());
        let err = controller.refresh_connections().await.unwrap_err();
        assert!(err.is_session_fatal());

        tokio::time::timeout(WAIT, state.wait_for(|s| *s == SessionState::Unauthenticated))
            .await
            .unwrap()
            .unwrap();
        wait_for(&mut changes, |change| *change == StoreChange::Cleared).await;
        assert!(controller.messages().is_empty());
        assert!(controller.connections().is_empty());
        assert!(controller.focus().is_none());
        assert!(controller.user().is_none());

        let before = backend.calls().len();
        let err = controller.refresh_connections().await.unwrap_err();
        assert!(err.is_unauthenticated());
        assert_eq!(backend.calls().len(), before);
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let (controller, backend, _, _) = controller(Backend::default());
        controller.login("test@gmail.com", "Test@123").await.unwrap();
        controller.connect_by_email("bob@x.com").await.unwrap();

        controller.logout().await;
        assert_eq!(controller.state(), SessionState::Unauthenticated);
        assert!(controller.user().is_none());
        assert!(controller.messages().is_empty());
        assert!(controller.connections().is_empty());
        assert!(controller.channel_state().is_none());
        assert!(backend.calls().contains(&"POST auth/logout".to_string()));

        let err = controller.send_message("hi", None).await.unwrap_err();
        assert!(err.is_validation());
    }
}
