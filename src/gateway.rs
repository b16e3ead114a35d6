//! The request gateway.
//!
//! Every REST call goes through [`RequestGateway::send`], which attaches the
//! bearer token of the current session and, when the server rejects it,
//! renews the token once and re-issues the call.  Renewal is single-flight:
//! calls that fail with the same stale token share one `POST /auth/refresh`.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::observability::{
    GATEWAY_REFRESHES, GATEWAY_REFRESH_FAILURES, GATEWAY_REQUESTS, GATEWAY_REQUEST_DURATION,
    GATEWAY_REQUEST_ERRORS, GATEWAY_RETRIES,
};
use crate::session::SessionHandle;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport};
use crate::types::RefreshResponse;

/// Path of the token renewal endpoint.
const REFRESH_PATH: &str = "auth/refresh";

/// Wraps outbound API calls with session handling.
pub struct RequestGateway {
    transport: Arc<dyn HttpTransport>,
    session: SessionHandle,
    refresh_lock: Mutex<()>,
}

impl RequestGateway {
    /// Creates a gateway that authorizes calls with `session`.
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionHandle) -> Self {
        Self {
            transport,
            session,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns the session this gateway authorizes calls with.
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Sends `request` and returns the successful response.
    ///
    /// Non-2xx responses are converted to errors with [`process_error_response`].
    /// A request that needs a session fails with [`Error::Unauthenticated`]
    /// without touching the network when no session is present.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        GATEWAY_REQUESTS.click();
        let start = Instant::now();
        let method = request.method;
        let path = request.path.clone();
        let result = self.send_authorized(request).await;
        GATEWAY_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        match &result {
            Ok(response) => {
                tracing::debug!(?method, %path, status = response.status, "request completed");
            }
            Err(err) => {
                GATEWAY_REQUEST_ERRORS.click();
                tracing::debug!(?method, %path, error = %err, "request failed");
            }
        }
        result
    }

    async fn send_authorized(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        request.bearer = self.session.access_token();
        if request.requires_session && request.bearer.is_none() {
            return Err(Error::unauthenticated(format!(
                "{} requires a logged-in session",
                request.path
            )));
        }

        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }
        if !(response.is_unauthorized() && request.requires_session) {
            return Err(process_error_response(&response));
        }

        let stale = request.bearer.take().unwrap_or_default();
        let token = self.refresh_token(&stale).await?;
        GATEWAY_RETRIES.click();
        request.bearer = Some(token);

        let response = self.transport.execute(&request).await?;
        if response.is_success() {
            return Ok(response);
        }
        if response.is_unauthorized() {
            let err = process_error_response(&response);
            tracing::warn!(path = %request.path, "renewed token rejected; ending session");
            self.session.terminate();
            return Err(Error::auth_expired(err.message()));
        }
        Err(process_error_response(&response))
    }

    /// Renews the access token after `stale` was rejected.
    ///
    /// If another caller already renewed the token while this one waited, the
    /// renewed token is returned without another refresh.  A failed refresh
    /// ends the session and yields [`Error::RefreshFailed`].
    pub async fn refresh_token(&self, stale: &str) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;
        match self.session.access_token() {
            Some(current) if current != stale => return Ok(current),
            Some(_) => {}
            None => {
                return Err(Error::refresh_failed(
                    "session ended by a concurrent refresh failure",
                ));
            }
        }

        GATEWAY_REFRESHES.click();
        let token = match self.request_refresh().await {
            Ok(token) => token,
            Err(err) => {
                GATEWAY_REFRESH_FAILURES.click();
                tracing::warn!(error = %err, "token refresh failed; ending session");
                self.session.terminate();
                return Err(Error::refresh_failed(err.message()));
            }
        };
        if let Err(err) = self.session.update_token(&token) {
            if err.is_unauthenticated() {
                return Err(Error::refresh_failed(err.message()));
            }
            tracing::warn!(error = %err, "failed to persist renewed token");
        }
        tracing::info!("access token renewed");
        Ok(token)
    }

    async fn request_refresh(&self) -> Result<String> {
        let request = ApiRequest::post(REFRESH_PATH).public();
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(process_error_response(&response));
        }
        let body: RefreshResponse = response.parse()?;
        Ok(body.access_token)
    }
}

impl std::fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGateway")
            .field("session", &self.session)
            .finish()
    }
}

/// Maps a non-2xx response to an [`Error`], using the server's `{message}`.
pub fn process_error_response(response: &ApiResponse) -> Error {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
    }

    let status_code = response.status;
    let error_message = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| {
            let text = String::from_utf8_lossy(&response.body);
            if text.trim().is_empty() {
                format!("request failed with status {status_code}")
            } else {
                text.into_owned()
            }
        });

    match status_code {
        400 => Error::bad_request(error_message, None),
        401 => Error::authentication(error_message),
        403 => Error::permission(error_message),
        404 => Error::not_found(error_message, None, None),
        408 => Error::timeout(error_message, None),
        409 => Error::conflict(error_message),
        500 => Error::internal_server(error_message),
        502..=504 => Error::service_unavailable(error_message, response.retry_after),
        _ => Error::api(status_code, error_message),
    }
}
