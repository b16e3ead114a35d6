//! Request and response bodies of the REST endpoints.

use serde::{Deserialize, Serialize};

use super::{Connection, FileId, User, UserId};

/// Body of sign-in and sign-up requests.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialsRequest {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

/// Body of the OTP verification request.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
    /// Account email.
    pub email: String,
    /// One-time password delivered out of band.
    pub otp: String,
}

/// Response of `POST /auth/signin`.
#[derive(Debug, Clone, Deserialize)]
pub struct SigninResponse {
    /// Short-lived bearer token.
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// The authenticated user.
    pub user: User,
}

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    /// The renewed bearer token.
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

/// A response that only carries an informational message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusMessage {
    /// Server message, if any.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /auth/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// The user that matched the email.
    pub user: User,
}

/// Body of `POST /connections`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConnectionRequest {
    /// The user to connect with.
    pub connected_user_id: UserId,
}

/// Response of `GET /connections`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsResponse {
    /// Every connection of the current user.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
    /// Attachment created by an earlier upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

/// The `{data: ...}` envelope used by the message and file endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct DataEnvelope<T> {
    /// The payload.
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_omits_missing_attachment() {
        let request = SendMessageRequest {
            receiver_id: UserId::from(2),
            content: "hi".to_string(),
            file_id: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"receiver_id": 2, "content": "hi"})
        );
    }

    #[test]
    fn signin_response_uses_camel_case_token() {
        let json = serde_json::json!({
            "accessToken": "tok",
            "user": {"id": 1, "email": "test@gmail.com"}
        });
        let response: SigninResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.access_token, "tok");
        assert_eq!(response.user.email, "test@gmail.com");
    }
}
