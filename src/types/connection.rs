use serde::{Deserialize, Serialize};

use super::UserId;

/// A symmetric link between the current user and another registered user.
///
/// The uniqueness key is `connected_user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// The other party of the connection.
    pub connected_user_id: UserId,

    /// Email address of the other party.
    pub email: String,
}

impl Connection {
    /// Creates a new connection record.
    pub fn new(connected_user_id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            connected_user_id: connected_user_id.into(),
            email: email.into(),
        }
    }
}
