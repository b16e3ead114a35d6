use serde::{Deserialize, Serialize};

use super::UserId;

/// A registered user, as returned by sign-in and user search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-assigned user identifier.
    pub id: UserId,

    /// Email address the user registered with.
    pub email: String,
}

impl User {
    /// Creates a new user record.
    pub fn new(id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }
}
