use serde::{Deserialize, Serialize};

use super::{Connection, Message, MessageId};

/// A push event delivered over the realtime channel.
///
/// Every event travels under the same channel event name and is told apart by
/// its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    /// A message was created in a conversation the current user takes part in.
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage {
        /// The canonical message.
        message: Message,
    },

    /// Another user connected with the current user.
    #[serde(rename = "NEW_CONNECTION")]
    NewConnection {
        /// The new connection, seen from the current user's side.
        connection: Connection,
    },

    /// A message was deleted.
    #[serde(rename = "DELETE_MESSAGE")]
    DeleteMessage {
        /// Identifier of the deleted message.
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
}

impl RealtimeEvent {
    /// Returns the wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            RealtimeEvent::NewMessage { .. } => "NEW_MESSAGE",
            RealtimeEvent::NewConnection { .. } => "NEW_CONNECTION",
            RealtimeEvent::DeleteMessage { .. } => "DELETE_MESSAGE",
        }
    }
}
