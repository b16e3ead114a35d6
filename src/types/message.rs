use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{FileAttachment, FileId, MessageId, UserId};

/// A chat message.
///
/// Identity is `id`.  A message never changes after creation; deleting it
/// removes it from the conversation rather than editing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned message identifier.
    pub id: MessageId,

    /// Author of the message.
    pub sender_id: UserId,

    /// Recipient of the message.
    pub receiver_id: UserId,

    /// Text body.  Attachment-only messages carry a generated caption.
    #[serde(default)]
    pub content: String,

    /// Reference to an uploaded attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,

    /// Attachment path when the server flattens the file join into the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    /// Attachment name when the server flattens the file join into the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    /// Attachment metadata when the server nests the file join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileAttachment>,

    /// Creation time assigned by the server.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A borrowed view of a message's attachment, whichever shape it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentRef<'a> {
    /// Display name of the attachment.
    pub name: &'a str,
    /// Server-relative download path.
    pub path: &'a str,
}

impl Message {
    /// Returns true if `user` is the sender or the receiver of this message.
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// Returns true if this message was written by `user`.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Returns the attachment referenced by this message, if any.
    pub fn attachment(&self) -> Option<AttachmentRef<'_>> {
        let path = self
            .file_path
            .as_deref()
            .or(self.file.as_ref().map(|f| f.file_path.as_str()))?;
        let name = self
            .original_name
            .as_deref()
            .or(self.file.as_ref().map(|f| f.original_name.as_str()))
            .unwrap_or("View Attachment");
        Some(AttachmentRef { name, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn deserialize_history_row() {
        let json = serde_json::json!({
            "id": 7,
            "sender_id": 1,
            "receiver_id": 2,
            "content": "hello",
            "file_id": null,
            "created_at": "2025-03-01T10:15:00.000Z"
        });
        let message: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message.id, MessageId::from("7"));
        assert_eq!(message.content, "hello");
        assert!(message.file_id.is_none());
        assert_eq!(message.created_at, datetime!(2025-03-01 10:15:00 UTC));
        assert!(message.attachment().is_none());
        assert!(message.involves(&UserId::from("1")));
        assert!(message.involves(&UserId::from("2")));
        assert!(!message.involves(&UserId::from("3")));
    }

    #[test]
    fn attachment_from_flat_columns() {
        let json = serde_json::json!({
            "id": 8,
            "sender_id": 1,
            "receiver_id": 2,
            "content": "Sent an attachment: a.png",
            "file_id": 4,
            "file_path": "uploads/a.png",
            "original_name": "a.png",
            "created_at": "2025-03-01T10:16:00Z"
        });
        let message: Message = serde_json::from_value(json).unwrap();
        let attachment = message.attachment().unwrap();
        assert_eq!(attachment.name, "a.png");
        assert_eq!(attachment.path, "uploads/a.png");
    }

    #[test]
    fn attachment_from_nested_file() {
        let json = serde_json::json!({
            "id": "m9",
            "sender_id": "u1",
            "receiver_id": "u2",
            "content": "",
            "file": {"id": "f1", "original_name": "b.txt", "file_path": "uploads/b.txt"},
            "created_at": "2025-03-01T10:17:00Z"
        });
        let message: Message = serde_json::from_value(json).unwrap();
        let attachment = message.attachment().unwrap();
        assert_eq!(attachment.name, "b.txt");
        assert_eq!(attachment.path, "uploads/b.txt");
    }
}
