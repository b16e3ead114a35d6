use serde::{Deserialize, Serialize};

use super::FileId;

/// Metadata of an uploaded attachment.
///
/// Attachments are created by a separate upload and referenced from a message
/// by id; the bytes are never held by the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    /// Server-assigned file identifier.
    pub id: FileId,

    /// Name of the file on the uploader's machine.
    pub original_name: String,

    /// Server-relative path the file can be downloaded from.
    pub file_path: String,
}
