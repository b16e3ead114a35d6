//! Wire types exchanged with the Yatri backend.

mod api;
mod connection;
mod event;
mod file;
mod ids;
mod message;
mod user;

pub use api::{
    CreateConnectionRequest, CredentialsRequest, DataEnvelope, RefreshResponse, SearchResponse,
    ConnectionsResponse, SendMessageRequest, SigninResponse, StatusMessage, VerifyRequest,
};
pub use connection::Connection;
pub use event::RealtimeEvent;
pub use file::FileAttachment;
pub use ids::{FileId, MessageId, UserId};
pub use message::{AttachmentRef, Message};
pub use user::User;
