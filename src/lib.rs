//! Session and realtime synchronization engine for the Yatri chat service.
//!
//! The crate is organized bottom-up:
//!
//! - [`TokenStore`] and [`SessionHandle`] own the bearer token and session
//!   lifecycle.
//! - [`RequestGateway`] performs authenticated REST calls and renews the token
//!   on a 401.
//! - [`RealtimeChannel`] keeps a push connection open and reconnects with
//!   backoff.
//! - [`ConversationStore`] holds the focused conversation and the connection
//!   list.
//! - [`SessionController`] wires them together.

// Public modules
pub mod chat;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod realtime;
pub mod session;
pub mod sse;
pub mod store;
pub mod transport;
pub mod types;

mod api;

// Re-exports
pub use config::ClientConfig;
pub use controller::{ConnectOutcome, HistoryOutcome, SessionController};
pub use error::{Error, Result};
pub use gateway::{RequestGateway, process_error_response};
pub use observability::register_biometrics;
pub use realtime::{
    Backoff, ChannelState, EventSource, EventStream, RealtimeChannel, ReconnectPolicy,
    SseEventSource,
};
pub use session::{
    FileTokenStore, MemoryTokenStore, Session, SessionHandle, SessionState, TokenStore,
};
pub use store::{AppendOutcome, ConversationStore, HistoryTicket, StoreChange};
pub use transport::{
    ApiRequest, ApiResponse, HttpTransport, Method, RequestBody, ReqwestTransport,
};
pub use types::*;
