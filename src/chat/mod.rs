//! Terminal chat client built on the sync engine.
//!
//! This module provides a line-oriented REPL on top of
//! [`SessionController`](crate::SessionController). It supports:
//!
//! - Signing up, verifying, logging in and out
//! - Connecting with users by email and opening their conversations
//! - Sending messages and attachments, deleting messages
//! - Printing realtime pushes as they arrive
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: command execution against the controller
//! - [`commands`]: slash command parsing
//! - [`render`]: terminal output

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer, describe_change, message_body, message_prefix};
pub use session::{ChatSession, Flow, SessionStats};
