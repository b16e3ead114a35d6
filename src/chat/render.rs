//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction.  The default
//! implementation writes to stdout and uses ANSI escape codes to set the
//! user's own messages apart from the other side's.

use std::io::{self, Stdout, Write};

use crate::store::StoreChange;
use crate::types::{Message, UserId};

/// ANSI escape code for dim text (used for timestamps and ids).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the other side's messages).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for notices).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for the user's own messages).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print one message of the open conversation.
    ///
    /// `own` is true when the logged-in user wrote it.
    fn print_message(&mut self, message: &Message, own: bool);

    /// Print a store change.
    ///
    /// `me` is the logged-in user, used to tell own messages apart.
    fn print_change(&mut self, change: &StoreChange, me: Option<&UserId>);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print something that happened without the user asking.
    fn print_notice(&mut self, notice: &str);

    /// Called when a command is interrupted by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
        }
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.stdout, "{text}");
        let _ = self.stdout.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_message(&mut self, message: &Message, own: bool) {
        let prefix = self.styled(ANSI_DIM, &message_prefix(message));
        let style = if own { ANSI_GREEN } else { ANSI_CYAN };
        let body = self.styled(style, &message_body(message, own));
        self.line(&format!("{prefix} {body}"));
    }

    fn print_change(&mut self, change: &StoreChange, me: Option<&UserId>) {
        if let StoreChange::MessageAppended(message) = change {
            let own = me.is_some_and(|me| message.is_from(me));
            self.print_message(message, own);
            return;
        }
        if let Some(text) = describe_change(change) {
            self.print_notice(&text);
        }
    }

    fn print_error(&mut self, error: &str) {
        let text = self.styled(ANSI_RED, &format!("Error: {error}"));
        let _ = writeln!(io::stderr(), "{text}");
    }

    fn print_info(&mut self, info: &str) {
        self.line(info);
    }

    fn print_notice(&mut self, notice: &str) {
        let text = self.styled(ANSI_YELLOW, &format!("* {notice}"));
        self.line(&text);
    }

    fn print_interrupted(&mut self) {
        self.line("\n[Interrupted]");
    }
}

/// Formats the `[HH:MM #id]` prefix of a message line.
pub fn message_prefix(message: &Message) -> String {
    format!(
        "[{:02}:{:02} #{}]",
        message.created_at.hour(),
        message.created_at.minute(),
        message.id
    )
}

/// Formats the body of a message line, including its attachment if any.
pub fn message_body(message: &Message, own: bool) -> String {
    let who = if own { "you" } else { "them" };
    match message.attachment() {
        Some(attachment) => format!(
            "{who}: {} [{} -> {}]",
            message.content, attachment.name, attachment.path
        ),
        None => format!("{who}: {}", message.content),
    }
}

/// Describes a background store change, or `None` if it is not worth a line.
pub fn describe_change(change: &StoreChange) -> Option<String> {
    match change {
        StoreChange::MessageAppended(_) => None,
        StoreChange::MessageRemoved(id) => Some(format!("message #{id} was deleted")),
        StoreChange::ConnectionAdded(connection) => {
            Some(format!("{} connected with you!", connection.email))
        }
        StoreChange::HistoryLoaded { .. } => None,
        StoreChange::Cleared => Some("conversation state cleared".to_string()),
    }
}
