//! Slash command parsing for the chat client.
//!
//! Input starting with `/` is a command; anything else is message text for
//! the open conversation.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Sign in.
    Login {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },

    /// Sign out.
    Logout,

    /// Register a new account.
    Signup {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },

    /// Confirm an account with its one-time password.
    Verify {
        /// Account email.
        email: String,
        /// One-time password.
        otp: String,
    },

    /// Find a user by email, connect and open the conversation.
    Connect(String),

    /// Open the conversation with a connection, by email or user id.
    Open(String),

    /// List connections.
    Connections,

    /// Reload and print the open conversation.
    History,

    /// Upload a file to attach to the next message.
    Attach(String),

    /// Drop the pending attachment.
    Detach,

    /// Delete a message by id.
    Delete(String),

    /// Show session and channel status.
    Status,

    /// Display help information.
    Help,

    /// Exit the chat client.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a message.
///
/// # Examples
///
/// ```
/// # use yatri::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/connect bob@x.com").is_some());
/// assert!(parse_command("hi bob").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "login" => match two_words(argument) {
            Some((email, password)) => ChatCommand::Login { email, password },
            None => ChatCommand::Invalid("/login requires <email> <password>".to_string()),
        },
        "logout" => ChatCommand::Logout,
        "signup" => match two_words(argument) {
            Some((email, password)) => ChatCommand::Signup { email, password },
            None => ChatCommand::Invalid("/signup requires <email> <password>".to_string()),
        },
        "verify" => match two_words(argument) {
            Some((email, otp)) => ChatCommand::Verify { email, otp },
            None => ChatCommand::Invalid("/verify requires <email> <otp>".to_string()),
        },
        "connect" => match argument {
            Some(email) => ChatCommand::Connect(email.to_string()),
            None => ChatCommand::Invalid("/connect requires an email".to_string()),
        },
        "open" => match argument {
            Some(target) => ChatCommand::Open(target.to_string()),
            None => ChatCommand::Invalid("/open requires an email or user id".to_string()),
        },
        "connections" | "contacts" => ChatCommand::Connections,
        "history" => ChatCommand::History,
        "attach" => match argument {
            Some(path) => ChatCommand::Attach(path.to_string()),
            None => ChatCommand::Invalid("/attach requires a file path".to_string()),
        },
        "detach" => ChatCommand::Detach,
        "delete" | "rm" => match argument {
            Some(id) => ChatCommand::Delete(id.to_string()),
            None => ChatCommand::Invalid("/delete requires a message id".to_string()),
        },
        "status" | "stats" => ChatCommand::Status,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn two_words(argument: Option<&str>) -> Option<(String, String)> {
    let mut words = argument?.split_whitespace();
    let first = words.next()?.to_string();
    let second = words.next()?.to_string();
    if words.next().is_some() {
        return None;
    }
    Some((first, second))
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /login <email> <password>    Sign in
  /logout                      Sign out
  /signup <email> <password>   Register a new account
  /verify <email> <otp>        Confirm a new account
  /connect <email>             Connect with a user and open the conversation
  /open <email|id>             Open the conversation with a connection
  /connections                 List connections
  /history                     Reload the open conversation
  /attach <path>               Attach a file to the next message
  /detach                      Drop the pending attachment
  /delete <id>                 Delete a message
  /status                      Show session status
  /help                        Show this help message
  /quit                        Exit
Anything else is sent to the open conversation."#
}
