use std::fmt;
use std::sync::Arc;

use utf8path::Path;

use crate::chat::commands::{ChatCommand, help_text};
use crate::chat::render::Renderer;
use crate::controller::{ConnectOutcome, HistoryOutcome, SessionController};
use crate::error::{Error, Result};
use crate::realtime::ChannelState;
use crate::session::SessionState;
use crate::types::{FileAttachment, Message, MessageId, User, UserId};

/// What the REPL should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Leave the REPL.
    Quit,
}

/// Snapshot of the chat session for `/status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Session lifecycle state.
    pub state: SessionState,
    /// Logged-in user, if any.
    pub user: Option<User>,
    /// Realtime channel state, if syncing.
    pub channel: Option<ChannelState>,
    /// Focused recipient, if a conversation is open.
    pub focus: Option<UserId>,
    /// Number of connections.
    pub connection_count: usize,
    /// Number of visible messages in the open conversation.
    pub message_count: usize,
    /// Name of the attachment waiting for the next message.
    pub pending_attachment: Option<String>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session: {:?}", self.state)?;
        match &self.user {
            Some(user) => writeln!(f, "User: {} (#{})", user.email, user.id)?,
            None => writeln!(f, "User: (none)")?,
        }
        match &self.channel {
            Some(ChannelState::Reconnecting { attempt, delay }) => writeln!(
                f,
                "Realtime: reconnecting (attempt {attempt}, in {}ms)",
                delay.as_millis()
            )?,
            Some(state) => writeln!(f, "Realtime: {state:?}")?,
            None => writeln!(f, "Realtime: stopped")?,
        }
        match &self.focus {
            Some(focus) => writeln!(f, "Open conversation: #{focus}")?,
            None => writeln!(f, "Open conversation: (none)")?,
        }
        writeln!(f, "Connections: {}", self.connection_count)?;
        write!(f, "Messages: {}", self.message_count)?;
        if let Some(name) = &self.pending_attachment {
            write!(f, "\nPending attachment: {name}")?;
        }
        Ok(())
    }
}

/// Executes chat commands against a [`SessionController`].
///
/// Messages that reach the store, including the user's own, are printed by
/// whoever watches [`SessionController::subscribe`]; commands only print what
/// the user asked to see.
pub struct ChatSession {
    controller: Arc<SessionController>,
    attachment: Option<FileAttachment>,
}

impl ChatSession {
    /// Creates a chat session driving `controller`.
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self {
            controller,
            attachment: None,
        }
    }

    /// Returns the controller.
    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Returns the attachment waiting for the next message.
    pub fn attachment(&self) -> Option<&FileAttachment> {
        self.attachment.as_ref()
    }

    /// Runs one command, reporting failures through `renderer`.
    pub async fn execute(&mut self, command: ChatCommand, renderer: &mut dyn Renderer) -> Flow {
        match self.run(command, renderer).await {
            Ok(flow) => flow,
            Err(err) => {
                report(&err, renderer);
                Flow::Continue
            }
        }
    }

    /// Sends `text` to the open conversation with the pending attachment.
    pub async fn send_text(&mut self, text: &str, renderer: &mut dyn Renderer) {
        match self
            .controller
            .send_message(text, self.attachment.as_ref())
            .await
        {
            Ok(_) => {
                self.attachment = None;
            }
            Err(err) => report(&err, renderer),
        }
    }

    /// Returns the current session statistics snapshot.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.controller.state(),
            user: self.controller.user(),
            channel: self.controller.channel_state(),
            focus: self.controller.focus(),
            connection_count: self.controller.connections().len(),
            message_count: self.controller.messages().len(),
            pending_attachment: self.attachment.as_ref().map(|f| f.original_name.clone()),
        }
    }

    async fn run(&mut self, command: ChatCommand, renderer: &mut dyn Renderer) -> Result<Flow> {
        match command {
            ChatCommand::Login { email, password } => {
                let user = self.controller.login(&email, &password).await?;
                self.attachment = None;
                renderer.print_info(&format!("Logged in as {}", user.email));
                let connections = self.controller.refresh_connections().await?;
                renderer.print_info(&format!("{} connection(s)", connections.len()));
            }
            ChatCommand::Logout => {
                self.controller.logout().await;
                self.attachment = None;
                renderer.print_info("Logged out");
            }
            ChatCommand::Signup { email, password } => {
                let status = self.controller.signup(&email, &password).await?;
                renderer.print_info(status.message.as_deref().unwrap_or(
                    "Account created; check your email for the code and run /verify",
                ));
            }
            ChatCommand::Verify { email, otp } => {
                let status = self.controller.verify(&email, &otp).await?;
                renderer.print_info(
                    status
                        .message
                        .as_deref()
                        .unwrap_or("Account verified; you can /login now"),
                );
            }
            ChatCommand::Connect(email) => {
                let ConnectOutcome { user, created } =
                    self.controller.connect_by_email(&email).await?;
                if created {
                    renderer.print_info(&format!("Connected with {}", user.email));
                } else {
                    renderer.print_info(&format!("Already connected with {}", user.email));
                }
                self.print_conversation(&self.controller.messages(), renderer);
            }
            ChatCommand::Open(target) => {
                let recipient = self.resolve_recipient(&target).await?;
                match self.controller.load_history(&recipient).await? {
                    HistoryOutcome::Loaded(messages) => {
                        renderer.print_info(&format!("Conversation with #{recipient}"));
                        self.print_conversation(&messages, renderer);
                    }
                    HistoryOutcome::Superseded => {
                        renderer.print_info("Another conversation was opened meanwhile")
                    }
                }
            }
            ChatCommand::Connections => {
                let connections = self.controller.refresh_connections().await?;
                if connections.is_empty() {
                    renderer.print_info("No connections yet; use /connect <email>");
                }
                for connection in connections {
                    renderer.print_info(&format!(
                        "  #{} {}",
                        connection.connected_user_id, connection.email
                    ));
                }
            }
            ChatCommand::History => {
                let Some(recipient) = self.controller.focus() else {
                    return Err(no_conversation());
                };
                if let HistoryOutcome::Loaded(messages) =
                    self.controller.load_history(&recipient).await?
                {
                    self.print_conversation(&messages, renderer);
                }
            }
            ChatCommand::Attach(path) => {
                let file = self
                    .controller
                    .upload_path(&Path::from(path.as_str()))
                    .await?;
                renderer.print_info(&format!(
                    "Attached {}; it goes out with your next message",
                    file.original_name
                ));
                self.attachment = Some(file);
            }
            ChatCommand::Detach => match self.attachment.take() {
                Some(file) => renderer.print_info(&format!("Dropped {}", file.original_name)),
                None => renderer.print_info("No attachment pending"),
            },
            ChatCommand::Delete(id) => {
                self.controller.delete_message(&MessageId::new(id)).await?;
            }
            ChatCommand::Status => {
                renderer.print_info(&self.stats().to_string());
            }
            ChatCommand::Help => {
                renderer.print_info(help_text());
            }
            ChatCommand::Quit => return Ok(Flow::Quit),
            ChatCommand::Invalid(message) => {
                renderer.print_error(&message);
            }
        }
        Ok(Flow::Continue)
    }

    /// Finds the user behind `/open <target>`.
    ///
    /// Connections are matched by email, then by id.  An email that is not a
    /// connection yet is looked up on the server.
    async fn resolve_recipient(&self, target: &str) -> Result<UserId> {
        let mut connections = self.controller.connections();
        if connections.is_empty() {
            connections = self.controller.refresh_connections().await?;
        }
        if let Some(found) = connections
            .iter()
            .find(|c| c.email.eq_ignore_ascii_case(target))
        {
            return Ok(found.connected_user_id.clone());
        }
        if let Some(found) = connections
            .iter()
            .find(|c| c.connected_user_id.as_str() == target)
        {
            return Ok(found.connected_user_id.clone());
        }
        if target.contains('@') {
            return Ok(self.controller.search_user(target).await?.id);
        }
        Err(Error::not_found(
            format!("no connection matches {target}"),
            Some("connection".to_string()),
            Some(target.to_string()),
        ))
    }

    fn print_conversation(&self, messages: &[Message], renderer: &mut dyn Renderer) {
        if messages.is_empty() {
            renderer.print_info("No messages yet");
            return;
        }
        let me = self.controller.user().map(|user| user.id);
        for message in messages {
            let own = me.as_ref().is_some_and(|me| message.is_from(me));
            renderer.print_message(message, own);
        }
    }
}

fn no_conversation() -> Error {
    Error::validation(
        "no conversation is open; use /open or /connect",
        Some("receiver_id".to_string()),
    )
}

fn report(err: &Error, renderer: &mut dyn Renderer) {
    renderer.print_error(&err.to_string());
    if err.is_session_fatal() {
        renderer.print_notice("Your session has ended. Use /login to sign in again.");
    } else if err.is_unauthenticated() {
        renderer.print_notice("Not logged in. Use /login <email> <password>.");
    }
}
