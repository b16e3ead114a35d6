//! In-memory conversation state.
//!
//! [`ConversationStore`] is a plain reducer: every method runs to completion
//! without suspending, so callers keep it behind a short-lived lock and never
//! hold that lock across an `.await`.
//!
//! History loads are guarded by a focus epoch.  [`ConversationStore::set_focus`]
//! hands out a [`HistoryTicket`]; a history response presented with a ticket
//! from an earlier focus is discarded.

use std::collections::HashSet;

use crate::observability::{STORE_APPENDS, STORE_DUPLICATES, STORE_STALE_HISTORY};
use crate::types::{Connection, Message, MessageId, RealtimeEvent, UserId};

/// Proof that a history request was issued for a particular focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    recipient: UserId,
    epoch: u64,
}

impl HistoryTicket {
    /// The recipient whose history was requested.
    pub fn recipient(&self) -> &UserId {
        &self.recipient
    }
}

/// Result of [`ConversationStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was added to the visible list.
    Appended,
    /// A message with the same id is already present.
    Duplicate,
    /// The message does not belong to the focused conversation.
    OutOfFocus,
}

/// A visible change produced by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A message was added to the focused conversation.
    MessageAppended(Message),
    /// A message was removed.
    MessageRemoved(MessageId),
    /// A connection was added.
    ConnectionAdded(Connection),
    /// The focused conversation's history was installed.
    HistoryLoaded {
        /// The focused recipient.
        recipient: UserId,
        /// Number of visible messages after the load.
        count: usize,
    },
    /// All state was dropped.
    Cleared,
}

/// Messages of the focused conversation and the connection list.
#[derive(Debug, Default)]
pub struct ConversationStore {
    focus: Option<UserId>,
    epoch: u64,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    loading: bool,
    tombstones: HashSet<MessageId>,
    connections: Vec<Connection>,
}

impl ConversationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the focused recipient.
    pub fn focus(&self) -> Option<&UserId> {
        self.focus.as_ref()
    }

    /// Returns the visible messages in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns true if a message with `id` is visible.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Returns true while a history load for the current focus is outstanding.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Moves the focus to `recipient` and empties the visible list.
    ///
    /// The returned ticket must accompany the history response.
    pub fn set_focus(&mut self, recipient: UserId) -> HistoryTicket {
        self.epoch += 1;
        self.focus = Some(recipient.clone());
        self.messages.clear();
        self.ids.clear();
        self.tombstones.clear();
        self.loading = true;
        HistoryTicket {
            recipient,
            epoch: self.epoch,
        }
    }

    /// Installs the history fetched under `ticket`.
    ///
    /// Returns false, leaving the store untouched, if the focus moved since the
    /// ticket was issued.  Otherwise the visible list becomes `history` in
    /// server order, minus messages deleted while the request was in flight,
    /// followed by live messages the history lacks.
    pub fn apply_history(&mut self, ticket: &HistoryTicket, history: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            STORE_STALE_HISTORY.click();
            tracing::debug!(recipient = %ticket.recipient, "discarding stale history");
            return false;
        }

        let live = std::mem::take(&mut self.messages);
        self.ids.clear();
        for message in history {
            if self.tombstones.contains(&message.id) || self.ids.contains(&message.id) {
                continue;
            }
            self.ids.insert(message.id.clone());
            self.messages.push(message);
        }
        for message in live {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.tombstones.clear();
        self.loading = false;
        true
    }

    /// Ends the load issued under `ticket` without installing anything.
    ///
    /// Live messages that arrived meanwhile stay visible.  Returns false if
    /// the focus moved since the ticket was issued.
    pub fn abandon_history(&mut self, ticket: &HistoryTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.tombstones.clear();
        self.loading = false;
        true
    }

    fn is_current(&self, ticket: &HistoryTicket) -> bool {
        ticket.epoch == self.epoch && self.focus.as_ref() == Some(&ticket.recipient)
    }

    /// Adds `message` to the focused conversation, once per id.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        let in_focus = self
            .focus
            .as_ref()
            .is_some_and(|focus| message.involves(focus));
        if !in_focus {
            return AppendOutcome::OutOfFocus;
        }
        if self.ids.contains(&message.id) {
            STORE_DUPLICATES.click();
            return AppendOutcome::Duplicate;
        }
        STORE_APPENDS.click();
        self.ids.insert(message.id.clone());
        self.messages.push(message);
        AppendOutcome::Appended
    }

    /// Removes the message with `id`.  Returns false if it was not visible.
    ///
    /// While history is loading the id is remembered so the history cannot
    /// bring the message back.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        if self.loading {
            self.tombstones.insert(id.clone());
        }
        if !self.ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| &m.id != id);
        true
    }

    /// Returns the connections, most recent first.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Adds `connection` at the front if its user is not yet connected.
    ///
    /// An existing entry keeps its position and takes the new email.  Returns
    /// true if the connection was new.
    pub fn upsert_connection(&mut self, connection: Connection) -> bool {
        match self
            .connections
            .iter_mut()
            .find(|c| c.connected_user_id == connection.connected_user_id)
        {
            Some(existing) => {
                existing.email = connection.email;
                false
            }
            None => {
                self.connections.insert(0, connection);
                true
            }
        }
    }

    /// Replaces the connection list with the server's, keeping the first
    /// entry per user.
    pub fn replace_connections(&mut self, connections: Vec<Connection>) {
        let mut seen = HashSet::new();
        self.connections = connections
            .into_iter()
            .filter(|c| seen.insert(c.connected_user_id.clone()))
            .collect();
    }

    /// Reduces one realtime event against the focus current at this moment.
    pub fn apply(&mut self, event: RealtimeEvent) -> Option<StoreChange> {
        match event {
            RealtimeEvent::NewMessage { message } => match self.append(message.clone()) {
                AppendOutcome::Appended => Some(StoreChange::MessageAppended(message)),
                AppendOutcome::Duplicate | AppendOutcome::OutOfFocus => None,
            },
            RealtimeEvent::NewConnection { connection } => {
                if self.upsert_connection(connection.clone()) {
                    Some(StoreChange::ConnectionAdded(connection))
                } else {
                    None
                }
            }
            RealtimeEvent::DeleteMessage { message_id } => {
                if self.remove(&message_id) {
                    Some(StoreChange::MessageRemoved(message_id))
                } else {
                    None
                }
            }
        }
    }

    /// Drops every message, connection and the focus.
    ///
    /// Outstanding history tickets become stale.
    pub fn clear(&mut self) {
        self.epoch += 1;
        self.focus = None;
        self.messages.clear();
        self.ids.clear();
        self.tombstones.clear();
        self.loading = false;
        self.connections.clear();
    }
}
