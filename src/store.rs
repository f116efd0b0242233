//! The conversation store.
//!
//! [`ConversationStore`] is the only owner of session state.  Its methods are the only way to
//! change that state, and each one either applies completely or, when the session or message it
//! names does not exist, returns [`Error::NotFound`] and changes nothing.  After every successful
//! mutation the whole session list is written to the persistence collaborator.

use crate::error::{Error, Result};
use crate::observability::{STORE_MUTATIONS, STORE_PERSIST_ERRORS};
use crate::persistence::Persistence;
use crate::types::{Message, MessageUpdate, Role, Session, derive_title};
use crate::utils::time;

/// Key the session list is persisted under.
pub const SESSIONS_KEY: &str = "sessions";

/// In-memory sessions backed by a [`Persistence`].
#[derive(Debug)]
pub struct ConversationStore<P: Persistence> {
    sessions: Vec<Session>,
    active_session_id: Option<String>,
    persistence: P,
}

impl<P: Persistence> ConversationStore<P> {
    /// An empty store.  Call [`ConversationStore::restore`] to load saved sessions.
    pub fn new(persistence: P) -> Self {
        Self {
            sessions: Vec::new(),
            active_session_id: None,
            persistence,
        }
    }

    /// Load the saved session list, replacing what is in memory.
    ///
    /// Returns the number of sessions loaded.  Nothing saved is not an error.
    pub fn restore(&mut self) -> Result<usize> {
        let Some(value) = self.persistence.load(SESSIONS_KEY)? else {
            return Ok(0);
        };
        let sessions: Vec<Session> = serde_json::from_value(value).map_err(|err| {
            Error::serialization("failed to parse saved sessions", Some(Box::new(err)))
        })?;
        let count = sessions.len();
        self.bulk_load(sessions);
        Ok(count)
    }

    /// All sessions, newest first.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session_id
            .as_deref()
            .and_then(|id| self.session(id))
    }

    /// Every message still marked as streaming, with the session holding it.
    pub fn streaming_messages(&self) -> Vec<(&Session, &Message)> {
        self.sessions
            .iter()
            .flat_map(|s| s.messages.iter().filter(|m| m.is_streaming()).map(move |m| (s, m)))
            .collect()
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Append `message` to a session.
    ///
    /// A user message that is the first in a session still carrying the default title names the
    /// session.
    pub fn create_message(&mut self, session_id: &str, message: Message) -> Result<()> {
        let session = self.session_mut(session_id)?;
        if session.messages.is_empty() && message.role == Role::User && session.has_default_title()
        {
            session.title = derive_title(&message.content);
        }
        tracing::debug!(
            session_id,
            message_id = %message.id,
            role = %message.role,
            status = %message.status,
            "message created"
        );
        session.messages.push(message);
        touch(session);
        self.persist();
        Ok(())
    }

    /// Concatenate `text` onto a message's content.
    ///
    /// Not idempotent: appending the same text twice duplicates it.
    pub fn append_delta(&mut self, session_id: &str, message_id: &str, text: &str) -> Result<()> {
        let session = self.session_mut(session_id)?;
        let message = message_mut(session, message_id)?;
        message.content.push_str(text);
        touch(session);
        self.persist();
        Ok(())
    }

    /// Merge the fields present in `update` into a message.
    pub fn update_fields(
        &mut self,
        session_id: &str,
        message_id: &str,
        update: MessageUpdate,
    ) -> Result<()> {
        let session = self.session_mut(session_id)?;
        let message = message_mut(session, message_id)?;
        update.apply_to(message);
        tracing::debug!(session_id, message_id, status = %message.status, "message updated");
        touch(session);
        self.persist();
        Ok(())
    }

    /// Replace every session.  Timestamps are kept as given.
    ///
    /// If no session is active, or the active one is not in the new list, the first session
    /// becomes active.
    pub fn bulk_load(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
        let active_present = self
            .active_session_id
            .as_deref()
            .is_some_and(|id| self.sessions.iter().any(|s| s.id == id));
        if !active_present {
            self.active_session_id = self.sessions.first().map(|s| s.id.clone());
        }
        tracing::debug!(sessions = self.sessions.len(), "sessions loaded");
        self.persist();
    }

    /// Insert a session at the front and make it active.  Returns its id.
    pub fn add_session(&mut self, session: Session) -> String {
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.active_session_id = Some(id.clone());
        self.persist();
        id
    }

    /// Remove a session.  If it was active, the first remaining session becomes active.
    pub fn remove_session(&mut self, session_id: &str) -> Result<Session> {
        let idx = self.session_index(session_id)?;
        let removed = self.sessions.remove(idx);
        if self.active_session_id.as_deref() == Some(session_id) {
            self.active_session_id = self.sessions.first().map(|s| s.id.clone());
        }
        self.persist();
        Ok(removed)
    }

    /// Give a session an explicit title.
    pub fn rename_session(&mut self, session_id: &str, title: impl Into<String>) -> Result<()> {
        let session = self.session_mut(session_id)?;
        session.title = title.into();
        touch(session);
        self.persist();
        Ok(())
    }

    /// Make an existing session active.
    pub fn set_active_session(&mut self, session_id: &str) -> Result<()> {
        self.session_index(session_id)?;
        self.active_session_id = Some(session_id.to_string());
        Ok(())
    }

    fn session_index(&self, session_id: &str) -> Result<usize> {
        self.sessions
            .iter()
            .position(|s| s.id == session_id)
            .ok_or_else(|| session_not_found(session_id))
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session> {
        let idx = self.session_index(session_id)?;
        Ok(&mut self.sessions[idx])
    }

    fn persist(&mut self) {
        STORE_MUTATIONS.click();
        let result = serde_json::to_value(&self.sessions)
            .map_err(Error::from)
            .and_then(|value| self.persistence.save(SESSIONS_KEY, &value));
        if let Err(err) = result {
            STORE_PERSIST_ERRORS.click();
            tracing::warn!(error = %err, "failed to persist sessions");
        }
    }
}

fn message_mut<'a>(session: &'a mut Session, message_id: &str) -> Result<&'a mut Message> {
    let session_id = session.id.clone();
    session
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
        .ok_or_else(|| {
            Error::not_found(
                format!("no message {message_id} in session {session_id}"),
                Some("message".to_string()),
                Some(message_id.to_string()),
            )
        })
}

fn session_not_found(session_id: &str) -> Error {
    Error::not_found(
        format!("no session {session_id}"),
        Some("session".to_string()),
        Some(session_id.to_string()),
    )
}

fn touch(session: &mut Session) {
    session.updated_at = time::advance(session.updated_at, time::now());
}
