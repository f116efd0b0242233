//! Core chat session management.
//!
//! This module provides the `ChatSession` struct which ties the conversation store to the
//! streaming client: it records the user's message, streams the reply into the store, and
//! settles the reply's status however the stream ends.

use tokio_util::sync::CancellationToken;

use crate::client::{ChatClient, StreamOutcome};
use crate::error::{Error, Result};
use crate::persistence::{MemoryPersistence, Persistence};
use crate::prompts::PromptLibrary;
use crate::render::Renderer;
use crate::store::ConversationStore;
use crate::types::{
    Message, MessageStatus, MessageUpdate, ModelEndpoint, Prompt, PromptSort, Session,
};

use super::config::ChatConfig;

/// Text appended to a reply the user stopped.
pub const STOPPED_MARKER: &str = "\n\n[output stopped]";

/// Prefix of the user message sent when a saved prompt runs without input.
pub const RUN_PROMPT_PREFIX: &str = "Run prompt: ";

/// Saved prompts, wherever they are kept.
pub type SavedPrompts = PromptLibrary<Box<dyn Persistence>>;

/// A chat session that manages conversation state and API interactions.
///
/// Sending takes `&mut self`, so a session never has two replies streaming at once.
pub struct ChatSession<P: Persistence> {
    client: ChatClient,
    config: ChatConfig,
    store: ConversationStore<P>,
    prompts: SavedPrompts,
}

impl<P: Persistence> ChatSession<P> {
    /// Creates a chat session over `store`.  An empty store gets a fresh session.
    ///
    /// Saved prompts start out empty and in memory; see [`ChatSession::with_prompts`].
    pub fn new(config: ChatConfig, store: ConversationStore<P>) -> Result<Self> {
        let client = build_client(&config, config.endpoint.clone())?;
        let mut session = Self {
            client,
            config,
            store,
            prompts: PromptLibrary::new(Box::new(MemoryPersistence::new())),
        };
        session.ensure_active();
        Ok(session)
    }

    /// Uses `prompts` as the saved prompt library.
    pub fn with_prompts(mut self, prompts: SavedPrompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Sends a user message and streams the reply into the active session.
    ///
    /// The reply is rendered flush by flush.  When `cancel` fires the reply keeps what it has,
    /// gains [`STOPPED_MARKER`], and is marked successful.  When the request fails the reply is
    /// marked as an error, keeps any partial content, and the error is returned.
    pub async fn send_streaming(
        &mut self,
        user_input: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        self.send_with_system(user_input, None, renderer, cancel).await
    }

    /// Sends `user_input` with the `n`-th saved prompt (1-based, library order).
    ///
    /// The rendered prompt goes out as a system message just ahead of the user message and is
    /// not stored in the session.  Blank input sends [`RUN_PROMPT_PREFIX`] and the prompt's
    /// title instead.  The prompt's use count goes up once the reply completes.
    pub async fn send_with_prompt(
        &mut self,
        n: usize,
        user_input: &str,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let prompt = self.prompt_at(n)?.clone();
        let system = prompt.render(user_input);
        let user_input = match user_input.trim() {
            "" => format!("{RUN_PROMPT_PREFIX}{}", prompt.title),
            input => input.to_string(),
        };
        let outcome = self
            .send_with_system(&user_input, Some(system), renderer, cancel)
            .await?;
        if outcome == StreamOutcome::Completed {
            self.prompts.increment_use_count(&prompt.id)?;
        }
        Ok(outcome)
    }

    async fn send_with_system(
        &mut self,
        user_input: &str,
        system: Option<String>,
        renderer: &mut dyn Renderer,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome> {
        let session_id = self.ensure_active();
        self.store
            .create_message(&session_id, Message::user(user_input.trim()))?;
        let mut history = self.outgoing_history(&session_id)?;
        if let Some(system) = system {
            // Just ahead of the new user message, which is last.
            let at = history.len().saturating_sub(1);
            history.insert(at, Message::system(system));
        }

        let reply = Message::streaming_placeholder();
        let reply_id = reply.id.clone();
        self.store.create_message(&session_id, reply)?;

        let Self { client, store, .. } = self;
        let outcome = client
            .send(
                &history,
                |text| {
                    if let Err(err) = store.append_delta(&session_id, &reply_id, text) {
                        tracing::warn!(error = %err, "dropping flush for a vanished reply");
                    }
                    renderer.print_text(text);
                },
                cancel,
            )
            .await;

        match outcome {
            Ok(StreamOutcome::Completed) => {
                self.store.update_fields(
                    &session_id,
                    &reply_id,
                    MessageUpdate::status(MessageStatus::Success),
                )?;
                renderer.finish_response();
                Ok(StreamOutcome::Completed)
            }
            Ok(StreamOutcome::Cancelled) => {
                let content = self
                    .store
                    .session(&session_id)
                    .and_then(|s| s.message(&reply_id))
                    .map(|m| format!("{}{STOPPED_MARKER}", m.content))
                    .unwrap_or_else(|| STOPPED_MARKER.to_string());
                self.store.update_fields(
                    &session_id,
                    &reply_id,
                    MessageUpdate::status(MessageStatus::Success).with_content(content),
                )?;
                renderer.print_interrupted();
                Ok(StreamOutcome::Cancelled)
            }
            Err(err) => {
                if let Err(update_err) = self.store.update_fields(
                    &session_id,
                    &reply_id,
                    MessageUpdate::status(MessageStatus::Error),
                ) {
                    tracing::warn!(error = %update_err, "could not mark reply as failed");
                }
                Err(err)
            }
        }
    }

    /// The messages sent for the next request: the system prompt, then the session's history.
    fn outgoing_history(&self, session_id: &str) -> Result<Vec<Message>> {
        let session = self.store.session(session_id).ok_or_else(|| {
            Error::not_found(
                format!("no session {session_id}"),
                Some("session".to_string()),
                Some(session_id.to_string()),
            )
        })?;
        let mut history = Vec::with_capacity(session.messages.len() + 1);
        if let Some(prompt) = self.config.system_prompt.as_deref() {
            history.push(Message::system(prompt));
        }
        history.extend(
            session
                .messages
                .iter()
                .filter(|m| !m.content.trim().is_empty())
                .cloned(),
        );
        Ok(history)
    }

    fn ensure_active(&mut self) -> String {
        match self.store.active_session_id() {
            Some(id) => id.to_string(),
            None => self.store.add_session(Session::new()),
        }
    }

    /// Starts a new session and makes it active.
    pub fn new_session(&mut self) -> String {
        self.store.add_session(Session::new())
    }

    /// Makes the `n`-th session (1-based, newest first) active.
    pub fn switch_session(&mut self, n: usize) -> Result<&Session> {
        let id = self.session_id_at(n)?;
        self.store.set_active_session(&id)?;
        self.store
            .session(&id)
            .ok_or_else(|| Error::not_found("session vanished", None, Some(id.clone())))
    }

    /// Deletes the `n`-th session (1-based, newest first).
    ///
    /// Deleting the last session leaves a fresh empty one active.
    pub fn delete_session(&mut self, n: usize) -> Result<Session> {
        let id = self.session_id_at(n)?;
        let removed = self.store.remove_session(&id)?;
        self.ensure_active();
        Ok(removed)
    }

    /// Renames the active session.
    pub fn rename_active(&mut self, title: &str) -> Result<()> {
        let id = self.ensure_active();
        self.store.rename_session(&id, title.trim())
    }

    fn session_id_at(&self, n: usize) -> Result<String> {
        n.checked_sub(1)
            .and_then(|idx| self.store.sessions().get(idx))
            .map(|s| s.id.clone())
            .ok_or_else(|| {
                Error::not_found(
                    format!("no session number {n}"),
                    Some("session".to_string()),
                    None,
                )
            })
    }

    /// Switches to a configured endpoint by name.
    pub fn set_endpoint(&mut self, name: &str) -> Result<()> {
        let endpoint = self.config.find_endpoint(name)?.clone();
        self.client = build_client(&self.config, endpoint.clone())?;
        self.config.endpoint = endpoint;
        tracing::debug!(endpoint = %self.config.endpoint.display_name(), "endpoint switched");
        Ok(())
    }

    /// Sets or clears the system prompt.
    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.config.system_prompt = prompt;
    }

    /// Returns the current system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.config.system_prompt.as_deref()
    }

    /// The endpoint requests currently go to.
    pub fn endpoint(&self) -> &ModelEndpoint {
        &self.config.endpoint
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore<P> {
        &self.store
    }

    pub fn prompts(&self) -> &SavedPrompts {
        &self.prompts
    }

    /// The `n`-th saved prompt (1-based, library order).
    pub fn prompt_at(&self, n: usize) -> Result<&Prompt> {
        n.checked_sub(1)
            .and_then(|idx| self.prompts.prompts().get(idx))
            .ok_or_else(|| {
                Error::not_found(
                    format!("no prompt number {n}"),
                    Some("prompt".to_string()),
                    None,
                )
            })
    }

    /// Saved prompts matching `query`, most used first, each with its library number.
    pub fn find_prompts(&self, query: &str) -> Vec<(usize, &Prompt)> {
        let all = self.prompts.prompts();
        self.prompts
            .sorted(PromptSort::UseCount)
            .into_iter()
            .filter(|p| p.matches(query))
            .filter_map(|p| all.iter().position(|q| q.id == p.id).map(|idx| (idx + 1, p)))
            .collect()
    }

    /// Saves a new prompt.  It becomes prompt number 1.
    pub fn add_prompt(&mut self, title: &str, content: &str) -> Result<String> {
        let (title, content) = (title.trim(), content.trim());
        if title.is_empty() || content.is_empty() {
            return Err(Error::validation(
                "a prompt needs a title and content",
                Some("prompt".to_string()),
            ));
        }
        Ok(self.prompts.add_prompt(Prompt::new(title, content)))
    }

    /// Deletes the `n`-th saved prompt.
    pub fn remove_prompt(&mut self, n: usize) -> Result<Prompt> {
        let id = self.prompt_at(n)?.id.clone();
        self.prompts.remove_prompt(&id)
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.store.active_session()
    }
}

fn build_client(config: &ChatConfig, endpoint: ModelEndpoint) -> Result<ChatClient> {
    Ok(ChatClient::new(endpoint)?
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens))
}
