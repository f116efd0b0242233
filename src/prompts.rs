//! The saved prompt library.
//!
//! [`PromptLibrary`] owns the user's reusable prompts the way [`crate::ConversationStore`] owns
//! sessions: every change goes through it, and the whole list is written to its persistence
//! collaborator afterwards.

use crate::error::{Error, Result};
use crate::observability::{STORE_MUTATIONS, STORE_PERSIST_ERRORS};
use crate::persistence::Persistence;
use crate::types::{Prompt, PromptSort, sort_prompts};
use crate::utils::time;

/// Key the prompt list is persisted under.
pub const PROMPTS_KEY: &str = "prompts";

/// Saved prompts, newest first.
#[derive(Debug)]
pub struct PromptLibrary<P: Persistence> {
    prompts: Vec<Prompt>,
    persistence: P,
}

impl<P: Persistence> PromptLibrary<P> {
    /// An empty library.  Call [`PromptLibrary::restore`] to load saved prompts.
    pub fn new(persistence: P) -> Self {
        Self {
            prompts: Vec::new(),
            persistence,
        }
    }

    /// Load the saved prompts, replacing what is in memory.  Returns how many were loaded.
    pub fn restore(&mut self) -> Result<usize> {
        let Some(value) = self.persistence.load(PROMPTS_KEY)? else {
            return Ok(0);
        };
        self.prompts = serde_json::from_value(value).map_err(|err| {
            Error::serialization("failed to parse saved prompts", Some(Box::new(err)))
        })?;
        tracing::debug!(prompts = self.prompts.len(), "prompts loaded");
        Ok(self.prompts.len())
    }

    /// Every prompt in library order.
    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn prompt(&self, prompt_id: &str) -> Option<&Prompt> {
        self.prompts.iter().find(|p| p.id == prompt_id)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Prompts whose title, content or tags contain `query`, in library order.
    pub fn search(&self, query: &str) -> Vec<&Prompt> {
        self.prompts.iter().filter(|p| p.matches(query)).collect()
    }

    /// Every prompt ordered by `by`.
    pub fn sorted(&self, by: PromptSort) -> Vec<&Prompt> {
        sort_prompts(&self.prompts, by)
    }

    /// Insert a prompt at the front.  Returns its id.
    pub fn add_prompt(&mut self, prompt: Prompt) -> String {
        let id = prompt.id.clone();
        tracing::debug!(prompt_id = %id, title = %prompt.title, "prompt added");
        self.prompts.insert(0, prompt);
        self.persist();
        id
    }

    /// Replace the prompt with the same id.
    pub fn update_prompt(&mut self, mut prompt: Prompt) -> Result<()> {
        let idx = self.index_of(&prompt.id)?;
        touch(&mut prompt);
        self.prompts[idx] = prompt;
        self.persist();
        Ok(())
    }

    pub fn remove_prompt(&mut self, prompt_id: &str) -> Result<Prompt> {
        let idx = self.index_of(prompt_id)?;
        let removed = self.prompts.remove(idx);
        self.persist();
        Ok(removed)
    }

    /// Flip the favorite flag.  Returns the new value.
    pub fn toggle_favorite(&mut self, prompt_id: &str) -> Result<bool> {
        let prompt = self.prompt_mut(prompt_id)?;
        prompt.is_favorite = !prompt.is_favorite;
        let favorite = prompt.is_favorite;
        touch(prompt);
        self.persist();
        Ok(favorite)
    }

    /// Count one more use.  Returns the new count.
    pub fn increment_use_count(&mut self, prompt_id: &str) -> Result<u64> {
        let prompt = self.prompt_mut(prompt_id)?;
        prompt.use_count += 1;
        let count = prompt.use_count;
        touch(prompt);
        self.persist();
        Ok(count)
    }

    /// Forget every prompt, including the saved copy.
    pub fn clear(&mut self) {
        self.prompts.clear();
        STORE_MUTATIONS.click();
        if let Err(err) = self.persistence.remove(PROMPTS_KEY) {
            STORE_PERSIST_ERRORS.click();
            tracing::warn!(error = %err, "failed to clear saved prompts");
        }
    }

    fn index_of(&self, prompt_id: &str) -> Result<usize> {
        self.prompts
            .iter()
            .position(|p| p.id == prompt_id)
            .ok_or_else(|| prompt_not_found(prompt_id))
    }

    fn prompt_mut(&mut self, prompt_id: &str) -> Result<&mut Prompt> {
        let idx = self.index_of(prompt_id)?;
        Ok(&mut self.prompts[idx])
    }

    fn persist(&mut self) {
        STORE_MUTATIONS.click();
        let result = serde_json::to_value(&self.prompts)
            .map_err(Error::from)
            .and_then(|value| self.persistence.save(PROMPTS_KEY, &value));
        if let Err(err) = result {
            STORE_PERSIST_ERRORS.click();
            tracing::warn!(error = %err, "failed to persist prompts");
        }
    }
}

fn prompt_not_found(prompt_id: &str) -> Error {
    Error::not_found(
        format!("no prompt {prompt_id}"),
        Some("prompt".to_string()),
        Some(prompt_id.to_string()),
    )
}

fn touch(prompt: &mut Prompt) {
    prompt.updated_at = time::advance(prompt.updated_at, time::now());
}
