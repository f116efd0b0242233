use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// What a saved prompt is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Development,
    Testing,
    Design,
    #[default]
    General,
    Custom,
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PromptCategory::Development => "development",
            PromptCategory::Testing => "testing",
            PromptCategory::Design => "design",
            PromptCategory::General => "general",
            PromptCategory::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// A `{name}` placeholder inside a prompt's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptVariable {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Used when the caller supplies no input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default)]
    pub required: bool,
}

impl PromptVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            default_value: None,
            required: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Orderings for a prompt listing.  Every ordering is descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptSort {
    UseCount,
    CreateTime,
    #[default]
    UpdateTime,
}

/// A saved, reusable system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub id: String,
    pub title: String,
    pub content: String,

    #[serde(default)]
    pub category: PromptCategory,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<PromptVariable>,

    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    #[serde(with = "crate::utils::time")]
    pub updated_at: OffsetDateTime,

    /// Completed replies this prompt was sent with.
    #[serde(default)]
    pub use_count: u64,

    #[serde(default)]
    pub is_favorite: bool,

    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Prompt {
    /// A general-purpose prompt with a fresh id.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = crate::utils::time::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            category: PromptCategory::General,
            tags: Vec::new(),
            variables: Vec::new(),
            created_at: now,
            updated_at: now,
            use_count: 0,
            is_favorite: false,
            is_active: true,
        }
    }

    pub fn with_category(mut self, category: PromptCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_variables(mut self, variables: Vec<PromptVariable>) -> Self {
        self.variables = variables;
        self
    }

    /// True if `query` occurs in the title, the content, or a tag, ignoring case.
    ///
    /// A blank query matches every prompt.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.title.to_lowercase().contains(&needle)
            || self.content.to_lowercase().contains(&needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&needle))
    }

    /// The content with each declared variable's `{name}` filled in.
    ///
    /// The trimmed `input` fills every variable; a blank input falls back to the variable's
    /// default, then to nothing.  Only the first occurrence of each placeholder is replaced.
    pub fn render(&self, input: &str) -> String {
        let input = input.trim();
        let mut content = self.content.clone();
        for variable in &self.variables {
            let value = if input.is_empty() {
                variable.default_value.as_deref().unwrap_or("")
            } else {
                input
            };
            let placeholder = format!("{{{}}}", variable.name);
            content = content.replacen(&placeholder, value, 1);
        }
        content
    }
}

/// `prompts` ordered by `by`, largest first.  Ties keep their order.
pub fn sort_prompts(prompts: &[Prompt], by: PromptSort) -> Vec<&Prompt> {
    let mut sorted: Vec<&Prompt> = prompts.iter().collect();
    match by {
        PromptSort::UseCount => sorted.sort_by(|a, b| b.use_count.cmp(&a.use_count)),
        PromptSort::CreateTime => sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        PromptSort::UpdateTime => sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
    }
    sorted
}
