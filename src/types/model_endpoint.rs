use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Credentials and location of a chat-completions endpoint.
///
/// The values are opaque to the client beyond being embedded in the request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEndpoint {
    /// Display name used to pick an endpoint from configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Base URL; `/chat/completions` is appended to it.
    pub base_url: String,

    /// Bearer token.  May be left out of configuration files and supplied at startup.
    #[serde(default)]
    pub api_key: String,

    /// Model identifier sent with every request.
    pub model: String,
}

impl ModelEndpoint {
    /// Create an unnamed endpoint.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Give the endpoint a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name to show for this endpoint.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.model.trim())
    }

    /// Check that every credential is present.
    pub fn validate(&self) -> Result<()> {
        for (param, value) in [
            ("base_url", &self.base_url),
            ("api_key", &self.api_key),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(
                    format!("{param} must not be empty"),
                    Some(param.to_string()),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEndpoint")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}
