//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg`, the YAML endpoints file, and the
//! resolved [`ChatConfig`] the REPL runs with.

use std::fs;
use std::path::{Path, PathBuf};

use arrrg_derive::CommandLine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, ModelEndpoint};

/// Environment variable consulted when no API key is given on the command line or in the
/// endpoints file.
pub const API_KEY_ENV: &str = "STREAMCHAT_API_KEY";

/// Base URL used when neither a flag nor an endpoints file names one.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used when neither a flag nor an endpoints file names one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Command-line arguments for the streamchat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// YAML file listing named endpoints.
    #[arrrg(optional, "YAML file listing endpoints", "FILE")]
    pub endpoints: Option<String>,

    /// Endpoint to start with, by name.
    #[arrrg(optional, "Endpoint to use from the endpoints file", "NAME")]
    pub endpoint: Option<String>,

    /// Base URL of the endpoint.
    #[arrrg(optional, "Base URL (default: https://api.openai.com/v1)", "URL")]
    pub base_url: Option<String>,

    /// API key.
    #[arrrg(optional, "API key (default: $STREAMCHAT_API_KEY)", "KEY")]
    pub api_key: Option<String>,

    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gpt-3.5-turbo)", "MODEL")]
    pub model: Option<String>,

    /// System prompt to set context for the conversation.
    #[arrrg(optional, "System prompt for the conversation", "PROMPT")]
    pub system: Option<String>,

    /// Maximum tokens per response.
    #[arrrg(optional, "Max tokens per response (default: 2000)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Directory sessions are saved in.
    #[arrrg(optional, "Directory for saved sessions (default: in memory only)", "DIR")]
    pub store_dir: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Named endpoints loaded from YAML.
///
/// ```yaml
/// active: deepseek
/// endpoints:
///   - name: deepseek
///     baseUrl: https://api.deepseek.com/v1
///     model: deepseek-chat
///   - name: openai
///     baseUrl: https://api.openai.com/v1
///     apiKey: sk-...
///     model: gpt-4o-mini
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointsFile {
    /// Name of the endpoint to use when none is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,

    /// Every configured endpoint.
    #[serde(default)]
    pub endpoints: Vec<ModelEndpoint>,
}

impl EndpointsFile {
    /// Parse an endpoints file from YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse an endpoints file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::parse(&text)
    }

    /// Find an endpoint by its display name.
    pub fn find(&self, name: &str) -> Option<&ModelEndpoint> {
        self.endpoints.iter().find(|e| e.display_name() == name)
    }

    /// Pick the endpoint to start with.
    ///
    /// An explicit name wins, then the file's `active` entry, then the first endpoint.
    pub fn select(&self, explicit: Option<&str>) -> Result<&ModelEndpoint> {
        if let Some(name) = explicit {
            return self.find(name).ok_or_else(|| endpoint_not_found(name));
        }
        if let Some(name) = self.active.as_deref() {
            if let Some(endpoint) = self.find(name) {
                return Ok(endpoint);
            }
            tracing::warn!(name, "active endpoint is not listed; using the first endpoint");
        }
        self.endpoints.first().ok_or_else(|| {
            Error::validation("endpoints file lists no endpoints", Some("endpoints".to_string()))
        })
    }
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing command-line
/// arguments, the endpoints file, and the environment.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The endpoint requests go to.
    pub endpoint: ModelEndpoint,

    /// Every endpoint the user can switch to.
    pub endpoints: Vec<ModelEndpoint>,

    /// Optional system prompt sent ahead of every conversation.
    pub system_prompt: Option<String>,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens per response.
    pub max_tokens: u32,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Directory sessions are saved in; `None` keeps them in memory.
    pub store_dir: Option<PathBuf>,
}

impl ChatConfig {
    /// Creates a new ChatConfig for `endpoint` with default values.
    ///
    /// Defaults:
    /// - Temperature: 0.7
    /// - Max tokens: 2000
    /// - Color: enabled
    /// - Sessions: in memory
    pub fn new(endpoint: ModelEndpoint) -> Self {
        Self {
            endpoints: vec![endpoint.clone()],
            endpoint,
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            use_color: true,
            store_dir: None,
        }
    }

    /// Resolve the configuration from parsed arguments.
    ///
    /// `env_api_key` is the value of [`API_KEY_ENV`], if set.  It fills in the key for every
    /// endpoint that does not carry one.  Flag overrides apply to the starting endpoint and to
    /// its entry in [`ChatConfig::endpoints`], so switching back to it keeps them.
    pub fn from_args(args: ChatArgs, env_api_key: Option<String>) -> Result<Self> {
        let (mut endpoint, mut endpoints, slot) = match args.endpoints.as_deref() {
            Some(path) => {
                let file = EndpointsFile::load(path)?;
                let selected = file.select(args.endpoint.as_deref())?.clone();
                let slot = file
                    .endpoints
                    .iter()
                    .position(|e| e.display_name() == selected.display_name());
                (selected, file.endpoints, slot)
            }
            None => {
                if let Some(name) = args.endpoint.as_deref() {
                    return Err(Error::validation(
                        format!("--endpoint {name} requires --endpoints"),
                        Some("endpoint".to_string()),
                    ));
                }
                let endpoint = ModelEndpoint::new(DEFAULT_BASE_URL, "", DEFAULT_MODEL);
                (endpoint, Vec::new(), None)
            }
        };
        if let Some(base_url) = args.base_url {
            endpoint.base_url = base_url;
        }
        if let Some(model) = args.model {
            endpoint.model = model;
        }
        if let Some(api_key) = args.api_key {
            endpoint.api_key = api_key;
        }
        if let Some(env_key) = env_api_key.filter(|k| !k.trim().is_empty()) {
            for e in std::iter::once(&mut endpoint).chain(endpoints.iter_mut()) {
                if e.api_key.trim().is_empty() {
                    e.api_key = env_key.clone();
                }
            }
        }
        endpoint.validate()?;
        match slot {
            Some(idx) => endpoints[idx] = endpoint.clone(),
            None => endpoints.insert(0, endpoint.clone()),
        }

        Ok(ChatConfig {
            system_prompt: args.system,
            max_tokens: args.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            use_color: !args.no_color,
            store_dir: args.store_dir.map(PathBuf::from),
            endpoints,
            ..ChatConfig::new(endpoint)
        })
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the maximum tokens per response.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets the session directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Sets the endpoints available for switching.
    pub fn with_endpoints(mut self, endpoints: Vec<ModelEndpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Look up a configured endpoint by display name.
    pub fn find_endpoint(&self, name: &str) -> Result<&ModelEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.display_name() == name)
            .ok_or_else(|| endpoint_not_found(name))
    }
}

fn endpoint_not_found(name: &str) -> Error {
    Error::not_found(
        format!("no endpoint named {name}"),
        Some("endpoint".to_string()),
        Some(name.to_string()),
    )
}
