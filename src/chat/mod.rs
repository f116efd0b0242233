//! Chat application module for interactive streaming conversations.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! streamchat client library. It supports:
//!
//! - Streaming replies rendered as they are reassembled
//! - Multiple saved sessions with derived titles
//! - Switching between configured endpoints
//! - Stopping a reply mid-stream
//! - A library of saved prompts sent as system messages
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing, the endpoints file, and configuration
//! - [`session`]: Ties the conversation store to the streaming client
//! - [`commands`]: Slash command parsing and handling

mod commands;
mod config;
mod session;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    API_KEY_ENV, ChatArgs, ChatConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, EndpointsFile,
};
pub use session::{ChatSession, RUN_PROMPT_PREFIX, STOPPED_MARKER, SavedPrompts};
