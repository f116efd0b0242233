//! Streaming chat client for OpenAI-compatible chat-completions endpoints.
//!
//! A reply travels through three stages.  [`sse`] turns the response body into frames no matter
//! how the bytes were chunked.  [`reassemble`] coalesces the text deltas into display-sized
//! flushes.  [`client`] drives both over HTTP and honors cancellation.  The flushes land in a
//! [`store::ConversationStore`], which owns every session and persists it after each change.

// Public modules
pub mod chat;
pub mod client;
pub mod error;
pub mod observability;
pub mod persistence;
pub mod prompts;
pub mod reassemble;
pub mod render;
pub mod sse;
pub mod store;
pub mod types;
pub mod utils;

// Re-exports
pub use client::{ChatClient, StreamOutcome, classify_status, stream_flushes};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};
pub use prompts::{PROMPTS_KEY, PromptLibrary};
pub use reassemble::{Reassembler, is_flush_boundary, normalize};
pub use render::{PlainTextRenderer, Renderer};
pub use sse::{Frame, FrameDecoder, process_sse};
pub use store::{ConversationStore, SESSIONS_KEY};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
