// Public modules
pub mod api_error_body;
pub mod chat_completion_chunk;
pub mod chat_completion_request;
pub mod message;
pub mod model_endpoint;
pub mod prompt;
pub mod role;
pub mod session;

// Re-exports
pub use api_error_body::{ApiErrorBody, ApiErrorDetail};
pub use chat_completion_chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
pub use chat_completion_request::{
    ChatCompletionRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, WireMessage, prepare_messages,
};
pub use message::{Message, MessageMetadata, MessageStatus, MessageUpdate};
pub use model_endpoint::ModelEndpoint;
pub use prompt::{Prompt, PromptCategory, PromptSort, PromptVariable, sort_prompts};
pub use role::{Role, RoleParseError};
pub use session::{DEFAULT_SESSION_TITLE, Session, TITLE_MAX_CHARS, derive_title};
