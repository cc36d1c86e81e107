//! Chat-completion plumbing: the backend seam the dispatchers call through,
//! an OpenAI-compatible HTTP client, and model selection.

pub mod backend;
pub mod openai;
pub mod registry;

pub use backend::{CompletionBackend, CompletionRequest, CompletionResponse, ToolCall, ToolDefinition};
pub use openai::OpenAIClient;
pub use registry::ModelRegistry;
