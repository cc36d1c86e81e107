//! Error taxonomy of the dispatch layer.

/// Errors a dispatcher can hand back to its caller.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Input is empty")]
    EmptyInput,

    #[error("No classification candidates supplied")]
    NoCandidates,

    #[error("Completion call failed: {0}")]
    RemoteCall(#[source] anyhow::Error),

    #[error("Completion returned no content")]
    EmptyResponse,

    #[error("Completion call timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("Dispatch cancelled")]
    Cancelled,

    /// Only raised internally; dispatchers recover from it with a fallback.
    #[error("Could not parse completion result: {message}")]
    Parse { message: String },
}

impl AgentError {
    pub fn parse(message: impl Into<String>) -> Self {
        AgentError::Parse {
            message: message.into(),
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, AgentError>;
