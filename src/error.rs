use llm::error::LLMError;
use thiserror::Error;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

/// failures surfaced to the turn boundary. none of them are fatal; the
/// session stays usable for the next question.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// the provider rejected or aborted the request mid-stream
    /// (bad credential, unknown model, transport failure, ...).
    #[error("{0}")]
    Provider(String),

    /// the provider client could not be constructed at all.
    #[error("failed to build provider: {0}")]
    Build(String),

    /// the stream worker went away before reporting completion.
    #[error("stream worker disconnected")]
    Disconnected,
}

impl From<LLMError> for ChatError {
    fn from(err: LLMError) -> Self {
        Self::Provider(err.to_string())
    }
}
