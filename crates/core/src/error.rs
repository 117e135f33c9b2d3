use promptgate_llm::provider::LlmError;

/// Internal pipeline errors. None of these ever reach the caller of
/// `validate` — the facade degrades them into cautious results.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("provider call timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed intent response: {0}")]
    MalformedIntent(String),
}
