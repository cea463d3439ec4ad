/// Shared error type used across all Synergize crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("context acquisition timed out for model {model} after {waited_ms} ms")]
    ContextTimeout { model: String, waited_ms: u64 },

    #[error("inference on {model}: {message}")]
    Inference { model: String, message: String },

    #[error("state store: {0}")]
    StateStore(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("turn {got} out of order (expected {expected})")]
    OutOfOrderTurn { expected: u32, got: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the store adapter should retry the failed operation.
    /// Only transient state-store failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StateStore(_))
    }

    pub fn inference(model: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Inference {
            model: model.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
