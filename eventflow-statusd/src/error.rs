use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Failures talking to the EventFlow gateway.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no credential available")]
    MissingCredential,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response; `message` is the server's `message` field when present
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status {
        status: reqwest::StatusCode,
        message: Option<String>,
    },

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("event stream closed by server")]
    StreamClosed,
}

impl ClientError {
    /// Text shown to the operator when a lifecycle command fails
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Status { message: Some(message), .. } => format!("Error: {}", message),
            ClientError::Status { status, message: None } => format!(
                "Error: {}",
                status.canonical_reason().unwrap_or(status.as_str())
            ),
            other => format!("Error: {}", other),
        }
    }
}

/// Failures of an operator-issued lifecycle command.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ActionError {
    pub fn user_message(&self) -> String {
        match self {
            ActionError::Client(e) => e.user_message(),
            other => format!("Error: {}", other),
        }
    }
}
