use thiserror::Error;

/// Failure classes surfaced by the generation clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    EmptyResponse,
    MalformedOutput,
    SchemaViolation,
    InvalidInput,
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("No response text received from the AI model")]
    EmptyResponse,

    #[error("Invalid JSON response from AI model: {message}")]
    MalformedOutput { message: String, raw: String },

    #[error("Model returned {value:?} for {field}, which is outside the declared schema")]
    SchemaViolation { field: String, value: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Transport(_) | Self::Service { .. } => ErrorKind::Transport,
            Self::EmptyResponse => ErrorKind::EmptyResponse,
            Self::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            Self::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// True when the service rejected the credential rather than the request.
    pub fn is_credential_rejected(&self) -> bool {
        match self {
            Self::Service { status, message } => {
                matches!(status, 401 | 403)
                    || message.contains("Requested entity was not found")
                    || message.contains("API_KEY_INVALID")
                    || message.contains("API key not valid")
            }
            _ => false,
        }
    }

    /// Raw model text attached to a malformed-output failure
    pub fn raw_output(&self) -> Option<&str> {
        match self {
            Self::MalformedOutput { raw, .. } => Some(raw),
            _ => None,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub(crate) fn violation(field: &str, value: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.to_string(),
            value: value.into(),
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {}", err))
        } else if err.is_builder() {
            Self::Configuration(format!("failed to build HTTP request: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
