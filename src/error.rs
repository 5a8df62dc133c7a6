use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Resource not found: {kind} {name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Resource already exists: {kind} {name} in namespace {namespace}")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested resource version is older than the server retains.
    #[error("Resource version expired: {0}")]
    Expired(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index {index} not registered for {kind}")]
    IndexNotFound { kind: String, index: String },

    #[error("Index {0} is already registered")]
    IndexConflict(String),

    #[error("Informer for {0} has already been started")]
    AlreadyStarted(String),

    #[error("No kube client configured for informer factory")]
    NoClient,

    #[error("No informer requested for resource {0}")]
    UnknownResource(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the reflector should recover from this error by relisting.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Expired(_)
                | Error::Timeout(_)
                | Error::Transport(_)
                | Error::Decode(_)
                | Error::Api { .. }
                | Error::Internal(_)
        )
    }

    /// HTTP status the API server would answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::AlreadyExists { .. } | Error::Conflict(_) => 409,
            Error::Expired(_) => 410,
            Error::Timeout(_) => 504,
            Error::InvalidSelector(_) | Error::InvalidRequest(_) | Error::Serialization(_) => 400,
            Error::Api { code, .. } => *code,
            _ => 500,
        }
    }

    /// `reason` field of the API server's `Status` object for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NotFound",
            Error::AlreadyExists { .. } => "AlreadyExists",
            Error::Conflict(_) => "Conflict",
            Error::Expired(_) => "Expired",
            Error::Timeout(_) => "Timeout",
            Error::InvalidSelector(_) | Error::InvalidRequest(_) | Error::Serialization(_) => {
                "BadRequest"
            }
            _ => "InternalError",
        }
    }
}
