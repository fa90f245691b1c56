use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Rejected before anything is sent to the backend.
    InvalidArgument(String),
    /// 401 from the backend; carries the response body.
    Unauthorized(String),
    /// Transport failure or per-call timeout.
    Transient(String),
    Status { status: u16, body: String },
    Parse(String),
    Config(String),
}

impl DiscoveryError {
    /// Whether a background loop should try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Transient(_) | DiscoveryError::Status { .. } | DiscoveryError::Parse(_)
        )
    }
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            DiscoveryError::Unauthorized(body) => write!(f, "unauthorized: {}", body),
            DiscoveryError::Transient(msg) => write!(f, "transient error: {}", msg),
            DiscoveryError::Status { status, body } => {
                write!(f, "server responded with status {}: {}", status, body)
            }
            DiscoveryError::Parse(msg) => write!(f, "parse error: {}", msg),
            DiscoveryError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DiscoveryError::Transient(format!("request timed out: {}", e))
        } else {
            DiscoveryError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        DiscoveryError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
