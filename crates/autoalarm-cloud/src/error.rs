/// Errors that can occur when talking to AWS control-plane APIs.
///
/// # Examples
///
/// ```rust
/// use autoalarm_cloud::error::CloudError;
///
/// let err = CloudError::Throttled { service: "monitoring".to_string() };
/// assert!(err.is_throttling());
/// assert!(err.to_string().contains("monitoring"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// HTTP-level error: non-2xx status code without a recognisable error payload.
    #[error("{service} API HTTP error: status={status}, body={body}")]
    HttpError {
        service: String,
        status: u16,
        body: String,
    },

    /// The API returned an error code and message.
    #[error("{service} API error: code={code}, message={message}")]
    ApiResponseError {
        service: String,
        code: String,
        message: String,
    },

    /// Request was throttled. Callers may retry after backoff.
    #[error("{service} API rate limited, retry after backoff")]
    Throttled { service: String },

    /// The addressed resource does not exist.
    #[error("{service} resource not found: {message}")]
    NotFound { service: String, message: String },

    /// SigV4 signing failed (invalid key length or bad timestamp).
    #[error("Signing error: {0}")]
    SigningError(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A rules namespace document could not be encoded or decoded.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A base64 `data` blob returned by the rules API was malformed.
    #[error("Base64 error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Credentials or region are missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The Prometheus workspace is missing or not active.
    #[error("Prometheus workspace {workspace_id} is unavailable: {status}")]
    WorkspaceUnavailable {
        workspace_id: String,
        status: String,
    },

    /// The Prometheus workspace is at or over its rule ceiling.
    #[error("Prometheus workspace {workspace_id} holds {count} rules, limit is {limit}")]
    RuleLimitExceeded {
        workspace_id: String,
        count: usize,
        limit: usize,
    },
}

impl CloudError {
    pub fn is_throttling(&self) -> bool {
        matches!(self, CloudError::Throttled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Errors after which the Prometheus pathway cannot proceed and the
    /// resource should be monitored through CloudWatch instead.
    pub fn is_fatal_for_prometheus(&self) -> bool {
        matches!(
            self,
            CloudError::WorkspaceUnavailable { .. } | CloudError::RuleLimitExceeded { .. }
        )
    }
}

/// Error codes AWS services use to signal throttling.
pub const THROTTLING_CODES: [&str; 6] = [
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CloudError>;
