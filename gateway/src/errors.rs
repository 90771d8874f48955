use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can occur while handling a gateway request
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Backend request failed for {0}: {1}")]
    BackendRequestFailed(String, String),

    #[error("Backend timeout for {0}")]
    BackendTimeout(String),

    #[error("Backend returned status {0} for {1}")]
    BackendStatus(u16, String),

    #[error("Response deserialization error: {0}")]
    ResponseDeserializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
