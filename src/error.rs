//! Error handling

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{error, info, warn};

/// Errors raised while handling uploads, calling upstreams and serving files.
#[derive(Debug)]
pub enum SkygramError {
    /// The upload was missing, not an image, or otherwise unusable
    InvalidInput(String),
    /// The upload was bigger than the configured limit (in bytes)
    PayloadTooLarge(usize),
    /// An upstream API was unreachable, errored, or returned junk
    Upstream(String),
    /// Reading or writing a stored image failed
    Storage(String),
    /// When a requested resource is not found
    NotFound(String),
    /// Startup configuration is unusable
    Config(String),
    /// When an internal server error occurs
    InternalServerError(String),
}

impl std::fmt::Display for SkygramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Self::PayloadTooLarge(limit) => write!(f, "Upload exceeds {limit} bytes"),
            Self::Upstream(msg) => write!(f, "Upstream error: {msg}"),
            Self::Storage(msg) => write!(f, "Storage error: {msg}"),
            Self::NotFound(what) => write!(f, "Not found: {what}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::InternalServerError(msg) => write!(f, "Internal server error: {msg}"),
        }
    }
}

impl std::error::Error for SkygramError {}

/// Whole megabytes when the limit is an exact multiple, bytes otherwise.
fn describe_limit(limit: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if limit >= MIB && limit % MIB == 0 {
        format!("{} MB", limit / MIB)
    } else {
        format!("{limit} bytes")
    }
}

impl From<std::io::Error> for SkygramError {
    fn from(err: std::io::Error) -> Self {
        SkygramError::Storage(err.to_string())
    }
}

impl From<axum::http::Error> for SkygramError {
    fn from(err: axum::http::Error) -> Self {
        SkygramError::InternalServerError(err.to_string())
    }
}

impl From<url::ParseError> for SkygramError {
    fn from(err: url::ParseError) -> Self {
        SkygramError::Config(err.to_string())
    }
}

impl From<reqwest::Error> for SkygramError {
    fn from(err: reqwest::Error) -> Self {
        SkygramError::Upstream(err.to_string())
    }
}

impl SkygramError {
    /// Status code this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Config(_) | Self::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SkygramError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let detail = match &self {
            SkygramError::InvalidInput(msg) => {
                info!("Bad request received: {msg}");
                msg.clone()
            }
            SkygramError::PayloadTooLarge(limit) => {
                info!("Rejected upload over {limit} bytes");
                format!("File too large (max {})", describe_limit(*limit))
            }
            SkygramError::Upstream(msg) => {
                warn!("Upstream error surfaced to client: {msg}");
                "Upstream service unavailable".to_string()
            }
            SkygramError::NotFound(what) => {
                info!("404 {what}");
                "Not found".to_string()
            }
            SkygramError::Storage(msg) => {
                error!("Storage error: {msg}");
                "Internal server error".to_string()
            }
            SkygramError::Config(msg) | SkygramError::InternalServerError(msg) => {
                error!("Internal server error: {msg}");
                "Internal server error".to_string()
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limits_never_round_to_zero() {
        assert_eq!(describe_limit(10 * 1024 * 1024), "10 MB");
        assert_eq!(describe_limit(64 * 1024), "65536 bytes");
        assert_eq!(describe_limit(1024 * 1024 + 1), "1048577 bytes");
    }
}
