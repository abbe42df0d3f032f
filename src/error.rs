use std::time::Duration;

use thiserror::Error;

/// Reasons a single time provider could not produce a usable reading.
///
/// These never reach the caller of [`SyncContext::sync`](crate::SyncContext::sync);
/// they are logged and the next provider is tried.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider answered with status {0}")]
    Status(u16),
    #[error("response is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response carries none of the expected time fields")]
    MissingField,
    #[error("response carries no Date header")]
    MissingDateHeader,
    #[error("could not parse \"{0}\" as a timestamp")]
    InvalidTimestamp(String),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Errors raised while turning a [`SyncConfig`](crate::SyncConfig) into a live context.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}
