//! Shared HTTP plumbing for the embedding providers and the Azure index.

use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;

use change_indexer_core::error::ErrorKind;

pub fn client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Rate limited or server error → retry; any other failure → give up.
pub fn status_kind(status: StatusCode) -> ErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Send failures (timeouts, refused connections, resets) are worth a retry;
/// a request that could not even be built is not.
pub fn transport_kind(e: &reqwest::Error) -> ErrorKind {
    if e.is_builder() {
        ErrorKind::Permanent
    } else {
        ErrorKind::Transient
    }
}

/// Read an env var holding an API key, with a message naming the variable.
pub fn api_key_from_env(var: &str) -> Result<String> {
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(status_kind(StatusCode::TOO_MANY_REQUESTS), ErrorKind::Transient);
        assert_eq!(status_kind(StatusCode::SERVICE_UNAVAILABLE), ErrorKind::Transient);
        assert_eq!(status_kind(StatusCode::INTERNAL_SERVER_ERROR), ErrorKind::Transient);
        assert_eq!(status_kind(StatusCode::UNAUTHORIZED), ErrorKind::Permanent);
        assert_eq!(status_kind(StatusCode::BAD_REQUEST), ErrorKind::Permanent);
    }
}
