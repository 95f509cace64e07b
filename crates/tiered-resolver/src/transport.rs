//! HTTP transport shared by the remote backends

use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Minimal GET transport
///
/// Implementations map every failure onto a `BackendError` kind so that
/// backends never see transport-specific errors.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Vec<u8>, BackendError>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tiered/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        headers: &[(String, String)],
        timeout: Duration,
    ) -> Result<Vec<u8>, BackendError> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| BackendError::unavailable(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| BackendError::unavailable(format!("invalid value for header {}", name)))?;
            header_map.insert(name, value);
        }

        trace!("GET {}", url);
        let response = self
            .client
            .get(url)
            .headers(header_map)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;
        Ok(body.to_vec())
    }
}

/// Map a non-success HTTP status onto a backend error kind
pub fn classify_status(status: StatusCode, url: &str) -> BackendError {
    let message = format!("{} returned {}", url, status);
    match status {
        StatusCode::NOT_FOUND => BackendError::not_found(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::unauthorized(message),
        _ => BackendError::unavailable(message),
    }
}

fn classify_transport_error(url: &str, err: &reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::timeout(format!("{} timed out", url))
    } else {
        BackendError::unavailable(format!("{}: {}", url, err))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;

    #[test]
    fn test_classify_status() {
        let cases = [
            (StatusCode::NOT_FOUND, BackendErrorKind::NotFound),
            (StatusCode::UNAUTHORIZED, BackendErrorKind::Unauthorized),
            (StatusCode::FORBIDDEN, BackendErrorKind::Unauthorized),
            (StatusCode::REQUEST_TIMEOUT, BackendErrorKind::Unavailable),
            (StatusCode::TOO_MANY_REQUESTS, BackendErrorKind::Unavailable),
            (StatusCode::BAD_GATEWAY, BackendErrorKind::Unavailable),
            (StatusCode::SERVICE_UNAVAILABLE, BackendErrorKind::Unavailable),
        ];

        for (status, expected) in cases {
            assert_eq!(
                classify_status(status, "http://store/key").kind,
                expected,
                "status {}",
                status
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let transport = HttpTransport::new().unwrap();
        // port 9 on loopback: nothing listens, so the connection is refused
        let err = transport
            .get("http://127.0.0.1:9/key", &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
