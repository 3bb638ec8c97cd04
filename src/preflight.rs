//! Preflight. HEAD-then-GET availability probe of a receiver source
//!.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("source error: {0}")]
    SourceError(String),
}

#[async_trait::async_trait]
pub trait Preflight: Send + Sync {
    async fn check(&self, url: &str) -> Result<(), PreflightError>;
}

pub struct HttpPreflight {
    client: Client,
    timeout: Duration,
}

impl HttpPreflight {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder().build().expect("reqwest client"),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl Preflight for HttpPreflight {
    async fn check(&self, url: &str) -> Result<(), PreflightError> {
        let head = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await;

        let status = match head {
            Ok(resp) if resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
                let get = self
                    .client
                    .get(url)
                    .header("Range", "bytes=0-4095")
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|e| PreflightError::SourceUnavailable(e.to_string()))?;
                let status = get.status();
                // Drain up to 4 KiB then drop the rest of the body.
                let _ = get.bytes().await;
                status
            }
            Ok(resp) => resp.status(),
            Err(e) => return Err(PreflightError::SourceUnavailable(e.to_string())),
        };

        debug!(%url, %status, "preflight result");
        classify(status)
    }
}

fn classify(status: StatusCode) -> Result<(), PreflightError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(
            PreflightError::SourceUnavailable(format!("status {status}")),
        ),
        s if s.is_server_error() => Err(PreflightError::SourceError(format!("status {s}"))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_and_404_as_unavailable() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED),
            Err(PreflightError::SourceUnavailable(_))
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN),
            Err(PreflightError::SourceUnavailable(_))
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND),
            Err(PreflightError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn classifies_5xx_as_retryable() {
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY),
            Err(PreflightError::SourceError(_))
        ));
    }

    #[test]
    fn classifies_2xx_as_ok() {
        assert!(classify(StatusCode::OK).is_ok());
        assert!(classify(StatusCode::PARTIAL_CONTENT).is_ok());
    }
}
