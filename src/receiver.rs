//! Receiver collaborator contract. The full receiver metadata client
//! (bouquets, EPG, timers) is out of scope; this is the thin slice the
//! delete handler needs to compile and be testable, mirroring the
//! preflight client.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("receiver request failed: {0}")]
    Request(String),
    #[error("receiver rejected the request with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait ReceiverClient: Send + Sync {
    async fn delete(&self, receiver_path: &str) -> Result<(), ReceiverError>;
    fn stream_url(&self, receiver_path: &str) -> String;
}

pub struct HttpReceiverClient {
    client: Client,
    authority: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl HttpReceiverClient {
    pub fn new(authority: String, port: u16, user: Option<String>, password: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder().build().expect("reqwest client"),
            authority,
            port,
            user,
            password,
            timeout,
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.authority, self.port)
    }
}

#[async_trait]
impl ReceiverClient for HttpReceiverClient {
    async fn delete(&self, receiver_path: &str) -> Result<(), ReceiverError> {
        let url = format!("{}/api/recordings{}", self.base_url(), receiver_path);
        let mut req = self.client.delete(&url).timeout(self.timeout);
        if let Some(user) = &self.user {
            req = req.basic_auth(user, self.password.clone());
        }
        let resp = req.send().await.map_err(|e| ReceiverError::Request(e.to_string()))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ReceiverError::Rejected(resp.status().as_u16()))
        }
    }

    fn stream_url(&self, receiver_path: &str) -> String {
        format!("{}{}", self.base_url(), receiver_path)
    }
}

/// Used in tests and wherever the real receiver is unavailable.
pub struct StubReceiverClient;

#[async_trait]
impl ReceiverClient for StubReceiverClient {
    async fn delete(&self, _receiver_path: &str) -> Result<(), ReceiverError> {
        Ok(())
    }

    fn stream_url(&self, receiver_path: &str) -> String {
        format!("stub://{receiver_path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_delete_always_succeeds() {
        let client = StubReceiverClient;
        assert!(client.delete("/media/hdd/a.ts").await.is_ok());
    }
}
