//! HTTP client side of the sync transport.
//!
//! Wraps the three peer operations (handshake, pull, push) with a
//! per-request timeout and a single retry with backoff. Repeated failures
//! are left to the scheduler's periodic retry rather than retried in a
//! tight loop here.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use capmesh_core::InstanceId;

use crate::error::{Result, SyncError};
use crate::manifest::{IdentityDocument, PullResponse, PushSummary, SyncManifest};

/// Transport client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for each individual request.
    pub request_timeout: Duration,
    /// Pause before the single retry.
    pub retry_backoff: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Client for the peer sync API.
pub struct SyncClient {
    http: reqwest::Client,
    local: InstanceId,
    local_endpoint: Option<String>,
    retry_backoff: Duration,
}

impl SyncClient {
    /// Build a client identifying itself as `local`, advertising
    /// `local_endpoint` for callback registration when one exists.
    pub fn new(
        local: InstanceId,
        local_endpoint: Option<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            local,
            local_endpoint,
            retry_backoff: config.retry_backoff,
        })
    }

    /// Fetch the peer's identity and high-water mark.
    pub async fn handshake(&self, endpoint: &str) -> Result<IdentityDocument> {
        self.with_retry(|| async {
            let response = self
                .http
                .get(format!("{}/identity", endpoint))
                .send()
                .await
                .map_err(classify)?;
            decode(response).await
        })
        .await
    }

    /// Fetch the peer's delta since the given watermark.
    pub async fn pull(&self, endpoint: &str, since: i64) -> Result<PullResponse> {
        self.with_retry(|| async {
            let mut request = self
                .http
                .get(format!("{}/records", endpoint))
                .query(&[("since", since.to_string())])
                .query(&[("senderInstanceId", self.local.as_str())]);
            if let Some(local_endpoint) = &self.local_endpoint {
                request = request.query(&[("senderEndpoint", local_endpoint.as_str())]);
            }
            let response = request.send().await.map_err(classify)?;
            decode(response).await
        })
        .await
    }

    /// Push a manifest of local records to the peer.
    pub async fn push(&self, endpoint: &str, manifest: &SyncManifest) -> Result<PushSummary> {
        self.with_retry(|| async {
            let response = self
                .http
                .post(format!("{}/records", endpoint))
                .json(manifest)
                .send()
                .await
                .map_err(classify)?;
            decode(response).await
        })
        .await
    }

    /// Run an operation, retrying exactly once on transport-level failure.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(e) if is_retryable(&e) => {
                debug!(error = %e, "request failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                op().await
            }
            Err(e) => Err(e),
        }
    }
}

fn is_retryable(e: &SyncError) -> bool {
    matches!(e, SyncError::Transport(_) | SyncError::Timeout(_))
}

fn classify(e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout(e.to_string())
    } else {
        SyncError::Transport(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::Http {
            status: status.as_u16(),
        });
    }
    response.json().await.map_err(classify)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> SyncClient {
        SyncClient::new(
            InstanceId::from_string("client-id".into()),
            None,
            ClientConfig {
                request_timeout: Duration::from_millis(500),
                retry_backoff: Duration::from_millis(10),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Bind then drop a listener so the port is closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = test_client();
        let err = client.handshake(&endpoint).await.unwrap_err();
        assert!(
            matches!(err, SyncError::Transport(_) | SyncError::Timeout(_)),
            "unexpected error: {err:?}"
        );
    }
}
