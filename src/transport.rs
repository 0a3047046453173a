//! Sends an assembled envelope to the store endpoint, feeding any rate-limit
//! response headers back into the [`RateLimitRegistry`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::category::DataCategory;
use crate::dsn::Dsn;
use crate::rate_limit::{RateLimitRegistry, ResponseHeaders};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error sending envelope: {0}")]
    Network(String),
    #[error("upstream rejected the envelope with status {0}")]
    Server(u16),
    #[error("send was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
}

/// The transport contract the scheduler drives. Kept as an `async_trait`-free
/// trait (returning a boxed future) so it can be used as a trait object
/// behind `Arc<dyn Transport>`, mirroring how `relay-server`'s `http.rs`
/// abstracts over two concrete HTTP client implementations behind one enum.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_envelope(
        &self,
        envelope: Vec<u8>,
        cancellation: &CancellationToken,
    ) -> Result<SendOutcome, TransportError>;

    fn is_limited(&self, category: DataCategory, now: Instant) -> bool;
}

/// The production transport: POSTs to the DSN's envelope endpoint over
/// `reqwest`, updates the shared [`RateLimitRegistry`] from the response.
pub struct HttpTransport {
    client: reqwest::Client,
    dsn: Dsn,
    sdk_name: String,
    sdk_version: String,
    registry: Arc<RateLimitRegistry>,
}

impl HttpTransport {
    pub fn new(
        dsn: Dsn,
        sdk_name: impl Into<String>,
        sdk_version: impl Into<String>,
        timeout: Duration,
        registry: Arc<RateLimitRegistry>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport {
            client,
            dsn,
            sdk_name: sdk_name.into(),
            sdk_version: sdk_version.into(),
            registry,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send_envelope(
        &self,
        envelope: Vec<u8>,
        cancellation: &CancellationToken,
    ) -> Result<SendOutcome, TransportError> {
        let request = self
            .client
            .post(self.dsn.envelope_url())
            .header("Content-Type", "application/x-sentry-envelope")
            .header(
                "X-Sentry-Auth",
                self.dsn.auth_header(&self.sdk_name, &self.sdk_version),
            )
            .body(envelope)
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| TransportError::Network(e.to_string()))?,
            _ = cancellation.cancelled() => return Err(TransportError::Cancelled),
        };

        let status = response.status();
        let now = Instant::now();

        {
            let headers = response.headers().clone();
            let status_code = status.as_u16();
            let view = ResponseHeaders::new(status_code, move |key| {
                headers.get(key).and_then(|v| v.to_str().ok())
            });
            self.registry.update_from_headers(&view, now);
        }

        if status.is_success() {
            Ok(SendOutcome::Accepted)
        } else {
            tracing::warn!(status = %status, "upstream rejected envelope");
            Err(TransportError::Server(status.as_u16()))
        }
    }

    fn is_limited(&self, category: DataCategory, now: Instant) -> bool {
        self.registry.is_limited(category, now)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::MockTransport;
    use super::*;

    #[tokio::test]
    async fn mock_transport_records_sent_bytes() {
        let transport = MockTransport::new();
        let token = CancellationToken::new();
        transport
            .send_envelope(b"hello".to_vec(), &token)
            .await
            .unwrap();
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent.lock()[0], b"hello".to_vec());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_send() {
        let transport = MockTransport::new();
        let token = CancellationToken::new();
        token.cancel();
        let result = transport.send_envelope(b"hello".to_vec(), &token).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
