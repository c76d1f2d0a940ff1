use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::debug;
use uuid::Uuid;

use common::{error::AppError, messages::Payload};

use crate::bus::BusClient;

/// JetStream deduplication header; stable across publish retries so a
/// retry after a lost ack does not produce a second copy.
pub const MSG_ID_HEADER: &str = "Nats-Msg-Id";
/// Trace-context header injected on publish and extracted by the runner.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

tokio::task_local! {
    /// Request id of the message currently being handled, propagated onto
    /// every publish that happens while it is in scope.
    pub static REQUEST_ID: String;
}

/// The request id for outbound headers: the one extracted from the
/// message being handled when inside a runner, a fresh id otherwise.
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

/// Envelope-wrapping publish onto the bus. Trait-shaped so handlers can
/// be exercised without a live connection.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_raw(&self, subject: &str, body: Vec<u8>) -> Result<(), AppError>;
}

/// Typed publish on top of [`Publisher::publish_raw`].
#[async_trait]
pub trait PublisherExt {
    async fn publish<P: Payload + Sync>(&self, payload: &P) -> Result<(), AppError>;
}

#[async_trait]
impl<T: Publisher + ?Sized> PublisherExt for T {
    async fn publish<P: Payload + Sync>(&self, payload: &P) -> Result<(), AppError> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::InternalError(format!("payload serialization: {e}")))?;
        self.publish_raw(payload.subject(), body).await
    }
}

/// Publishes through JetStream with bounded retry: five attempts, 500 ms
/// base delay, exponential, capped at 10 s.
pub struct BusPublisher {
    jetstream: async_nats::jetstream::Context,
}

impl BusPublisher {
    pub fn new(bus: &BusClient) -> Self {
        Self {
            jetstream: bus.jetstream.clone(),
        }
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(10))
            .take(4)
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    async fn publish_raw(&self, subject: &str, body: Vec<u8>) -> Result<(), AppError> {
        let msg_id = Uuid::new_v4().to_string();
        let request_id = current_request_id();

        let attempt = || {
            let mut headers = async_nats::HeaderMap::new();
            headers.insert(MSG_ID_HEADER, msg_id.as_str());
            headers.insert(REQUEST_ID_HEADER, request_id.as_str());
            let body = body.clone();

            async {
                let ack = self
                    .jetstream
                    .publish_with_headers(subject.to_string(), headers, body.into())
                    .await
                    .map_err(|e| e.to_string())?;
                ack.await.map_err(|e| e.to_string())?;
                Ok::<(), String>(())
            }
        };

        Retry::spawn(Self::retry_strategy(), attempt)
            .await
            .map_err(|e| AppError::PublishFailed(format!("{subject}: {e}")))?;

        debug!(subject = %subject, %request_id, "published");
        Ok(())
    }
}
