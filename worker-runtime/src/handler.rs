use std::time::Duration;

use async_trait::async_trait;

use common::error::AppError;

use crate::bus::BusClient;

/// Per-consumer delivery tuning. The pipeline workers keep the
/// max-in-flight cap at 1 so a slow LLM call cannot starve the ack
/// timers of neighboring messages.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerOptions {
    pub max_ack_pending: i64,
    pub ack_wait: Duration,
    /// Delivery attempts before the server stops redelivering;
    /// non-positive means unlimited.
    pub max_deliver: i64,
    /// Redelivery delay requested when a message is naked.
    pub nak_delay: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_ack_pending: 1,
            ack_wait: Duration::from_secs(60),
            max_deliver: -1,
            nak_delay: Duration::from_secs(5),
        }
    }
}

/// Per-message business logic bound to one subject and one durable
/// consumer. Implementations are pure with respect to the bus: they
/// receive bytes and never ack or nak themselves.
#[async_trait]
pub trait Handler: Send + Sync {
    fn subject(&self) -> &'static str;

    fn stream_name(&self) -> &'static str;

    fn durable_name(&self) -> &'static str;

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError>;
}

/// Optional readiness capability. The default checks the bus connection;
/// handlers with deeper dependencies can override it.
#[async_trait]
pub trait Healther: Send + Sync {
    async fn ready(&self) -> bool;
}

/// Default [`Healther`]: ready iff the NATS connection is established.
pub struct BusHealther {
    bus: BusClient,
}

impl BusHealther {
    pub fn new(bus: BusClient) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Healther for BusHealther {
    async fn ready(&self) -> bool {
        self.bus.is_connected()
    }
}

/// Optional metrics capability. The default renders the shared
/// Prometheus registry; handlers with bespoke metrics can override it.
pub trait Metricker: Send + Sync {
    fn metrics(&self) -> String;
}

/// Default [`Metricker`] over the process-wide registry.
pub struct RegistryMetricker;

impl Metricker for RegistryMetricker {
    fn metrics(&self) -> String {
        crate::metrics::render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_workers_single_flight() {
        let options = ConsumerOptions::default();
        assert_eq!(options.max_ack_pending, 1);
        assert_eq!(options.ack_wait, Duration::from_secs(60));
        assert!(options.max_deliver <= 0);
    }
}
