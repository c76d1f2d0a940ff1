use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, Consumer},
    stream::Config as StreamConfig,
};
use async_nats::{connection::State, ConnectOptions};
use tracing::info;

use common::{
    error::AppError,
    messages::subjects::{article_subjects, streams, task_subjects},
};

use crate::handler::ConsumerOptions;

/// Shared NATS connection plus its JetStream context. One instance per
/// process; the runner consumes through it and the publisher produces
/// through it.
#[derive(Clone)]
pub struct BusClient {
    pub client: async_nats::Client,
    pub jetstream: jetstream::Context,
}

impl BusClient {
    pub async fn connect(nats_url: &str, creds_file: Option<&str>) -> Result<Self, AppError> {
        let options = match creds_file {
            Some(path) => {
                let creds = std::fs::read_to_string(path)?;
                ConnectOptions::with_credentials(&creds)
                    .map_err(|e| AppError::Bus(format!("invalid credentials file {path}: {e}")))?
            }
            None => ConnectOptions::new(),
        };

        let client = options
            .connect(nats_url)
            .await
            .map_err(|e| AppError::Bus(format!("failed to connect to {nats_url}: {e}")))?;
        let jetstream = jetstream::new(client.clone());

        info!(url = %nats_url, "connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Provision the two streams every worker depends on. Idempotent; safe
    /// to run on each startup.
    pub async fn ensure_streams(&self) -> Result<(), AppError> {
        for (name, subjects) in [
            (streams::TASKS, task_subjects()),
            (streams::ARTICLES, article_subjects()),
        ] {
            self.jetstream
                .get_or_create_stream(StreamConfig {
                    name: name.to_string(),
                    subjects,
                    ..Default::default()
                })
                .await
                .map_err(|e| AppError::Bus(format!("failed to provision stream {name}: {e}")))?;
        }

        Ok(())
    }

    /// Bind the durable pull consumer for a handler.
    pub async fn pull_consumer(
        &self,
        stream_name: &str,
        durable_name: &str,
        subject: &str,
        options: &ConsumerOptions,
    ) -> Result<Consumer<pull::Config>, AppError> {
        let stream = self
            .jetstream
            .get_stream(stream_name)
            .await
            .map_err(|e| AppError::Bus(format!("failed to get stream {stream_name}: {e}")))?;

        let mut config = pull::Config {
            durable_name: Some(durable_name.to_string()),
            filter_subject: subject.to_string(),
            ack_policy: AckPolicy::Explicit,
            max_ack_pending: options.max_ack_pending,
            ack_wait: options.ack_wait,
            ..Default::default()
        };
        if options.max_deliver > 0 {
            config.max_deliver = options.max_deliver;
        }

        let consumer = stream
            .get_or_create_consumer(durable_name, config)
            .await
            .map_err(|e| {
                AppError::Bus(format!(
                    "failed to bind consumer {durable_name} on {stream_name}: {e}"
                ))
            })?;

        info!(
            stream = %stream_name,
            durable = %durable_name,
            subject = %subject,
            "pull consumer bound"
        );
        Ok(consumer)
    }

    /// Whether the underlying connection is currently established; feeds
    /// the readiness probe.
    pub fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), State::Connected)
    }
}
