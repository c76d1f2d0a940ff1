use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_nats::jetstream::{self, AckKind};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use common::{
    error::{AppError, FailureKind},
    messages::{peek_base, BaseMessage, TaskFailedEvent, UpdateStatusCommand},
    storage::types::task::TaskStatus,
};

use crate::{
    bus::BusClient,
    handler::{BusHealther, ConsumerOptions, Handler, Healther, Metricker, RegistryMetricker},
    health::{self, HealthState},
    metrics,
    publisher::{Publisher, PublisherExt, REQUEST_ID, REQUEST_ID_HEADER},
};

const FETCH_WAIT: Duration = Duration::from_secs(5);
const FETCH_BACKOFF_BASE: Duration = Duration::from_secs(1);
const FETCH_BACKOFF_CAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub health_addr: String,
    pub message_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            health_addr: "0.0.0.0:8080".to_string(),
            message_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// What the runner does with a message after its handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Side effects already resolved idempotently; consume the message.
    Ack,
    /// Publish on the failure channel, then consume; never redeliver.
    FailAndAck,
    /// Request redelivery after a delay.
    NakWithDelay,
}

fn disposition(kind: FailureKind) -> Disposition {
    match kind {
        FailureKind::Malformed | FailureKind::Permanent => Disposition::FailAndAck,
        FailureKind::Transient | FailureKind::Deadline => Disposition::NakWithDelay,
        FailureKind::Integrity => Disposition::Ack,
    }
}

/// Generic worker lifecycle: bind the durable pull consumer, fetch one
/// message at a time, dispatch with a per-message deadline, apply the
/// ack policy, and serve the health surface until cancelled.
pub struct Runner<H: Handler> {
    bus: BusClient,
    publisher: Arc<dyn Publisher>,
    handler: Arc<H>,
    config: RunnerConfig,
    healther: Arc<dyn Healther>,
    metricker: Arc<dyn Metricker>,
}

impl<H: Handler> Runner<H> {
    pub fn new(
        bus: BusClient,
        publisher: Arc<dyn Publisher>,
        handler: Arc<H>,
        config: RunnerConfig,
    ) -> Self {
        let healther = Arc::new(BusHealther::new(bus.clone()));
        Self {
            bus,
            publisher,
            handler,
            config,
            healther,
            metricker: Arc::new(RegistryMetricker),
        }
    }

    /// Replace the readiness check backing `/readyz`.
    pub fn with_healther(mut self, healther: Arc<dyn Healther>) -> Self {
        self.healther = healther;
        self
    }

    /// Replace the metrics rendering backing `/metrics`.
    pub fn with_metricker(mut self, metricker: Arc<dyn Metricker>) -> Self {
        self.metricker = metricker;
        self
    }

    pub async fn run(&self, token: CancellationToken) -> Result<(), AppError> {
        let options = self.handler.consumer_options();
        let consumer = self
            .bus
            .pull_consumer(
                self.handler.stream_name(),
                self.handler.durable_name(),
                self.handler.subject(),
                &options,
            )
            .await?;

        // Bind before spawning so a bad address fails startup, not a task.
        let listener = health::bind(&self.config.health_addr).await?;
        let shutting_down = Arc::new(AtomicBool::new(false));
        let health_state = HealthState::new(Arc::clone(&self.healther), Arc::clone(&shutting_down))
            .with_metricker(Arc::clone(&self.metricker));
        let health_token = token.child_token();
        let health_handle = tokio::spawn(health::serve_on(
            listener,
            health_state,
            health_token.clone(),
        ));

        info!(
            subject = self.handler.subject(),
            durable = self.handler.durable_name(),
            "worker started"
        );

        let mut backoff = FETCH_BACKOFF_BASE;
        loop {
            if token.is_cancelled() {
                break;
            }

            let batch = tokio::select! {
                () = token.cancelled() => break,
                batch = consumer
                    .fetch()
                    .max_messages(1)
                    .expires(FETCH_WAIT)
                    .messages() => batch,
            };

            match batch {
                Ok(mut messages) => {
                    while let Some(next) = messages.next().await {
                        match next {
                            Ok(message) => {
                                self.process(message, &options).await;
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to receive fetched message");
                            }
                        }
                    }
                    backoff = FETCH_BACKOFF_BASE;
                }
                Err(e) => {
                    warn!(error = %e, delay = ?backoff, "fetch failed, backing off");
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff.saturating_mul(2)).min(FETCH_BACKOFF_CAP);
                }
            }
        }

        // Unsubscribe first so no new work arrives, then close the HTTP
        // surface within the grace window.
        drop(consumer);
        shutting_down.store(true, Ordering::Relaxed);
        health_token.cancel();
        match tokio::time::timeout(self.config.shutdown_grace, health_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "health surface exited with error"),
            Ok(Err(e)) => warn!(error = %e, "health task join error"),
            Err(_) => warn!("health surface did not stop within the grace window"),
        }

        info!(subject = self.handler.subject(), "worker stopped");
        Ok(())
    }

    async fn process(&self, message: jetstream::Message, options: &ConsumerOptions) {
        let subject = self.handler.subject();
        let request_id = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(REQUEST_ID_HEADER))
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let span = tracing::info_span!("handle", subject, request_id = %request_id);
        let timer = metrics::handle_seconds()
            .with_label_values(&[subject])
            .start_timer();

        let handled = tokio::time::timeout(
            self.config.message_timeout,
            REQUEST_ID.scope(request_id, self.handler.handle(&message.payload)),
        )
        .instrument(span)
        .await;
        timer.observe_duration();

        let result = match handled {
            Ok(result) => result,
            Err(_) => Err(AppError::DeadlineExceeded(format!(
                "{subject} handler exceeded {:?}",
                self.config.message_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.ack(&message, subject, "ack").await;
            }
            Err(e) => self.dispose(&message, e, options).await,
        }
    }

    async fn dispose(&self, message: &jetstream::Message, err: AppError, options: &ConsumerOptions) {
        let subject = self.handler.subject();

        match disposition(err.failure_kind()) {
            Disposition::Ack => {
                warn!(subject, error = %err, "integrity conflict treated as idempotent success");
                self.ack(message, subject, "ack").await;
            }
            Disposition::FailAndAck => {
                error!(subject, error = %err, "message failed permanently");
                match self.publish_failure(&message.payload, &err).await {
                    Ok(()) => self.ack(message, subject, "failed").await,
                    Err(publish_err) => {
                        // Without the failure event on the bus the error would
                        // be invisible; hold the message for redelivery.
                        error!(subject, error = %publish_err, "failure event publish failed");
                        self.nak(message, subject, options.nak_delay).await;
                    }
                }
            }
            Disposition::NakWithDelay => {
                warn!(subject, error = %err, "transient failure, requesting redelivery");
                self.nak(message, subject, options.nak_delay).await;
            }
        }
    }

    /// Emit the user-visible failure event carrying the opaque original
    /// payload, and route the task to its terminal status.
    async fn publish_failure(&self, payload: &[u8], err: &AppError) -> Result<(), AppError> {
        let task_id = peek_base(payload)
            .map(|base| base.task_id)
            .unwrap_or_else(Uuid::nil);

        let event = TaskFailedEvent {
            base: BaseMessage::new(task_id),
            error: err.to_string(),
            data: String::from_utf8_lossy(payload).into_owned(),
        };
        self.publisher.publish(&event).await?;

        if !task_id.is_nil() {
            let status = UpdateStatusCommand {
                base: BaseMessage::new(task_id),
                status: TaskStatus::Failed,
            };
            self.publisher.publish(&status).await?;
        }

        Ok(())
    }

    async fn ack(&self, message: &jetstream::Message, subject: &str, outcome: &str) {
        if let Err(e) = message.ack().await {
            warn!(subject, error = %e, "ack failed, message will be redelivered");
            return;
        }
        metrics::messages_total()
            .with_label_values(&[subject, outcome])
            .inc();
    }

    async fn nak(&self, message: &jetstream::Message, subject: &str, delay: Duration) {
        if let Err(e) = message.ack_with(AckKind::Nak(Some(delay))).await {
            warn!(subject, error = %e, "nak failed, relying on ack timer");
        }
        metrics::messages_total()
            .with_label_values(&[subject, "nak"])
            .inc();
    }
}
