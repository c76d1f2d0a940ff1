use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use common::{
    error::AppError,
    messages::{decode, subjects, UpdateStatusCommand},
    storage::store::Store,
};
use worker_runtime::handler::{ConsumerOptions, Handler};

/// The single writer of the task status column. Every worker publishes
/// `task.update.status`; this consumer applies the monotonic transition.
pub struct StatusWorker {
    store: Arc<dyn Store>,
}

impl StatusWorker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for StatusWorker {
    fn subject(&self) -> &'static str {
        subjects::TASK_UPDATE_STATUS
    }

    fn stream_name(&self) -> &'static str {
        subjects::streams::TASKS
    }

    fn durable_name(&self) -> &'static str {
        "status-worker"
    }

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError> {
        let command: UpdateStatusCommand = decode(payload)?;

        let applied = self
            .store
            .update_task_status(command.base.task_id, command.status)
            .await?;

        debug!(
            task_id = %command.base.task_id,
            status = command.status.as_str(),
            applied,
            "status transition processed"
        );
        Ok(())
    }
}
