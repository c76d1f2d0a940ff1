use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::info;

use common::{
    error::AppError,
    messages::{decode, subjects, GenerateTitleCommand},
    storage::store::Store,
};
use providers::generator::Generator;
use worker_runtime::handler::{ConsumerOptions, Handler};

/// Fulfills `task.generate_title` for raw-text submissions that arrived
/// without an explicit headline: asks the generator for one and replaces
/// the placeholder on the stored article.
pub struct TitleWorker {
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
}

impl TitleWorker {
    pub fn new(store: Arc<dyn Store>, generator: Arc<dyn Generator>) -> Self {
        Self { store, generator }
    }
}

#[async_trait]
impl Handler for TitleWorker {
    fn subject(&self) -> &'static str {
        subjects::TASK_GENERATE_TITLE
    }

    fn stream_name(&self) -> &'static str {
        subjects::streams::TASKS
    }

    fn durable_name(&self) -> &'static str {
        "title-worker"
    }

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError> {
        let command: GenerateTitleCommand = decode(payload)?;
        let task_id = command.base.task_id;

        if command.content.trim().is_empty() {
            return Err(AppError::NoContent(format!(
                "title generation for task {task_id} got empty content"
            )));
        }

        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(10))
            .take(2);
        let title = RetryIf::spawn(
            strategy,
            || self.generator.generate_title(&command.content),
            AppError::is_transient,
        )
        .await?;

        self.store.set_article_title(task_id, &title).await?;

        info!(%task_id, title = %title, "headline generated");
        Ok(())
    }
}
