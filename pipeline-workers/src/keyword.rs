use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tracing::{info, warn};

use common::{
    cache::{self, Cache, STAGING_TTL},
    error::AppError,
    messages::{
        decode, subjects, BaseMessage, CreateEmbeddingCommand, EmbedType, ExtractKeywordCommand,
        KeywordsExtractedEvent, UpdateStatusCommand,
    },
    storage::{store::Store, types::task::TaskStatus},
};
use providers::generator::{Generator, KeywordAnalysis};
use worker_runtime::{
    handler::{ConsumerOptions, Handler},
    publisher::{Publisher, PublisherExt},
};

use crate::elapsed_ms;

/// Bounded retries around the LLM call: three attempts, 500 ms base,
/// exponential, capped at 10 s. Only transient failures retry; a
/// schema-violating reply after a successful call is permanent.
const LLM_ATTEMPTS: usize = 3;

/// Fulfills `task.extract.keyword`: load the article body (cache first,
/// store as fallback), run keyword extraction under the strict schema,
/// cache the structured result, and hand the task to the embedding stage.
pub struct KeywordWorker {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    generator: Arc<dyn Generator>,
    publisher: Arc<dyn Publisher>,
}

impl KeywordWorker {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        generator: Arc<dyn Generator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            cache,
            generator,
            publisher,
        }
    }

    /// Cache-then-store content load. Cache misses and cache errors both
    /// fall through to the article row.
    async fn load_content(&self, cache_key: &str, article_id: i32) -> Result<String, AppError> {
        match self.cache.get(cache_key).await {
            Ok(Some(content)) if !content.is_empty() => return Ok(content),
            Ok(_) => {}
            Err(e) => warn!(cache_key, error = %e, "cache read failed, falling back to store"),
        }

        Ok(self.store.get_article(article_id).await?.content)
    }

    async fn extract_with_retry(&self, content: &str) -> Result<KeywordAnalysis, AppError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(250)
            .max_delay(Duration::from_secs(10))
            .take(LLM_ATTEMPTS - 1);

        RetryIf::spawn(
            strategy,
            || self.generator.extract_keywords(content),
            AppError::is_transient,
        )
        .await
    }
}

#[async_trait]
impl Handler for KeywordWorker {
    fn subject(&self) -> &'static str {
        subjects::TASK_EXTRACT_KEYWORD
    }

    fn stream_name(&self) -> &'static str {
        subjects::streams::TASKS
    }

    fn durable_name(&self) -> &'static str {
        "keyword-worker"
    }

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError> {
        let started = Instant::now();
        let command: ExtractKeywordCommand = decode(payload)?;
        let task_id = command.base.task_id;

        self.publisher
            .publish(&UpdateStatusCommand {
                base: BaseMessage::new(task_id),
                status: TaskStatus::Keywording,
            })
            .await?;

        let content_key = command
            .base
            .cache_key
            .clone()
            .unwrap_or_else(|| cache::content_key(task_id));
        let content = self.load_content(&content_key, command.article_id).await?;

        if content.trim().is_empty() {
            return Err(AppError::NoContent(format!(
                "article {} has no content",
                command.article_id
            )));
        }

        let analysis = self.extract_with_retry(&content).await?;
        let flattened = analysis.flattened();

        let keywords_key = cache::keywords_key(task_id);
        match serde_json::to_string(&analysis) {
            Ok(serialized) => {
                if let Err(e) = self
                    .cache
                    .set_ex(&keywords_key, &serialized, STAGING_TTL)
                    .await
                {
                    warn!(%task_id, error = %e, "best-effort keyword cache write failed");
                }
            }
            Err(e) => warn!(%task_id, error = %e, "keyword analysis did not serialize"),
        }

        self.publisher
            .publish(&KeywordsExtractedEvent {
                base: BaseMessage::new(task_id).with_cache_key(&keywords_key),
                article_id: command.article_id,
                keywords_count: flattened.len() as i64,
                relations_count: analysis.relations.len() as i64,
                elapsed_ms: elapsed_ms(started),
            })
            .await?;

        self.publisher
            .publish(&CreateEmbeddingCommand {
                base: BaseMessage::new(task_id),
                article_id: command.article_id,
                embed_type: EmbedType::Passage,
            })
            .await?;

        info!(
            %task_id,
            article_id = command.article_id,
            keywords = flattened.len(),
            relations = analysis.relations.len(),
            "keywords extracted"
        );
        Ok(())
    }
}
