use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    cache::{self, Cache, STAGING_TTL},
    error::AppError,
    messages::{
        decode, subjects, ArticleScrapedEvent, BaseMessage, ExtractKeywordCommand,
        GenerateTitleCommand, ScrapeCommand, UpdateStatusCommand,
    },
    storage::{
        store::{AfterCommit, Store},
        types::{article::NewArticle, task::TaskStatus},
    },
};
use providers::{
    fetcher::{ArticleRecord, Fetcher},
    text::parse_text_submission,
};
use worker_runtime::{
    handler::{ConsumerOptions, Handler},
    publisher::{Publisher, PublisherExt},
};

use crate::elapsed_ms;

/// Source label attached to articles reconstructed from pasted text.
const TEXT_SUBMISSION_LABEL: &str = "submission";

/// Fulfills `task.scrape`: fetch or reconstruct the article, persist it,
/// and publish `article.scraped` plus the keyword-stage command from the
/// insert transaction.
pub struct ScrapeWorker {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn Fetcher>,
    publisher: Arc<dyn Publisher>,
}

impl ScrapeWorker {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        fetcher: Arc<dyn Fetcher>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            cache,
            fetcher,
            publisher,
        }
    }

    /// Reconstruct an [`ArticleRecord`] for a raw-text task. Returns the
    /// record and whether a headline still has to be generated.
    async fn record_from_task_text(
        &self,
        task_id: Uuid,
    ) -> Result<(ArticleRecord, bool), AppError> {
        let task = self.store.get_task(task_id).await?;
        let submission = parse_text_submission(&task.original_input);

        let needs_title = submission.title.is_none();
        let title = submission
            .title
            .unwrap_or_else(|| placeholder_title(&submission.paragraphs));

        Ok((
            ArticleRecord {
                title,
                publisher: TEXT_SUBMISSION_LABEL.to_string(),
                paragraphs: submission.paragraphs,
                published_at: Utc::now(),
                keywords: None,
                description: None,
            },
            needs_title,
        ))
    }
}

/// Stand-in headline until the title stage replaces it.
fn placeholder_title(paragraphs: &[String]) -> String {
    paragraphs
        .first()
        .map(|p| p.chars().take(64).collect())
        .unwrap_or_default()
}

/// Publish the stage-completion pair for a persisted article: the
/// `article.scraped` event and the keyword-extraction command.
async fn publish_scraped(
    publisher: &dyn Publisher,
    task_id: Uuid,
    article_id: i32,
    cache_key: &str,
    elapsed: i64,
) -> Result<(), AppError> {
    publisher
        .publish(&ArticleScrapedEvent {
            base: BaseMessage::new(task_id).with_cache_key(cache_key),
            article_id,
            elapsed_ms: elapsed,
        })
        .await?;

    publisher
        .publish(&ExtractKeywordCommand {
            base: BaseMessage::new(task_id).with_cache_key(cache_key),
            article_id,
        })
        .await?;

    Ok(())
}

#[async_trait]
impl Handler for ScrapeWorker {
    fn subject(&self) -> &'static str {
        subjects::TASK_SCRAPE
    }

    fn stream_name(&self) -> &'static str {
        subjects::streams::TASKS
    }

    fn durable_name(&self) -> &'static str {
        "scrape-worker"
    }

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError> {
        let started = Instant::now();
        let command: ScrapeCommand = decode(payload)?;
        let task_id = command.base.task_id;

        self.publisher
            .publish(&UpdateStatusCommand {
                base: BaseMessage::new(task_id),
                status: TaskStatus::Scraping,
            })
            .await?;

        let (record, needs_title) = match &command.url {
            Some(raw_url) => {
                let url = url::Url::parse(raw_url).map_err(|_| {
                    AppError::Validation(format!("scrape command URL does not parse: {raw_url}"))
                })?;
                (self.fetcher.fetch(&url).await?, false)
            }
            None => self.record_from_task_text(task_id).await?,
        };

        if record.paragraphs.is_empty() {
            return Err(AppError::NoContent(format!(
                "no paragraphs parsed for task {task_id}"
            )));
        }

        let new_article = NewArticle::from_paragraphs(
            task_id,
            record.title,
            record.publisher,
            &record.paragraphs,
            record.published_at,
        );
        let md5 = new_article.fingerprint();
        let content = new_article.content.clone();
        let cache_key = cache::content_key(task_id);

        let outbox: AfterCommit = {
            let publisher = Arc::clone(&self.publisher);
            let cache_key = cache_key.clone();
            Box::new(
                move |article_id| -> BoxFuture<'static, Result<(), AppError>> {
                    Box::pin(async move {
                        publish_scraped(
                            publisher.as_ref(),
                            task_id,
                            article_id,
                            &cache_key,
                            elapsed_ms(started),
                        )
                        .await
                    })
                },
            )
        };

        let article_id = match self.store.insert_article(new_article, outbox).await {
            Ok(article_id) => article_id,
            Err(AppError::IntegrityConstraint(_)) => {
                // The same story was already stored for another task; reuse
                // its row and still announce it under this task's id.
                let existing = self.store.get_article_by_md5(&md5).await?.ok_or_else(|| {
                    AppError::InternalError(format!(
                        "duplicate fingerprint {md5} without a stored article"
                    ))
                })?;
                info!(
                    %task_id,
                    article_id = existing.article_id,
                    "duplicate article fingerprint, reusing stored article"
                );
                publish_scraped(
                    self.publisher.as_ref(),
                    task_id,
                    existing.article_id,
                    &cache_key,
                    elapsed_ms(started),
                )
                .await?;
                existing.article_id
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.cache.set_ex(&cache_key, &content, STAGING_TTL).await {
            warn!(%task_id, error = %e, "best-effort content cache write failed");
        }

        if needs_title {
            self.publisher
                .publish(&GenerateTitleCommand {
                    base: BaseMessage::new(task_id),
                    content: content.clone(),
                })
                .await?;
        }

        info!(%task_id, article_id, "article scraped and persisted");
        Ok(())
    }
}
