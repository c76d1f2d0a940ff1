use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use common::{
    error::AppError,
    messages::{
        decode, subjects, BaseMessage, CreateEmbeddingCommand, EmbeddingCreatedEvent,
        UpdateStatusCommand,
    },
    storage::{
        store::Store,
        types::{chunk::StoredChunk, task::TaskStatus},
    },
};
use providers::embedder::Embedder;
use worker_runtime::{
    handler::{ConsumerOptions, Handler},
    publisher::{Publisher, PublisherExt},
};

use crate::{chunker, elapsed_ms};

/// Inputs per provider call.
const EMBED_BATCH: usize = 16;

/// Fulfills `task.create.embedding`: chunk the article with overlap,
/// persist the windows, embed each one, persist the vectors, and close
/// out the task.
pub struct EmbeddingWorker {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    publisher: Arc<dyn Publisher>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl EmbeddingWorker {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        publisher: Arc<dyn Publisher>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            publisher,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Embed the chunk texts in batches with bounded concurrency and pair
    /// every stored chunk with its vector, in order.
    async fn embed_chunks(
        &self,
        content: &str,
        chunks: &[StoredChunk],
        embed_type: common::messages::EmbedType,
    ) -> Result<Vec<(StoredChunk, Vec<f32>)>, AppError> {
        let parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
            .min(3);

        let batches: Vec<Vec<StoredChunk>> = chunks
            .chunks(EMBED_BATCH)
            .map(<[StoredChunk]>::to_vec)
            .collect();

        let paired: Vec<Vec<(StoredChunk, Vec<f32>)>> = futures::stream::iter(batches)
            .map(|batch| async move {
                let texts: Vec<String> = batch
                    .iter()
                    .map(|chunk| chunker::window_text(content, &chunk.window))
                    .collect();
                let vectors = self.embedder.embed(&texts, embed_type).await?;

                if vectors.len() != batch.len() {
                    return Err(AppError::LLMParsing(format!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        batch.len()
                    )));
                }

                Ok(batch.into_iter().zip(vectors).collect::<Vec<_>>())
            })
            .buffered(parallelism)
            .try_collect()
            .await?;

        Ok(paired.into_iter().flatten().collect())
    }
}

#[async_trait]
impl Handler for EmbeddingWorker {
    fn subject(&self) -> &'static str {
        subjects::TASK_CREATE_EMBEDDING
    }

    fn stream_name(&self) -> &'static str {
        subjects::streams::TASKS
    }

    fn durable_name(&self) -> &'static str {
        "embedding-worker"
    }

    fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::default()
    }

    async fn handle(&self, payload: &[u8]) -> Result<(), AppError> {
        let started = Instant::now();
        let command: CreateEmbeddingCommand = decode(payload)?;
        let task_id = command.base.task_id;

        self.publisher
            .publish(&UpdateStatusCommand {
                base: BaseMessage::new(task_id),
                status: TaskStatus::Embedding,
            })
            .await?;

        let article = self.store.get_article(command.article_id).await?;
        let paragraphs = article.paragraphs();
        let windows = chunker::chunk_paragraphs(&paragraphs, self.chunk_size, self.chunk_overlap)?;
        if windows.is_empty() {
            return Err(AppError::NoContent(format!(
                "article {} yields no chunk windows",
                command.article_id
            )));
        }

        let stored = self
            .store
            .batch_insert_chunks(command.article_id, &windows)
            .await?;

        let model_id = self
            .store
            .get_or_insert_model(&self.embedder.model_name())
            .await?;
        let expected_dim = self.embedder.dimensions();

        let paired = self
            .embed_chunks(&article.content, &stored, command.embed_type)
            .await?;

        for (chunk, vector) in &paired {
            match self
                .store
                .insert_embedding(
                    command.article_id,
                    chunk.chunk_id,
                    model_id,
                    vector,
                    expected_dim,
                )
                .await
            {
                Ok(_) => {}
                Err(AppError::IntegrityConstraint(_)) => {
                    // Redelivery after a partial run; the vector is
                    // already there.
                    debug!(
                        chunk_id = chunk.chunk_id,
                        model_id, "embedding already stored"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.publisher
            .publish(&EmbeddingCreatedEvent {
                base: BaseMessage::new(task_id),
                article_id: command.article_id,
                elapsed_ms: elapsed_ms(started),
            })
            .await?;

        self.publisher
            .publish(&UpdateStatusCommand {
                base: BaseMessage::new(task_id),
                status: TaskStatus::Done,
            })
            .await?;

        info!(
            %task_id,
            article_id = command.article_id,
            chunks = paired.len(),
            "embeddings created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{
        messages::EmbedType,
        storage::{store::MockStore, types::article::Article},
    };
    use providers::embedder::MockEmbedder;
    use uuid::Uuid;
    use worker_runtime::publisher::MockPublisher;

    const DIM: usize = 4;

    fn command(task_id: Uuid, article_id: i32) -> Vec<u8> {
        let command = CreateEmbeddingCommand {
            base: BaseMessage::new(task_id),
            article_id,
            embed_type: EmbedType::Passage,
        };
        serde_json::to_vec(&command).expect("serialize")
    }

    fn article(article_id: i32) -> Article {
        // Two paragraphs, 26 + 14 runes of ASCII.
        let paragraphs = ["abcdefghijklmnopqrstuvwxyz", "0123456789ABCD"];
        Article {
            article_id,
            task_id: Uuid::new_v4(),
            title: "t".into(),
            source_label: "s".into(),
            md5: "0".repeat(32),
            content: paragraphs.concat(),
            cuts: vec![26, 40],
            published_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn embedder(expected_calls: usize) -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_model_name()
            .returning(|| "test-embedder".to_string());
        embedder.expect_dimensions().returning(|| DIM);
        embedder
            .expect_embed()
            .times(expected_calls)
            .returning(|inputs, _| Ok(inputs.iter().map(|_| vec![0.5f32; DIM]).collect()));
        embedder
    }

    #[tokio::test]
    async fn chunks_are_persisted_embedded_and_announced() {
        let task_id = Uuid::new_v4();

        let mut store = MockStore::new();
        store
            .expect_get_article()
            .times(1)
            .returning(|id| Ok(article(id)));
        store
            .expect_batch_insert_chunks()
            .times(1)
            .withf(|_, windows| !windows.is_empty())
            .returning(|_, windows| {
                Ok(windows
                    .iter()
                    .enumerate()
                    .map(|(i, w)| StoredChunk {
                        chunk_id: i as i32 + 1,
                        window: *w,
                    })
                    .collect())
            });
        store
            .expect_get_or_insert_model()
            .withf(|name| name == "test-embedder")
            .times(1)
            .returning(|_| Ok(11));
        store
            .expect_insert_embedding()
            .withf(|_, _, model_id, vector, dim| {
                *model_id == 11 && vector.len() == DIM && *dim == DIM
            })
            .returning(|_, _, _, _, _| Ok(1));

        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish_raw()
            .withf(|subject, body| {
                subject == subjects::TASK_UPDATE_STATUS
                    && serde_json::from_slice::<UpdateStatusCommand>(body)
                        .map(|c| c.status == TaskStatus::Embedding)
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish_raw()
            .withf(|subject, _| subject == subjects::ARTICLE_EMBEDDING_CREATED)
            .times(1)
            .returning(|_, _| Ok(()));
        publisher
            .expect_publish_raw()
            .withf(|subject, body| {
                subject == subjects::TASK_UPDATE_STATUS
                    && serde_json::from_slice::<UpdateStatusCommand>(body)
                        .map(|c| c.status == TaskStatus::Done)
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let worker = EmbeddingWorker::new(
            Arc::new(store),
            Arc::new(embedder(1)),
            Arc::new(publisher),
            16,
            4,
        );

        worker.handle(&command(task_id, 5)).await.expect("handled");
    }

    #[tokio::test]
    async fn duplicate_embeddings_are_idempotent() {
        let task_id = Uuid::new_v4();

        let mut store = MockStore::new();
        store.expect_get_article().returning(|id| Ok(article(id)));
        store.expect_batch_insert_chunks().returning(|_, windows| {
            Ok(windows
                .iter()
                .enumerate()
                .map(|(i, w)| StoredChunk {
                    chunk_id: i as i32 + 1,
                    window: *w,
                })
                .collect())
        });
        store.expect_get_or_insert_model().returning(|_| Ok(11));
        store
            .expect_insert_embedding()
            .returning(|_, chunk_id, model_id, _, _| {
                Err(AppError::IntegrityConstraint(format!(
                    "embedding for chunk {chunk_id} and model {model_id} already exists"
                )))
            });

        let mut publisher = MockPublisher::new();
        publisher.expect_publish_raw().returning(|_, _| Ok(()));

        let worker = EmbeddingWorker::new(
            Arc::new(store),
            Arc::new(embedder(1)),
            Arc::new(publisher),
            16,
            4,
        );

        worker.handle(&command(task_id, 5)).await.expect("handled");
    }

    #[tokio::test]
    async fn invalid_chunk_parameters_fail_validation() {
        let task_id = Uuid::new_v4();

        let mut store = MockStore::new();
        store.expect_get_article().returning(|id| Ok(article(id)));

        let mut publisher = MockPublisher::new();
        publisher.expect_publish_raw().returning(|_, _| Ok(()));

        // Odd overlap violates the chunker contract.
        let worker = EmbeddingWorker::new(
            Arc::new(store),
            Arc::new(embedder(0)),
            Arc::new(publisher),
            16,
            3,
        );

        let err = worker
            .handle(&command(task_id, 5))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }
}
