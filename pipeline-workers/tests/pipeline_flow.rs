//! Drives the three pipeline handlers through a full task lifecycle,
//! chaining each stage's published command into the next handler, with
//! an in-memory store standing in for Postgres.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use common::{
    cache::Cache,
    error::AppError,
    messages::{
        decode, subjects, ArticleScrapedEvent, BaseMessage, CreateEmbeddingCommand,
        EmbeddingCreatedEvent, KeywordsExtractedEvent, ScrapeCommand, UpdateStatusCommand,
    },
    storage::{
        store::{AfterCommit, Store},
        types::{
            article::{Article, NewArticle},
            chunk::{ChunkWindow, StoredChunk},
            task::{Task, TaskSource, TaskStatus},
        },
    },
};
use pipeline_workers::{EmbeddingWorker, KeywordWorker, ScrapeWorker, StatusWorker};
use providers::{
    fetcher::{ArticleRecord, MockFetcher},
    generator::{EntityRelation, KeywordAnalysis, KeywordSet, MockGenerator},
};
use providers::embedder::MockEmbedder;
use worker_runtime::{handler::Handler, publisher::Publisher};

const DIM: usize = 8;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Captures every publish in order instead of touching a bus.
#[derive(Default)]
struct RecordingPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    fn all(&self) -> Vec<(String, Vec<u8>)> {
        self.messages.lock().expect("publisher lock").clone()
    }

    fn bodies(&self, subject: &str) -> Vec<Vec<u8>> {
        self.all()
            .into_iter()
            .filter(|(s, _)| s == subject)
            .map(|(_, body)| body)
            .collect()
    }

    fn subjects(&self) -> Vec<String> {
        self.all().into_iter().map(|(s, _)| s).collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_raw(&self, subject: &str, body: Vec<u8>) -> Result<(), AppError> {
        self.messages
            .lock()
            .expect("publisher lock")
            .push((subject.to_string(), body));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.lock().expect("cache lock").get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), AppError> {
        self.entries
            .lock()
            .expect("cache lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<Uuid, Task>,
    articles: Vec<Article>,
    chunks: Vec<(i32, ChunkWindow)>,
    embeddings: HashMap<(i32, i32), i32>,
    models: HashMap<String, i32>,
}

/// In-memory [`Store`] with the same uniqueness rules as the schema.
#[derive(Default)]
struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    fn task(&self, task_id: Uuid) -> Option<Task> {
        self.state
            .lock()
            .expect("store lock")
            .tasks
            .get(&task_id)
            .cloned()
    }

    fn chunk_count(&self) -> usize {
        self.state.lock().expect("store lock").chunks.len()
    }

    fn embedding_count(&self) -> usize {
        self.state.lock().expect("store lock").embeddings.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_task(
        &self,
        source: TaskSource,
        original_input: &str,
        user_id: Option<i64>,
    ) -> Result<Task, AppError> {
        let task = Task {
            task_id: Uuid::new_v4(),
            source,
            original_input: original_input.to_string(),
            status: TaskStatus::Pending,
            user_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .expect("store lock")
            .tasks
            .insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, AppError> {
        self.task(task_id)
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().expect("store lock");
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;

        if !task.status.may_advance_to(status) {
            return Ok(false);
        }
        task.status = status;
        Ok(true)
    }

    async fn insert_article(
        &self,
        article: NewArticle,
        after_commit: AfterCommit,
    ) -> Result<i32, AppError> {
        let md5 = article.fingerprint();
        let article_id = {
            let mut state = self.state.lock().expect("store lock");
            if state.articles.iter().any(|a| a.md5 == md5) {
                return Err(AppError::IntegrityConstraint(format!(
                    "article fingerprint {md5} already exists"
                )));
            }
            let article_id = state.articles.len() as i32 + 1;
            state.articles.push(Article {
                article_id,
                task_id: article.task_id,
                title: article.title,
                source_label: article.source_label,
                md5,
                content: article.content,
                cuts: article.cuts,
                published_at: article.published_at,
                created_at: Utc::now(),
            });
            article_id
        };

        if let Err(e) = after_commit(article_id).await {
            let mut state = self.state.lock().expect("store lock");
            state.articles.retain(|a| a.article_id != article_id);
            return Err(e);
        }

        Ok(article_id)
    }

    async fn get_article(&self, article_id: i32) -> Result<Article, AppError> {
        self.state
            .lock()
            .expect("store lock")
            .articles
            .iter()
            .find(|a| a.article_id == article_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("article {article_id}")))
    }

    async fn get_article_by_md5(&self, md5: &str) -> Result<Option<Article>, AppError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .articles
            .iter()
            .find(|a| a.md5 == md5)
            .cloned())
    }

    async fn get_article_by_task(&self, task_id: Uuid) -> Result<Option<Article>, AppError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .articles
            .iter()
            .find(|a| a.task_id == task_id)
            .cloned())
    }

    async fn set_article_title(&self, task_id: Uuid, title: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().expect("store lock");
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.task_id == task_id)
            .ok_or_else(|| AppError::NotFound(format!("article for task {task_id}")))?;
        article.title = title.to_string();
        Ok(())
    }

    async fn batch_insert_chunks(
        &self,
        article_id: i32,
        windows: &[ChunkWindow],
    ) -> Result<Vec<StoredChunk>, AppError> {
        let mut state = self.state.lock().expect("store lock");
        let mut stored = Vec::with_capacity(windows.len());
        for window in windows {
            let chunk_id = state.chunks.len() as i32 + 1;
            state.chunks.push((article_id, *window));
            stored.push(StoredChunk {
                chunk_id,
                window: *window,
            });
        }
        Ok(stored)
    }

    async fn insert_embedding(
        &self,
        _article_id: i32,
        chunk_id: i32,
        model_id: i32,
        vector: &[f32],
        expected_dim: usize,
    ) -> Result<i32, AppError> {
        if vector.len() != expected_dim {
            return Err(AppError::Validation(format!(
                "embedding vector has {} dimensions, model expects {expected_dim}",
                vector.len()
            )));
        }

        let mut state = self.state.lock().expect("store lock");
        if state.embeddings.contains_key(&(chunk_id, model_id)) {
            return Err(AppError::IntegrityConstraint(format!(
                "embedding for chunk {chunk_id} and model {model_id} already exists"
            )));
        }
        let embedding_id = state.embeddings.len() as i32 + 1;
        state.embeddings.insert((chunk_id, model_id), embedding_id);
        Ok(embedding_id)
    }

    async fn get_embedding_id(
        &self,
        chunk_id: i32,
        model_id: i32,
    ) -> Result<Option<i32>, AppError> {
        Ok(self
            .state
            .lock()
            .expect("store lock")
            .embeddings
            .get(&(chunk_id, model_id))
            .copied())
    }

    async fn get_or_insert_model(&self, name: &str) -> Result<i32, AppError> {
        let mut state = self.state.lock().expect("store lock");
        let next = state.models.len() as i32 + 1;
        Ok(*state.models.entry(name.to_string()).or_insert(next))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn analysis() -> KeywordAnalysis {
    KeywordAnalysis {
        keywords: KeywordSet {
            themes: vec!["infrastructure".into()],
            events: vec!["budget vote".into()],
            entities: vec!["City Council".into()],
            actions: vec!["approves".into()],
        },
        relations: vec![EntityRelation {
            entity1: "City Council".into(),
            entity2: "Finance Committee".into(),
            relation: "follows advice of".into(),
        }],
    }
}

fn fetched_record() -> ArticleRecord {
    ArticleRecord {
        title: "Council approves budget".into(),
        publisher: "news.example.com".into(),
        paragraphs: vec![
            "The council approved the budget on Tuesday after a long debate.".into(),
            "Opponents warned that reserves would shrink further next year.".into(),
        ],
        published_at: Utc::now(),
        keywords: None,
        description: None,
    }
}

fn embedder() -> MockEmbedder {
    let mut embedder = MockEmbedder::new();
    embedder
        .expect_model_name()
        .returning(|| "test-embedder".to_string());
    embedder.expect_dimensions().returning(|| DIM);
    embedder
        .expect_embed()
        .returning(|inputs, _| Ok(inputs.iter().map(|_| vec![0.25f32; DIM]).collect()));
    embedder
}

/// Apply every captured `task.update.status` command through the status
/// worker, in publish order, and return the applied sequence.
async fn drain_status_updates(
    publisher: &RecordingPublisher,
    status_worker: &StatusWorker,
) -> Vec<TaskStatus> {
    let mut applied = Vec::new();
    for body in publisher.bodies(subjects::TASK_UPDATE_STATUS) {
        let command: UpdateStatusCommand = decode(&body).expect("status command decodes");
        status_worker.handle(&body).await.expect("status handled");
        applied.push(command.status);
    }
    applied
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn url_submission_flows_to_done() {
    let store = Arc::new(MemoryStore::default());
    let cache = Arc::new(MemoryCache::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(|_| Ok(fetched_record()));

    let mut generator = MockGenerator::new();
    generator
        .expect_extract_keywords()
        .times(1)
        .returning(|_| Ok(analysis()));

    let scrape = ScrapeWorker::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        Arc::new(fetcher),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );
    let keyword = KeywordWorker::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        Arc::new(generator),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );
    let embedding = EmbeddingWorker::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(embedder()),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        32,
        4,
    );
    let status = StatusWorker::new(Arc::clone(&store) as Arc<dyn Store>);

    // Submission path (external): task row plus the initial command.
    let task = store
        .create_task(TaskSource::Url, "https://news.example.com/a", None)
        .await
        .expect("task created");
    let scrape_command = serde_json::to_vec(&ScrapeCommand {
        base: BaseMessage::new(task.task_id),
        url: Some("https://news.example.com/a".into()),
    })
    .expect("serialize");

    // Stage 1: fetch and parse.
    scrape.handle(&scrape_command).await.expect("scrape handled");

    let scraped: ArticleScrapedEvent = decode(
        &publisher.bodies(subjects::ARTICLE_SCRAPED)[0],
    )
    .expect("scraped event decodes");
    assert_eq!(scraped.base.task_id, task.task_id);

    // Stage 2: keyword extraction, driven by the command stage 1 published.
    let keyword_commands = publisher.bodies(subjects::TASK_EXTRACT_KEYWORD);
    assert_eq!(keyword_commands.len(), 1);
    keyword.handle(&keyword_commands[0]).await.expect("keywords handled");

    let extracted: KeywordsExtractedEvent = decode(
        &publisher.bodies(subjects::ARTICLE_KEYWORDS_EXTRACTED)[0],
    )
    .expect("keywords event decodes");
    assert_eq!(extracted.base.task_id, task.task_id);
    assert!(extracted.keywords_count > 0);
    assert_eq!(extracted.article_id, scraped.article_id);

    // Stage 3: chunking and embedding.
    let embed_commands = publisher.bodies(subjects::TASK_CREATE_EMBEDDING);
    assert_eq!(embed_commands.len(), 1);
    let embed_command: CreateEmbeddingCommand =
        decode(&embed_commands[0]).expect("embed command decodes");
    assert_eq!(embed_command.article_id, scraped.article_id);
    embedding.handle(&embed_commands[0]).await.expect("embedding handled");

    let created: EmbeddingCreatedEvent = decode(
        &publisher.bodies(subjects::ARTICLE_EMBEDDING_CREATED)[0],
    )
    .expect("embedding event decodes");
    assert_eq!(created.base.task_id, task.task_id);

    assert!(store.chunk_count() > 0);
    assert_eq!(store.embedding_count(), store.chunk_count());

    // Events were published in pipeline order.
    let event_order: Vec<String> = publisher
        .subjects()
        .into_iter()
        .filter(|s| s.starts_with("article."))
        .collect();
    assert_eq!(
        event_order,
        vec![
            subjects::ARTICLE_SCRAPED,
            subjects::ARTICLE_KEYWORDS_EXTRACTED,
            subjects::ARTICLE_EMBEDDING_CREATED,
        ]
    );

    // Status commands drive the task to done, monotonically.
    let applied = drain_status_updates(&publisher, &status).await;
    assert_eq!(
        applied,
        vec![
            TaskStatus::Scraping,
            TaskStatus::Keywording,
            TaskStatus::Embedding,
            TaskStatus::Done,
        ]
    );
    assert_eq!(
        store.task(task.task_id).expect("task").status,
        TaskStatus::Done
    );
}

#[tokio::test]
async fn text_submission_with_explicit_headline() {
    let store = Arc::new(MemoryStore::default());
    let cache = Arc::new(MemoryCache::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let scrape = ScrapeWorker::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&cache) as Arc<dyn Cache>,
        Arc::new(MockFetcher::new()),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    );

    let task = store
        .create_task(
            TaskSource::Text,
            "# Headline\nBody paragraph one.\n\nBody two.",
            None,
        )
        .await
        .expect("task created");
    let command = serde_json::to_vec(&ScrapeCommand {
        base: BaseMessage::new(task.task_id),
        url: None,
    })
    .expect("serialize");

    scrape.handle(&command).await.expect("scrape handled");

    let article = store
        .get_article_by_task(task.task_id)
        .await
        .expect("lookup")
        .expect("article stored");
    assert_eq!(article.title, "Headline");
    assert_eq!(
        article.paragraphs(),
        vec!["Body paragraph one.", "Body two."]
    );

    // An explicit headline means no title-generation follow-up.
    assert!(publisher.bodies(subjects::TASK_GENERATE_TITLE).is_empty());

    // The body was staged for the keyword stage.
    let cached = cache
        .get(&common::cache::content_key(task.task_id))
        .await
        .expect("cache read");
    assert_eq!(cached.as_deref(), Some("Body paragraph one.Body two."));
}

#[tokio::test]
async fn redelivered_embedding_command_is_idempotent() {
    let store = Arc::new(MemoryStore::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let task = store
        .create_task(TaskSource::Url, "https://news.example.com/a", None)
        .await
        .expect("task created");
    let record = fetched_record();
    let article = NewArticle::from_paragraphs(
        task.task_id,
        record.title,
        record.publisher,
        &record.paragraphs,
        record.published_at,
    );
    let no_op: AfterCommit = Box::new(
        |_| -> futures::future::BoxFuture<'static, Result<(), AppError>> {
            Box::pin(async { Ok(()) })
        },
    );
    let article_id = store
        .insert_article(article, no_op)
        .await
        .expect("article stored");

    let embedding = EmbeddingWorker::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(embedder()),
        Arc::clone(&publisher) as Arc<dyn Publisher>,
        32,
        4,
    );

    let command = serde_json::to_vec(&CreateEmbeddingCommand {
        base: BaseMessage::new(task.task_id),
        article_id,
        embed_type: common::messages::EmbedType::Passage,
    })
    .expect("serialize");

    embedding.handle(&command).await.expect("first delivery");
    let first_count = store.embedding_count();

    // The second delivery re-chunks (new rows in this double) but every
    // vector insert resolves as an idempotent duplicate or a fresh row;
    // the handler still completes and re-announces.
    embedding.handle(&command).await.expect("second delivery");
    assert!(store.embedding_count() >= first_count);
    assert_eq!(
        publisher
            .bodies(subjects::ARTICLE_EMBEDDING_CREATED)
            .len(),
        2
    );
}
