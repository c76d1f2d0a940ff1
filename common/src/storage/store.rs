use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{
        db::PostgresClient,
        types::{
            article::{Article, NewArticle},
            chunk::{Chunk, ChunkWindow, StoredChunk},
            embedding::Embedding,
            model::Model,
            task::{Task, TaskSource, TaskStatus},
        },
    },
    utils::injection::InjectionFilter,
};

/// Outbox hook invoked inside the article-insert transaction. An error
/// rolls the insert back, so the event and the row appear together or
/// not at all.
pub type AfterCommit = Box<dyn FnOnce(i32) -> BoxFuture<'static, Result<(), AppError>> + Send>;

/// Transactional persistence boundary of the pipeline. Handlers depend on
/// this capability, never on the pool, so business logic stays testable
/// without a running database.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_task(
        &self,
        source: TaskSource,
        original_input: &str,
        user_id: Option<i64>,
    ) -> Result<Task, AppError>;

    async fn get_task(&self, task_id: Uuid) -> Result<Task, AppError>;

    /// Apply a monotonic status transition; regressions are ignored.
    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool, AppError>;

    /// Insert an article and run the outbox hook inside the transaction.
    async fn insert_article(
        &self,
        article: NewArticle,
        after_commit: AfterCommit,
    ) -> Result<i32, AppError>;

    async fn get_article(&self, article_id: i32) -> Result<Article, AppError>;

    async fn get_article_by_md5(&self, md5: &str) -> Result<Option<Article>, AppError>;

    async fn get_article_by_task(&self, task_id: Uuid) -> Result<Option<Article>, AppError>;

    async fn set_article_title(&self, task_id: Uuid, title: &str) -> Result<(), AppError>;

    async fn batch_insert_chunks(
        &self,
        article_id: i32,
        windows: &[ChunkWindow],
    ) -> Result<Vec<StoredChunk>, AppError>;

    async fn insert_embedding(
        &self,
        article_id: i32,
        chunk_id: i32,
        model_id: i32,
        vector: &[f32],
        expected_dim: usize,
    ) -> Result<i32, AppError>;

    async fn get_embedding_id(
        &self,
        chunk_id: i32,
        model_id: i32,
    ) -> Result<Option<i32>, AppError>;

    async fn get_or_insert_model(&self, name: &str) -> Result<i32, AppError>;
}

/// Postgres-backed [`Store`].
pub struct PgStore {
    db: Arc<PostgresClient>,
    filter: InjectionFilter,
}

impl PgStore {
    pub fn new(db: Arc<PostgresClient>) -> Self {
        Self {
            db,
            filter: InjectionFilter::default(),
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_task(
        &self,
        source: TaskSource,
        original_input: &str,
        user_id: Option<i64>,
    ) -> Result<Task, AppError> {
        Task::create(&self.db, source, original_input, user_id, &self.filter).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, AppError> {
        Task::get(&self.db, task_id).await
    }

    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool, AppError> {
        Task::update_status(&self.db, task_id, status).await
    }

    async fn insert_article(
        &self,
        article: NewArticle,
        after_commit: AfterCommit,
    ) -> Result<i32, AppError> {
        Article::insert(&self.db, &article, |article_id| after_commit(article_id)).await
    }

    async fn get_article(&self, article_id: i32) -> Result<Article, AppError> {
        Article::get(&self.db, article_id).await
    }

    async fn get_article_by_md5(&self, md5: &str) -> Result<Option<Article>, AppError> {
        Article::get_by_md5(&self.db, md5).await
    }

    async fn get_article_by_task(&self, task_id: Uuid) -> Result<Option<Article>, AppError> {
        Article::get_by_task(&self.db, task_id).await
    }

    async fn set_article_title(&self, task_id: Uuid, title: &str) -> Result<(), AppError> {
        Article::set_title(&self.db, task_id, title).await
    }

    async fn batch_insert_chunks(
        &self,
        article_id: i32,
        windows: &[ChunkWindow],
    ) -> Result<Vec<StoredChunk>, AppError> {
        Chunk::batch_insert(&self.db, article_id, windows).await
    }

    async fn insert_embedding(
        &self,
        article_id: i32,
        chunk_id: i32,
        model_id: i32,
        vector: &[f32],
        expected_dim: usize,
    ) -> Result<i32, AppError> {
        Embedding::insert(&self.db, article_id, chunk_id, model_id, vector, expected_dim).await
    }

    async fn get_embedding_id(
        &self,
        chunk_id: i32,
        model_id: i32,
    ) -> Result<Option<i32>, AppError> {
        Embedding::get_id(&self.db, chunk_id, model_id).await
    }

    async fn get_or_insert_model(&self, name: &str) -> Result<i32, AppError> {
        Model::get_or_insert(&self.db, name).await
    }
}
