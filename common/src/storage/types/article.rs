use std::future::Future;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::{is_unique_violation, PostgresClient},
};

/// A reconstructed news article. `cuts` holds the cumulative byte length
/// after each paragraph, so the paragraph list is recoverable by slicing
/// `content` on consecutive cuts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub article_id: i32,
    pub task_id: Uuid,
    pub title: String,
    pub source_label: String,
    pub md5: String,
    pub content: String,
    pub cuts: Vec<i32>,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a parsed article.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub task_id: Uuid,
    pub title: String,
    pub source_label: String,
    pub content: String,
    pub cuts: Vec<i32>,
    pub published_at: DateTime<Utc>,
}

impl NewArticle {
    /// Join paragraphs into the stored content and record the cumulative
    /// byte cut after each one.
    pub fn from_paragraphs(
        task_id: Uuid,
        title: impl Into<String>,
        source_label: impl Into<String>,
        paragraphs: &[String],
        published_at: DateTime<Utc>,
    ) -> Self {
        let mut cuts = Vec::with_capacity(paragraphs.len());
        let mut total: i32 = 0;
        for paragraph in paragraphs {
            total = total.saturating_add(paragraph.len() as i32);
            cuts.push(total);
        }

        Self {
            task_id,
            title: title.into(),
            source_label: source_label.into(),
            content: paragraphs.concat(),
            cuts,
            published_at,
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.source_label, self.published_at)
    }
}

/// Upsert fingerprint over `(title, source_label, published_at UTC date)`.
/// Articles republished with the same headline on the same day collapse
/// onto one row.
pub fn fingerprint(title: &str, source_label: &str, published_at: DateTime<Utc>) -> String {
    let mut hasher = Md5::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(source_label.as_bytes());
    hasher.update(b"\n");
    hasher.update(published_at.date_naive().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

type ArticleRow = (
    i32,
    Uuid,
    String,
    String,
    String,
    String,
    Vec<i32>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn from_row(row: ArticleRow) -> Article {
    let (article_id, task_id, title, source_label, md5, content, cuts, published_at, created_at) =
        row;
    Article {
        article_id,
        task_id,
        title,
        source_label,
        // CHAR(32) comes back space-padded on some drivers.
        md5: md5.trim_end().to_string(),
        content,
        cuts,
        published_at,
        created_at,
    }
}

const SELECT_COLUMNS: &str = "article_id, task_id, title, source_label, md5, content, cuts, \
                              published_at, created_at";

impl Article {
    /// Insert the article and run `after_commit` inside the same
    /// transaction; a closure error rolls the row back. This is the only
    /// place a state change is coupled to its outbound publish.
    ///
    /// A duplicate fingerprint surfaces as `IntegrityConstraint`; callers
    /// resolve it through [`Article::get_by_md5`].
    pub async fn insert<F, Fut>(
        db: &PostgresClient,
        new: &NewArticle,
        after_commit: F,
    ) -> Result<i32, AppError>
    where
        F: FnOnce(i32) -> Fut + Send,
        Fut: Future<Output = Result<(), AppError>> + Send,
    {
        let md5 = new.fingerprint();

        let mut tx = db.pool.begin().await?;

        let inserted: Result<(i32,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO articles (task_id, title, source_label, md5, content, cuts, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING article_id
            "#,
        )
        .bind(new.task_id)
        .bind(&new.title)
        .bind(&new.source_label)
        .bind(&md5)
        .bind(&new.content)
        .bind(&new.cuts)
        .bind(new.published_at)
        .fetch_one(&mut *tx)
        .await;

        let article_id = match inserted {
            Ok((article_id,)) => article_id,
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::IntegrityConstraint(format!(
                    "article fingerprint {md5} already exists"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = after_commit(article_id).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;
        Ok(article_id)
    }

    pub async fn get(db: &PostgresClient, article_id: i32) -> Result<Self, AppError> {
        let row: Option<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE article_id = $1"
        ))
        .bind(article_id)
        .fetch_optional(&db.pool)
        .await?;

        row.map(from_row)
            .ok_or_else(|| AppError::NotFound(format!("article {article_id}")))
    }

    pub async fn get_by_md5(db: &PostgresClient, md5: &str) -> Result<Option<Self>, AppError> {
        let row: Option<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE md5 = $1"
        ))
        .bind(md5)
        .fetch_optional(&db.pool)
        .await?;

        Ok(row.map(from_row))
    }

    pub async fn get_by_task(db: &PostgresClient, task_id: Uuid) -> Result<Option<Self>, AppError> {
        let row: Option<ArticleRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM articles WHERE task_id = $1 ORDER BY article_id LIMIT 1"
        ))
        .bind(task_id)
        .fetch_optional(&db.pool)
        .await?;

        Ok(row.map(from_row))
    }

    /// Replace the title of the task's article, recomputing the fingerprint
    /// so the upsert invariant keeps holding.
    pub async fn set_title(
        db: &PostgresClient,
        task_id: Uuid,
        title: &str,
    ) -> Result<(), AppError> {
        let article = Self::get_by_task(db, task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("article for task {task_id}")))?;

        let md5 = fingerprint(title, &article.source_label, article.published_at);

        sqlx::query("UPDATE articles SET title = $1, md5 = $2 WHERE article_id = $3")
            .bind(title)
            .bind(&md5)
            .bind(article.article_id)
            .execute(&db.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::IntegrityConstraint(format!(
                        "article fingerprint {md5} already exists"
                    ))
                } else {
                    e.into()
                }
            })?;

        Ok(())
    }

    /// Recover the paragraph list by slicing `content` on consecutive cuts.
    pub fn paragraphs(&self) -> Vec<&str> {
        let mut paragraphs = Vec::with_capacity(self.cuts.len());
        let mut from = 0usize;
        for cut in &self.cuts {
            let to = usize::try_from(*cut).unwrap_or(0);
            if let Some(slice) = self.content.get(from..to) {
                paragraphs.push(slice);
            }
            from = to;
        }
        paragraphs
    }
}
