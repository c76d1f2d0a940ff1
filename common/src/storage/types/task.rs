use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::PostgresClient,
    utils::{injection::InjectionFilter, url_guard},
};

/// Pipeline position of a task. Advances monotonically; `done` and
/// `failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scraping,
    Keywording,
    Embedding,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraping => "scraping",
            Self::Keywording => "keywording",
            Self::Embedding => "embedding",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "pending" => Ok(Self::Pending),
            "scraping" => Ok(Self::Scraping),
            "keywording" => Ok(Self::Keywording),
            "embedding" => Ok(Self::Embedding),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::InternalError(format!(
                "unknown task status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Scraping => 1,
            Self::Keywording => 2,
            Self::Embedding => 3,
            Self::Done => 4,
            Self::Failed => 5,
        }
    }

    /// Whether a transition to `next` keeps the observed sequence
    /// non-decreasing. Redeliveries of the current stage are allowed,
    /// regressions and transitions out of a terminal state are not.
    pub fn may_advance_to(self, next: Self) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// What the submitter handed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Url,
    Text,
}

impl TaskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "url" => Ok(Self::Url),
            "text" => Ok(Self::Text),
            other => Err(AppError::InternalError(format!(
                "unknown task source '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: Uuid,
    pub source: TaskSource,
    pub original_input: String,
    pub status: TaskStatus,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reject submissions the pipeline cannot or must not process before any
/// row is written.
pub fn validate_submission(
    source: TaskSource,
    original_input: &str,
    filter: &InjectionFilter,
) -> Result<(), AppError> {
    match source {
        TaskSource::Url => {
            let url = url::Url::parse(original_input)
                .map_err(|_| AppError::Validation("submitted URL does not parse".to_string()))?;
            url_guard::ensure_submission_url_allowed(&url)?;
        }
        TaskSource::Text => {
            if original_input.trim().is_empty() {
                return Err(AppError::Validation(
                    "text submission is empty".to_string(),
                ));
            }
            filter.scan(original_input)?;
        }
    }

    Ok(())
}

type TaskRow = (
    Uuid,
    String,
    String,
    String,
    Option<i64>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn from_row(row: TaskRow) -> Result<Task, AppError> {
    let (task_id, source, original_input, status, user_id, created_at, updated_at) = row;
    Ok(Task {
        task_id,
        source: TaskSource::parse(&source)?,
        original_input,
        status: TaskStatus::parse(&status)?,
        user_id,
        created_at,
        updated_at,
    })
}

impl Task {
    /// Create a task for a validated submission. The fresh v4 id is the
    /// correlation key on every envelope that follows.
    pub async fn create(
        db: &PostgresClient,
        source: TaskSource,
        original_input: &str,
        user_id: Option<i64>,
        filter: &InjectionFilter,
    ) -> Result<Self, AppError> {
        validate_submission(source, original_input, filter)?;

        let task_id = Uuid::new_v4();
        let row: TaskRow = sqlx::query_as(
            r#"
            INSERT INTO tasks (task_id, source, original_input, status, user_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING task_id, source, original_input, status, user_id, created_at, updated_at
            "#,
        )
        .bind(task_id)
        .bind(source.as_str())
        .bind(original_input)
        .bind(TaskStatus::Pending.as_str())
        .bind(user_id)
        .fetch_one(&db.pool)
        .await?;

        from_row(row)
    }

    pub async fn get(db: &PostgresClient, task_id: Uuid) -> Result<Self, AppError> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT task_id, source, original_input, status, user_id, created_at, updated_at
            FROM tasks WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&db.pool)
        .await?;

        row.map(from_row)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))
    }

    /// Apply a status transition, ignoring regressions so redelivered
    /// status commands keep the observed sequence monotonic. Returns
    /// whether the column was written.
    pub async fn update_status(
        db: &PostgresClient,
        task_id: Uuid,
        next: TaskStatus,
    ) -> Result<bool, AppError> {
        let current = Self::get(db, task_id).await?.status;
        if !current.may_advance_to(next) {
            warn!(
                %task_id,
                current = current.as_str(),
                requested = next.as_str(),
                "ignoring non-monotonic status transition"
            );
            return Ok(false);
        }

        sqlx::query("UPDATE tasks SET status = $1, updated_at = now() WHERE task_id = $2")
            .bind(next.as_str())
            .bind(task_id)
            .execute(&db.pool)
            .await?;

        Ok(true)
    }
}
