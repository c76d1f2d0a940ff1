use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote returned status {0}")]
    RemoteStatus(u16),
    #[error("Bus error: {0}")]
    Bus(String),
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("No content: {0}")]
    NoContent(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Integrity constraint: {0}")]
    IntegrityConstraint(String),
    #[error("Batch insert failed: {0}")]
    BatchInsert(String),
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// How a failed message should be disposed of by the consuming worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Undecodable or from a newer protocol revision; never redeliver.
    Malformed,
    /// Worth another delivery after a delay.
    Transient,
    /// The task cannot succeed; surface on the failure channel.
    Permanent,
    /// The row already exists; the handler resolves this as success.
    Integrity,
    /// The per-message deadline fired before the handler finished.
    Deadline,
}

impl AppError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Malformed(_) => FailureKind::Malformed,
            Self::Database(_)
            | Self::Migration(_)
            | Self::Cache(_)
            | Self::OpenAI(_)
            | Self::Http(_)
            | Self::RemoteStatus(_)
            | Self::Bus(_)
            | Self::PublishFailed(_)
            | Self::BatchInsert(_)
            | Self::Io(_) => FailureKind::Transient,
            Self::IntegrityConstraint(_) => FailureKind::Integrity,
            Self::DeadlineExceeded(_) => FailureKind::Deadline,
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::NoContent(_)
            | Self::LLMParsing(_)
            | Self::Join(_)
            | Self::InternalError(_) => FailureKind::Permanent,
        }
    }

    /// True when another attempt may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.failure_kind(),
            FailureKind::Transient | FailureKind::Deadline
        )
    }
}
