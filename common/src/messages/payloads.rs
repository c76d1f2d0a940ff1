use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::types::task::TaskStatus};

use super::subjects;

/// Protocol revision this build speaks. Decoding rejects anything newer,
/// accepts anything equal or older, and ignores unknown fields.
pub const PROTOCOL_VERSION: i32 = 1;

/// Fields shared by every command and event payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BaseMessage {
    pub task_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    pub event_at: i64,
    pub version: i32,
}

impl BaseMessage {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            user_id: None,
            cache_key: None,
            event_at: Utc::now().timestamp(),
            version: PROTOCOL_VERSION,
        }
    }

    pub fn with_user(mut self, user_id: Option<i64>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }
}

/// A wire payload bound to a fixed subject.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync {
    fn subject(&self) -> &'static str;
    fn base(&self) -> &BaseMessage;
}

/// Instruction tuning for asymmetric retrieval embeddings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedType {
    Query,
    Passage,
}

impl EmbedType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Passage => "passage",
        }
    }
}

/// Levels mirrored from the submission API's log forwarding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrapeCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    /// Absolute http(s) URL. Absent for raw-text submissions, which are
    /// reconstructed from the task's stored input instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateTitleCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractKeywordCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub article_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateEmbeddingCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub article_id: i32,
    pub embed_type: EmbedType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateStatusCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLogCommand {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub level: LogLevel,
    pub message: String,
}

/// The single user-visible failure channel. `data` carries the opaque
/// original payload so a notifier can replay or inspect it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailedEvent {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub error: String,
    pub data: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCreatedEvent {
    #[serde(flatten)]
    pub base: BaseMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleScrapedEvent {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub article_id: i32,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordsExtractedEvent {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub article_id: i32,
    pub keywords_count: i64,
    pub relations_count: i64,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingCreatedEvent {
    #[serde(flatten)]
    pub base: BaseMessage,
    pub article_id: i32,
    pub elapsed_ms: i64,
}

macro_rules! payload_subject {
    ($ty:ident, $subject:expr) => {
        impl Payload for $ty {
            fn subject(&self) -> &'static str {
                $subject
            }

            fn base(&self) -> &BaseMessage {
                &self.base
            }
        }
    };
}

payload_subject!(ScrapeCommand, subjects::TASK_SCRAPE);
payload_subject!(GenerateTitleCommand, subjects::TASK_GENERATE_TITLE);
payload_subject!(ExtractKeywordCommand, subjects::TASK_EXTRACT_KEYWORD);
payload_subject!(CreateEmbeddingCommand, subjects::TASK_CREATE_EMBEDDING);
payload_subject!(UpdateStatusCommand, subjects::TASK_UPDATE_STATUS);
payload_subject!(TaskLogCommand, subjects::TASK_LOGS);
payload_subject!(TaskFailedEvent, subjects::TASK_FAILED);
payload_subject!(TaskCreatedEvent, subjects::TASK_CREATED);
payload_subject!(ArticleScrapedEvent, subjects::ARTICLE_SCRAPED);
payload_subject!(KeywordsExtractedEvent, subjects::ARTICLE_KEYWORDS_EXTRACTED);
payload_subject!(EmbeddingCreatedEvent, subjects::ARTICLE_EMBEDDING_CREATED);

/// Decode a payload, enforcing the version gate.
///
/// A payload from a newer protocol revision is poison: the caller must
/// route it to the failure channel and ack, never redeliver.
pub fn decode<T: Payload>(bytes: &[u8]) -> Result<T, AppError> {
    let payload: T =
        serde_json::from_slice(bytes).map_err(|e| AppError::Malformed(e.to_string()))?;

    let version = payload.base().version;
    if version > PROTOCOL_VERSION {
        return Err(AppError::Malformed(format!(
            "unsupported payload version {version} (supported <= {PROTOCOL_VERSION})"
        )));
    }

    Ok(payload)
}

/// Best-effort extraction of the shared fields from an arbitrary payload,
/// used to correlate failure events for messages that did not decode.
pub fn peek_base(bytes: &[u8]) -> Option<BaseMessage> {
    serde_json::from_slice(bytes).ok()
}
