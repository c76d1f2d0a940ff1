//! Subject plane shared by every worker and publisher.
//!
//! Commands are imperative and have exactly one durable consumer;
//! events are notifications with zero-to-many consumers.

// Command subjects
pub const TASK_SCRAPE: &str = "task.scrape";
pub const TASK_GENERATE_TITLE: &str = "task.generate_title";
pub const TASK_EXTRACT_KEYWORD: &str = "task.extract.keyword";
pub const TASK_CREATE_EMBEDDING: &str = "task.create.embedding";
pub const TASK_UPDATE_STATUS: &str = "task.update.status";
pub const TASK_LOGS: &str = "task.logs";
pub const TASK_FAILED: &str = "task.failed";

// Event subjects
pub const TASK_CREATED: &str = "task.created";
pub const ARTICLE_SCRAPED: &str = "article.scraped";
pub const ARTICLE_KEYWORDS_EXTRACTED: &str = "article.keywords.extracted";
pub const ARTICLE_EMBEDDING_CREATED: &str = "article.embedding.created";

pub mod streams {
    /// Stream carrying every `task.>` subject.
    pub const TASKS: &str = "TASKS";
    /// Stream carrying every `article.>` subject.
    pub const ARTICLES: &str = "ARTICLES";
}

/// Resolve the stream a subject is persisted on.
pub fn stream_for(subject: &str) -> &'static str {
    if subject.starts_with("article.") {
        streams::ARTICLES
    } else {
        streams::TASKS
    }
}

/// Wildcard binding for the task stream.
pub fn task_subjects() -> Vec<String> {
    vec!["task.>".to_string()]
}

/// Wildcard binding for the article stream.
pub fn article_subjects() -> Vec<String> {
    vec!["article.>".to_string()]
}
