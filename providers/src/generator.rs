use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::error::AppError;

/// Keywords grouped the way downstream indexing consumes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordSet {
    pub themes: Vec<String>,
    pub events: Vec<String>,
    pub entities: Vec<String>,
    pub actions: Vec<String>,
}

/// A directed relation between two named entities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityRelation {
    pub entity1: String,
    pub entity2: String,
    pub relation: String,
}

/// The structured result of keyword extraction, exactly as the provider
/// must return it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordAnalysis {
    pub keywords: KeywordSet,
    pub relations: Vec<EntityRelation>,
}

impl KeywordAnalysis {
    /// Flatten the grouped keywords into one prefixed list
    /// (`theme:…`, `event:…`, `entity:…`, `action:…`) for indexing.
    pub fn flattened(&self) -> Vec<String> {
        let prefixed = |prefix: &str, values: &[String]| {
            values
                .iter()
                .map(|value| format!("{prefix}:{value}"))
                .collect::<Vec<_>>()
        };

        let mut flat = prefixed("theme", &self.keywords.themes);
        flat.extend(prefixed("event", &self.keywords.events));
        flat.extend(prefixed("entity", &self.keywords.entities));
        flat.extend(prefixed("action", &self.keywords.actions));
        flat
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.themes.len()
            + self.keywords.events.len()
            + self.keywords.entities.len()
            + self.keywords.actions.len()
    }
}

/// LLM capability producing structured analyses of article text.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Extract grouped keywords and entity relations. The response must
    /// satisfy the strict schema; anything else is a provider-contract
    /// violation, not a retryable failure.
    async fn extract_keywords(&self, content: &str) -> Result<KeywordAnalysis, AppError>;

    /// Produce a short headline for an article body.
    async fn generate_title(&self, content: &str) -> Result<String, AppError>;
}
