use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Which handler a worker process runs. `all` spawns every runner in one
/// process, offsetting the health ports, and is meant for development.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Scrape,
    Keyword,
    Embedding,
    Status,
    Title,
    All,
}

/// LLM provider selection. Every variant builds an OpenAI-compatible
/// client; the variants differ in default endpoint and credential
/// handling.
#[derive(Clone, Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAi {
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        api_key_file: Option<String>,
        #[serde(default = "default_openai_base_url")]
        base_url: String,
        chat_model: String,
        embedding_model: String,
        embedding_dimensions: u32,
    },
    Ollama {
        #[serde(default = "default_ollama_base_url")]
        base_url: String,
        chat_model: String,
        embedding_model: String,
        embedding_dimensions: u32,
    },
    Gemini {
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default)]
        api_key_file: Option<String>,
        #[serde(default = "default_gemini_base_url")]
        base_url: String,
        chat_model: String,
        embedding_model: String,
        embedding_dimensions: u32,
    },
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        match self {
            Self::OpenAi { base_url, .. }
            | Self::Ollama { base_url, .. }
            | Self::Gemini { base_url, .. } => base_url,
        }
    }

    pub fn chat_model(&self) -> &str {
        match self {
            Self::OpenAi { chat_model, .. }
            | Self::Ollama { chat_model, .. }
            | Self::Gemini { chat_model, .. } => chat_model,
        }
    }

    pub fn embedding_model(&self) -> &str {
        match self {
            Self::OpenAi {
                embedding_model, ..
            }
            | Self::Ollama {
                embedding_model, ..
            }
            | Self::Gemini {
                embedding_model, ..
            } => embedding_model,
        }
    }

    pub fn embedding_dimensions(&self) -> u32 {
        match self {
            Self::OpenAi {
                embedding_dimensions,
                ..
            }
            | Self::Ollama {
                embedding_dimensions,
                ..
            }
            | Self::Gemini {
                embedding_dimensions,
                ..
            } => *embedding_dimensions,
        }
    }

    /// Resolve the API key, preferring the inline value over a credential
    /// file. Ollama endpoints are unauthenticated and get a placeholder.
    pub fn resolve_api_key(&self) -> Result<String, AppError> {
        let (api_key, api_key_file) = match self {
            Self::OpenAi {
                api_key,
                api_key_file,
                ..
            }
            | Self::Gemini {
                api_key,
                api_key_file,
                ..
            } => (api_key.as_deref(), api_key_file.as_deref()),
            Self::Ollama { .. } => return Ok("ollama".to_string()),
        };

        if let Some(key) = api_key {
            return Ok(key.to_string());
        }

        if let Some(path) = api_key_file {
            let key = std::fs::read_to_string(path)?;
            return Ok(key.trim().to_string());
        }

        Err(AppError::Validation(
            "provider requires api_key or api_key_file".to_string(),
        ))
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub nats_url: String,
    #[serde(default)]
    pub nats_creds_file: Option<String>,
    pub database_url: String,
    pub redis_url: String,
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_message_timeout_secs")]
    pub message_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_role")]
    pub role: WorkerRole,
    pub provider: ProviderConfig,
    #[serde(default = "default_keyword_prompt")]
    pub keyword_prompt: String,
    #[serde(default = "default_title_prompt")]
    pub title_prompt: String,
}

pub const DEFAULT_KEYWORD_SYSTEM_PROMPT: &str = "You analyze news articles. Extract the article's \
keywords grouped as themes, events, entities and actions, and the relations between named \
entities. Use the language of the article. Respond only with JSON matching the provided schema; \
keep every keyword short and specific.";

pub const DEFAULT_TITLE_SYSTEM_PROMPT: &str = "You write headlines. Given the body of a news \
article, respond with a single concise headline in the language of the article, without quotes \
or trailing punctuation.";

fn default_health_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_db_max_connections() -> u32 {
    5
}

fn default_message_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    64
}

fn default_role() -> WorkerRole {
    WorkerRole::All
}

fn default_keyword_prompt() -> String {
    DEFAULT_KEYWORD_SYSTEM_PROMPT.to_string()
}

fn default_title_prompt() -> String {
    DEFAULT_TITLE_SYSTEM_PROMPT.to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    config.try_deserialize()
}
