use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use common::{
    error::AppError,
    messages::EmbedType,
    utils::config::ProviderConfig,
};

use crate::{embedder::Embedder, generator::Generator, KeywordAnalysis};

/// Reference `Generator` / `Embedder` over any OpenAI-compatible
/// endpoint. The provider variants differ only in base URL and
/// credential handling, which [`ProviderConfig`] resolves.
pub struct OpenAiProvider {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: u32,
    keyword_prompt: String,
    title_prompt: String,
}

impl OpenAiProvider {
    pub fn from_config(
        provider: &ProviderConfig,
        keyword_prompt: impl Into<String>,
        title_prompt: impl Into<String>,
    ) -> Result<Self, AppError> {
        let api_key = provider.resolve_api_key()?;
        let client = async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(provider.base_url()),
        );

        Ok(Self {
            client,
            chat_model: provider.chat_model().to_string(),
            embedding_model: provider.embedding_model().to_string(),
            embedding_dimensions: provider.embedding_dimensions(),
            keyword_prompt: keyword_prompt.into(),
            title_prompt: title_prompt.into(),
        })
    }

    fn keyword_request(&self, content: &str) -> Result<CreateChatCompletionRequest, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Grouped keywords and entity relations of a news article".into()),
                name: "keyword_analysis".into(),
                schema: Some(keyword_analysis_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(self.keyword_prompt.as_str()).into(),
                ChatCompletionRequestUserMessage::from(content).into(),
            ])
            .response_format(response_format)
            .build()?;

        Ok(request)
    }
}

/// Strict response schema for keyword extraction.
pub fn keyword_analysis_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "keywords": {
                "type": "object",
                "properties": {
                    "themes": { "type": "array", "items": { "type": "string" } },
                    "events": { "type": "array", "items": { "type": "string" } },
                    "entities": { "type": "array", "items": { "type": "string" } },
                    "actions": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["themes", "events", "entities", "actions"],
                "additionalProperties": false
            },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "entity1": { "type": "string" },
                        "entity2": { "type": "string" },
                        "relation": { "type": "string" }
                    },
                    "required": ["entity1", "entity2", "relation"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["keywords", "relations"],
        "additionalProperties": false
    })
}

/// Parse the model's reply into the typed analysis. A mismatch after a
/// successful call is a provider-contract violation and must not be
/// retried.
pub fn parse_keyword_response(content: &str) -> Result<KeywordAnalysis, AppError> {
    serde_json::from_str::<KeywordAnalysis>(content).map_err(|e| {
        AppError::LLMParsing(format!("keyword response violates the schema: {e}"))
    })
}

/// Instruction prefix for asymmetric retrieval models.
fn instruction_prefix(embed_type: EmbedType) -> &'static str {
    match embed_type {
        EmbedType::Query => "query: ",
        EmbedType::Passage => "passage: ",
    }
}

#[async_trait]
impl Generator for OpenAiProvider {
    async fn extract_keywords(&self, content: &str) -> Result<KeywordAnalysis, AppError> {
        let request = self.keyword_request(content)?;
        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "no content in keyword extraction response".into(),
            ))?;

        let analysis = parse_keyword_response(content)?;
        debug!(
            keywords = analysis.keyword_count(),
            relations = analysis.relations.len(),
            "keyword analysis parsed"
        );
        Ok(analysis)
    }

    async fn generate_title(&self, content: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(self.title_prompt.as_str()).into(),
                ChatCompletionRequestUserMessage::from(content).into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let title = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .unwrap_or_default();

        if title.is_empty() {
            return Err(AppError::LLMParsing(
                "no content in title generation response".into(),
            ));
        }

        Ok(title.to_string())
    }
}

#[async_trait]
impl Embedder for OpenAiProvider {
    fn model_name(&self) -> String {
        self.embedding_model.clone()
    }

    fn dimensions(&self) -> usize {
        self.embedding_dimensions as usize
    }

    async fn embed(
        &self,
        inputs: &[String],
        embed_type: EmbedType,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let prefix = instruction_prefix(embed_type);
        let prefixed: Vec<String> = inputs
            .iter()
            .map(|input| format!("{prefix}{input}"))
            .collect();

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .dimensions(self.embedding_dimensions)
            .input(prefixed)
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        if response.data.len() != inputs.len() {
            return Err(AppError::LLMParsing(format!(
                "embedding response has {} vectors for {} inputs",
                response.data.len(),
                inputs.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
