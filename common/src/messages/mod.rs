pub mod payloads;
pub mod subjects;

pub use payloads::{
    decode, peek_base, ArticleScrapedEvent, BaseMessage, CreateEmbeddingCommand, EmbedType,
    EmbeddingCreatedEvent, ExtractKeywordCommand, GenerateTitleCommand, KeywordsExtractedEvent,
    LogLevel, Payload, ScrapeCommand, TaskCreatedEvent, TaskFailedEvent, TaskLogCommand,
    UpdateStatusCommand, PROTOCOL_VERSION,
};
