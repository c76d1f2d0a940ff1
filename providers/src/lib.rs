#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod embedder;
pub mod fetcher;
pub mod generator;
pub mod openai;
pub mod text;

pub use embedder::Embedder;
pub use fetcher::{ArticleRecord, Fetcher, HttpFetcher};
pub use generator::{EntityRelation, Generator, KeywordAnalysis, KeywordSet};
pub use openai::OpenAiProvider;
