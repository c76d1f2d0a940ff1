#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod embedding;
pub mod keyword;
pub mod scrape;
pub mod status;
pub mod title;

use std::time::Instant;

pub use embedding::EmbeddingWorker;
pub use keyword::KeywordWorker;
pub use scrape::ScrapeWorker;
pub use status::StatusWorker;
pub use title::TitleWorker;

/// Milliseconds since `started`, saturating for the event payloads.
pub(crate) fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
