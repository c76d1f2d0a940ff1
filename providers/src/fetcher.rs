use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dom_smoothie::{Readability, TextMode};
use tracing::info;

use common::{error::AppError, utils::url_guard};

use crate::text::split_paragraphs;

/// A parsed article as handed over by a publisher-specific parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub title: String,
    pub publisher: String,
    pub paragraphs: Vec<String>,
    pub published_at: DateTime<Utc>,
    pub keywords: Option<Vec<String>>,
    pub description: Option<String>,
}

/// Capability that turns a submitted URL into an [`ArticleRecord`].
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &url::Url) -> Result<ArticleRecord, AppError>;
}

/// Reference fetcher: plain HTTP GET with gzip decoding, readability
/// extraction, and the submission URL guard applied before any request
/// leaves the process.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(request_timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("news-pipeline/0.1")
            .build()?;

        Ok(Self { client })
    }

    fn parse_html(raw_html: String, publisher: String) -> Result<ArticleRecord, AppError> {
        let config = dom_smoothie::Config {
            text_mode: TextMode::Markdown,
            ..Default::default()
        };
        let mut readability = Readability::new(raw_html, None, Some(config))
            .map_err(|e| AppError::NoContent(format!("readability rejected document: {e}")))?;
        let article = readability
            .parse()
            .map_err(|e| AppError::NoContent(format!("readability parse failed: {e}")))?;

        let paragraphs = split_paragraphs(&article.text_content);

        Ok(ArticleRecord {
            title: article.title,
            publisher,
            paragraphs,
            published_at: Utc::now(),
            keywords: None,
            description: None,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &url::Url) -> Result<ArticleRecord, AppError> {
        let publisher = url_guard::ensure_submission_url_allowed(url)?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::RemoteStatus(status.as_u16()));
        }

        let raw_html = response.text().await?;
        let record = Self::parse_html(raw_html, publisher)?;

        info!(
            %url,
            title = %record.title,
            paragraphs = record.paragraphs.len(),
            "article fetched"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_html_extracts_title_and_paragraphs() {
        let html = r#"<html><head><title>Budget approved</title></head>
            <body><article>
            <h1>Budget approved</h1>
            <p>The council approved the budget on Tuesday after a long debate about road repairs
            and school funding across the district. Members spent most of the evening session on
            amendments covering winter maintenance, library opening hours and the replacement of
            two aging bridges on the eastern bypass, before the final vote passed narrowly.</p>
            <p>Opponents said the plan relies on optimistic revenue projections and warned that
            reserves would shrink further next year. The finance committee acknowledged the risk
            but argued that delaying the infrastructure work would cost considerably more once
            emergency repairs became unavoidable, citing last winter's culvert collapse.</p>
            </article></body></html>"#;

        let record =
            HttpFetcher::parse_html(html.to_string(), "news.example.com".to_string())
                .expect("parse");

        assert_eq!(record.publisher, "news.example.com");
        assert!(record.title.contains("Budget approved"));
        assert!(!record.paragraphs.is_empty());
        assert!(record
            .paragraphs
            .iter()
            .any(|p| p.contains("approved the budget")));
    }
}
