use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::db::{is_unique_violation, PostgresClient},
};

/// A window over the article content in rune (Unicode scalar) indices.
/// `[start, end)` is the padded span; `[start + offset_left,
/// start + offset_right)` is the unique interior. Concatenating the
/// interiors of consecutive windows reconstructs the content exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkWindow {
    pub start: i32,
    pub offset_left: i32,
    pub offset_right: i32,
    pub end: i32,
}

impl ChunkWindow {
    /// Rune span of the unique interior in content coordinates.
    pub fn interior(&self) -> (i32, i32) {
        (
            self.start.saturating_add(self.offset_left),
            self.start.saturating_add(self.offset_right),
        )
    }
}

/// A persisted chunk window with its assigned id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredChunk {
    pub chunk_id: i32,
    pub window: ChunkWindow,
}

pub struct Chunk;

impl Chunk {
    /// Insert every window for an article, returning each with its
    /// assigned id. Individual failures are collected and reported as one
    /// batch error carrying per-index detail.
    pub async fn batch_insert(
        db: &PostgresClient,
        article_id: i32,
        windows: &[ChunkWindow],
    ) -> Result<Vec<StoredChunk>, AppError> {
        let mut stored = Vec::with_capacity(windows.len());
        let mut failures: Vec<String> = Vec::new();

        for (index, window) in windows.iter().enumerate() {
            match Self::insert_one(db, article_id, window).await {
                Ok(chunk_id) => stored.push(StoredChunk {
                    chunk_id,
                    window: *window,
                }),
                Err(e) => failures.push(format!("index {index}: {e}")),
            }
        }

        if !failures.is_empty() {
            return Err(AppError::BatchInsert(format!(
                "{} of {} chunk inserts failed for article {article_id}: [{}]",
                failures.len(),
                windows.len(),
                failures.join("; ")
            )));
        }

        Ok(stored)
    }

    /// Redelivered messages re-insert identical windows; the span unique
    /// key turns that into a lookup of the existing row.
    async fn insert_one(
        db: &PostgresClient,
        article_id: i32,
        window: &ChunkWindow,
    ) -> Result<i32, AppError> {
        let inserted: Result<(i32,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO chunks (article_id, start_rune, offset_left, offset_right, end_rune)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING chunk_id
            "#,
        )
        .bind(article_id)
        .bind(window.start)
        .bind(window.offset_left)
        .bind(window.offset_right)
        .bind(window.end)
        .fetch_one(&db.pool)
        .await;

        match inserted {
            Ok((chunk_id,)) => Ok(chunk_id),
            Err(e) if is_unique_violation(&e) => {
                let (chunk_id,): (i32,) = sqlx::query_as(
                    r#"
                    SELECT chunk_id FROM chunks
                    WHERE article_id = $1 AND start_rune = $2 AND end_rune = $3
                    "#,
                )
                .bind(article_id)
                .bind(window.start)
                .bind(window.end)
                .fetch_one(&db.pool)
                .await?;
                Ok(chunk_id)
            }
            Err(e) => Err(e.into()),
        }
    }
}
