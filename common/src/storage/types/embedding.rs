use crate::{
    error::AppError,
    storage::db::{is_unique_violation, PostgresClient},
};

pub struct Embedding;

impl Embedding {
    /// Persist one vector. The dimension is fixed per model and checked
    /// before touching the database; a `(chunk_id, model_id)` duplicate
    /// surfaces as `IntegrityConstraint` for the caller's idempotent path.
    pub async fn insert(
        db: &PostgresClient,
        article_id: i32,
        chunk_id: i32,
        model_id: i32,
        vector: &[f32],
        expected_dim: usize,
    ) -> Result<i32, AppError> {
        if vector.len() != expected_dim {
            return Err(AppError::Validation(format!(
                "embedding vector has {} dimensions, model expects {expected_dim}",
                vector.len()
            )));
        }

        let inserted: Result<(i32,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO embeddings (article_id, chunk_id, model_id, vector)
            VALUES ($1, $2, $3, $4)
            RETURNING embedding_id
            "#,
        )
        .bind(article_id)
        .bind(chunk_id)
        .bind(model_id)
        .bind(vector)
        .fetch_one(&db.pool)
        .await;

        match inserted {
            Ok((embedding_id,)) => Ok(embedding_id),
            Err(e) if is_unique_violation(&e) => Err(AppError::IntegrityConstraint(format!(
                "embedding for chunk {chunk_id} and model {model_id} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_id(
        db: &PostgresClient,
        chunk_id: i32,
        model_id: i32,
    ) -> Result<Option<i32>, AppError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT embedding_id FROM embeddings WHERE chunk_id = $1 AND model_id = $2",
        )
        .bind(chunk_id)
        .bind(model_id)
        .fetch_optional(&db.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }
}
