use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::db::{is_unique_violation, PostgresClient},
};

/// An embedding model the store has seen vectors for. Unique by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    pub model_id: i32,
    pub name: String,
}

impl Model {
    /// Upsert by name: try the insert, and on a concurrent duplicate fall
    /// back to looking the row up.
    pub async fn get_or_insert(db: &PostgresClient, name: &str) -> Result<i32, AppError> {
        let inserted: Result<(i32,), sqlx::Error> =
            sqlx::query_as("INSERT INTO models (name) VALUES ($1) RETURNING model_id")
                .bind(name)
                .fetch_one(&db.pool)
                .await;

        match inserted {
            Ok((model_id,)) => Ok(model_id),
            Err(e) if is_unique_violation(&e) => {
                let (model_id,): (i32,) =
                    sqlx::query_as("SELECT model_id FROM models WHERE name = $1")
                        .bind(name)
                        .fetch_one(&db.pool)
                        .await?;
                Ok(model_id)
            }
            Err(e) => Err(e.into()),
        }
    }
}
