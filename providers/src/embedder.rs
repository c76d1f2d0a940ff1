use async_trait::async_trait;

use common::{error::AppError, messages::EmbedType};

/// Capability producing dense vectors for text. The dimension is fixed
/// per model and validated again at insert time.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Name the vectors are keyed under in the model catalog.
    fn model_name(&self) -> String;

    fn dimensions(&self) -> usize;

    /// Embed a batch of inputs, one vector per input, in order.
    /// `embed_type` selects the provider-side instruction for
    /// asymmetric retrieval.
    async fn embed(
        &self,
        inputs: &[String],
        embed_type: EmbedType,
    ) -> Result<Vec<Vec<f32>>, AppError>;
}
