//! Embedding providers: text in, fixed-length vectors out.

pub mod ollama;

use crate::error::EmbedError;

pub use ollama::OllamaEmbedder;

pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts in one call. The result has one vector per input, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or answers with an unusable payload.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send;

    /// Embed a single text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send {
        let texts = vec![text.to_owned()];
        async move {
            let mut vectors = self.embed_batch(&texts).await?;
            vectors
                .pop()
                .ok_or(EmbedError::CountMismatch { expected: 1, got: 0 })
        }
    }

    fn name(&self) -> &str;
}
