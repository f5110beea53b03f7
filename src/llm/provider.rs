use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;

/// Black-box embedding/completion service consumed by the pipeline.
///
/// Every call is fallible and must respect the configured request timeout;
/// `embed_batch` is order-preserving (result `i` belongs to input `i`).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// provider name (e.g. "ollama")
    fn name(&self) -> &str;

    /// check if the provider is healthy/reachable
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// embed a single text (used for queries)
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError>;

    /// embed a batch of texts, one vector per input, same order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// completion (non-streaming)
    async fn complete(&self, prompt: &str) -> Result<String, ApiError>;

    /// completion (streaming); the receiver yields token fragments and closes
    /// when the provider is done
    async fn stream_complete(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;
}
