//! Deterministic in-process provider for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::provider::ModelProvider;
use crate::core::errors::ApiError;

/// Embeds texts onto fixed keyword axes so similarity is predictable, and
/// streams a canned sequence of completion tokens with a small delay per
/// token so cancellation races are observable.
pub struct MockProvider {
    axes: Vec<&'static str>,
    /// exact-text overrides, checked before keyword embedding
    overrides: Mutex<HashMap<String, Vec<f32>>>,
    completion_tokens: Vec<String>,
    token_delay: Duration,
}

impl MockProvider {
    pub fn new(axes: Vec<&'static str>) -> Self {
        Self {
            axes,
            overrides: Mutex::new(HashMap::new()),
            completion_tokens: vec!["mock ".to_string(), "answer".to_string()],
            token_delay: Duration::from_millis(0),
        }
    }

    pub fn with_completion(mut self, tokens: Vec<&str>, delay: Duration) -> Self {
        self.completion_tokens = tokens.into_iter().map(String::from).collect();
        self.token_delay = delay;
        self
    }

    pub fn set_embedding(&self, text: &str, vector: Vec<f32>) {
        self.overrides
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    fn keyword_embedding(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .axes
            .iter()
            .map(|axis| lower.matches(axis).count() as f32)
            .collect();
        // Extra axis keeps unrelated texts from embedding to the zero vector.
        v.push(1.0);
        v
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        if let Some(v) = self.overrides.lock().unwrap().get(text) {
            return Ok(v.clone());
        }
        Ok(self.keyword_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ApiError> {
        Ok(self.completion_tokens.concat())
    }

    async fn stream_complete(
        &self,
        _prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let (tx, rx) = mpsc::channel(32);
        let tokens = self.completion_tokens.clone();
        let delay = self.token_delay;

        tokio::spawn(async move {
            for token in tokens {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(token)).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
