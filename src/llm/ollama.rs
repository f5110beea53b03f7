use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::ModelProvider;
use crate::core::config::ModelConfig;
use crate::core::errors::ApiError;

/// Ollama-backed provider. Embeddings go through `/api/embed` (batch,
/// order-preserving); completions through `/api/generate`, streamed as
/// newline-delimited JSON.
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    embedding_model: String,
    completion_model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &ModelConfig, timeout_secs: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            completion_model: config.completion_model.clone(),
            client,
        })
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::unavailable("embedding service returned no vector"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ServiceUnavailable(format!(
                "embedding request failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::unavailable)?;

        let mut embeddings = Vec::with_capacity(texts.len());
        if let Some(data) = payload["embeddings"].as_array() {
            for item in data {
                if let Some(vals) = item.as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != texts.len() {
            return Err(ApiError::ServiceUnavailable(format!(
                "embedding service returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    async fn complete(&self, prompt: &str) -> Result<String, ApiError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.completion_model,
            "prompt": prompt,
            "stream": false,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ServiceUnavailable(format!(
                "completion request failed ({status}): {text}"
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::unavailable)?;
        Ok(payload["response"].as_str().unwrap_or_default().to_string())
    }

    async fn stream_complete(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.completion_model,
            "prompt": prompt,
            "stream": true,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::unavailable)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::ServiceUnavailable(format!(
                "completion stream failed ({status}): {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            // Ollama sends one JSON object per line; a chunk may carry
            // several lines.
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        let chunk_str = String::from_utf8_lossy(&bytes);
                        for line in chunk_str.lines() {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let Ok(json) = serde_json::from_str::<Value>(line) else {
                                continue;
                            };
                            if let Some(fragment) = json["response"].as_str() {
                                if !fragment.is_empty()
                                    && tx.send(Ok(fragment.to_string())).await.is_err()
                                {
                                    return;
                                }
                            }
                            if json["done"].as_bool().unwrap_or(false) {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::unavailable(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
