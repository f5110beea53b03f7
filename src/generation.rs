//! Generation lifecycle management.
//!
//! At most one answer generation is in flight at any time: starting a new one
//! cancels and discards every previously registered request. Tokens are
//! forwarded over a channel that always terminates with exactly one terminal
//! event, so cancellation is a first-class stream outcome rather than a flag
//! checked between callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::errors::ApiError;
use crate::llm::ModelProvider;
use crate::rag::RetrievedPassage;

/// One event on a generation stream. `Token` repeats; the other three are
/// terminal and each stream carries exactly one of them, last.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum GenerationEvent {
    Token(String),
    Completed,
    Cancelled,
    Errored(String),
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationEvent::Token(_))
    }
}

/// Owned registry of in-flight generations: request id -> cancellation
/// handle. Shared by value (`Clone`), never ambient.
#[derive(Clone)]
pub struct GenerationManager {
    provider: Arc<dyn ModelProvider>,
    active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl GenerationManager {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start generating an answer for an already-assembled prompt. Cancels
    /// every previously registered request first, then streams events until
    /// a terminal one.
    pub async fn start(
        &self,
        prompt: String,
    ) -> Result<(String, mpsc::Receiver<GenerationEvent>), ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();

        {
            let mut active = self.active.lock().await;
            for (old_id, old_token) in active.drain() {
                tracing::debug!("cancelling superseded generation {}", old_id);
                old_token.cancel();
            }
            active.insert(request_id.clone(), token.clone());
        }

        let mut stream = match self.provider.stream_complete(&prompt).await {
            Ok(stream) => stream,
            Err(err) => {
                self.active.lock().await.remove(&request_id);
                return Err(err);
            }
        };

        let (tx, rx) = mpsc::channel(64);
        let registry = self.active.clone();
        let task_id = request_id.clone();

        tokio::spawn(async move {
            let terminal = loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break GenerationEvent::Cancelled,
                    item = stream.recv() => match item {
                        Some(Ok(fragment)) => {
                            if tx.send(GenerationEvent::Token(fragment)).await.is_err() {
                                // consumer went away; treat like cancellation
                                break GenerationEvent::Cancelled;
                            }
                        }
                        Some(Err(err)) => break GenerationEvent::Errored(err.to_string()),
                        None => break GenerationEvent::Completed,
                    },
                }
            };

            // a newer request has its own id, so this only ever removes us;
            // deregister first so the terminal event means "fully settled"
            registry.lock().await.remove(&task_id);
            let _ = tx.send(terminal).await;
        });

        Ok((request_id, rx))
    }

    /// Cancel whatever is currently registered. No-op when idle.
    pub async fn cancel(&self) {
        let active = self.active.lock().await;
        for (id, token) in active.iter() {
            tracing::debug!("cancelling generation {}", id);
            token.cancel();
        }
    }

    /// Whether any generation is currently registered.
    pub async fn is_active(&self) -> bool {
        !self.active.lock().await.is_empty()
    }
}

/// Format retrieved passages into the context block of a prompt.
pub fn format_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|p| format!("Source: {}\n{}", p.title, p.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Assemble the completion prompt from a query and an assembled context block.
pub fn build_prompt_from_context(query: &str, context: &str) -> String {
    format!(
        "Context information:\n{}\n\nQuestion: {}\n\nBased on the context above, provide a helpful answer:",
        context, query
    )
}

/// Assemble the completion prompt from a query and its retrieved passages.
pub fn build_prompt(query: &str, passages: &[RetrievedPassage]) -> String {
    build_prompt_from_context(query, &format_context(passages))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::testing::MockProvider;

    async fn collect(mut rx: mpsc::Receiver<GenerationEvent>) -> Vec<GenerationEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    fn slow_provider() -> Arc<MockProvider> {
        let tokens: Vec<&str> = std::iter::repeat("tok ").take(50).collect();
        Arc::new(MockProvider::new(vec![]).with_completion(tokens, Duration::from_millis(20)))
    }

    #[tokio::test]
    async fn completed_stream_carries_all_tokens() {
        let provider = Arc::new(
            MockProvider::new(vec![]).with_completion(vec!["Hello", " ", "world"], Duration::ZERO),
        );
        let manager = GenerationManager::new(provider);

        let (_, rx) = manager.start("prompt".to_string()).await.unwrap();
        let events = collect(rx).await;

        assert_eq!(events.last(), Some(&GenerationEvent::Completed));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello world");
        assert!(!manager.is_active().await);
    }

    #[tokio::test]
    async fn second_start_cancels_the_first() {
        let manager = GenerationManager::new(slow_provider());

        let (first_id, first_rx) = manager.start("first".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (second_id, second_rx) = manager.start("second".to_string()).await.unwrap();
        assert_ne!(first_id, second_id);

        let first_events = collect(first_rx).await;
        assert_eq!(first_events.last(), Some(&GenerationEvent::Cancelled));

        let second_events = collect(second_rx).await;
        assert_eq!(second_events.last(), Some(&GenerationEvent::Completed));
        assert!(second_events
            .iter()
            .any(|e| matches!(e, GenerationEvent::Token(_))));
    }

    #[tokio::test]
    async fn explicit_cancel_terminates_the_stream() {
        let manager = GenerationManager::new(slow_provider());

        let (_, rx) = manager.start("prompt".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.cancel().await;

        let events = collect(rx).await;
        assert_eq!(events.last(), Some(&GenerationEvent::Cancelled));
    }

    #[tokio::test]
    async fn cancel_when_idle_is_a_no_op() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let manager = GenerationManager::new(provider);
        manager.cancel().await;
        assert!(!manager.is_active().await);
    }

    #[test]
    fn prompt_includes_sources_and_question() {
        let passages = vec![RetrievedPassage {
            chunk_id: 0,
            doc_id: "d1".to_string(),
            distance: 0.1,
            content: "Cats purr.".to_string(),
            title: "Cats".to_string(),
            url: None,
            timestamp: 0,
        }];

        let prompt = build_prompt("what are cats", &passages);
        assert!(prompt.contains("Source: Cats"));
        assert!(prompt.contains("Cats purr."));
        assert!(prompt.contains("Question: what are cats"));
    }
}
