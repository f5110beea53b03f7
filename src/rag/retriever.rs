//! Retrieval and re-ranking.
//!
//! Turns a query string into a small, document-diverse set of passages:
//! embed the query, over-fetch raw chunk candidates from the vector index,
//! drop noise past the distance cutoff, group by owning document, re-rank
//! with a multi-hit bonus, then hydrate the winners back into full passages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::config::RagConfig;
use crate::core::errors::ApiError;
use crate::llm::ModelProvider;
use crate::rag::index::{VectorHit, VectorIndex};
use crate::rag::store::DocumentStore;

/// A ranked passage ready for prompt assembly or display.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub chunk_id: u32,
    pub doc_id: String,
    pub distance: f32,
    pub content: String,
    pub title: String,
    pub url: Option<String>,
    pub timestamp: i64,
}

/// Per-document aggregation state during re-ranking.
struct DocGroup {
    best: VectorHit,
    hits: usize,
    first_seen: usize,
}

pub struct Retriever {
    store: Arc<DocumentStore>,
    index: Arc<RwLock<VectorIndex>>,
    provider: Arc<dyn ModelProvider>,
    config: RagConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<RwLock<VectorIndex>>,
        provider: Arc<dyn ModelProvider>,
        config: RagConfig,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            config,
        }
    }

    /// Run the full retrieval pipeline. An empty result means "no relevant
    /// documents", not an error.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedPassage>, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let query_embedding = tokio::time::timeout(timeout, self.provider.embed(query))
            .await
            .map_err(|_| ApiError::ServiceUnavailable("embedding call timed out".to_string()))??;

        let candidates = {
            let index = self.index.read().await;
            index.search(&query_embedding, self.config.overfetch_k)?
        };

        let surviving: Vec<VectorHit> = candidates
            .into_iter()
            .filter(|hit| hit.distance <= self.config.distance_cutoff)
            .collect();

        if surviving.is_empty() {
            return Ok(Vec::new());
        }

        let vector_ids: Vec<u32> = surviving.iter().map(|h| h.vector_id).collect();
        let mappings = self.store.get_vector_mappings_by_ids(&vector_ids).await?;

        // Group by document. Candidates arrive ascending by distance, so the
        // first hit seen for a document is its best chunk. Unmapped vector
        // ids land in a synthetic unknown bucket: they participate in
        // grouping (nothing is silently dropped) but cannot be hydrated.
        const UNKNOWN_BUCKET: &str = "";
        let mut groups: HashMap<String, DocGroup> = HashMap::new();
        for (order, hit) in surviving.iter().enumerate() {
            let doc_id = match mappings.get(&hit.vector_id) {
                Some(mapping) => mapping.doc_id.clone(),
                None => {
                    tracing::warn!("vector {} has no chunk mapping", hit.vector_id);
                    UNKNOWN_BUCKET.to_string()
                }
            };
            groups
                .entry(doc_id)
                .and_modify(|g| g.hits += 1)
                .or_insert(DocGroup {
                    best: *hit,
                    hits: 1,
                    first_seen: order,
                });
        }

        // Aggregate score: best chunk distance minus a log bonus for
        // corroborating hits. Lower is better; ties keep vector-search order.
        let mut ranked: Vec<(String, DocGroup)> = groups.into_iter().collect();
        ranked.sort_by(|a, b| {
            let score_a = aggregate_score(&a.1);
            let score_b = aggregate_score(&b.1);
            score_a
                .partial_cmp(&score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });
        ranked.truncate(self.config.top_documents);

        let doc_ids: Vec<String> = ranked
            .iter()
            .filter(|(doc_id, _)| doc_id != UNKNOWN_BUCKET)
            .map(|(doc_id, _)| doc_id.clone())
            .collect();
        let documents = self.store.get_documents_by_ids(&doc_ids).await?;

        let mut passages = Vec::with_capacity(ranked.len());
        for (doc_id, group) in &ranked {
            if doc_id == UNKNOWN_BUCKET {
                continue;
            }
            let Some(doc) = documents.get(doc_id) else {
                // mapping without a document row; recoverable inconsistency
                tracing::warn!("mapping references missing document {}", doc_id);
                continue;
            };

            let content = match mappings.get(&group.best.vector_id) {
                Some(mapping) => doc
                    .content
                    .get(mapping.start_offset..mapping.end_offset)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            "stale chunk offsets for vector {}; using full content",
                            group.best.vector_id
                        );
                        doc.content.clone()
                    }),
                None => doc.content.clone(),
            };

            passages.push(RetrievedPassage {
                chunk_id: group.best.vector_id,
                doc_id: doc.id.clone(),
                distance: group.best.distance,
                content,
                title: doc.title.clone(),
                url: doc.url.clone(),
                timestamp: doc.created_at,
            });
        }

        tracing::debug!(
            "retrieval: {} candidates -> {} passages",
            vector_ids.len(),
            passages.len()
        );
        Ok(passages)
    }
}

fn aggregate_score(group: &DocGroup) -> f32 {
    group.best.distance - 0.1 * (1.0 + group.hits as f32).ln()
}
