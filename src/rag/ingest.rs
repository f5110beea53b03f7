//! Ingestion and deletion pipelines.
//!
//! Ingestion drives chunking -> embedding -> store transaction -> index
//! append -> snapshot save as one logical unit. Writers are serialized by the
//! index write lock, which also keeps snapshot saves from interleaving with
//! other mutations; searches only ever take the read side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::core::config::RagConfig;
use crate::core::errors::ApiError;
use crate::llm::ModelProvider;
use crate::rag::chunker::Chunker;
use crate::rag::index::VectorIndex;
use crate::rag::store::{Document, DocumentStore, VectorMapping};

/// Caller-supplied input for one document.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct Pipeline {
    store: Arc<DocumentStore>,
    index: Arc<RwLock<VectorIndex>>,
    provider: Arc<dyn ModelProvider>,
    chunker: Chunker,
    config: RagConfig,
    index_path: PathBuf,
}

impl Pipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        index: Arc<RwLock<VectorIndex>>,
        provider: Arc<dyn ModelProvider>,
        config: RagConfig,
        index_path: PathBuf,
    ) -> Self {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);
        Self {
            store,
            index,
            provider,
            chunker,
            config,
            index_path,
        }
    }

    /// Ingest a batch of documents atomically: every document row and mapping
    /// row commits in one store transaction, the index append sits adjacent,
    /// and the snapshot is saved right after the commit. A failed embedding
    /// call aborts the whole batch before anything is written.
    pub async fn add_documents(&self, inputs: Vec<NewDocument>) -> Result<Vec<Document>, ApiError> {
        for input in &inputs {
            if input.title.trim().is_empty() {
                return Err(ApiError::BadRequest("document title is required".to_string()));
            }
            if input.content.is_empty() {
                return Err(ApiError::BadRequest(
                    "document content is required".to_string(),
                ));
            }
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        // Exclusive writer for the whole operation; the id counter below is
        // only valid while no other writer can advance the index.
        let mut index = self.index.write().await;

        let mut next_id = index.next_id();
        let mut batch: Vec<(Document, Vec<VectorMapping>)> = Vec::with_capacity(inputs.len());
        let mut embeddings: Vec<Vec<f32>> = Vec::new();
        let mut expected_dim = index.dimension();

        for input in inputs {
            let doc = Document {
                id: uuid::Uuid::new_v4().to_string(),
                title: input.title,
                content: input.content,
                url: input.url,
                created_at: chrono::Utc::now().timestamp(),
            };

            let chunks = self.chunker.split(&doc.content);
            if chunks.is_empty() {
                // still stored so it is browsable and deletable
                tracing::info!("document '{}' produced no chunks", doc.title);
                batch.push((doc, Vec::new()));
                continue;
            }

            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let timeout = Duration::from_secs(self.config.request_timeout_secs);
            let vectors = tokio::time::timeout(timeout, self.provider.embed_batch(&texts))
                .await
                .map_err(|_| {
                    ApiError::ServiceUnavailable("embedding call timed out".to_string())
                })??;

            if vectors.len() != chunks.len() {
                return Err(ApiError::ServiceUnavailable(format!(
                    "embedding service returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                )));
            }

            // Validate dimensions before any write so the store transaction
            // can never commit mappings the index would then reject.
            for vector in &vectors {
                match expected_dim {
                    Some(dim) if vector.len() != dim => {
                        return Err(ApiError::BadRequest(format!(
                            "embedding dimension mismatch: expected {}, got {}",
                            dim,
                            vector.len()
                        )));
                    }
                    None if vector.is_empty() => {
                        return Err(ApiError::BadRequest(
                            "empty embedding vector".to_string(),
                        ));
                    }
                    None => expected_dim = Some(vector.len()),
                    _ => {}
                }
            }

            let mappings: Vec<VectorMapping> = chunks
                .iter()
                .map(|chunk| {
                    let mapping = VectorMapping {
                        vector_id: next_id,
                        doc_id: doc.id.clone(),
                        chunk_index: chunk.index,
                        start_offset: chunk.start,
                        end_offset: chunk.end,
                    };
                    next_id += 1;
                    mapping
                })
                .collect();

            embeddings.extend(vectors);
            batch.push((doc, mappings));
        }

        self.store.insert_documents(&batch).await?;
        index.add(embeddings)?;
        index.save(&self.index_path)?;

        let docs: Vec<Document> = batch.into_iter().map(|(doc, _)| doc).collect();
        tracing::info!(
            "ingested {} document(s), index now holds {} vectors",
            docs.len(),
            index.ntotal()
        );
        Ok(docs)
    }

    /// Delete a document, cascading to its mappings and vectors. Returns
    /// false (and touches nothing) when the id is unknown.
    pub async fn delete_document(&self, id: &str) -> Result<bool, ApiError> {
        let mut index = self.index.write().await;

        let (existed, freed) = self.store.delete_document(id).await?;
        if !existed {
            return Ok(false);
        }

        if !freed.is_empty() {
            index.delete(&freed);
            index.save(&self.index_path)?;
        }

        tracing::info!("deleted document {} ({} vectors)", id, freed.len());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockProvider;
    use crate::rag::retriever::Retriever;

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: Pipeline,
        retriever: Retriever,
        store: Arc<DocumentStore>,
        index: Arc<RwLock<VectorIndex>>,
        index_path: PathBuf,
    }

    async fn fixture(axes: Vec<&'static str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("vectors.idx");
        let store = Arc::new(
            DocumentStore::new(dir.path().join("recall.db"))
                .await
                .unwrap(),
        );
        let index = Arc::new(RwLock::new(VectorIndex::new()));
        let provider: Arc<MockProvider> = Arc::new(MockProvider::new(axes));
        let config = RagConfig::default();

        let pipeline = Pipeline::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            config.clone(),
            index_path.clone(),
        );
        let retriever = Retriever::new(store.clone(), index.clone(), provider, config);

        Fixture {
            _dir: dir,
            pipeline,
            retriever,
            store,
            index,
            index_path,
        }
    }

    fn new_doc(title: &str, content: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            content: content.to_string(),
            url: None,
        }
    }

    #[tokio::test]
    async fn missing_title_or_content_is_rejected() {
        let fx = fixture(vec![]).await;

        let err = fx
            .pipeline
            .add_documents(vec![new_doc("", "content")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = fx
            .pipeline
            .add_documents(vec![new_doc("title", "")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        assert_eq!(fx.store.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cats_scenario_round_trip() {
        let fx = fixture(vec!["cats", "mammals", "purr"]).await;

        fx.pipeline
            .add_documents(vec![new_doc("Cats", "Cats are mammals. They purr.")])
            .await
            .unwrap();
        assert_eq!(fx.index.read().await.ntotal(), 1);

        let passages = fx.retriever.search("what are cats").await.unwrap();
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].title, "Cats");
        assert!(passages[0].distance.is_finite());
        assert!(!passages[0].content.is_empty());
        assert!(passages[0].content.contains("mammals"));
    }

    #[tokio::test]
    async fn batch_assigns_non_colliding_vector_ids() {
        let fx = fixture(vec!["alpha", "beta"]).await;

        let long_a = "alpha text here. ".repeat(80);
        let long_b = "beta text here. ".repeat(80);
        let docs = fx
            .pipeline
            .add_documents(vec![new_doc("A", &long_a), new_doc("B", &long_b)])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);

        let ids_a = fx
            .store
            .get_vector_ids_by_document(&docs[0].id)
            .await
            .unwrap();
        let ids_b = fx
            .store
            .get_vector_ids_by_document(&docs[1].id)
            .await
            .unwrap();
        assert!(!ids_a.is_empty());
        assert!(!ids_b.is_empty());

        let mut all: Vec<u32> = ids_a.iter().chain(ids_b.iter()).copied().collect();
        all.sort_unstable();
        let expected: Vec<u32> = (0..all.len() as u32).collect();
        assert_eq!(all, expected);
        assert_eq!(fx.index.read().await.ntotal(), all.len());
    }

    #[tokio::test]
    async fn zero_chunk_document_is_stored_without_vectors() {
        let fx = fixture(vec![]).await;

        let docs = fx
            .pipeline
            .add_documents(vec![new_doc("Blank-ish", "   \n\t  ")])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(fx.store.count_documents().await.unwrap(), 1);
        assert_eq!(fx.index.read().await.ntotal(), 0);

        // still deletable
        assert!(fx.pipeline.delete_document(&docs[0].id).await.unwrap());
        assert_eq!(fx.store.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_cascades_and_shrinks_ntotal() {
        let fx = fixture(vec!["topic"]).await;

        let long = "topic sentence goes on. ".repeat(80);
        let docs = fx
            .pipeline
            .add_documents(vec![new_doc("Doc", &long)])
            .await
            .unwrap();
        let before = fx.index.read().await.ntotal();
        let chunk_count = fx
            .store
            .get_vector_ids_by_document(&docs[0].id)
            .await
            .unwrap()
            .len();
        assert!(chunk_count > 1);

        assert!(fx.pipeline.delete_document(&docs[0].id).await.unwrap());
        assert_eq!(fx.index.read().await.ntotal(), before - chunk_count);

        let passages = fx.retriever.search("topic sentence").await.unwrap();
        assert!(passages.is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_id_is_false_and_leaves_state_alone() {
        let fx = fixture(vec!["topic"]).await;

        fx.pipeline
            .add_documents(vec![new_doc("Doc", "topic text")])
            .await
            .unwrap();
        let before = fx.index.read().await.ntotal();

        assert!(!fx.pipeline.delete_document("no-such-id").await.unwrap());
        assert_eq!(fx.index.read().await.ntotal(), before);
        assert_eq!(fx.store.count_documents().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_persisted_after_ingest() {
        let fx = fixture(vec!["topic"]).await;

        fx.pipeline
            .add_documents(vec![new_doc("Doc", "topic text")])
            .await
            .unwrap();

        assert!(fx.index_path.exists());
        let reloaded = VectorIndex::load(&fx.index_path);
        assert_eq!(reloaded.ntotal(), fx.index.read().await.ntotal());
    }

    #[tokio::test]
    async fn reingesting_same_url_creates_independent_documents() {
        let fx = fixture(vec!["topic"]).await;

        let input = NewDocument {
            title: "Doc".to_string(),
            content: "topic text".to_string(),
            url: Some("https://example.com/page".to_string()),
        };
        fx.pipeline.add_documents(vec![input.clone()]).await.unwrap();
        fx.pipeline.add_documents(vec![input]).await.unwrap();

        assert_eq!(fx.store.count_documents().await.unwrap(), 2);
        assert_eq!(fx.index.read().await.ntotal(), 2);
    }
}
