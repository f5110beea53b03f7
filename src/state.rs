use std::sync::Arc;

use tokio::sync::RwLock;

use crate::core::config::{AppPaths, ModelConfig, RagConfig};
use crate::generation::GenerationManager;
use crate::llm::{ModelProvider, OllamaProvider};
use crate::rag::{DocumentStore, Pipeline, Retriever, VectorIndex};

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: RagConfig,
    pub store: Arc<DocumentStore>,
    pub index: Arc<RwLock<VectorIndex>>,
    pub provider: Arc<dyn ModelProvider>,
    pub pipeline: Arc<Pipeline>,
    pub retriever: Arc<Retriever>,
    pub generation: GenerationManager,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = AppPaths::new();
        let config = RagConfig::default();
        let model_config = ModelConfig::default();
        let provider: Arc<dyn ModelProvider> = Arc::new(OllamaProvider::new(
            &model_config,
            config.request_timeout_secs,
        )?);
        Self::with_parts(paths, config, provider).await
    }

    /// Wire the service graph around explicit paths and provider
    /// (tests, embedded use).
    pub async fn with_parts(
        paths: AppPaths,
        config: RagConfig,
        provider: Arc<dyn ModelProvider>,
    ) -> anyhow::Result<Arc<Self>> {
        let paths = Arc::new(paths);
        let store = Arc::new(DocumentStore::new(paths.db_path.clone()).await?);
        let index = Arc::new(RwLock::new(VectorIndex::load(&paths.index_path)));

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            config.clone(),
            paths.index_path.clone(),
        ));
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            index.clone(),
            provider.clone(),
            config.clone(),
        ));
        let generation = GenerationManager::new(provider.clone());

        Ok(Arc::new(AppState {
            paths,
            config,
            store,
            index,
            provider,
            pipeline,
            retriever,
            generation,
        }))
    }
}
