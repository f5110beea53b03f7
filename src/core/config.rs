use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Filesystem layout for everything the process persists.
///
/// All state lives in one user-local data directory: the SQLite store, the
/// vector index snapshot, and the log directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub user_data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub index_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let user_data_dir = discover_user_data_dir();
        let log_dir = user_data_dir.join("logs");
        let db_path = user_data_dir.join("recall.db");
        let index_path = user_data_dir.join("vectors.idx");

        for dir in [&user_data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            user_data_dir,
            log_dir,
            db_path,
            index_path,
        }
    }

    /// Layout rooted at an explicit directory (tests, portable installs).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let user_data_dir = root.into();
        let log_dir = user_data_dir.join("logs");
        let db_path = user_data_dir.join("recall.db");
        let index_path = user_data_dir.join("vectors.idx");

        for dir in [&user_data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            user_data_dir,
            log_dir,
            db_path,
            index_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_user_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("RECALL_DATA_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    home.join(".recall")
}

/// Tunables for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in bytes.
    pub chunk_overlap: usize,
    /// Raw candidates fetched from the vector index before re-ranking.
    pub overfetch_k: usize,
    /// Cosine-distance cutoff; candidates farther than this are noise.
    pub distance_cutoff: f32,
    /// Documents kept after re-ranking.
    pub top_documents: usize,
    /// Timeout for embedding/completion calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            overfetch_k: 100,
            distance_cutoff: 0.8,
            top_documents: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Connection settings for the model service, overridable via environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub completion_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: env::var("RECALL_OLLAMA_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            embedding_model: env::var("RECALL_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            completion_model: env::var("RECALL_COMPLETION_MODEL")
                .unwrap_or_else(|_| "llama3.2:3b".to_string()),
        }
    }
}
