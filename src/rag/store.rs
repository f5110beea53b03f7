//! SQLite-backed document and chunk-mapping store.
//!
//! Two tables in one database file: `documents` holds full document rows,
//! `vector_mappings` maps a vector id back to its owning document and chunk
//! offsets. Multi-row writes for one ingestion or deletion run inside a
//! single transaction so the stores never commit half a batch.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

/// A stored document. Content is immutable after ingestion; replacing it
/// means delete + re-ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    /// creation time, unix seconds
    pub created_at: i64,
}

/// One row of the vector-id → document relation.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMapping {
    pub vector_id: u32,
    pub doc_id: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub struct DocumentStore {
    pool: SqlitePool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl DocumentStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                url TEXT,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_mappings (
                vector_id INTEGER PRIMARY KEY,
                doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_mappings_doc ON vector_mappings(doc_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Insert a batch of documents with their chunk mappings. All rows of the
    /// batch commit together or not at all.
    pub async fn insert_documents(
        &self,
        batch: &[(Document, Vec<VectorMapping>)],
    ) -> Result<(), ApiError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (doc, mappings) in batch {
            sqlx::query(
                "INSERT INTO documents (id, title, content, url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&doc.id)
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(&doc.url)
            .bind(doc.created_at)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

            for mapping in mappings {
                sqlx::query(
                    "INSERT INTO vector_mappings
                     (vector_id, doc_id, chunk_index, start_offset, end_offset)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(mapping.vector_id as i64)
                .bind(&mapping.doc_id)
                .bind(mapping.chunk_index as i64)
                .bind(mapping.start_offset as i64)
                .bind(mapping.end_offset as i64)
                .execute(&mut *tx)
                .await
                .map_err(ApiError::internal)?;
            }
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, content, url, created_at FROM documents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.as_ref().map(row_to_document))
    }

    pub async fn get_documents_by_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, Document>, ApiError> {
        let mut docs = HashMap::with_capacity(ids.len());
        // Personal-corpus scale; point lookups keep this simple and avoid
        // building IN-clauses by hand.
        for id in ids {
            if docs.contains_key(id) {
                continue;
            }
            if let Some(doc) = self.get_document(id).await? {
                docs.insert(id.clone(), doc);
            }
        }
        Ok(docs)
    }

    /// Browse listing without content bodies.
    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, title, '' AS content, url, created_at
             FROM documents ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Delete a document and its mappings in one transaction. Returns the
    /// vector ids that were mapped to it and whether the row existed.
    pub async fn delete_document(&self, id: &str) -> Result<(bool, Vec<u32>), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let id_rows = sqlx::query("SELECT vector_id FROM vector_mappings WHERE doc_id = ?1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        let vector_ids: Vec<u32> = id_rows
            .iter()
            .map(|row| row.get::<i64, _>("vector_id") as u32)
            .collect();

        sqlx::query("DELETE FROM vector_mappings WHERE doc_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok((result.rows_affected() > 0, vector_ids))
    }

    pub async fn get_vector_mappings_by_ids(
        &self,
        vector_ids: &[u32],
    ) -> Result<HashMap<u32, VectorMapping>, ApiError> {
        let mut mappings = HashMap::with_capacity(vector_ids.len());
        for &vector_id in vector_ids {
            let row = sqlx::query(
                "SELECT vector_id, doc_id, chunk_index, start_offset, end_offset
                 FROM vector_mappings WHERE vector_id = ?1",
            )
            .bind(vector_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)?;

            if let Some(row) = row {
                mappings.insert(vector_id, row_to_mapping(&row));
            }
        }
        Ok(mappings)
    }

    pub async fn get_vector_ids_by_document(&self, doc_id: &str) -> Result<Vec<u32>, ApiError> {
        let rows = sqlx::query(
            "SELECT vector_id FROM vector_mappings WHERE doc_id = ?1 ORDER BY chunk_index",
        )
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("vector_id") as u32)
            .collect())
    }

    pub async fn count_documents(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        url: row.get("url"),
        created_at: row.get("created_at"),
    }
}

fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> VectorMapping {
    VectorMapping {
        vector_id: row.get::<i64, _>("vector_id") as u32,
        doc_id: row.get("doc_id"),
        chunk_index: row.get::<i64, _>("chunk_index") as usize,
        start_offset: row.get::<i64, _>("start_offset") as usize,
        end_offset: row.get::<i64, _>("end_offset") as usize,
    }
}
