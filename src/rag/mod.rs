//! The retrieval pipeline: chunking, vector indexing, persistence,
//! retrieval/re-ranking, and ingestion.

pub mod chunker;
pub mod index;
pub mod ingest;
pub mod retriever;
pub mod store;

pub use chunker::{Chunk, Chunker};
pub use index::{VectorHit, VectorIndex};
pub use ingest::{NewDocument, Pipeline};
pub use retriever::{RetrievedPassage, Retriever};
pub use store::{Document, DocumentStore, VectorMapping};
