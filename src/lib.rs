//! Local retrieval-augmented-generation core.
//!
//! Ingests text documents, indexes them for semantic search, and answers
//! queries by retrieving the most relevant passages and streaming a model
//! completion over them. Everything stays on the local machine: a SQLite
//! store for documents and chunk mappings, one vector-index snapshot file,
//! and an HTTP model service (Ollama) consumed as a black box.

pub mod core;
pub mod generation;
pub mod llm;
pub mod rag;
pub mod server;
pub mod state;
