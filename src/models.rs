//! Core data models for the docs Q&A pipeline.
//!
//! These types represent the documents, chunks, and query results that flow
//! through ingestion, indexing, and retrieval.

use serde::Serialize;

/// Sentinel section for documents that sit directly under the corpus root.
pub const GENERAL_SECTION: &str = "general";

/// A document fragment produced by the loader, before chunking.
///
/// Immutable once loaded; consumed exactly once by the indexer.
#[derive(Debug, Clone)]
pub struct Document {
    /// Fragment body text.
    pub text: String,
    /// Originating file path.
    pub source: String,
    /// Always `"markdown"` for the filesystem corpus.
    pub file_type: String,
    /// Parent directory name, or [`GENERAL_SECTION`] for top-level files.
    pub section: String,
}

/// A chunk of a document's text, as stored in the index collection.
///
/// Chunks inherit their document's provenance metadata and are never
/// mutated after creation; a full rebuild is the only way to remove them.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub doc_source: String,
    pub section: String,
    pub file_type: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of the chunk text, for staleness detection.
    pub hash: String,
}

/// One cited source within a [`QueryResult`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    /// Truncated content preview (first 200 chars plus an ellipsis marker).
    pub content: String,
    /// Originating file path, or `"Unknown"`.
    pub source: String,
    /// Section name, or `"general"`.
    pub section: String,
    /// Cosine similarity of this chunk to the question.
    pub score: f64,
}

/// Structured answer returned by the query pipeline.
///
/// `confidence` is the mean similarity of the retained sources — a
/// retrieval-agreement proxy, not a calibrated probability of correctness.
/// It is `0.0` exactly when `sources` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub confidence: f64,
    pub sources: Vec<SourceRef>,
}
