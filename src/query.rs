//! The query pipeline: embed → retrieve → filter → generate → format.
//!
//! For each question the engine retrieves the top-k most similar chunks,
//! drops everything below the similarity cutoff (a hard threshold — survivors
//! keep their retrieval rank), asks the generation backend for an answer
//! grounded in the survivors, and returns a structured [`QueryResult`].
//!
//! `confidence` is the arithmetic mean of the surviving similarity scores,
//! rounded to two decimals: a retrieval-agreement proxy for answer quality,
//! not a calibrated probability. When nothing passes the cutoff the result
//! carries `confidence = 0.0`, no sources, and a fixed fallback answer —
//! a valid outcome, distinct from a pipeline failure, which is always
//! reported as a [`QueryError`].

use std::sync::Arc;
use thiserror::Error;

use crate::config::RetrievalConfig;
use crate::embedding::embed_query;
use crate::generation::NO_CONTEXT_ANSWER;
use crate::index::{Index, ScoredChunk};
use crate::model_set::ModelSet;
use crate::models::{QueryResult, SourceRef, GENERAL_SECTION};

/// A query pipeline failure.
///
/// Callers can always distinguish these from the valid zero-source result:
/// "nothing relevant found" is `Ok` with `confidence = 0.0`, while a failed
/// model or store call is an `Err`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("embedding the question failed: {0:#}")]
    Embedding(#[source] anyhow::Error),
    #[error("retrieval failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),
    #[error("answer generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
}

/// Executes questions against a loaded [`Index`].
pub struct QueryEngine {
    index: Index,
    models: Arc<ModelSet>,
    retrieval: RetrievalConfig,
}

impl QueryEngine {
    pub fn new(index: Index, models: Arc<ModelSet>, retrieval: RetrievalConfig) -> Self {
        Self {
            index,
            models,
            retrieval,
        }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Tear down the engine, returning nothing; used when swapping in a
    /// rebuilt index.
    pub async fn close(self) {
        self.index.close().await;
    }

    /// Answer a natural-language question with cited sources.
    pub async fn query(&self, question: &str) -> Result<QueryResult, QueryError> {
        let query_vec = embed_query(self.models.embedder.as_ref(), question)
            .await
            .map_err(QueryError::Embedding)?;

        let candidates = self
            .index
            .top_k(&query_vec, self.retrieval.top_k)
            .await
            .map_err(QueryError::Retrieval)?;

        let survivors = filter_by_cutoff(candidates, self.retrieval.similarity_cutoff);

        if survivors.is_empty() {
            return Ok(QueryResult {
                answer: NO_CONTEXT_ANSWER.to_string(),
                confidence: 0.0,
                sources: Vec::new(),
            });
        }

        let context: Vec<String> = survivors.iter().map(|c| c.text.clone()).collect();
        let answer = self
            .models
            .generator
            .generate(question, &context)
            .await
            .map_err(QueryError::Generation)?;

        let sources = build_sources(&survivors, self.retrieval.preview_chars);
        let confidence = confidence_of(&sources);

        Ok(QueryResult {
            answer,
            confidence,
            sources,
        })
    }
}

/// Drop every candidate below the cutoff, preserving retrieval rank.
fn filter_by_cutoff(candidates: Vec<ScoredChunk>, cutoff: f64) -> Vec<ScoredChunk> {
    candidates
        .into_iter()
        .filter(|c| f64::from(c.score) >= cutoff)
        .collect()
}

/// Format surviving chunks as cited sources, in retrieval-rank order.
fn build_sources(survivors: &[ScoredChunk], preview_chars: usize) -> Vec<SourceRef> {
    survivors
        .iter()
        .map(|chunk| SourceRef {
            content: preview_of(&chunk.text, preview_chars),
            source: chunk
                .source
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            section: chunk
                .section
                .clone()
                .unwrap_or_else(|| GENERAL_SECTION.to_string()),
            score: f64::from(chunk.score),
        })
        .collect()
}

/// First `preview_chars` characters of the chunk text plus an ellipsis
/// marker (char-boundary safe).
fn preview_of(text: &str, preview_chars: usize) -> String {
    let mut preview: String = text.chars().take(preview_chars).collect();
    preview.push_str("...");
    preview
}

/// Mean similarity of the retained sources, rounded to two decimals; `0.0`
/// for an empty set.
fn confidence_of(sources: &[SourceRef]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let mean = sources.iter().map(|s| s.score).sum::<f64>() / sources.len() as f64;
    (mean * 100.0).round() / 100.0
}

// ============ CLI entry point ============

/// `docsqa query "<question>" [--json]`.
pub async fn run_query(
    engine: &QueryEngine,
    question: &str,
    json: bool,
) -> Result<(), QueryError> {
    let result = engine.query(question).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).expect("QueryResult serializes")
        );
        return Ok(());
    }

    println!("Answer:");
    println!("{}", result.answer);
    println!();
    println!("confidence: {:.2}", result.confidence);

    if result.sources.is_empty() {
        println!("sources: (none)");
    } else {
        println!("sources:");
        for (i, source) in result.sources.iter().enumerate() {
            println!(
                "  {}. [{:.2}] {} ({})",
                i + 1,
                source.score,
                source.source,
                source.section
            );
            println!("     {}", source.content.replace('\n', " "));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            text: text.to_string(),
            source: Some("docs/guides/intro.md".to_string()),
            section: Some("guides".to_string()),
            score,
        }
    }

    #[test]
    fn test_filter_drops_below_cutoff_keeps_rank() {
        let candidates = vec![
            chunk("a", 0.95),
            chunk("b", 0.72),
            chunk("c", 0.69),
            chunk("d", 0.40),
        ];
        let survivors = filter_by_cutoff(candidates, 0.7);
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].text, "a");
        assert_eq!(survivors[1].text, "b");
        for s in &survivors {
            assert!(f64::from(s.score) >= 0.7);
        }
    }

    #[test]
    fn test_filter_boundary_inclusive() {
        let survivors = filter_by_cutoff(vec![chunk("edge", 0.7)], 0.7);
        assert_eq!(survivors.len(), 1);
    }

    #[test]
    fn test_confidence_is_rounded_mean() {
        let sources = build_sources(&[chunk("a", 0.9), chunk("b", 0.8), chunk("c", 0.75)], 200);
        // mean = 0.81666... -> 0.82
        assert!((confidence_of(&sources) - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_zero_iff_empty() {
        assert_eq!(confidence_of(&[]), 0.0);
        let sources = build_sources(&[chunk("a", 0.71)], 200);
        assert!(confidence_of(&sources) > 0.0);
    }

    #[test]
    fn test_sources_preview_truncated() {
        let long_text = "x".repeat(500);
        let sources = build_sources(&[chunk(&long_text, 0.9)], 200);
        assert_eq!(sources[0].content.chars().count(), 203); // 200 + "..."
        assert!(sources[0].content.ends_with("..."));
    }

    #[test]
    fn test_sources_short_text_keeps_marker() {
        let sources = build_sources(&[chunk("short", 0.9)], 200);
        assert_eq!(sources[0].content, "short...");
    }

    #[test]
    fn test_sources_metadata_defaults() {
        let bare = ScoredChunk {
            text: "orphan chunk".to_string(),
            source: None,
            section: None,
            score: 0.8,
        };
        let sources = build_sources(&[bare], 200);
        assert_eq!(sources[0].source, "Unknown");
        assert_eq!(sources[0].section, "general");
    }

    #[test]
    fn test_preview_char_boundary_safe() {
        // multi-byte characters must not be split mid-codepoint
        let text = "é".repeat(300);
        let preview = preview_of(&text, 200);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 203);
    }
}
