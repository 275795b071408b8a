//! # Docs Q&A
//!
//! Grounded question answering over a corpus of technical documentation.
//!
//! Docs Q&A ingests a tree of markdown files, chunks and embeds them into a
//! persistent vector collection, and answers natural-language questions by
//! retrieving the most similar chunks, filtering them by a similarity
//! cutoff, and generating an answer grounded in the survivors — with a
//! confidence score and cited sources.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  Corpus  │──▶│   Indexer     │──▶│  SQLite    │
//! │  (*.md)  │   │ Chunk+Embed  │   │ + manifest │
//! └──────────┘   └──────────────┘   └─────┬─────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐       ┌──────────┐
//!                │   CLI    │       │   HTTP   │
//!                │ (docsqa) │       │  (JSON)  │
//!                └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsqa index                  # build the index from the corpus
//! docsqa query "How do I define a GET route?"
//! docsqa eval                   # offline keyword-overlap smoke test
//! docsqa serve                  # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Filesystem corpus loader |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Answer generation provider abstraction |
//! | [`index`] | Index lifecycle: build, load, rebuild |
//! | [`query`] | The retrieval + confidence pipeline |
//! | [`evaluator`] | Offline keyword-overlap evaluation |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Vector collection connection |
//! | [`migrate`] | Collection schema |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod evaluator;
pub mod generation;
pub mod index;
pub mod loader;
pub mod migrate;
pub mod model_set;
pub mod models;
pub mod net;
pub mod query;
pub mod server;
