//! Index lifecycle: existence check, typed load, atomic build, load-or-build,
//! and rebuild.
//!
//! One logical index exists per (persistence directory, collection name)
//! pair: a SQLite vector collection plus a JSON manifest. The manifest is
//! written last, atomically (temp file + rename), after a successful build —
//! its presence IS the index-existence check, so a failed or interrupted
//! build can never be mistaken for a usable index.
//!
//! Loading returns a typed [`IndexLoad`] so callers can tell "no index yet"
//! ([`IndexLoad::Absent`]) apart from "index present but broken"
//! ([`IndexLoad::Corrupt`]) and choose policy explicitly. Corruption covers
//! unreadable manifests, a missing or schema-less collection, and an
//! embedding fingerprint that no longer matches the configured model —
//! a mismatched fingerprint would silently degrade every similarity score,
//! so it is surfaced instead of used.
//!
//! Builds take an exclusive advisory file lock on the persistence directory
//! (single-writer discipline); in-process readers are serialized by the
//! server's RwLock around the query engine.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::loader;
use crate::migrate;
use crate::model_set::ModelSet;
use crate::models::Document;

/// Manifest file name; its presence marks a fully built, persisted index.
pub const MANIFEST_FILE: &str = "index_manifest.json";

const BUILD_LOCK_FILE: &str = ".build.lock";

/// On-disk record of how the persisted index was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    pub collection: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dims: usize,
    pub documents: usize,
    pub chunks: usize,
    pub built_at: i64,
}

/// Outcome of attempting to load a persisted index.
#[derive(Debug)]
pub enum IndexLoad {
    /// Manifest and collection are present, consistent, and compatible with
    /// the configured embedding model.
    Ready(Index),
    /// No manifest — expected steady state on first run, not an error.
    Absent,
    /// Manifest present but the index is unusable; the cause is reported so
    /// the caller can decide between rebuilding and failing loudly.
    Corrupt { reason: String },
}

/// A loaded, queryable index.
pub struct Index {
    pool: SqlitePool,
    manifest: IndexManifest,
}

/// A chunk retrieved from the index with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub source: Option<String>,
    pub section: Option<String>,
    pub score: f32,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("manifest", &self.manifest)
            .finish()
    }
}

impl Index {
    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    /// Retrieve the top-`k` chunks ranked by descending cosine similarity to
    /// `query_vec`. Ties are broken by chunk id for a stable order.
    pub async fn top_k(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.text, c.doc_source, c.section, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(String, ScoredChunk)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                let score = cosine_similarity(query_vec, &vec);
                let chunk = ScoredChunk {
                    text: row.get("text"),
                    source: row.get("doc_source"),
                    section: row.get("section"),
                    score,
                };
                (row.get::<String, _>("id"), chunk)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Orchestrates the index lifecycle for one (persist_dir, collection) pair.
pub struct Indexer {
    config: Config,
    models: Arc<ModelSet>,
}

impl Indexer {
    pub fn new(config: &Config, models: Arc<ModelSet>) -> Self {
        Self {
            config: config.clone(),
            models,
        }
    }

    fn persist_dir(&self) -> &Path {
        &self.config.storage.persist_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.persist_dir().join(MANIFEST_FILE)
    }

    /// True iff a persisted index manifest is present.
    pub fn index_exists(&self) -> bool {
        self.manifest_path().exists()
    }

    /// Read the persisted manifest without opening the collection.
    pub fn read_manifest(&self) -> Result<IndexManifest> {
        let content = std::fs::read_to_string(self.manifest_path())
            .with_context(|| "index manifest unreadable")?;
        serde_json::from_str(&content).with_context(|| "index manifest unparseable")
    }

    /// Attempt to load the persisted index. Never raises: every failure mode
    /// is folded into [`IndexLoad::Absent`] or [`IndexLoad::Corrupt`].
    pub async fn load_existing_index(&self) -> IndexLoad {
        if !self.index_exists() {
            return IndexLoad::Absent;
        }

        match self.try_load().await {
            Ok(index) => {
                info!(
                    collection = %index.manifest.collection,
                    chunks = index.manifest.chunks,
                    "loaded existing index"
                );
                IndexLoad::Ready(index)
            }
            Err(e) => IndexLoad::Corrupt {
                reason: format!("{:#}", e),
            },
        }
    }

    async fn try_load(&self) -> Result<Index> {
        let manifest = self.read_manifest()?;

        let collection = &self.config.storage.collection;
        if manifest.collection != *collection {
            bail!(
                "manifest is for collection '{}', configured collection is '{}'",
                manifest.collection,
                collection
            );
        }

        let db_path = db::collection_path(self.persist_dir(), collection);
        if !db_path.exists() {
            bail!("vector collection missing: {}", db_path.display());
        }

        let pool = db::connect(self.persist_dir(), collection).await?;

        if !migrate::schema_present(&pool).await? {
            pool.close().await;
            bail!("vector collection has no chunk tables");
        }

        // Embedding fingerprint check: an index built with a different model
        // or dimensionality produces meaningless similarity scores.
        let embedder = &self.models.embedder;
        if manifest.embedding_model != embedder.model_name() || manifest.dims != embedder.dims() {
            pool.close().await;
            bail!(
                "index was built with embedding {}/{} dims but {}/{} dims is configured",
                manifest.embedding_model,
                manifest.dims,
                embedder.model_name(),
                embedder.dims()
            );
        }

        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await?;
        if stored as usize != manifest.chunks {
            pool.close().await;
            bail!(
                "manifest records {} chunks but the collection holds {}",
                manifest.chunks,
                stored
            );
        }

        Ok(Index { pool, manifest })
    }

    /// Build a new index from `documents` and persist it.
    ///
    /// Atomic from the caller's perspective: the manifest is written only
    /// after all chunks and vectors are committed, so either a fully usable
    /// persisted index exists afterwards or `index_exists()` stays false.
    pub async fn create_new_index(&self, documents: &[Document]) -> Result<Index> {
        if documents.is_empty() {
            bail!("Refusing to build an index from zero documents");
        }

        std::fs::create_dir_all(self.persist_dir())?;
        let _lock = BuildLock::acquire(self.persist_dir())?;

        // A stale manifest from a previous build must not survive a failed
        // attempt, so clear it before touching the collection.
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            std::fs::remove_file(&manifest_path)?;
        }

        let collection = &self.config.storage.collection;
        let pool = db::connect(self.persist_dir(), collection).await?;
        migrate::reset_schema(&pool).await?;

        let chunks: Vec<_> = documents
            .iter()
            .flat_map(|d| chunk_document(d, self.config.chunking.max_tokens))
            .collect();

        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            "building index"
        );

        let embedder = &self.models.embedder;
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embedding.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vecs = embedder
                .embed_batch(&texts)
                .await
                .context("embedding failed during index build")?;
            if batch_vecs.len() != batch.len() {
                pool.close().await;
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    batch_vecs.len(),
                    batch.len()
                );
            }
            vectors.extend(batch_vecs);
        }

        let mut tx = pool.begin().await?;
        for (chunk, vec) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, doc_source, section, file_type, chunk_index, text, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.doc_source)
            .bind(&chunk.section)
            .bind(&chunk.file_type)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(&chunk.id)
                .bind(vec_to_blob(vec))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        let manifest = IndexManifest {
            collection: collection.clone(),
            embedding_provider: self.config.embedding.provider.clone(),
            embedding_model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            documents: documents.len(),
            chunks: chunks.len(),
            built_at: chrono::Utc::now().timestamp(),
        };
        write_manifest_atomic(&manifest_path, &manifest)?;

        info!(chunks = manifest.chunks, "index built and persisted");
        Ok(Index { pool, manifest })
    }

    /// Load-or-build convenience.
    ///
    /// Policy: a corrupt index is rebuilt when documents are available (the
    /// cause is logged first); with no documents, both the absent and the
    /// corrupt case fail immediately with a configuration error, before any
    /// partial work.
    pub async fn get_or_create_index(&self, documents: Option<&[Document]>) -> Result<Index> {
        match self.load_existing_index().await {
            IndexLoad::Ready(index) => Ok(index),
            IndexLoad::Absent => match documents {
                Some(docs) => self.create_new_index(docs).await,
                None => bail!(
                    "No existing index found and no documents provided. \
                     Provide documents to build a new index."
                ),
            },
            IndexLoad::Corrupt { reason } => {
                warn!("existing index unusable: {}", reason);
                match documents {
                    Some(docs) => {
                        eprintln!("Warning: existing index unusable ({}); rebuilding", reason);
                        self.create_new_index(docs).await
                    }
                    None => bail!(
                        "Existing index is unusable ({}) and no documents were provided \
                         to rebuild it",
                        reason
                    ),
                }
            }
        }
    }

    /// Destroy the persisted index and recreate it from `documents`.
    pub async fn rebuild(&self, documents: &[Document]) -> Result<Index> {
        info!("rebuilding index");
        self.create_new_index(documents).await
    }
}

fn write_manifest_atomic(path: &Path, manifest: &IndexManifest) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Exclusive advisory lock held for the duration of a build.
struct BuildLock {
    file: std::fs::File,
}

impl BuildLock {
    fn acquire(persist_dir: &Path) -> Result<Self> {
        let path = persist_dir.join(BUILD_LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .with_context(|| format!("another build holds the index lock at {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

// ============ CLI entry points ============

/// `docsqa index [--rebuild]`.
pub async fn run_index(config: &Config, models: Arc<ModelSet>, rebuild: bool) -> Result<()> {
    let indexer = Indexer::new(config, models);

    if rebuild {
        let documents = loader::load_documents(&config.corpus)?;
        println!(
            "Rebuilding index from {} document fragments...",
            documents.len()
        );
        let index = indexer.rebuild(&documents).await?;
        print_manifest(index.manifest());
        index.close().await;
        return Ok(());
    }

    match indexer.load_existing_index().await {
        IndexLoad::Ready(index) => {
            println!("Index already exists — nothing to do (use --rebuild to recreate).");
            print_manifest(index.manifest());
            index.close().await;
        }
        IndexLoad::Absent => {
            let documents = loader::load_documents(&config.corpus)?;
            println!("Building index from {} document fragments...", documents.len());
            let index = indexer.create_new_index(&documents).await?;
            print_manifest(index.manifest());
            index.close().await;
        }
        IndexLoad::Corrupt { reason } => {
            eprintln!("Warning: existing index unusable ({}); rebuilding", reason);
            let documents = loader::load_documents(&config.corpus)?;
            println!("Building index from {} document fragments...", documents.len());
            let index = indexer.create_new_index(&documents).await?;
            print_manifest(index.manifest());
            index.close().await;
        }
    }

    Ok(())
}

/// `docsqa status`.
pub async fn run_status(config: &Config, models: Arc<ModelSet>) -> Result<()> {
    let indexer = Indexer::new(config, models);

    if !indexer.index_exists() {
        println!(
            "No index found at {}. Run `docsqa index` to build one.",
            config.storage.persist_dir.display()
        );
        return Ok(());
    }

    match indexer.load_existing_index().await {
        IndexLoad::Ready(index) => {
            println!("Index status: ready");
            print_manifest(index.manifest());
            index.close().await;
        }
        IndexLoad::Absent => {
            println!(
                "No index found at {}. Run `docsqa index` to build one.",
                config.storage.persist_dir.display()
            );
        }
        IndexLoad::Corrupt { reason } => {
            println!("Index status: corrupt");
            println!("  reason: {}", reason);
            println!("  remedy: run `docsqa index --rebuild`");
        }
    }

    Ok(())
}

fn print_manifest(manifest: &IndexManifest) {
    println!("  collection:      {}", manifest.collection);
    println!(
        "  embedding:       {} ({}, {} dims)",
        manifest.embedding_model, manifest.embedding_provider, manifest.dims
    );
    println!("  documents:       {}", manifest.documents);
    println!("  chunks:          {}", manifest.chunks);
    let built = chrono::DateTime::from_timestamp(manifest.built_at, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| manifest.built_at.to_string());
    println!("  built at:        {}", built);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::generation::ExtractiveGenerator;
    use crate::models::GENERAL_SECTION;
    use async_trait::async_trait;

    fn test_config(persist_dir: &Path) -> Config {
        let toml_str = format!(
            r#"
[storage]
persist_dir = "{}"

[corpus]
root = "./unused"
"#,
            persist_dir.display()
        );
        toml::from_str(&toml_str).unwrap()
    }

    fn docs() -> Vec<Document> {
        vec![
            Document {
                text: "Use `@app.get('/')` to define a GET route in FastAPI.".to_string(),
                source: "docs/routing/get.md".to_string(),
                file_type: "markdown".to_string(),
                section: "routing".to_string(),
            },
            Document {
                text: "Declare path parameters with {item_id} and a type annotation.".to_string(),
                source: "docs/routing/params.md".to_string(),
                file_type: "markdown".to_string(),
                section: "routing".to_string(),
            },
            Document {
                text: "Deploy with uvicorn behind a process manager.".to_string(),
                source: "docs/deploy.md".to_string(),
                file_type: "markdown".to_string(),
                section: GENERAL_SECTION.to_string(),
            },
        ]
    }

    fn indexer_for(config: &Config) -> Indexer {
        Indexer::new(config, ModelSet::build(config).unwrap())
    }

    #[tokio::test]
    async fn test_build_then_exists_and_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);

        assert!(!indexer.index_exists());
        assert!(matches!(
            indexer.load_existing_index().await,
            IndexLoad::Absent
        ));

        let index = indexer.create_new_index(&docs()).await.unwrap();
        assert_eq!(index.manifest().documents, 3);
        assert_eq!(index.manifest().chunks as i64, index.chunk_count().await.unwrap());
        index.close().await;

        assert!(indexer.index_exists());
        match indexer.load_existing_index().await {
            IndexLoad::Ready(loaded) => {
                assert_eq!(loaded.manifest().documents, 3);
                loaded.close().await;
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_round_trip_same_retrieval() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);
        let models = ModelSet::build(&config).unwrap();

        let built = indexer.create_new_index(&docs()).await.unwrap();
        let query_vec = crate::embedding::embed_query(
            models.embedder.as_ref(),
            "define a GET route in FastAPI",
        )
        .await
        .unwrap();

        let fresh = built.top_k(&query_vec, 5).await.unwrap();
        built.close().await;

        let loaded = match indexer.load_existing_index().await {
            IndexLoad::Ready(i) => i,
            other => panic!("expected Ready, got {:?}", other),
        };
        let reloaded = loaded.top_k(&query_vec, 5).await.unwrap();
        loaded.close().await;

        assert_eq!(fresh.len(), reloaded.len());
        for (a, b) in fresh.iter().zip(reloaded.iter()) {
            assert_eq!(a.source, b.source);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_empty_documents_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);

        let err = indexer.create_new_index(&[]).await.unwrap_err();
        assert!(err.to_string().contains("zero documents"));
        assert!(!indexer.index_exists());
    }

    #[tokio::test]
    async fn test_get_or_create_without_documents_is_config_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);

        let err = indexer.get_or_create_index(None).await.unwrap_err();
        assert!(err.to_string().contains("no documents provided"));
        assert!(!indexer.index_exists());
    }

    #[tokio::test]
    async fn test_corrupt_manifest_detected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);

        let index = indexer.create_new_index(&docs()).await.unwrap();
        index.close().await;

        std::fs::write(tmp.path().join(MANIFEST_FILE), "{not json").unwrap();
        match indexer.load_existing_index().await {
            IndexLoad::Corrupt { reason } => assert!(reason.contains("unparseable")),
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedding_fingerprint_mismatch_detected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let indexer = indexer_for(&config);

        let index = indexer.create_new_index(&docs()).await.unwrap();
        index.close().await;

        // Same collection, different embedding dimensionality
        let mut other_config = config.clone();
        other_config.embedding.dims = Some(64);
        let other = indexer_for(&other_config);
        match other.load_existing_index().await {
            IndexLoad::Corrupt { reason } => {
                assert!(reason.contains("dims is configured"), "got: {}", reason)
            }
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("embedding service unavailable")
        }
    }

    #[tokio::test]
    async fn test_failed_build_leaves_no_manifest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let models = Arc::new(ModelSet {
            embedder: Arc::new(FailingEmbedder),
            generator: Arc::new(ExtractiveGenerator),
        });
        let indexer = Indexer::new(&config, models);

        let err = indexer.create_new_index(&docs()).await.unwrap_err();
        assert!(err.to_string().contains("embedding failed"));
        assert!(!indexer.index_exists());
        assert!(matches!(
            indexer.load_existing_index().await,
            IndexLoad::Absent
        ));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let manifest = IndexManifest {
            collection: "tech_docs".to_string(),
            embedding_provider: "mock".to_string(),
            embedding_model: "mock-bow".to_string(),
            dims: 256,
            documents: 3,
            chunks: 7,
            built_at: 1_700_000_000,
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let restored: IndexManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, restored);
    }
}
