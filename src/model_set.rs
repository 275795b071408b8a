//! Process-wide model client configuration.
//!
//! Embedding and generation clients are expensive to set up and must be
//! initialized at most once per process. [`ModelSet::configure`] is the
//! guarded entry point: the first call builds the clients from config,
//! every later call returns the same set (a no-op, not a re-initialization).
//!
//! The resulting [`ModelSet`] is passed explicitly to the indexer and query
//! pipeline — nothing looks the clients up through ambient global state.

use anyhow::Result;
use std::sync::{Arc, OnceLock};
use tracing::info;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::generation::{create_generator, Generator};

static CONFIGURED: OnceLock<Arc<ModelSet>> = OnceLock::new();

/// The embedding and generation clients shared by indexing and querying.
pub struct ModelSet {
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
}

impl ModelSet {
    /// Build a fresh set of clients from config, bypassing the process-wide
    /// guard. Prefer [`ModelSet::configure`] in application code; this
    /// constructor exists for tests that need isolated instances.
    pub fn build(config: &Config) -> Result<Arc<Self>> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Ok(Arc::new(Self {
            embedder,
            generator,
        }))
    }

    /// Configure the process-wide model set, at most once.
    ///
    /// The first call builds clients from `config` and logs the chosen
    /// models; subsequent calls ignore `config` and return the existing set.
    pub fn configure(config: &Config) -> Result<Arc<Self>> {
        if let Some(existing) = CONFIGURED.get() {
            return Ok(existing.clone());
        }

        let built = Self::build(config)?;
        info!(
            embedding = built.embedder.model_name(),
            generation = built.generator.model_name(),
            "model clients configured"
        );
        Ok(CONFIGURED.get_or_init(|| built).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        toml::from_str(
            r#"
[storage]
persist_dir = "./storage"

[corpus]
root = "./docs"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_configure_is_idempotent() {
        let first = ModelSet::configure(&config()).unwrap();
        let second = ModelSet::configure(&config()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_build_returns_fresh_instances() {
        let a = ModelSet::build(&config()).unwrap();
        let b = ModelSet::build(&config()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
