//! Answer generation provider abstraction and implementations.
//!
//! Defines the [`Generator`] trait and concrete backends:
//! - **`openai`** — calls the OpenAI chat completions API.
//! - **`ollama`** — calls a local Ollama instance's `/api/generate` endpoint.
//! - **`extractive`** — deterministic, fully offline: stitches the grounding
//!   excerpts into the answer. Used by the test suite and as a no-network
//!   fallback.
//!
//! All backends share one contract: the answer must be grounded in the
//! provided context excerpts, and a call with no excerpts yields the fixed
//! [`NO_CONTEXT_ANSWER`] — never a fabricated grounded-looking answer.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::net;

/// Fallback answer when retrieval produced no usable grounding context.
pub const NO_CONTEXT_ANSWER: &str = "I could not find anything relevant to that question in the \
indexed documentation. Try rephrasing the question, or rebuild the index if the corpus has changed.";

/// Trait for answer generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Generate an answer to `question` grounded in `context` excerpts.
    async fn generate(&self, question: &str, context: &[String]) -> Result<String>;
}

/// Create the appropriate [`Generator`] based on configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "extractive" => Ok(Arc::new(ExtractiveGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Shared prompt assembly: numbered documentation excerpts followed by the
/// question.
fn build_prompt(question: &str, context: &[String]) -> String {
    let mut prompt = String::from("Documentation excerpts:\n\n");
    for (i, excerpt) in context.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, excerpt.trim()));
    }
    prompt.push_str(&format!("Question: {}\n", question));
    prompt
}

const SYSTEM_PROMPT: &str = "You answer questions about technical documentation. \
Use only the provided documentation excerpts; if they do not contain the answer, say so. \
Be concise and cite concrete identifiers from the excerpts where relevant.";

// ============ OpenAI ============

/// Generation backend using the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiGenerator {
    model: String,
    temperature: f64,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            temperature: config.temperature,
            client: net::client_with_timeout(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        if context.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(question, context) }
            ],
        });

        let json = net::post_json(
            &self.client,
            "https://api.openai.com/v1/chat/completions",
            Some(&api_key),
            &body,
            self.max_retries,
        )
        .await?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

/// Generation backend using a local Ollama instance.
///
/// Calls `POST /api/generate` (non-streaming) on the configured URL
/// (default `http://localhost:11434`).
pub struct OllamaGenerator {
    model: String,
    temperature: f64,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            temperature: config.temperature,
            url,
            client: net::client_with_timeout(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        if context.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let body = serde_json::json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "prompt": build_prompt(question, context),
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let json = net::post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
        )
        .await
        .map_err(|e| {
            anyhow::anyhow!("Ollama generate failed (is Ollama running at {}?): {}", self.url, e)
        })?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

// ============ Extractive ============

/// Deterministic offline generator.
///
/// Produces a readable answer directly from the grounding excerpts without
/// any model call. Useful for tests, CI, and environments without model
/// access; the answer is exactly as good as retrieval.
pub struct ExtractiveGenerator;

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, question: &str, context: &[String]) -> Result<String> {
        if context.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let mut answer = format!("Most relevant documentation for \"{}\":\n", question.trim());
        for excerpt in context {
            let flat = excerpt.split_whitespace().collect::<Vec<_>>().join(" ");
            answer.push_str(&format!("\n- {}", flat));
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extractive_includes_excerpts() {
        let gen = ExtractiveGenerator;
        let context = vec![
            "Use `@app.get('/')` to define a GET route in FastAPI.".to_string(),
            "Run the app with uvicorn.".to_string(),
        ];
        let answer = gen.generate("How do I define a GET route?", &context).await.unwrap();
        assert!(answer.contains("@app.get"));
        assert!(answer.contains("uvicorn"));
        assert!(answer.contains("How do I define a GET route?"));
    }

    #[tokio::test]
    async fn test_extractive_no_context_fallback() {
        let gen = ExtractiveGenerator;
        let answer = gen.generate("anything", &[]).await.unwrap();
        assert_eq!(answer, NO_CONTEXT_ANSWER);
    }

    #[test]
    fn test_build_prompt_numbers_excerpts() {
        let prompt = build_prompt("q?", &["one".to_string(), "two".to_string()]);
        assert!(prompt.contains("[1] one"));
        assert!(prompt.contains("[2] two"));
        assert!(prompt.ends_with("Question: q?\n"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = GenerationConfig {
            provider: "magic".to_string(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_err());
    }
}
