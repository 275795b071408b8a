//! Offline evaluation harness.
//!
//! Runs fixed question/expected-keyword pairs through the query pipeline and
//! scores keyword overlap — a smoke test for answer relevance after corpus
//! or configuration changes, not part of the serving path.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::query::QueryEngine;

/// One evaluation case: a question and the keywords a good answer contains.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub expected_keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EvalFile {
    cases: Vec<EvalCase>,
}

/// Per-case evaluation outcome.
#[derive(Debug)]
pub struct EvalOutcome {
    pub question: String,
    pub answer: String,
    pub confidence: f64,
    /// Fraction of expected keywords found in the answer, in `[0, 1]`.
    pub keyword_score: f64,
    pub sources_count: usize,
}

/// Built-in smoke cases, used when no cases file is given.
pub fn default_cases() -> Vec<EvalCase> {
    vec![
        EvalCase {
            question: "How do I create a basic FastAPI application?".to_string(),
            expected_keywords: vec![
                "FastAPI".to_string(),
                "app".to_string(),
                "uvicorn".to_string(),
                "@app.get".to_string(),
            ],
        },
        EvalCase {
            question: "How do I handle path parameters?".to_string(),
            expected_keywords: vec![
                "path".to_string(),
                "parameter".to_string(),
                "{item_id}".to_string(),
                "int".to_string(),
            ],
        },
    ]
}

/// Load evaluation cases from a TOML file with a `[[cases]]` array.
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read eval cases file: {}", path.display()))?;
    let file: EvalFile =
        toml::from_str(&content).with_context(|| "Failed to parse eval cases file")?;

    if file.cases.is_empty() {
        bail!("Eval cases file contains no cases");
    }
    for case in &file.cases {
        if case.expected_keywords.is_empty() {
            bail!(
                "Eval case '{}' has no expected keywords",
                case.question
            );
        }
    }
    Ok(file.cases)
}

/// Fraction of expected keywords appearing in the answer as case-insensitive
/// substrings. An empty keyword list scores `1.0` (vacuously satisfied).
pub fn keyword_score(answer: &str, expected_keywords: &[String]) -> f64 {
    if expected_keywords.is_empty() {
        return 1.0;
    }
    let answer_lower = answer.to_lowercase();
    let matches = expected_keywords
        .iter()
        .filter(|kw| answer_lower.contains(&kw.to_lowercase()))
        .count();
    matches as f64 / expected_keywords.len() as f64
}

/// Run every case through the pipeline and collect outcomes.
pub async fn evaluate(
    engine: &QueryEngine,
    cases: &[EvalCase],
) -> Result<Vec<EvalOutcome>> {
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let result = engine
            .query(&case.question)
            .await
            .with_context(|| format!("query failed for eval case '{}'", case.question))?;

        outcomes.push(EvalOutcome {
            question: case.question.clone(),
            keyword_score: keyword_score(&result.answer, &case.expected_keywords),
            answer: result.answer,
            confidence: result.confidence,
            sources_count: result.sources.len(),
        });
    }

    Ok(outcomes)
}

/// `docsqa eval [--cases <path>]`.
pub async fn run_eval(engine: &QueryEngine, cases_path: Option<&Path>) -> Result<()> {
    let cases = match cases_path {
        Some(path) => load_cases(path)?,
        None => default_cases(),
    };

    let outcomes = evaluate(engine, &cases).await?;

    println!("eval ({} cases)", outcomes.len());
    for outcome in &outcomes {
        println!();
        println!("question:      {}", outcome.question);
        println!("keyword_score: {:.2}", outcome.keyword_score);
        println!("confidence:    {:.2}", outcome.confidence);
        println!("sources:       {}", outcome.sources_count);
    }

    let mean: f64 =
        outcomes.iter().map(|o| o.keyword_score).sum::<f64>() / outcomes.len().max(1) as f64;
    println!();
    println!("mean keyword_score: {:.2}", mean);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_score_half() {
        let expected = vec!["FastAPI".to_string(), "uvicorn".to_string()];
        let score = keyword_score("FastAPI makes building APIs easy.", &expected);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_score_case_insensitive() {
        let expected = vec!["FastAPI".to_string()];
        assert_eq!(keyword_score("fastapi is great", &expected), 1.0);
    }

    #[test]
    fn test_keyword_score_none_found() {
        let expected = vec!["kubernetes".to_string(), "docker".to_string()];
        assert_eq!(keyword_score("unrelated answer", &expected), 0.0);
    }

    #[test]
    fn test_keyword_score_all_found() {
        let expected = vec!["path".to_string(), "parameter".to_string()];
        assert_eq!(
            keyword_score("Use a path parameter like {item_id}.", &expected),
            1.0
        );
    }

    #[test]
    fn test_keyword_score_empty_list_vacuous() {
        assert_eq!(keyword_score("anything", &[]), 1.0);
    }

    #[test]
    fn test_load_cases_rejects_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cases.toml");
        std::fs::write(&path, "cases = []\n").unwrap();
        assert!(load_cases(&path).is_err());
    }

    #[test]
    fn test_load_cases_parses_toml() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cases.toml");
        std::fs::write(
            &path,
            r#"
[[cases]]
question = "How do I deploy?"
expected_keywords = ["uvicorn", "gunicorn"]
"#,
        )
        .unwrap();
        let cases = load_cases(&path).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].expected_keywords.len(), 2);
    }

    #[test]
    fn test_load_cases_rejects_keywordless_case() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cases.toml");
        std::fs::write(
            &path,
            r#"
[[cases]]
question = "How do I deploy?"
expected_keywords = []
"#,
        )
        .unwrap();
        assert!(load_cases(&path).is_err());
    }
}
