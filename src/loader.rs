//! Filesystem corpus loader.
//!
//! Recursively scans a documentation tree for markdown files, splits each
//! file into per-heading fragments, and tags every fragment with provenance
//! metadata (source path, file type, section).
//!
//! Failure policy: a single unreadable file is logged and skipped — the scan
//! always returns whatever was successfully loaded. Only a missing corpus
//! root is an error.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::models::{Document, GENERAL_SECTION};

pub fn load_documents(corpus: &CorpusConfig) -> Result<Vec<Document>> {
    let root = &corpus.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&corpus.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(corpus.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable directory entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push((path.to_path_buf(), rel_str));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.1.cmp(&b.1));

    let mut documents = Vec::new();

    for (path, rel_str) in files {
        let body = match std::fs::read_to_string(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                eprintln!("Warning: could not read {}: {}", path.display(), e);
                continue;
            }
        };

        let section = extract_section(&rel_str);
        let source = path.to_string_lossy().to_string();

        for fragment in split_markdown(&body) {
            documents.push(Document {
                text: fragment,
                source: source.clone(),
                file_type: "markdown".to_string(),
                section: section.clone(),
            });
        }
    }

    Ok(documents)
}

/// Split a markdown body into fragments at ATX heading boundaries.
///
/// Each heading starts a new fragment containing the heading line and
/// everything up to the next heading; a preamble before the first heading
/// is its own fragment. Whitespace-only fragments are dropped. A body with
/// no headings yields a single fragment.
pub fn split_markdown(body: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();

    for line in body.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            fragments.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        fragments.push(current);
    }

    fragments
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

/// Derive a section name from a root-relative file path.
///
/// The section is the file's parent directory name; files directly under
/// the corpus root fall back to [`GENERAL_SECTION`].
pub fn extract_section(relative_path: &str) -> String {
    Path::new(relative_path)
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| GENERAL_SECTION.to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorpusConfig;
    use std::fs;

    fn corpus_config(root: &Path) -> CorpusConfig {
        CorpusConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_section_from_parent_dir() {
        assert_eq!(extract_section("guides/intro.md"), "guides");
        assert_eq!(extract_section("tutorial/advanced/body.md"), "advanced");
    }

    #[test]
    fn test_section_general_for_top_level() {
        assert_eq!(extract_section("intro.md"), GENERAL_SECTION);
    }

    #[test]
    fn test_split_no_headings_single_fragment() {
        let fragments = split_markdown("Just a plain paragraph.\n\nAnd another.");
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].contains("plain paragraph"));
    }

    #[test]
    fn test_split_on_headings() {
        let body = "# First\n\ncontent one\n\n## Second\n\ncontent two\n";
        let fragments = split_markdown(body);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].starts_with("# First"));
        assert!(fragments[1].starts_with("## Second"));
        assert!(fragments[1].contains("content two"));
    }

    #[test]
    fn test_split_preamble_kept() {
        let body = "intro text\n\n# Heading\n\nbody\n";
        let fragments = split_markdown(body);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "intro text");
    }

    #[test]
    fn test_split_empty_body() {
        assert!(split_markdown("").is_empty());
        assert!(split_markdown("\n\n  \n").is_empty());
    }

    #[test]
    fn test_load_tags_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        let guides = tmp.path().join("guides");
        fs::create_dir_all(&guides).unwrap();
        fs::write(guides.join("intro.md"), "# Intro\n\nGuide content.").unwrap();
        fs::write(tmp.path().join("readme.md"), "Top-level notes.").unwrap();

        let docs = load_documents(&corpus_config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 2);

        let guide = docs
            .iter()
            .find(|d| d.source.ends_with("intro.md"))
            .unwrap();
        assert_eq!(guide.section, "guides");
        assert_eq!(guide.file_type, "markdown");

        let readme = docs
            .iter()
            .find(|d| d.source.ends_with("readme.md"))
            .unwrap();
        assert_eq!(readme.section, GENERAL_SECTION);
    }

    #[test]
    fn test_load_skips_unreadable_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("good.md"), "readable content").unwrap();
        // Invalid UTF-8 makes read_to_string fail; the file must be skipped,
        // not abort the scan.
        fs::write(tmp.path().join("bad.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let docs = load_documents(&corpus_config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].source.ends_with("good.md"));
    }

    #[test]
    fn test_load_missing_root_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = load_documents(&corpus_config(&missing)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_load_only_markdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("doc.md"), "markdown").unwrap();
        fs::write(tmp.path().join("notes.txt"), "plain text").unwrap();

        let docs = load_documents(&corpus_config(tmp.path())).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].source.ends_with("doc.md"));
    }
}
