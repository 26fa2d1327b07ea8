//! Input collection: turns paths on disk into [`SourceDocument`]s and
//! enforces the corpus-size precondition.
//!
//! PDFs are kept as raw bytes; `.txt` / `.md` files become text documents
//! whose origin label is the file path. Directory scans are filtered by
//! include globs and sorted by relative path so runs are reproducible.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::AnalysisError;
use crate::models::SourceDocument;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Default include patterns for directory scans.
pub fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.PDF".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

/// Maps a file extension to the MIME kind the pipeline understands.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "md" | "markdown" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Loads one file as a document named after its file name.
pub fn load_document(path: &Path) -> Result<SourceDocument> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    match mime_for_path(path) {
        Some(MIME_PDF) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read document: {}", path.display()))?;
            Ok(SourceDocument::binary(name, bytes, MIME_PDF))
        }
        Some(_) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read document: {}", path.display()))?;
            Ok(SourceDocument::text(name, text, format!("file {}", path.display())))
        }
        None => bail!(
            "Unsupported document type: {} (expected .pdf, .txt or .md)",
            path.display()
        ),
    }
}

/// Walks `root` and loads every file matching `include_globs`.
pub fn scan_directory(root: &Path, include_globs: &[String]) -> Result<Vec<SourceDocument>> {
    if !root.is_dir() {
        bail!("Document directory does not exist: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;
    let exclude_set = build_globset(&["**/.git/**".to_string(), "**/.*".to_string()])?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        if mime_for_path(path).is_none() {
            tracing::debug!(path = %path.display(), "skipping file with unsupported extension");
            continue;
        }
        found.push((rel_str, path.to_path_buf()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));

    found
        .into_iter()
        .map(|(_, path)| load_document(&path))
        .collect()
}

/// Loads explicit files first, in the order given, then each directory in turn.
pub fn collect_documents(
    files: &[impl AsRef<Path>],
    dirs: &[impl AsRef<Path>],
    include_globs: &[String],
) -> Result<Vec<SourceDocument>> {
    let mut docs = Vec::new();
    for file in files {
        docs.push(load_document(file.as_ref())?);
    }
    for dir in dirs {
        docs.extend(scan_directory(dir.as_ref(), include_globs)?);
    }
    warn_duplicate_names(&docs);
    Ok(docs)
}

/// Sum of document sizes.
pub fn corpus_bytes(docs: &[SourceDocument]) -> u64 {
    docs.iter().map(SourceDocument::byte_len).sum()
}

/// Rejects an empty corpus, or one whose total size exceeds `limit_bytes`.
///
/// Returns the total size on success.
pub fn check_corpus(docs: &[SourceDocument], limit_bytes: u64) -> Result<u64, AnalysisError> {
    if docs.is_empty() {
        return Err(AnalysisError::EmptyCorpus);
    }
    let total = corpus_bytes(docs);
    if total > limit_bytes {
        return Err(AnalysisError::CorpusTooLarge {
            total_bytes: total,
            limit_bytes,
        });
    }
    Ok(total)
}

/// Text of a text document prefixed with a header naming the document and
/// its origin, so the service can attribute quotes to it.
pub fn text_with_header(name: &str, origin: &str, text: &str) -> String {
    format!(
        "===== DOCUMENT: {} =====\n(origin: {})\n\n{}\n===== END OF DOCUMENT: {} =====",
        name, origin, text, name
    )
}

fn warn_duplicate_names(docs: &[SourceDocument]) {
    let mut seen = std::collections::HashSet::new();
    for doc in docs {
        if !seen.insert(doc.name.as_str()) {
            tracing::warn!(
                name = %doc.name,
                "two documents share a name; their rows will be indistinguishable in exports"
            );
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
