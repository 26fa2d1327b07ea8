//! Command implementations behind the `qca` binary.
//!
//! Each `run_*` function loads what it needs, does the work, and prints a
//! short summary on stdout ending in `ok`. Diagnostics go through `tracing`
//! and progress through a [`ProgressReporter`](crate::progress::ProgressReporter),
//! both on stderr.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::analysis::{prepare, run_analysis};
use crate::completion::create_service;
use crate::config::Config;
use crate::corpus::{collect_documents, default_include_globs};
use crate::error::format_bytes;
use crate::export::{formats_from_str, write_tables};
use crate::models::{
    mapping_questions_from_text, AnalysisMode, AnalysisRequest, AnalysisResult, DocumentContent,
    ModeSet, SourceDocument,
};
use crate::openaccess::{import_records, ImportSource, OpenAccessResolver};
use crate::progress::{format_elapsed, ProgressMode};
use crate::ris::parse_ris;
use crate::schema::{response_schema, SchemaDialect};
use crate::synthesis::synthesize;
use crate::tables::{all_tables, distinct_questions, mapping_rows, rows_for_question};

/// Options collected by `qca analyze`.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub modes: Vec<String>,
    pub phenomenological_question: Option<String>,
    pub thematic_question: Option<String>,
    pub questions: Vec<String>,
    pub questions_file: Option<PathBuf>,
    pub docs: Vec<PathBuf>,
    pub dirs: Vec<PathBuf>,
    pub ris: Vec<PathBuf>,
    pub out: Option<PathBuf>,
    pub format: Option<String>,
    pub save_json: Option<PathBuf>,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

/// Parses mode names; `all` selects every mode.
pub fn parse_modes(names: &[String]) -> Result<ModeSet> {
    let mut modes = ModeSet::empty();
    for name in names {
        if name.trim().eq_ignore_ascii_case("all") {
            return Ok(ModeSet::all());
        }
        let mode: AnalysisMode = name.parse().map_err(anyhow::Error::msg)?;
        modes.insert(mode);
    }
    Ok(modes)
}

/// Schema dialect understood by the configured provider.
pub fn dialect_for(provider: &str) -> SchemaDialect {
    match provider {
        "gemini" => SchemaDialect::Gemini,
        _ => SchemaDialect::JsonSchema,
    }
}

fn build_request(opts: &AnalyzeOptions) -> Result<AnalysisRequest> {
    let mut questions = opts.questions.clone();
    if let Some(path) = &opts.questions_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
        questions.extend(mapping_questions_from_text(&text));
    }
    Ok(AnalysisRequest {
        modes: parse_modes(&opts.modes)?,
        phenomenological_question: opts.phenomenological_question.clone(),
        thematic_question: opts.thematic_question.clone(),
        mapping_questions: questions,
    })
}

async fn gather_documents(cfg: &Config, opts: &AnalyzeOptions) -> Result<Vec<SourceDocument>> {
    let mut docs = collect_documents(opts.docs.as_slice(), opts.dirs.as_slice(), &default_include_globs())?;

    if !opts.ris.is_empty() {
        // A dry run makes no external call, so RIS records use their fallbacks.
        let resolver = if opts.dry_run {
            None
        } else {
            OpenAccessResolver::from_config(&cfg.import)?
        };
        for path in &opts.ris {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read RIS file: {}", path.display()))?;
            let records = parse_ris(&text);
            tracing::info!(file = %path.display(), records = records.len(), "parsed RIS file");
            docs.extend(
                import_records(resolver.as_ref(), &records)
                    .await
                    .into_iter()
                    .map(|imported| imported.document),
            );
        }
    }
    Ok(docs)
}

/// `qca analyze`: collect, validate, call once, export every table.
pub async fn run_analyze(cfg: &Config, opts: &AnalyzeOptions) -> Result<()> {
    let request = build_request(opts)?;
    // Questions are checked before any RIS record is fetched.
    request.validate()?;
    let docs = gather_documents(cfg, opts).await?;
    let limit = cfg.limits.max_corpus_bytes;

    if opts.dry_run {
        let prepared = prepare(&request, &docs, limit)?;
        let schema = prepared.schema.render(dialect_for(&cfg.completion.provider));
        println!("analyze (dry run)");
        println!("  modes: {}", prepared.modes);
        println!(
            "  documents: {} ({} of {})",
            docs.len(),
            format_bytes(prepared.corpus_bytes),
            format_bytes(limit)
        );
        println!();
        println!("--- instruction ---");
        println!("{}", prepared.instruction);
        println!("--- response schema ---");
        println!("{}", serde_json::to_string_pretty(&schema)?);
        println!("ok");
        return Ok(());
    }

    // Local checks run before the credential is read.
    prepare(&request, &docs, limit)?;
    let service = create_service(&cfg.completion)?;
    let reporter = opts.progress.reporter();

    println!("analyze {}", service.label());
    let outcome = run_analysis(
        service.as_ref(),
        &request,
        &docs,
        limit,
        cfg.completion.temperature,
        reporter.as_ref(),
    )
    .await?;

    println!("  modes: {}", request.modes);
    println!(
        "  documents: {} ({})",
        docs.len(),
        format_bytes(outcome.corpus_bytes)
    );
    println!("  elapsed: {}", format_elapsed(outcome.elapsed));
    let dangling = outcome.result.dangling_references();
    if !dangling.is_empty() {
        println!("  unresolved references: {}", dangling.len());
    }

    if let Some(path) = &opts.save_json {
        save_result(&outcome.result, path)?;
        println!("  saved result: {}", path.display());
    }

    let out = opts.out.clone().unwrap_or_else(|| PathBuf::from(&cfg.export.dir));
    let format = opts.format.as_deref().unwrap_or(&cfg.export.format);
    let written = write_tables(&all_tables(&outcome.result), &out, &formats_from_str(format)?)?;
    for path in &written {
        println!("  wrote {}", path.display());
    }
    println!("ok");
    Ok(())
}

fn save_result(result: &AnalysisResult, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Reads a result previously written with `--save-json`.
pub fn load_result(path: &Path) -> Result<AnalysisResult> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read result file: {}", path.display()))?;
    let result: AnalysisResult = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse result file: {}", path.display()))?;
    if result.is_empty() {
        bail!("{} holds no analysis groups", path.display());
    }
    Ok(result)
}

/// `qca export`: re-export a saved result.
pub fn run_export(cfg: &Config, result_path: &Path, out: Option<&Path>, format: Option<&str>) -> Result<()> {
    let result = load_result(result_path)?;
    let out = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&cfg.export.dir));
    let formats = formats_from_str(format.unwrap_or(&cfg.export.format))?;

    println!("export {}", result_path.display());
    for path in write_tables(&all_tables(&result), &out, &formats)? {
        println!("  wrote {}", path.display());
    }
    println!("ok");
    Ok(())
}

/// `qca synthesize`: cross-document synthesis for one mapping question.
pub async fn run_synthesize(cfg: &Config, result_path: &Path, question: &str, out: Option<&Path>) -> Result<()> {
    let result = load_result(result_path)?;
    let systematic = result
        .systematic
        .as_ref()
        .with_context(|| format!("{} has no systematic mapping", result_path.display()))?;
    let rows = mapping_rows(systematic);
    if rows_for_question(&rows, question).is_empty() {
        bail!(
            "no mapping answers for \"{}\"; questions in this result: {}",
            question.trim(),
            distinct_questions(&rows).join(" | ")
        );
    }

    let service = create_service(&cfg.completion)?;
    let synthesis = synthesize(service.as_ref(), systematic, question, cfg.completion.temperature).await?;

    match out {
        Some(path) => {
            std::fs::write(path, &synthesis.markdown)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("synthesize \"{}\"", synthesis.question);
            println!("  documents: {}", synthesis.documents);
            println!("  wrote {}", path.display());
            println!("ok");
        }
        None => println!("{}", synthesis.markdown),
    }
    Ok(())
}

/// `qca import-ris`: turn a RIS export into document files.
pub async fn run_import_ris(cfg: &Config, file: &Path, out: &Path, offline: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read RIS file: {}", file.display()))?;
    let records = parse_ris(&text);
    if records.is_empty() {
        bail!("{} contains no RIS records", file.display());
    }

    let resolver = if offline {
        None
    } else {
        let resolver = OpenAccessResolver::from_config(&cfg.import)?;
        if resolver.is_none() {
            tracing::warn!("[import].unpaywall_email is not set; writing bibliographic fallbacks only");
        }
        resolver
    };

    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create directory: {}", out.display()))?;

    println!("import-ris {}", file.display());
    let imported = import_records(resolver.as_ref(), &records).await;
    let mut pdfs = 0;
    for (i, item) in imported.iter().enumerate() {
        let path = write_document(&item.document, out)?;
        match &item.source {
            ImportSource::Pdf { url } => {
                pdfs += 1;
                println!("  [{}] pdf       {}  ({})", i + 1, path.display(), url);
            }
            ImportSource::Fallback { reason } => {
                println!("  [{}] fallback  {}  ({})", i + 1, path.display(), reason);
            }
        }
    }
    println!("  records: {}", imported.len());
    println!("  pdfs: {}", pdfs);
    println!("  fallbacks: {}", imported.len() - pdfs);
    println!("ok");
    Ok(())
}

fn write_document(doc: &SourceDocument, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(&doc.name);
    let written = match &doc.content {
        DocumentContent::Binary { bytes, .. } => std::fs::write(&path, bytes),
        DocumentContent::Text { text, .. } => std::fs::write(&path, text),
    };
    written.with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// `qca schema`: print the response schema for a mode selection.
pub fn run_schema(cfg: &Config, modes: &[String]) -> Result<()> {
    let modes = parse_modes(modes)?;
    if modes.is_empty() {
        bail!("at least one --mode is required");
    }
    let rendered = response_schema(modes).render(dialect_for(&cfg.completion.provider));
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}
