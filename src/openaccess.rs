//! Bibliographic import: RIS records → documents.
//!
//! For each record with a DOI, the Unpaywall metadata endpoint is asked for
//! open-access PDF locations, and the first location whose body starts with
//! the `%PDF` signature becomes a binary document. Records without a DOI, or
//! whose lookups fail, fall back to a text document built from title, DOI
//! and abstract.
//!
//! Records are processed one at a time; a failure never aborts the batch.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::config::ImportConfig;
use crate::corpus::MIME_PDF;
use crate::models::SourceDocument;
use crate::ris::RisRecord;

/// How an imported document was obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportSource {
    /// Open-access PDF downloaded from `url`.
    Pdf { url: String },
    /// Synthetic text document; `reason` says why no PDF was used.
    Fallback { reason: String },
}

#[derive(Debug, Clone)]
pub struct ImportedDocument {
    pub document: SourceDocument,
    pub source: ImportSource,
}

/// True when `bytes` carries the PDF file signature.
pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF")
}

/// Text document standing in for a record whose PDF could not be fetched.
pub fn fallback_document(record: &RisRecord, index: usize) -> SourceDocument {
    let title = record.title().unwrap_or("(untitled)");
    let doi = record.doi().unwrap_or_else(|| "(none)".to_string());
    let abstract_text = record.abstract_text().unwrap_or("(no abstract available)");

    let body = format!(
        "Title: {}\nDOI: {}\nAbstract: {}",
        title, doi, abstract_text
    );

    SourceDocument::text(
        document_name(record, index, "txt"),
        body,
        "bibliographic record (title, DOI and abstract only; no full text)",
    )
}

/// Stable file-like name for a record: DOI-derived when present.
pub fn document_name(record: &RisRecord, index: usize, ext: &str) -> String {
    match record.doi() {
        Some(doi) => {
            let safe: String = doi
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
                .collect();
            format!("{}.{}", safe, ext)
        }
        None => format!("ris_record_{:03}.{}", index + 1, ext),
    }
}

/// PDF URLs listed in an Unpaywall response, best location first, without repeats.
pub fn pdf_candidates(json: &serde_json::Value) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let best = json.get("best_oa_location");
    let others = json
        .get("oa_locations")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten();

    for location in best.into_iter().chain(others) {
        if let Some(url) = location.get("url_for_pdf").and_then(|u| u.as_str()) {
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Resolves DOIs to open-access PDFs through Unpaywall.
pub struct OpenAccessResolver {
    client: reqwest::Client,
    base_url: String,
    email: String,
}

impl OpenAccessResolver {
    /// Builds a resolver; `None` when no contact email is configured
    /// (Unpaywall refuses anonymous requests).
    pub fn from_config(config: &ImportConfig) -> Result<Option<Self>> {
        let email = match &config.unpaywall_email {
            Some(e) if !e.trim().is_empty() => e.trim().to_string(),
            _ => return Ok(None),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("qca/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Some(Self {
            client,
            base_url: config.unpaywall_base_url.trim_end_matches('/').to_string(),
            email,
        }))
    }

    async fn lookup(&self, doi: &str) -> Result<Vec<String>> {
        let url = format!("{}/{}", self.base_url, doi);
        let resp = self
            .client
            .get(&url)
            .query(&[("email", self.email.as_str())])
            .send()
            .await
            .with_context(|| format!("open-access lookup failed for {}", doi))?;
        if !resp.status().is_success() {
            bail!("open-access lookup for {} returned {}", doi, resp.status());
        }
        let json: serde_json::Value = resp.json().await?;
        Ok(pdf_candidates(&json))
    }

    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            bail!("{} returned {}", url, resp.status());
        }
        let bytes = resp.bytes().await?;
        if !is_pdf(&bytes) {
            bail!("{} did not return a PDF", url);
        }
        Ok(bytes.to_vec())
    }

    /// Tries each candidate PDF for `record`; errors describe why none worked.
    pub async fn resolve_pdf(&self, record: &RisRecord, index: usize) -> Result<ImportedDocument> {
        let doi = match record.doi() {
            Some(doi) => doi,
            None => bail!("record has no DOI"),
        };

        let candidates = self.lookup(&doi).await?;
        if candidates.is_empty() {
            bail!("no open-access PDF location for {}", doi);
        }

        let mut last_err = None;
        for url in candidates {
            match self.fetch_pdf(&url).await {
                Ok(bytes) => {
                    tracing::info!(doi = %doi, url = %url, bytes = bytes.len(), "fetched open-access PDF");
                    return Ok(ImportedDocument {
                        document: SourceDocument::binary(
                            document_name(record, index, "pdf"),
                            bytes,
                            MIME_PDF,
                        ),
                        source: ImportSource::Pdf { url },
                    });
                }
                Err(e) => {
                    tracing::debug!(doi = %doi, error = %e, "PDF candidate rejected");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no usable PDF for {}", doi)))
    }
}

/// Turns every record into a document, fetching PDFs when a resolver is given.
pub async fn import_records(
    resolver: Option<&OpenAccessResolver>,
    records: &[RisRecord],
) -> Vec<ImportedDocument> {
    let mut out = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let reason = match resolver {
            None => "offline import".to_string(),
            Some(resolver) => match resolver.resolve_pdf(record, index).await {
                Ok(imported) => {
                    out.push(imported);
                    continue;
                }
                Err(e) => e.to_string(),
            },
        };
        tracing::info!(record = index + 1, reason = %reason, "using bibliographic fallback");
        out.push(ImportedDocument {
            document: fallback_document(record, index),
            source: ImportSource::Fallback { reason },
        });
    }
    out
}
