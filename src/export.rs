//! Delimited-text export of flat tables.
//!
//! Two independent formats:
//!
//! - **CSV**: comma-delimited, RFC 4180 quoting, CRLF records. Files get a
//!   UTF-8 byte-order mark so spreadsheet applications detect the encoding.
//! - **TSV**: tab-delimited, `\n` records, meant for pasting into a
//!   spreadsheet. Fields holding tabs, quotes or newlines are quoted.
//!
//! File names are the table's fixed name plus `.csv` / `.tsv`.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::tables::{MappingRow, Table, MAPPING_HEADERS};

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }

    fn delimiter(&self) -> u8 {
        match self {
            ExportFormat::Csv => b',',
            ExportFormat::Tsv => b'\t',
        }
    }

    fn terminator(&self) -> csv::Terminator {
        match self {
            ExportFormat::Csv => csv::Terminator::CRLF,
            ExportFormat::Tsv => csv::Terminator::Any(b'\n'),
        }
    }

    /// Parses a single format name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            other => bail!("Unknown export format: '{}'. Must be csv or tsv.", other),
        }
    }
}

/// Expands `csv`, `tsv` or `both`.
pub fn formats_from_str(name: &str) -> Result<Vec<ExportFormat>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "both" => Ok(vec![ExportFormat::Csv, ExportFormat::Tsv]),
        other => Ok(vec![ExportFormat::parse(other)?]),
    }
}

/// Serializes a table, header first.
pub fn to_delimited(table: &Table, format: ExportFormat) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(format.delimiter())
        .terminator(format.terminator())
        .from_writer(Vec::new());

    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush {} writer: {}", format.extension(), e))?;
    Ok(String::from_utf8(bytes)?)
}

/// Writes one table into `dir`, returning the file path.
pub fn write_table(table: &Table, dir: &Path, format: ExportFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory: {}", dir.display()))?;
    let path = dir.join(format!("{}.{}", table.name, format.extension()));

    let mut content = to_delimited(table, format)?;
    if format == ExportFormat::Csv {
        content.insert_str(0, UTF8_BOM);
    }

    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Writes every table in every format.
pub fn write_tables(tables: &[Table], dir: &Path, formats: &[ExportFormat]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(tables.len() * formats.len());
    for table in tables {
        for format in formats {
            written.push(write_table(table, dir, *format)?);
        }
    }
    Ok(written)
}

/// Reads a long-form mapping table back from CSV text.
///
/// Accepts the byte-order mark written by [`write_table`]; an empty page
/// cell (or `null`) reads as an unknown page.
pub fn parse_mapping_csv(text: &str) -> Result<Vec<MappingRow>> {
    parse_mapping(text, ExportFormat::Csv)
}

/// Reads a long-form mapping table in either format.
pub fn parse_mapping(text: &str, format: ExportFormat) -> Result<Vec<MappingRow>> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter())
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let expected: Vec<&str> = MAPPING_HEADERS.to_vec();
    let actual: Vec<&str> = headers.iter().map(str::trim).collect();
    if actual != expected {
        bail!(
            "not a long-form mapping table: expected columns {:?}, found {:?}",
            expected,
            actual
        );
    }

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed row {}", i + 2))?;
        let field = |idx: usize| record.get(idx).unwrap_or_default().to_string();
        let page_text = field(4);
        let page = match page_text.trim() {
            "" | "null" => None,
            p => Some(
                p.parse::<u32>()
                    .with_context(|| format!("row {}: invalid page '{}'", i + 2, p))?,
            ),
        };
        rows.push(MappingRow {
            document: field(0),
            question: field(1),
            answer: field(2),
            evidence: field(3),
            page,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::mapping_long_table;
    use tempfile::TempDir;

    fn sample_rows() -> Vec<MappingRow> {
        vec![
            MappingRow {
                document: "A, the first.pdf".into(),
                question: "What is the study's objective?".into(),
                answer: "To measure \"X\"".into(),
                evidence: "we aim\nto measure X".into(),
                page: Some(3),
            },
            MappingRow {
                document: "B.pdf".into(),
                question: "What is the study's objective?".into(),
                answer: "To survey Y".into(),
                evidence: "this survey of Y".into(),
                page: None,
            },
        ]
    }

    #[test]
    fn csv_round_trip_preserves_tuples() {
        let rows = sample_rows();
        let csv_text = to_delimited(&mapping_long_table(&rows), ExportFormat::Csv).unwrap();
        let parsed = parse_mapping_csv(&csv_text).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn csv_quotes_commas_and_quotes() {
        let csv_text = to_delimited(&mapping_long_table(&sample_rows()), ExportFormat::Csv).unwrap();
        assert!(csv_text.contains("\"A, the first.pdf\""));
        assert!(csv_text.contains("\"To measure \"\"X\"\"\""));
        assert!(csv_text.starts_with("Document,Question,Answer,Evidence,Page\r\n"));
    }

    #[test]
    fn tsv_is_tab_delimited_and_newline_terminated() {
        let tsv = to_delimited(&mapping_long_table(&sample_rows()), ExportFormat::Tsv).unwrap();
        let first_line = tsv.lines().next().unwrap();
        assert_eq!(first_line, "Document\tQuestion\tAnswer\tEvidence\tPage");
        assert!(tsv.ends_with('\n'));
        assert!(!tsv.contains('\r'));
        let parsed = parse_mapping(&tsv, ExportFormat::Tsv).unwrap();
        assert_eq!(parsed, sample_rows());
    }

    #[test]
    fn written_csv_has_bom_and_still_parses() {
        let tmp = TempDir::new().unwrap();
        let table = mapping_long_table(&sample_rows());
        let path = write_table(&table, tmp.path(), ExportFormat::Csv).unwrap();
        assert!(path.ends_with("mapeamento_sistematico.csv"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(UTF8_BOM));
        assert_eq!(parse_mapping_csv(&text).unwrap().len(), 2);
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = parse_mapping_csv("Id,Document\n1,A\n").unwrap_err();
        assert!(err.to_string().contains("not a long-form mapping table"));
    }

    #[test]
    fn both_expands_to_two_formats() {
        assert_eq!(
            formats_from_str("both").unwrap(),
            vec![ExportFormat::Csv, ExportFormat::Tsv]
        );
        assert!(formats_from_str("xlsx").is_err());
    }
}
