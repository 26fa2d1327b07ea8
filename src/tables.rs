//! Flattening results into row-oriented tables.
//!
//! Every result group becomes one [`Table`] whose `name` is the fixed export
//! file stem. Rows keep the order in which the service returned records;
//! nothing is sorted.
//!
//! The systematic-mapping group has two shapes:
//!
//! - **long**: one row per (document, question) answer, the lossless form;
//! - **wide**: one row per document, one column per question, each cell a
//!   formatted composite of answer, evidence and page.

use std::collections::HashMap;

use crate::models::{AnalysisResult, PhenomenologicalResult, SystematicResult, ThematicResult};

/// Cell text when a document has no answer for a question.
pub const MISSING_CELL: &str = "—";
/// Joins repeated answers of one document to one question inside a wide cell.
pub const DUPLICATE_SEPARATOR: &str = "\n\n---\n\n";

pub const SENSE_UNITS: &str = "unidades_sentido";
pub const MEANING_UNITS: &str = "unidades_significado";
pub const CATEGORIES: &str = "categorias";
pub const CODES: &str = "codigos_tematicos";
pub const THEMES: &str = "temas";
pub const MAPPING_LONG: &str = "mapeamento_sistematico";
pub const MAPPING_WIDE: &str = "mapeamento_quadro";

/// Every table name, in export order.
pub const TABLE_NAMES: [&str; 7] = [
    SENSE_UNITS,
    MEANING_UNITS,
    CATEGORIES,
    CODES,
    THEMES,
    MAPPING_LONG,
    MAPPING_WIDE,
];

/// A flat, exportable table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn new(name: &'static str, headers: &[&str]) -> Self {
        Self {
            name,
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One long-form systematic-mapping fact.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRow {
    pub document: String,
    pub question: String,
    pub answer: String,
    pub evidence: String,
    pub page: Option<u32>,
}

/// Header of the long-form mapping table.
pub const MAPPING_HEADERS: [&str; 5] = ["Document", "Question", "Answer", "Evidence", "Page"];

/// Page as shown inside composite cells and prompts; `null` when unknown.
pub fn page_label(page: Option<u32>) -> String {
    match page {
        Some(p) => p.to_string(),
        None => "null".to_string(),
    }
}

/// Page as a plain table cell; empty when unknown.
pub fn page_cell(page: Option<u32>) -> String {
    page.map(|p| p.to_string()).unwrap_or_default()
}

/// Flattens the mapping group to long-form rows, document order then answer order.
pub fn mapping_rows(result: &SystematicResult) -> Vec<MappingRow> {
    result
        .documents
        .iter()
        .flat_map(|doc| {
            doc.answers.iter().map(move |a| MappingRow {
                document: doc.document.clone(),
                question: a.question.clone(),
                answer: a.answer.clone(),
                evidence: a.literal_evidence.clone(),
                page: a.page,
            })
        })
        .collect()
}

pub fn mapping_long_table(rows: &[MappingRow]) -> Table {
    let mut table = Table::new(MAPPING_LONG, &MAPPING_HEADERS);
    for row in rows {
        table.rows.push(vec![
            row.document.clone(),
            row.question.clone(),
            row.answer.clone(),
            row.evidence.clone(),
            page_cell(row.page),
        ]);
    }
    table
}

/// Composite wide-form cell: answer, quoted evidence, page.
pub fn format_cell(row: &MappingRow) -> String {
    format!(
        "Answer: {}\n\nEvidence: \"{}\" (Page {})",
        row.answer,
        row.evidence,
        page_label(row.page)
    )
}

/// Document names of the mapping group in returned order, without repeats.
///
/// Includes documents whose answer list is empty.
pub fn mapping_documents(result: &SystematicResult) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for doc in &result.documents {
        if !out.iter().any(|seen| seen == &doc.document) {
            out.push(doc.document.clone());
        }
    }
    out
}

/// Long → wide pivot keyed by document (rows) × question (columns).
///
/// Columns are the union of questions in first-seen order; rows are
/// documents in first-seen order. A document that answers one question
/// several times gets those cells joined by [`DUPLICATE_SEPARATOR`]; a
/// missing answer renders as [`MISSING_CELL`]. Questions are matched after
/// trimming surrounding whitespace.
pub fn pivot_wide(rows: &[MappingRow]) -> Table {
    pivot_wide_with_documents(&[], rows)
}

/// Like [`pivot_wide`], but the row order starts from `documents`, so a
/// document without any answer still gets a row of [`MISSING_CELL`]s.
pub fn pivot_wide_with_documents(documents: &[String], rows: &[MappingRow]) -> Table {
    let mut questions: Vec<String> = Vec::new();
    let mut question_index: HashMap<String, usize> = HashMap::new();
    let seed = documents;
    let mut documents: Vec<String> = Vec::new();
    let mut document_index: HashMap<String, usize> = HashMap::new();
    for doc in seed {
        document_index.entry(doc.clone()).or_insert_with(|| {
            documents.push(doc.clone());
            documents.len() - 1
        });
    }
    let mut cells: HashMap<(usize, usize), Vec<String>> = HashMap::new();

    for row in rows {
        let q_key = row.question.trim().to_string();
        let qi = *question_index.entry(q_key.clone()).or_insert_with(|| {
            questions.push(q_key);
            questions.len() - 1
        });
        let di = *document_index.entry(row.document.clone()).or_insert_with(|| {
            documents.push(row.document.clone());
            documents.len() - 1
        });
        cells.entry((di, qi)).or_default().push(format_cell(row));
    }

    let mut headers = vec!["Document".to_string()];
    headers.extend(questions.iter().cloned());

    let rows = documents
        .iter()
        .enumerate()
        .map(|(di, doc)| {
            let mut line = vec![doc.clone()];
            for qi in 0..questions.len() {
                line.push(match cells.get(&(di, qi)) {
                    Some(parts) => parts.join(DUPLICATE_SEPARATOR),
                    None => MISSING_CELL.to_string(),
                });
            }
            line
        })
        .collect();

    Table {
        name: MAPPING_WIDE,
        headers,
        rows,
    }
}

/// Mapping rows for one question, matched after trimming.
pub fn rows_for_question<'a>(rows: &'a [MappingRow], question: &str) -> Vec<&'a MappingRow> {
    let wanted = question.trim();
    rows.iter().filter(|r| r.question.trim() == wanted).collect()
}

/// Questions in first-seen order, without repeats.
pub fn distinct_questions(rows: &[MappingRow]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for row in rows {
        let q = row.question.trim();
        if !out.iter().any(|seen| seen == q) {
            out.push(q.to_string());
        }
    }
    out
}

fn phenomenological_tables(p: &PhenomenologicalResult) -> [Table; 3] {
    let mut sense = Table::new(
        SENSE_UNITS,
        &["Id", "Document", "Page", "Literal quote", "Context", "Rationale"],
    );
    for u in &p.sense_units {
        sense.rows.push(vec![
            u.id.clone(),
            u.document.clone(),
            page_cell(u.page),
            u.literal_quote.clone(),
            u.summarized_context.clone().unwrap_or_default(),
            u.rationale.clone().unwrap_or_default(),
        ]);
    }

    let mut meaning = Table::new(
        MEANING_UNITS,
        &["Id", "Document", "Original excerpt", "Synthesis"],
    );
    for u in &p.meaning_units {
        meaning.rows.push(vec![
            u.id.clone(),
            u.document.clone(),
            u.original_excerpt.clone(),
            u.synthesis.clone(),
        ]);
    }

    let mut categories = Table::new(CATEGORIES, &["Category", "Description", "Related units"]);
    for c in &p.categories {
        categories.rows.push(vec![
            c.name.clone(),
            c.description.clone(),
            c.related_unit_ids.join("; "),
        ]);
    }

    [sense, meaning, categories]
}

fn thematic_tables(t: &ThematicResult) -> [Table; 2] {
    let mut codes = Table::new(
        CODES,
        &["Id", "Document", "Page", "Literal excerpt", "Code", "Definition"],
    );
    for c in &t.codes {
        codes.rows.push(vec![
            c.id.clone(),
            c.document.clone(),
            page_cell(c.page),
            c.literal_excerpt.clone(),
            c.code_name.clone(),
            c.code_definition.clone(),
        ]);
    }

    let mut themes = Table::new(
        THEMES,
        &["Theme", "Description", "Related codes", "Interpretation"],
    );
    for th in &t.themes {
        themes.rows.push(vec![
            th.name.clone(),
            th.description.clone(),
            th.related_code_ids.join("; "),
            th.interpretation.clone(),
        ]);
    }

    [codes, themes]
}

/// All tables for the groups present in `result`, in export order.
///
/// A group that is present but empty still yields header-only tables.
pub fn all_tables(result: &AnalysisResult) -> Vec<Table> {
    let mut tables = Vec::new();
    if let Some(p) = &result.phenomenological {
        tables.extend(phenomenological_tables(p));
    }
    if let Some(t) = &result.thematic {
        tables.extend(thematic_tables(t));
    }
    if let Some(s) = &result.systematic {
        let rows = mapping_rows(s);
        tables.push(mapping_long_table(&rows));
        tables.push(pivot_wide_with_documents(&mapping_documents(s), &rows));
    }
    tables
}

/// One table by export name, if its group is present.
pub fn table_by_name(result: &AnalysisResult, name: &str) -> Option<Table> {
    all_tables(result).into_iter().find(|t| t.name == name)
}
