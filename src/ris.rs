//! RIS bibliographic record parsing.
//!
//! RIS is line oriented: `TG  - value`, one tag per line, each record closed
//! by an `ER  -` line. Repeated tags within a record are joined with
//! `" ; "`. Lines without a tag continue the previous tag's value.
//!
//! Only `TI` (title), `DO` (DOI) and `AB` (abstract) are consumed
//! downstream, but every tag is kept.

use std::collections::HashMap;

/// Joiner for repeated tags.
pub const REPEAT_SEPARATOR: &str = " ; ";

/// One RIS record: tag → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RisRecord {
    fields: HashMap<String, String>,
}

impl RisRecord {
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields
            .get(tag)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.get("TI").or_else(|| self.get("T1"))
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.get("AB").or_else(|| self.get("N2"))
    }

    /// DOI without resolver prefixes. With several `DO` lines, the first wins.
    pub fn doi(&self) -> Option<String> {
        let raw = self.get("DO")?;
        let first = raw.split(REPEAT_SEPARATOR).next().unwrap_or(raw);
        let doi = normalize_doi(first);
        if doi.is_empty() {
            None
        } else {
            Some(doi)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, tag: &str, value: &str) {
        let value = value.trim();
        self.fields
            .entry(tag.to_string())
            .and_modify(|existing| {
                if existing.is_empty() {
                    existing.push_str(value);
                } else if !value.is_empty() {
                    existing.push_str(REPEAT_SEPARATOR);
                    existing.push_str(value);
                }
            })
            .or_insert_with(|| value.to_string());
    }

    fn continue_value(&mut self, tag: &str, line: &str) {
        if let Some(existing) = self.fields.get_mut(tag) {
            let line = line.trim();
            if !line.is_empty() {
                if !existing.is_empty() {
                    existing.push(' ');
                }
                existing.push_str(line);
            }
        }
    }
}

/// Parses RIS text into records. Input after the last `ER` is kept as a
/// final record if it carries any tags.
pub fn parse_ris(input: &str) -> Vec<RisRecord> {
    let mut records = Vec::new();
    let mut current = RisRecord::default();
    let mut last_tag: Option<String> = None;

    for raw_line in input.lines() {
        let line = raw_line.trim_start_matches('\u{feff}').trim_end();
        if line.trim().is_empty() {
            continue;
        }

        match split_tag(line) {
            Some(("ER", _)) => {
                if !current.is_empty() {
                    records.push(std::mem::take(&mut current));
                }
                last_tag = None;
            }
            Some((tag, value)) => {
                current.push(tag, value);
                last_tag = Some(tag.to_string());
            }
            None => {
                if let Some(tag) = &last_tag {
                    current.continue_value(tag, line);
                }
            }
        }
    }

    if !current.is_empty() {
        records.push(current);
    }

    records
}

/// Recognises `XX  - value` (two uppercase letters/digits, then a dash).
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let tag = line.get(..2)?;
    if !tag.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return None;
    }
    let rest = line.get(2..)?.trim_start_matches(' ');
    let value = rest.strip_prefix('-')?;
    Some((tag, value.strip_prefix(' ').unwrap_or(value)))
}

/// Strips `https://doi.org/`, `doi:` and surrounding whitespace.
pub fn normalize_doi(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let prefixes = [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ];
    for prefix in prefixes {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim().to_string();
        }
    }
    trimmed.to_string()
}
