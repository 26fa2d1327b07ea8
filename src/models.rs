//! Core data models used throughout the analysis pipeline.
//!
//! Input side: [`SourceDocument`] and [`AnalysisRequest`]. Output side: the
//! per-mode result groups gathered in [`AnalysisResult`]. Output records
//! carry the field names of the external JSON contract through serde
//! renames; the Rust field names describe what each field holds.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AnalysisError;

// ============ Input ============

/// A document collected for one analysis run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub name: String,
    pub content: DocumentContent,
}

/// Body of a [`SourceDocument`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    /// Raw bytes sent as-is, tagged with a MIME type (e.g. `application/pdf`).
    Binary { bytes: Vec<u8>, mime: String },
    /// Plain text with a label describing where it came from.
    Text { text: String, origin: String },
}

impl SourceDocument {
    pub fn binary(name: impl Into<String>, bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: DocumentContent::Binary {
                bytes,
                mime: mime.into(),
            },
        }
    }

    pub fn text(name: impl Into<String>, text: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: DocumentContent::Text {
                text: text.into(),
                origin: origin.into(),
            },
        }
    }

    /// Size counted against the corpus ceiling.
    pub fn byte_len(&self) -> u64 {
        match &self.content {
            DocumentContent::Binary { bytes, .. } => bytes.len() as u64,
            DocumentContent::Text { text, .. } => text.len() as u64,
        }
    }
}

/// One of the three analysis capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Phenomenological,
    Thematic,
    Systematic,
}

impl AnalysisMode {
    /// Every mode, in composition order.
    pub const ALL: [AnalysisMode; 3] = [
        AnalysisMode::Phenomenological,
        AnalysisMode::Thematic,
        AnalysisMode::Systematic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Phenomenological => "phenomenological",
            AnalysisMode::Thematic => "thematic",
            AnalysisMode::Systematic => "systematic",
        }
    }

    fn bit(self) -> u8 {
        match self {
            AnalysisMode::Phenomenological => 0b001,
            AnalysisMode::Thematic => 0b010,
            AnalysisMode::Systematic => 0b100,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "phenomenological" | "phenomenology" => Ok(AnalysisMode::Phenomenological),
            "thematic" => Ok(AnalysisMode::Thematic),
            "systematic" | "mapping" => Ok(AnalysisMode::Systematic),
            other => Err(format!(
                "unknown analysis mode '{}'. Must be phenomenological, thematic, or systematic.",
                other
            )),
        }
    }
}

/// The set of active capabilities for a run.
///
/// Iteration always yields modes in the fixed order
/// Phenomenological → Thematic → Systematic, whatever order they were added in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeSet {
    bits: u8,
}

impl ModeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        AnalysisMode::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, mode: AnalysisMode) {
        self.bits |= mode.bit();
    }

    pub fn with(mut self, mode: AnalysisMode) -> Self {
        self.insert(mode);
        self
    }

    pub fn contains(&self, mode: AnalysisMode) -> bool {
        self.bits & mode.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = AnalysisMode> + '_ {
        AnalysisMode::ALL.into_iter().filter(|m| self.contains(*m))
    }

    /// The only active mode, when exactly one is selected.
    pub fn single(&self) -> Option<AnalysisMode> {
        if self.len() == 1 {
            self.iter().next()
        } else {
            None
        }
    }
}

impl FromIterator<AnalysisMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = AnalysisMode>>(iter: I) -> Self {
        let mut set = ModeSet::empty();
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|m| m.as_str()).collect();
        f.write_str(&names.join("+"))
    }
}

/// What the user asked for: active modes plus the questions each one needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisRequest {
    pub modes: ModeSet,
    pub phenomenological_question: Option<String>,
    pub thematic_question: Option<String>,
    pub mapping_questions: Vec<String>,
}

impl AnalysisRequest {
    /// Checks that every selected mode has its question(s).
    ///
    /// Blank strings count as missing. For the systematic mode, blank entries
    /// in the list are ignored and at least one non-blank question must remain.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.modes.is_empty() {
            return Err(AnalysisError::NoModes);
        }
        if self.modes.contains(AnalysisMode::Phenomenological)
            && is_blank(self.phenomenological_question.as_deref())
        {
            return Err(AnalysisError::MissingQuestion {
                field: "phenomenological_question",
            });
        }
        if self.modes.contains(AnalysisMode::Thematic)
            && is_blank(self.thematic_question.as_deref())
        {
            return Err(AnalysisError::MissingQuestion {
                field: "thematic_question",
            });
        }
        if self.modes.contains(AnalysisMode::Systematic) && self.questions().next().is_none() {
            return Err(AnalysisError::MissingQuestion {
                field: "mapping_questions",
            });
        }
        Ok(())
    }

    /// Non-blank mapping questions, trimmed, in entry order.
    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.mapping_questions
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
    }
}

/// Splits a text area (one question per line) into mapping questions.
pub fn mapping_questions_from_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

// ============ Output: phenomenological ============

/// A traceable literal excerpt answering the phenomenological question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenseUnit {
    #[serde(rename = "id_unidade")]
    pub id: String,
    #[serde(rename = "documento")]
    pub document: String,
    #[serde(rename = "pagina", default, deserialize_with = "deserialize_page")]
    pub page: Option<u32>,
    #[serde(rename = "citacao_literal")]
    pub literal_quote: String,
    #[serde(rename = "contexto_resumido", default)]
    pub summarized_context: Option<String>,
    #[serde(rename = "justificativa", default)]
    pub rationale: Option<String>,
}

/// Interpretive synthesis derived from one or more sense units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeaningUnit {
    #[serde(rename = "id_unidade")]
    pub id: String,
    #[serde(rename = "documento")]
    pub document: String,
    #[serde(rename = "trecho_original")]
    pub original_excerpt: String,
    #[serde(rename = "sintese")]
    pub synthesis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "descricao")]
    pub description: String,
    /// Soft references to sense/meaning unit ids; may dangle.
    #[serde(rename = "unidades_relacionadas", default)]
    pub related_unit_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhenomenologicalResult {
    #[serde(rename = "unidades_sentido", default)]
    pub sense_units: Vec<SenseUnit>,
    #[serde(rename = "unidades_significado", default)]
    pub meaning_units: Vec<MeaningUnit>,
    #[serde(rename = "categorias", default)]
    pub categories: Vec<Category>,
}

// ============ Output: thematic ============

/// A literal-excerpt-backed label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThematicCode {
    #[serde(rename = "id_codigo")]
    pub id: String,
    #[serde(rename = "documento")]
    pub document: String,
    #[serde(rename = "pagina", default, deserialize_with = "deserialize_page")]
    pub page: Option<u32>,
    #[serde(rename = "trecho_literal")]
    pub literal_excerpt: String,
    #[serde(rename = "nome_codigo")]
    pub code_name: String,
    #[serde(rename = "definicao_codigo")]
    pub code_definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(rename = "nome_tema")]
    pub name: String,
    #[serde(rename = "descricao")]
    pub description: String,
    /// Soft references to code ids; may dangle.
    #[serde(rename = "codigos_relacionados", default)]
    pub related_code_ids: Vec<String>,
    #[serde(rename = "interpretacao")]
    pub interpretation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThematicResult {
    #[serde(rename = "codigos", default)]
    pub codes: Vec<ThematicCode>,
    #[serde(rename = "temas", default)]
    pub themes: Vec<Theme>,
}

// ============ Output: systematic mapping ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingAnswer {
    #[serde(rename = "pergunta")]
    pub question: String,
    #[serde(rename = "resposta")]
    pub answer: String,
    #[serde(rename = "evidencia_textual")]
    pub literal_evidence: String,
    #[serde(rename = "pagina", default, deserialize_with = "deserialize_page")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingDocument {
    pub document: String,
    #[serde(rename = "respostas", default)]
    pub answers: Vec<MappingAnswer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystematicResult {
    #[serde(default)]
    pub documents: Vec<MappingDocument>,
}

// ============ Output: union ============

/// Everything one run produced. Groups for inactive modes are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "analise_fenomenologica", default)]
    pub phenomenological: Option<PhenomenologicalResult>,
    #[serde(rename = "analise_tematica", default)]
    pub thematic: Option<ThematicResult>,
    #[serde(rename = "mapeamento_sistematico", default)]
    pub systematic: Option<SystematicResult>,
}

/// An id referenced by a category or theme that matches no extracted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Name of the category or theme holding the reference.
    pub owner: String,
    pub missing_id: String,
}

impl AnalysisResult {
    /// Collects unresolved soft references. Never an error: they are reported only.
    pub fn dangling_references(&self) -> Vec<DanglingReference> {
        let mut out = Vec::new();

        if let Some(p) = &self.phenomenological {
            let known: HashSet<&str> = p
                .sense_units
                .iter()
                .map(|u| u.id.as_str())
                .chain(p.meaning_units.iter().map(|u| u.id.as_str()))
                .collect();
            for cat in &p.categories {
                for id in &cat.related_unit_ids {
                    if !known.contains(id.as_str()) {
                        out.push(DanglingReference {
                            owner: cat.name.clone(),
                            missing_id: id.clone(),
                        });
                    }
                }
            }
        }

        if let Some(t) = &self.thematic {
            let known: HashSet<&str> = t.codes.iter().map(|c| c.id.as_str()).collect();
            for theme in &t.themes {
                for id in &theme.related_code_ids {
                    if !known.contains(id.as_str()) {
                        out.push(DanglingReference {
                            owner: theme.name.clone(),
                            missing_id: id.clone(),
                        });
                    }
                }
            }
        }

        out
    }

    /// True when no group carries any record.
    pub fn is_empty(&self) -> bool {
        let p = self
            .phenomenological
            .as_ref()
            .map(|p| p.sense_units.is_empty() && p.meaning_units.is_empty() && p.categories.is_empty())
            .unwrap_or(true);
        let t = self
            .thematic
            .as_ref()
            .map(|t| t.codes.is_empty() && t.themes.is_empty())
            .unwrap_or(true);
        let s = self
            .systematic
            .as_ref()
            .map(|s| s.documents.is_empty())
            .unwrap_or(true);
        p && t && s
    }
}

/// Lenient page reader: a page is only kept when the service gave a
/// positive integer (or its decimal string form). Anything else is `None`.
fn deserialize_page<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(page_from_value))
}

pub(crate) fn page_from_value(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().filter(|p| *p > 0).and_then(|p| u32::try_from(p).ok()),
        serde_json::Value::String(s) => s.trim().parse::<u32>().ok().filter(|p| *p > 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(modes: ModeSet) -> AnalysisRequest {
        AnalysisRequest {
            modes,
            phenomenological_question: Some("How is care lived?".into()),
            thematic_question: Some("Which themes emerge?".into()),
            mapping_questions: vec!["Objective?".into()],
        }
    }

    #[test]
    fn mode_set_iterates_in_fixed_order() {
        let set: ModeSet = [AnalysisMode::Systematic, AnalysisMode::Phenomenological]
            .into_iter()
            .collect();
        let order: Vec<_> = set.iter().collect();
        assert_eq!(
            order,
            vec![AnalysisMode::Phenomenological, AnalysisMode::Systematic]
        );
        assert_eq!(set.single(), None);
        assert_eq!(set.to_string(), "phenomenological+systematic");
    }

    #[test]
    fn single_mode_detected() {
        let set = ModeSet::empty().with(AnalysisMode::Thematic);
        assert_eq!(set.single(), Some(AnalysisMode::Thematic));
    }

    #[test]
    fn parse_mode_names() {
        assert_eq!("Thematic".parse::<AnalysisMode>(), Ok(AnalysisMode::Thematic));
        assert!("semantic".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn validate_names_missing_field() {
        let mut req = request(ModeSet::all());
        req.thematic_question = Some("   ".into());
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("thematic_question"));

        let mut req = request(ModeSet::empty().with(AnalysisMode::Systematic));
        req.mapping_questions = vec!["".into(), "  ".into()];
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("mapping_questions"));
    }

    #[test]
    fn validate_ignores_questions_of_inactive_modes() {
        let req = AnalysisRequest {
            modes: ModeSet::empty().with(AnalysisMode::Phenomenological),
            phenomenological_question: Some("Q".into()),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_mode_set() {
        let req = AnalysisRequest::default();
        assert!(matches!(req.validate(), Err(AnalysisError::NoModes)));
    }

    #[test]
    fn questions_from_text_area() {
        let qs = mapping_questions_from_text("Objective?\n\n  Method?  \n");
        assert_eq!(qs, vec!["Objective?".to_string(), "Method?".to_string()]);
    }

    #[test]
    fn page_is_never_fabricated() {
        let answer: MappingAnswer = serde_json::from_value(json!({
            "pergunta": "Q", "resposta": "A", "evidencia_textual": "E", "pagina": null
        }))
        .unwrap();
        assert_eq!(answer.page, None);

        let answer: MappingAnswer = serde_json::from_value(json!({
            "pergunta": "Q", "resposta": "A", "evidencia_textual": "E"
        }))
        .unwrap();
        assert_eq!(answer.page, None);

        let answer: MappingAnswer = serde_json::from_value(json!({
            "pergunta": "Q", "resposta": "A", "evidencia_textual": "E", "pagina": "12"
        }))
        .unwrap();
        assert_eq!(answer.page, Some(12));

        let answer: MappingAnswer = serde_json::from_value(json!({
            "pergunta": "Q", "resposta": "A", "evidencia_textual": "E", "pagina": "p. 4-5"
        }))
        .unwrap();
        assert_eq!(answer.page, None);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let res: Result<MappingAnswer, _> = serde_json::from_value(json!({
            "pergunta": "Q", "evidencia_textual": "E"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn dangling_references_are_reported_not_fatal() {
        let result: AnalysisResult = serde_json::from_value(json!({
            "analise_fenomenologica": {
                "unidades_sentido": [{
                    "id_unidade": "A_3_US1", "documento": "A.pdf", "pagina": 3,
                    "citacao_literal": "we felt alone"
                }],
                "categorias": [{
                    "nome": "Isolation", "descricao": "d",
                    "unidades_relacionadas": ["A_3_US1", "B_9_US4"]
                }]
            },
            "analise_tematica": {
                "temas": [{
                    "nome_tema": "Trust", "descricao": "d",
                    "codigos_relacionados": ["C9"], "interpretacao": "i"
                }]
            }
        }))
        .unwrap();
        let dangling = result.dangling_references();
        assert_eq!(dangling.len(), 2);
        assert_eq!(dangling[0].missing_id, "B_9_US4");
        assert_eq!(dangling[1].owner, "Trust");
    }

    #[test]
    fn absent_groups_default_to_no_results() {
        let result: AnalysisResult =
            serde_json::from_value(json!({ "analise_tematica": {} })).unwrap();
        let thematic = result.thematic.as_ref().unwrap();
        assert!(thematic.codes.is_empty());
        assert!(thematic.themes.is_empty());
        assert!(result.phenomenological.is_none());
        assert!(result.is_empty());
    }
}
