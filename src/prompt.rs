//! Instruction composition.
//!
//! Each active mode contributes one instruction block. The composed
//! instruction is the contract rules, then the blocks of the active modes in
//! the fixed order Phenomenological → Thematic → Systematic, then the list
//! of supplied document names. Inactive modes contribute nothing.

use crate::models::{AnalysisMode, AnalysisRequest};
use crate::tables::{page_label, MappingRow};

/// Rules every response must honour, whatever the modes.
pub const CONTRACT_RULES: &str = "\
You are assisting a qualitative researcher. Work only from the documents supplied with this request.

RULES (apply to every part of this task):
- Never fabricate page numbers. When you are not certain of the page, set `pagina` to null instead of guessing.
- Copy every quotation and evidence field verbatim from the source document: no paraphrase, no translation, no correction of spelling.
- Every extracted item must be traceable: name the document it came from exactly as it is named below and, whenever known, its page.
- Return only JSON that matches the response schema. Do not add commentary outside the JSON.";

/// Label written for mapping answers a document does not address.
pub const NOT_REPORTED: &str = "Not reported";

/// The instruction block contributed by `mode`.
pub fn instruction_block(mode: AnalysisMode, request: &AnalysisRequest) -> String {
    match mode {
        AnalysisMode::Phenomenological => phenomenological_block(
            request
                .phenomenological_question
                .as_deref()
                .unwrap_or_default()
                .trim(),
        ),
        AnalysisMode::Thematic => {
            thematic_block(request.thematic_question.as_deref().unwrap_or_default().trim())
        }
        AnalysisMode::Systematic => {
            let questions: Vec<&str> = request.questions().collect();
            systematic_block(&questions)
        }
    }
}

/// Full instruction for one run.
pub fn compose_instruction(request: &AnalysisRequest, document_names: &[&str]) -> String {
    let mut sections = vec![CONTRACT_RULES.to_string()];
    sections.extend(request.modes.iter().map(|m| instruction_block(m, request)));
    sections.push(document_list(document_names));
    sections.join("\n\n")
}

fn phenomenological_block(question: &str) -> String {
    format!(
        "## PHENOMENOLOGICAL ANALYSIS (`analise_fenomenologica`)
Phenomenological research question: \"{question}\"

1. Sense units (`unidades_sentido`): extract every literal excerpt that speaks to the research question. For each one give
   - `id_unidade`: unique id following DOC_P_US (short document name, page, sequential unit number; e.g. SILVA2020_P4_US2; use PNA when the page is unknown),
   - `documento`, `pagina`,
   - `citacao_literal`: the excerpt, verbatim,
   - `contexto_resumido`: one sentence situating the excerpt,
   - `justificativa`: why the excerpt answers the question.
2. Meaning units (`unidades_significado`): for each sense unit, an interpretive synthesis in the researcher's language. Reuse the sense unit's `id_unidade` and `documento`, copy its quotation into `trecho_original`, and write the synthesis in `sintese`.
3. Categories (`categorias`): group convergent meaning units. Give `nome`, `descricao`, and `unidades_relacionadas` listing the `id_unidade` values grouped."
    )
}

fn thematic_block(question: &str) -> String {
    format!(
        "## THEMATIC ANALYSIS (`analise_tematica`, Braun & Clarke)
Thematic research question: \"{question}\"

1. Codes (`codigos`): code the documents line by line with respect to the question. For each code give `id_codigo` (unique, e.g. C1, C2…), `documento`, `pagina`, `trecho_literal` (verbatim excerpt supporting the code), `nome_codigo` and `definicao_codigo`.
2. Themes (`temas`): group codes into themes. Give `nome_tema`, `descricao`, `codigos_relacionados` (the `id_codigo` values grouped) and `interpretacao` (what the theme says about the question)."
    )
}

fn systematic_block(questions: &[&str]) -> String {
    let numbered: Vec<String> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect();
    format!(
        "## SYSTEMATIC MAPPING (`mapeamento_sistematico`)
Answer every question below for EVERY document, one entry per document in `documents`.

Questions:
{}

For each document give `document` (its name exactly as listed) and `respostas`, one answer per question in the order above:
- `pergunta`: the question copied exactly as written above,
- `resposta`: a concise answer; write \"{}\" when the document does not address the question,
- `evidencia_textual`: the verbatim passage supporting the answer (empty when not reported),
- `pagina`: the page of that passage, or null.",
        numbered.join("\n"),
        NOT_REPORTED
    )
}

fn document_list(names: &[&str]) -> String {
    let mut out = String::from("## DOCUMENTS SUPPLIED (use these names exactly)\n");
    for (i, name) in names.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, name));
    }
    out.trim_end().to_string()
}

/// Instruction for the cross-document synthesis of one question.
///
/// Carries only rows already extracted; no source document is attached.
/// Documents listed in `not_reported` have no answer to the question and
/// appear as explicit "Not reported" rows. The document count is the number
/// of distinct documents, not rows.
pub fn synthesis_instruction(question: &str, rows: &[&MappingRow], not_reported: &[String]) -> String {
    let mut table = String::from("| Document | Answer | Evidence | Page |\n|---|---|---|---|\n");
    let mut documents: Vec<&str> = Vec::new();
    for row in rows {
        if !documents.contains(&row.document.as_str()) {
            documents.push(&row.document);
        }
        table.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            markdown_cell(&row.document),
            markdown_cell(&row.answer),
            markdown_cell(&row.evidence),
            page_label(row.page),
        ));
    }
    for doc in not_reported {
        if documents.contains(&doc.as_str()) {
            continue;
        }
        documents.push(doc);
        table.push_str(&format!(
            "| {} | {} |  | null |\n",
            markdown_cell(doc),
            NOT_REPORTED
        ));
    }

    format!(
        "You are synthesising answers that were already extracted from {count} documents for one systematic-mapping question. \
Work only from the table below; do not assume anything about documents beyond it.

Question: \"{question}\"

{table}
Write the synthesis in Markdown with exactly these four sections, strictly in this order:
1. **Convergences**: what the documents agree on, naming the documents.
2. **Divergences**: where they disagree or differ, naming the documents.
3. **Distribution**: a table counting documents per distinct answer, with an explicit \"{not_reported}\" row for documents that do not report this information. Counts must add up to {count}.
4. **Interpretive synthesis**: a short paragraph interpreting the overall picture.

Quote evidence only as it appears in the table.",
        count = documents.len(),
        question = question,
        table = table,
        not_reported = NOT_REPORTED,
    )
}

fn markdown_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}
