//! Cross-document synthesis for one mapping question.
//!
//! Works only from rows that were already extracted; source documents are
//! never re-sent. The service answers in free-form Markdown, so no response
//! schema is attached.

use crate::completion::{CompletionRequest, CompletionService};
use crate::error::AnalysisError;
use crate::models::SystematicResult;
use crate::prompt::synthesis_instruction;
use crate::tables::{mapping_documents, mapping_rows, rows_for_question};

/// Markdown synthesis for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub question: String,
    /// Distinct documents considered, including those that do not answer.
    pub documents: usize,
    pub markdown: String,
}

/// Synthesises the answers to `question` across every mapped document.
///
/// Documents of `mapping` with no answer to the question are passed on as
/// "Not reported". Fails with a validation error when no row answers the
/// question at all.
pub async fn synthesize(
    service: &dyn CompletionService,
    mapping: &SystematicResult,
    question: &str,
    temperature: f32,
) -> Result<Synthesis, AnalysisError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AnalysisError::MissingQuestion { field: "question" });
    }
    let rows = mapping_rows(mapping);
    let selected = rows_for_question(&rows, question);
    if selected.is_empty() {
        return Err(AnalysisError::UnknownQuestion(question.to_string()));
    }

    let documents = mapping_documents(mapping);
    let not_reported: Vec<String> = documents
        .iter()
        .filter(|doc| !selected.iter().any(|row| &row.document == *doc))
        .cloned()
        .collect();

    tracing::info!(
        service = %service.label(),
        question = %question,
        rows = selected.len(),
        not_reported = not_reported.len(),
        "synthesising mapping answers"
    );

    let request = CompletionRequest {
        documents: &[],
        instruction: synthesis_instruction(question, &selected, &not_reported),
        response_schema: None,
        temperature,
    };
    let markdown = service.complete(&request).await?;

    Ok(Synthesis {
        question: question.to_string(),
        documents: documents.len(),
        markdown: markdown.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MappingAnswer, MappingDocument};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoService {
        seen: Mutex<Vec<(usize, String, bool)>>,
    }

    #[async_trait]
    impl CompletionService for EchoService {
        fn label(&self) -> String {
            "echo".into()
        }

        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError> {
            self.seen.lock().unwrap().push((
                request.documents.len(),
                request.instruction.clone(),
                request.response_schema.is_some(),
            ));
            Ok("## Convergences\n...\n".into())
        }
    }

    fn answer(question: &str, text: &str, evidence: &str, page: Option<u32>) -> MappingAnswer {
        MappingAnswer {
            question: question.into(),
            answer: text.into(),
            literal_evidence: evidence.into(),
            page,
        }
    }

    fn mapping() -> SystematicResult {
        SystematicResult {
            documents: vec![
                MappingDocument {
                    document: "A.pdf".into(),
                    answers: vec![
                        answer("Objective?", "Measure X", "we measure X", Some(3)),
                        answer("Sample?", "40", "n = 40", Some(4)),
                    ],
                },
                MappingDocument {
                    document: "B.pdf".into(),
                    answers: vec![answer("Objective?", "Survey Y", "a survey of Y", None)],
                },
            ],
        }
    }

    #[tokio::test]
    async fn sends_only_rows_for_the_question() {
        let service = EchoService::default();
        let out = synthesize(&service, &mapping(), " Objective? ", 0.2).await.unwrap();
        assert_eq!(out.documents, 2);
        assert_eq!(out.markdown, "## Convergences\n...");

        let seen = service.seen.lock().unwrap();
        let (docs, instruction, has_schema) = &seen[0];
        assert_eq!(*docs, 0);
        assert!(!has_schema);
        assert!(instruction.contains("Survey Y"));
        assert!(!instruction.contains("n = 40"));
        assert!(!instruction.contains("Not reported |"));
    }

    #[tokio::test]
    async fn silent_documents_are_not_reported_and_counted_once() {
        let mapping = SystematicResult {
            documents: vec![
                MappingDocument {
                    document: "A.pdf".into(),
                    answers: vec![answer("Q1", "yes", "e", None)],
                },
                MappingDocument {
                    document: "B.pdf".into(),
                    answers: vec![answer("Q2", "other", "e", None)],
                },
                MappingDocument {
                    document: "C.pdf".into(),
                    answers: vec![answer("Q1", "no", "e", None), answer("Q1", "partly", "e", None)],
                },
            ],
        };
        let service = EchoService::default();
        let out = synthesize(&service, &mapping, "Q1", 0.2).await.unwrap();
        assert_eq!(out.documents, 3);

        let seen = service.seen.lock().unwrap();
        let instruction = &seen[0].1;
        assert!(instruction.contains("| B.pdf | Not reported |"));
        assert!(instruction.contains("extracted from 3 documents"));
        assert!(!instruction.contains("| B.pdf | other |"));
    }

    #[tokio::test]
    async fn unknown_question_is_rejected_before_calling() {
        let service = EchoService::default();
        let err = synthesize(&service, &mapping(), "Funding?", 0.2).await.unwrap_err();
        assert!(err.is_local());
        assert!(service.seen.lock().unwrap().is_empty());
    }
}
