//! One analysis run, end to end.
//!
//! ```text
//! validate request ─▶ check corpus ─▶ compose instruction + select schema
//!        │                 │                        │
//!        └── local errors stop here ────────────────┘
//!                                                   ▼
//!                          completion call (single, in flight once)
//!                                                   ▼
//!                          parse + validate JSON into AnalysisResult
//! ```
//!
//! Every failure is terminal for the run; no partial result is returned.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::completion::{CompletionRequest, CompletionService};
use crate::corpus::check_corpus;
use crate::error::AnalysisError;
use crate::models::{
    AnalysisMode, AnalysisRequest, AnalysisResult, ModeSet, PhenomenologicalResult, SourceDocument,
    SystematicResult, ThematicResult,
};
use crate::progress::{track, ProgressReporter};
use crate::prompt::compose_instruction;
use crate::schema::{group_key, response_schema, SchemaNode};

/// Everything needed to make the call, built without touching the network.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub modes: ModeSet,
    pub instruction: String,
    pub schema: SchemaNode,
    pub corpus_bytes: u64,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub elapsed: Duration,
    pub corpus_bytes: u64,
}

/// Runs every local check and composes the request.
pub fn prepare(
    request: &AnalysisRequest,
    documents: &[SourceDocument],
    max_corpus_bytes: u64,
) -> Result<PreparedRun, AnalysisError> {
    request.validate()?;
    let corpus_bytes = check_corpus(documents, max_corpus_bytes)?;

    let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
    Ok(PreparedRun {
        modes: request.modes,
        instruction: compose_instruction(request, &names),
        schema: response_schema(request.modes),
        corpus_bytes,
    })
}

/// Validates, calls the service once, and parses the answer.
pub async fn run_analysis(
    service: &dyn CompletionService,
    request: &AnalysisRequest,
    documents: &[SourceDocument],
    max_corpus_bytes: u64,
    temperature: f32,
    progress: &dyn ProgressReporter,
) -> Result<AnalysisOutcome, AnalysisError> {
    let prepared = prepare(request, documents, max_corpus_bytes)?;

    tracing::info!(
        service = %service.label(),
        modes = %prepared.modes,
        documents = documents.len(),
        corpus_bytes = prepared.corpus_bytes,
        "starting analysis"
    );

    let call = CompletionRequest {
        documents,
        instruction: prepared.instruction,
        response_schema: Some(prepared.schema),
        temperature,
    };

    let (text, elapsed) = track("analysis", progress, service.complete(&call)).await?;
    let result = parse_result(prepared.modes, &text)?;

    let dangling = result.dangling_references();
    if !dangling.is_empty() {
        tracing::warn!(
            count = dangling.len(),
            "result references ids that match no extracted record"
        );
    }

    Ok(AnalysisOutcome {
        result,
        elapsed,
        corpus_bytes: prepared.corpus_bytes,
    })
}

/// Parses service text into a result for the given modes.
///
/// Single mode: the top level is the mode's own object (a union-wrapped
/// answer is unwrapped). Several modes: the top level is the union; a
/// `null` or missing branch of an active mode means "no results", and
/// branches of inactive modes are dropped.
pub fn parse_result(modes: ModeSet, text: &str) -> Result<AnalysisResult, AnalysisError> {
    let json: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AnalysisError::InvalidResponse(format!("not valid JSON: {}", e)))?;
    let obj = json
        .as_object()
        .ok_or_else(|| AnalysisError::InvalidResponse("top level is not an object".into()))?;

    let mut result = AnalysisResult::default();

    if let Some(mode) = modes.single() {
        let group = obj.get(group_key(mode)).unwrap_or(&json);
        set_group(&mut result, mode, group)?;
        return Ok(result);
    }

    for mode in AnalysisMode::ALL {
        let branch = obj.get(group_key(mode));
        if !modes.contains(mode) {
            if branch.map(|b| !b.is_null()).unwrap_or(false) {
                tracing::debug!(mode = %mode, "ignoring branch for inactive mode");
            }
            continue;
        }
        match branch {
            None | Some(Value::Null) => set_group(&mut result, mode, &Value::Object(Default::default()))?,
            Some(value) => set_group(&mut result, mode, value)?,
        }
    }
    Ok(result)
}

fn set_group(result: &mut AnalysisResult, mode: AnalysisMode, value: &Value) -> Result<(), AnalysisError> {
    match mode {
        AnalysisMode::Phenomenological => {
            result.phenomenological = Some(decode::<PhenomenologicalResult>(mode, value)?)
        }
        AnalysisMode::Thematic => result.thematic = Some(decode::<ThematicResult>(mode, value)?),
        AnalysisMode::Systematic => result.systematic = Some(decode::<SystematicResult>(mode, value)?),
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(mode: AnalysisMode, value: &Value) -> Result<T, AnalysisError> {
    if value.is_null() {
        return serde_json::from_value(Value::Object(Default::default()))
            .map_err(|e| AnalysisError::InvalidResponse(format!("{}: {}", group_key(mode), e)));
    }
    if !value.is_object() {
        return Err(AnalysisError::InvalidResponse(format!(
            "{}: expected an object",
            group_key(mode)
        )));
    }
    serde_json::from_value(value.clone())
        .map_err(|e| AnalysisError::InvalidResponse(format!("{}: {}", group_key(mode), e)))
}

/// Removes a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
