// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Trace ingestion service (§4.D) and its two HTTP entry points.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tracepipe_core::error::ApiError;
use tracepipe_core::model::{HttpTrace, Trace, TraceRecord};
use tracepipe_core::store::TraceDraft;
use tracepipe_grouping::Request as GroupingRequest;
use tracepipe_parsers::HttpCapture;

use crate::error::ApiErrorResponse;
use crate::grading;
use crate::state::AppState;

/// Accepts hex-encoded or plain UTF-8 string bytes fields (§6 "Bytes
/// fields may be delivered hex-encoded or UTF-8 string; both must be
/// accepted").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireBytes(pub Vec<u8>);

impl<'de> Deserialize<'de> for WireBytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match hex::decode(&s) {
            Ok(bytes) => Ok(WireBytes(bytes)),
            Err(_) => Ok(WireBytes(s.into_bytes())),
        }
    }
}

impl Serialize for WireBytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

/// Wire shape of the raw HTTP capture endpoint (§6).
#[derive(Debug, Deserialize)]
pub struct RawHttpCaptureRequest {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub request: WireBytes,
    pub request_headers: HashMap<String, String>,
    pub response: WireBytes,
    pub response_headers: HashMap<String, String>,
    pub request_method: Option<String>,
    pub request_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub trace_id: i64,
    pub implementation_id: Option<i64>,
}

impl From<&Trace> for IngestResponse {
    fn from(trace: &Trace) -> Self {
        Self {
            trace_id: trace.id.0,
            implementation_id: trace.implementation_id.map(|i| i.0),
        }
    }
}

/// `POST /v1/http-traces`: decode, persist the raw capture verbatim, then
/// run the parser pipeline (§4.A) and proceed exactly as the trace-create
/// endpoint. On parse failure the HTTPTrace is left persisted and an error
/// is returned (§6 "On parse failure, the HTTPTrace remains persisted").
pub async fn post_http_trace(
    State(state): State<AppState>,
    Json(body): Json<RawHttpCaptureRequest>,
) -> Result<Json<IngestResponse>, ApiErrorResponse> {
    let project_hint = body
        .metadata
        .as_ref()
        .and_then(|m| m.get("project"))
        .and_then(|p| p.as_str());

    let project_id = match project_hint {
        Some(name) => Some(state.store.get_or_create_project(name).await?.id),
        None => None,
    };

    let http_trace = HttpTrace {
        id: tracepipe_core::model::HttpTraceId(0),
        project_id,
        started_at: body.started_at,
        completed_at: body.completed_at,
        status_code: body.status_code,
        error: body.error.clone(),
        request: body.request.0.clone(),
        request_headers: body.request_headers.clone(),
        response: body.response.0.clone(),
        response_headers: body.response_headers.clone(),
        request_method: body.request_method.clone(),
        request_path: body.request_path.clone(),
        metadata: body.metadata.clone(),
        path: body.path.clone(),
    };
    let http_trace_id = state.store.insert_http_trace(project_id, &http_trace).await?;

    let capture = HttpCapture {
        url: body
            .metadata
            .as_ref()
            .and_then(|m| m.get("url"))
            .and_then(|u| u.as_str())
            .map(String::from),
        request_bytes: body.request.0,
        request_headers: body.request_headers,
        response_bytes: Some(body.response.0),
        response_headers: body.response_headers,
        started_at: body.started_at,
        completed_at: body.completed_at,
        error: body.error,
        metadata: body.metadata,
        call_path: body.path,
        request_method: body.request_method,
        request_path: body.request_path,
    };

    let record = state.parsers.parse(&capture).map_err(ApiError::from)?;
    let trace = ingest(&state, record, Some(http_trace_id)).await?;
    Ok(Json(IngestResponse::from(&trace)))
}

/// `POST /v1/traces`: accepts a pre-normalized [`TraceRecord`] and proceeds
/// from §4.D step 2 directly.
pub async fn post_trace(
    State(state): State<AppState>,
    Json(record): Json<TraceRecord>,
) -> Result<Json<IngestResponse>, ApiErrorResponse> {
    let trace = ingest(&state, record, None).await?;
    Ok(Json(IngestResponse::from(&trace)))
}

/// The core `ingest(traceRecord, rawHttpTraceId?) -> Trace` operation
/// (§4.D), shared by both endpoints.
pub async fn ingest(
    state: &AppState,
    record: TraceRecord,
    http_trace_id: Option<tracepipe_core::model::HttpTraceId>,
) -> Result<Trace, ApiError> {
    // Step 1: resolve project by name, creating it if absent.
    let project = state.store.get_or_create_project(&record.project).await?;

    // Step 2 + 3: construct and persist the Trace row atomically.
    let draft = TraceDraft {
        project_id: project.id,
        implementation_id: record.implementation_id.map(tracepipe_core::model::ImplementationId),
        path: record.path.clone(),
        model: record.model.clone(),
        started_at: record.started_at,
        completed_at: record.completed_at,
        instructions: record.instructions.clone(),
        prompt: record.prompt.clone(),
        input_items: record.input.clone(),
        tools: record.tools.clone(),
        tool_choice: record.tool_choice.clone(),
        temperature: record.temperature,
        reasoning: record.reasoning.clone(),
        prompt_tokens: record.prompt_tokens,
        completion_tokens: record.completion_tokens,
        total_tokens: record.total_tokens,
        cached_tokens: record.cached_tokens,
        reasoning_tokens: record.reasoning_tokens,
        finish_reason: record.finish_reason,
        result: record.result.clone(),
        error: record.error.clone(),
        prompt_variables: None,
        http_trace_id,
        trace_metadata: record.trace_metadata.clone(),
    };
    let mut trace = state.store.insert_trace(draft).await?;

    // Step 4-5: best-effort auto-match against existing implementations.
    // Matching failure is non-fatal (§7): the trace stays unmatched.
    if trace.implementation_id.is_none() {
        match auto_match(state, &trace).await {
            Ok(Some((implementation_id, bindings))) => {
                if let Err(err) = state
                    .store
                    .update_trace_match(trace.id, implementation_id, bindings.clone())
                    .await
                {
                    tracing::warn!(trace_id = %trace.id, error = %err, "failed to persist auto-match");
                } else {
                    trace.implementation_id = Some(implementation_id);
                    trace.prompt_variables = Some(bindings);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(trace_id = %trace.id, error = %err, "auto-match failed");
            }
        }
    }

    // Step 6: enqueue grouping, fire-and-forget.
    state.grouping.enqueue(GroupingRequest {
        project_id: trace.project_id,
        path: trace.path.clone(),
        trace_id: trace.id,
        enqueued_at: Utc::now(),
    });

    // Step 7: dispatch auto-grading if the trace ended up matched. Runs as
    // a detached task so a slow EvaluationConfig lookup never delays the
    // ingest response (§4.D step 7, §5 "jobs run in parallel with
    // ingestion but must use an independent database session").
    if let Some(implementation_id) = trace.implementation_id {
        let store = state.store.clone();
        let trace_id = trace.id;
        tokio::spawn(async move {
            grading::dispatch(store, trace_id, implementation_id).await;
        });
    }

    Ok(trace)
}

async fn auto_match(
    state: &AppState,
    trace: &Trace,
) -> anyhow::Result<Option<(tracepipe_core::model::ImplementationId, HashMap<String, String>)>> {
    let Some(instructions) = trace.instructions_string() else {
        return Ok(None);
    };

    let implementations = state
        .store
        .list_implementations_for_project_model(trace.project_id, &trace.model)
        .await?;

    for implementation in implementations {
        if let Some(bindings) = tracepipe_matcher::match_template(&implementation.prompt, &instructions) {
            return Ok(Some((implementation.id, bindings)));
        }
    }

    Ok(None)
}
