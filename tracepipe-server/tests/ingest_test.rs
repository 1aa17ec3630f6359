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

use std::sync::Arc;

use tracepipe_core::model::{MessageContent, MessageRole, TraceInputItem, TraceRecord};
use tracepipe_core::store::{ImplementationDraft, SqliteStore, TraceStore};
use tracepipe_server::state::AppState;

async fn test_state() -> AppState {
    let store: Arc<dyn TraceStore> = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    let parsers = Arc::new(tracepipe_parsers::ParserRegistry::new());
    let (grouping, _consumer) = tracepipe_grouping::channel(1000);
    AppState {
        store,
        parsers,
        grouping,
    }
}

fn message(role: MessageRole, text: &str) -> TraceInputItem {
    TraceInputItem::Message {
        role,
        content: MessageContent::Text(text.to_string()),
        name: None,
        tool_call_id: None,
        tool_calls: None,
    }
}

fn bare_record(project: &str, input: Vec<TraceInputItem>) -> TraceRecord {
    TraceRecord {
        project: project.to_string(),
        model: "gpt-4".to_string(),
        started_at: chrono::Utc::now(),
        completed_at: None,
        input,
        output: None,
        instructions: None,
        prompt: None,
        temperature: None,
        tool_choice: None,
        tools: None,
        prompt_tokens: None,
        completion_tokens: None,
        total_tokens: None,
        cached_tokens: None,
        reasoning_tokens: None,
        finish_reason: None,
        result: None,
        error: None,
        system_fingerprint: None,
        reasoning: None,
        response_schema: None,
        trace_metadata: None,
        path: None,
        implementation_id: None,
        max_tokens: None,
    }
}

#[tokio::test]
async fn p5_ingestion_persists_trace_with_its_input_items() {
    let state = test_state().await;
    let record = bare_record(
        "acme",
        vec![message(MessageRole::User, "hello there")],
    );

    let trace = tracepipe_server::ingest::ingest(&state, record, None)
        .await
        .unwrap();

    assert_eq!(trace.input_items.len(), 1);
    assert!(trace.implementation_id.is_none());

    let unmatched = state
        .store
        .list_unmatched_traces(trace.project_id, None)
        .await
        .unwrap();
    assert_eq!(unmatched.len(), 1);
    assert_eq!(unmatched[0].id, trace.id);
}

#[tokio::test]
async fn s6_auto_match_binds_prompt_variables() {
    let state = test_state().await;
    let project = state.store.get_or_create_project("acme").await.unwrap();
    let task = state
        .store
        .create_task(project.id, None, None, None)
        .await
        .unwrap();
    let implementation = state
        .store
        .create_implementation(ImplementationDraft {
            task_id: task.id,
            prompt: "Greet user {{var_0}} politely.".to_string(),
            model: "gpt-4".to_string(),
            temperature: None,
            max_output_tokens: 1000,
            tools: None,
            tool_choice: None,
            reasoning: None,
            temp: false,
        })
        .await
        .unwrap();
    state
        .store
        .set_task_production_version(task.id, implementation.id)
        .await
        .unwrap();

    let record = bare_record(
        "acme",
        vec![message(MessageRole::System, "Greet user Eve politely.")],
    );
    let trace = tracepipe_server::ingest::ingest(&state, record, None)
        .await
        .unwrap();

    assert_eq!(trace.implementation_id, Some(implementation.id));
    let vars = trace.prompt_variables.unwrap();
    assert_eq!(vars.get("var_0").unwrap(), "Eve");
}

#[tokio::test]
async fn b4_missing_response_yields_null_result_via_openai_parser() {
    let registry = tracepipe_parsers::ParserRegistry::new();
    let capture = tracepipe_parsers::HttpCapture {
        url: Some("https://api.openai.com/v1/chat/completions".to_string()),
        request_bytes: br#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#.to_vec(),
        request_headers: Default::default(),
        response_bytes: None,
        response_headers: Default::default(),
        started_at: chrono::Utc::now(),
        completed_at: None,
        error: None,
        metadata: None,
        call_path: None,
        request_method: None,
        request_path: None,
    };

    let record = registry.parse(&capture).unwrap();
    assert_eq!(record.result, None);
}
