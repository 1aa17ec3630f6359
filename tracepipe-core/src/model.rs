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

//! Logical entities of the trace ingestion and grouping pipeline (§3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ProjectId);
id_newtype!(TaskId);
id_newtype!(ImplementationId);
id_newtype!(TraceId);
id_newtype!(HttpTraceId);
id_newtype!(GraderId);

/// Deterministic id derived from a project name, used only to dedupe
/// concurrent "create if absent" races before the row has an autoincrement
/// id assigned; the authoritative id is always the database's.
pub fn project_name_fingerprint(name: &str) -> u64 {
    let hash = blake3::hash(name.as_bytes());
    let bytes = hash.as_bytes();
    u64::from_le_bytes(bytes[0..8].try_into().expect("blake3 output >= 8 bytes"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub path: Option<String>,
    pub production_version_id: Option<ImplementationId>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub id: ImplementationId,
    pub task_id: TaskId,
    /// Template string with `{{var_NAME}}` placeholders (I3).
    pub prompt: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_output_tokens: i64,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<serde_json::Value>,
    pub reasoning: Option<serde_json::Value>,
    /// Set when this implementation was auto-generated by the grouping worker.
    pub temp: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Developer,
    Tool,
}

/// Message content is either a plain string or a list of structured parts
/// (e.g. `[{"type": "text", "text": "..."}]`); both shapes appear across
/// providers and must round-trip without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl MessageContent {
    /// First text content, following the same "first text block" rule used
    /// throughout the parsers and the instructions-string extraction.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) => Some(s.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| {
                if p.get("type").and_then(|t| t.as_str()) == Some("text") {
                    p.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            }),
        }
    }
}

/// A single conversational turn or structured datum belonging to a trace,
/// positionally ordered (I4). Variants form a closed set (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceInputItem {
    Message {
        role: MessageRole,
        content: MessageContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<serde_json::Value>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    FunctionResult {
        call_id: String,
        name: String,
        result: serde_json::Value,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: serde_json::Value,
    },
    McpToolCall {
        call_id: String,
        server: String,
        name: String,
        arguments: serde_json::Value,
    },
    McpToolResult {
        call_id: String,
        result: serde_json::Value,
    },
    Media {
        kind: MediaKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        mime_type: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        id: String,
        content: Vec<OutputMessageContent>,
        status: String,
    },
    FunctionToolCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// The provider-agnostic record produced by the parser registry (§4.A) and
/// accepted directly by the trace-create endpoint (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub project: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Vec<TraceInputItem>,
    #[serde(default)]
    pub output: Option<Vec<OutputItem>>,
    pub instructions: Option<String>,
    pub prompt: Option<String>,
    pub temperature: Option<f64>,
    pub tool_choice: Option<serde_json::Value>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub finish_reason: Option<FinishReason>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub system_fingerprint: Option<String>,
    pub reasoning: Option<serde_json::Value>,
    pub response_schema: Option<serde_json::Value>,
    pub trace_metadata: Option<serde_json::Value>,
    pub path: Option<String>,
    pub implementation_id: Option<i64>,
    pub max_tokens: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub project_id: ProjectId,
    pub implementation_id: Option<ImplementationId>,
    pub path: Option<String>,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub instructions: Option<String>,
    pub prompt: Option<String>,
    pub input_items: Vec<TraceInputItem>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<serde_json::Value>,
    pub temperature: Option<f64>,
    pub reasoning: Option<serde_json::Value>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
    pub finish_reason: Option<FinishReason>,
    pub result: Option<String>,
    pub error: Option<String>,
    /// Set iff `implementation_id` is set (I2).
    pub prompt_variables: Option<HashMap<String, String>>,
    pub http_trace_id: Option<HttpTraceId>,
    pub trace_metadata: Option<serde_json::Value>,
}

impl Trace {
    /// The "instructions string" used throughout §4.D and §4.F: first
    /// `system` message, else first `developer` message, else first `user`
    /// message's textual content.
    pub fn instructions_string(&self) -> Option<String> {
        extract_instructions_string(&self.input_items)
    }
}

/// Shared by ingestion (§4.D step 4) and the grouping worker (§4.F step 2).
pub fn extract_instructions_string(items: &[TraceInputItem]) -> Option<String> {
    let by_role = |want: MessageRole| {
        items.iter().find_map(|item| match item {
            TraceInputItem::Message { role, content, .. } if *role == want => {
                content.as_text().map(|s| s.to_string())
            }
            _ => None,
        })
    };
    by_role(MessageRole::System)
        .or_else(|| by_role(MessageRole::Developer))
        .or_else(|| by_role(MessageRole::User))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTrace {
    pub id: HttpTraceId,
    pub project_id: Option<ProjectId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub request: Vec<u8>,
    pub request_headers: HashMap<String, String>,
    pub response: Vec<u8>,
    pub response_headers: HashMap<String, String>,
    pub request_method: Option<String>,
    pub request_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub path: Option<String>,
}

/// Per-Task policy naming which graders to run and at what sampling rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub task_id: TaskId,
    pub grader_ids: Vec<GraderId>,
    pub trace_evaluation_percentage: u8,
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.trace_evaluation_percentage > 100 {
            return Err(format!(
                "trace_evaluation_percentage must be 0..=100, got {}",
                self.trace_evaluation_percentage
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grader {
    pub id: GraderId,
    pub project_id: ProjectId,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_string_prefers_system_over_developer_over_user() {
        let items = vec![
            TraceInputItem::Message {
                role: MessageRole::User,
                content: MessageContent::Text("hi".into()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            },
            TraceInputItem::Message {
                role: MessageRole::Developer,
                content: MessageContent::Text("dev prompt".into()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            },
        ];
        assert_eq!(
            extract_instructions_string(&items),
            Some("dev prompt".to_string())
        );

        let items_with_system = vec![
            TraceInputItem::Message {
                role: MessageRole::Developer,
                content: MessageContent::Text("dev prompt".into()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            },
            TraceInputItem::Message {
                role: MessageRole::System,
                content: MessageContent::Text("system prompt".into()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            },
        ];
        assert_eq!(
            extract_instructions_string(&items_with_system),
            Some("system prompt".to_string())
        );
    }

    #[test]
    fn instructions_string_falls_back_to_user() {
        let items = vec![TraceInputItem::Message {
            role: MessageRole::User,
            content: MessageContent::Text("hello".into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }];
        assert_eq!(
            extract_instructions_string(&items),
            Some("hello".to_string())
        );
    }

    #[test]
    fn instructions_string_none_when_no_candidates() {
        let items = vec![TraceInputItem::FunctionCall {
            call_id: "1".into(),
            name: "f".into(),
            arguments: serde_json::json!({}),
        }];
        assert_eq!(extract_instructions_string(&items), None);
    }
}
