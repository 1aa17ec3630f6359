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

//! Parser for the Anthropic Messages API format.

use serde_json::Value;
use tracepipe_core::model::{
    FinishReason, FunctionDefinition, MessageContent, MessageRole, ToolDefinition, TraceInputItem,
    TraceRecord,
};

use crate::{ParseContext, ProviderParser};

pub struct AnthropicParser;

impl ProviderParser for AnthropicParser {
    fn can_parse(&self, url: &str) -> bool {
        url.contains("anthropic.com")
    }

    fn parse(
        &self,
        request_body: &Value,
        response_body: Option<&Value>,
        ctx: &ParseContext,
    ) -> TraceRecord {
        let model = request_body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string();

        let mut input_items = Vec::new();
        if let Some(messages) = request_body.get("messages").and_then(|m| m.as_array()) {
            for msg in messages {
                let role_str = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
                let role = match role_str {
                    "assistant" => MessageRole::Assistant,
                    _ => MessageRole::User,
                };
                let content = match msg.get("content") {
                    Some(Value::String(s)) => MessageContent::Text(s.clone()),
                    Some(Value::Array(parts)) => MessageContent::Parts(parts.clone()),
                    _ => MessageContent::Text(String::new()),
                };
                input_items.push(TraceInputItem::Message {
                    role,
                    content,
                    name: msg.get("name").and_then(|n| n.as_str()).map(String::from),
                    tool_call_id: None,
                    tool_calls: None,
                });
            }
        }

        // Top-level `system` is prepended as a `role: system` message.
        let system_prompt = request_body
            .get("system")
            .and_then(|s| s.as_str())
            .map(String::from);
        if let Some(system_prompt) = &system_prompt {
            input_items.insert(
                0,
                TraceInputItem::Message {
                    role: MessageRole::System,
                    content: MessageContent::Text(system_prompt.clone()),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                },
            );
        }

        let mut result = None;
        let mut finish_reason = None;
        let mut prompt_tokens = None;
        let mut completion_tokens = None;
        let mut total_tokens = None;

        if ctx.error.is_none() {
            if let Some(response_body) = response_body {
                if let Some(blocks) = response_body.get("content").and_then(|c| c.as_array()) {
                    let text_blocks: Vec<&str> = blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                        .collect();
                    if !text_blocks.is_empty() {
                        result = Some(text_blocks.join("\n"));
                    }
                }

                if let Some(stop_reason) = response_body.get("stop_reason").and_then(|s| s.as_str()) {
                    finish_reason = Some(map_stop_reason(stop_reason));
                }

                if let Some(usage) = response_body.get("usage") {
                    prompt_tokens = usage.get("input_tokens").and_then(|v| v.as_i64());
                    completion_tokens = usage.get("output_tokens").and_then(|v| v.as_i64());
                    if let (Some(p), Some(c)) = (prompt_tokens, completion_tokens) {
                        total_tokens = Some(p + c);
                    }
                }
            }
        }

        let tools = request_body.get("tools").and_then(|t| t.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|t| {
                    Some(ToolDefinition {
                        kind: "function".to_string(),
                        function: FunctionDefinition {
                            name: t.get("name")?.as_str()?.to_string(),
                            description: t
                                .get("description")
                                .and_then(|d| d.as_str())
                                .map(String::from),
                            parameters: t.get("input_schema").cloned(),
                        },
                    })
                })
                .collect()
        });

        TraceRecord {
            project: ctx.project(),
            model,
            started_at: ctx.started_at,
            completed_at: ctx.completed_at,
            input: input_items,
            output: None,
            instructions: system_prompt,
            prompt: None,
            temperature: request_body.get("temperature").and_then(|v| v.as_f64()),
            tool_choice: None,
            tools,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cached_tokens: None,
            reasoning_tokens: None,
            finish_reason,
            result,
            error: ctx.error.clone(),
            system_fingerprint: None,
            reasoning: None,
            response_schema: None,
            trace_metadata: ctx.metadata.clone(),
            path: ctx.path(),
            implementation_id: None,
            max_tokens: request_body.get("max_tokens").and_then(|v| v.as_i64()),
        }
    }
}

/// Unmapped stop reasons collapse to `Stop` rather than being silently
/// dropped.
fn map_stop_reason(stop_reason: &str) -> FinishReason {
    match stop_reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> ParseContext {
        ParseContext {
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            metadata: None,
            call_path: None,
            url: String::new(),
        }
    }

    #[test]
    fn system_prompt_prepended() {
        let request = serde_json::json!({
            "model": "claude-3-opus",
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let record = AnthropicParser.parse(&request, None, &ctx());

        assert_eq!(record.input.len(), 2);
        match &record.input[0] {
            TraceInputItem::Message { role, content, .. } => {
                assert_eq!(*role, MessageRole::System);
                assert_eq!(content.as_text(), Some("You are helpful"));
            }
            _ => panic!("expected message"),
        }
        assert_eq!(record.instructions.as_deref(), Some("You are helpful"));
    }

    #[test]
    fn response_text_blocks_joined_with_newline() {
        let request = serde_json::json!({"model": "claude-3", "messages": []});
        let response = serde_json::json!({
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        });
        let record = AnthropicParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.result.as_deref(), Some("a\nb"));
        assert_eq!(record.finish_reason, Some(FinishReason::Stop));
        assert_eq!(record.total_tokens, Some(7));
    }

    #[test]
    fn unknown_stop_reason_collapses_to_stop() {
        let request = serde_json::json!({"model": "claude-3", "messages": []});
        let response = serde_json::json!({"content": [], "stop_reason": "refusal"});
        let record = AnthropicParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.finish_reason, Some(FinishReason::Stop));
    }
}
