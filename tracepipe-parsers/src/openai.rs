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

//! Parser for the OpenAI chat-completions and responses API shapes.

use serde_json::Value;
use tracepipe_core::model::{
    FinishReason, FunctionDefinition, MessageContent, MessageRole, OutputItem,
    OutputMessageContent, ToolDefinition, TraceInputItem, TraceRecord,
};

use crate::{ParseContext, ProviderParser};

pub struct OpenAiParser;

impl ProviderParser for OpenAiParser {
    fn can_parse(&self, url: &str) -> bool {
        url.contains("api.openai.com")
    }

    fn parse(
        &self,
        request_body: &Value,
        response_body: Option<&Value>,
        ctx: &ParseContext,
    ) -> TraceRecord {
        if request_body.get("messages").is_some() {
            parse_chat_completions(request_body, response_body, ctx)
        } else {
            parse_responses(request_body, response_body, ctx)
        }
    }
}

fn parse_chat_completions(
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
            let role = parse_role(msg.get("role").and_then(|r| r.as_str()).unwrap_or("user"));
            let content = parse_content(msg.get("content"));
            let name = msg.get("name").and_then(|n| n.as_str()).map(String::from);
            let tool_call_id = msg
                .get("tool_call_id")
                .and_then(|t| t.as_str())
                .map(String::from);
            let tool_calls = msg.get("tool_calls").cloned();

            input_items.push(TraceInputItem::Message {
                role,
                content,
                name,
                tool_call_id,
                tool_calls,
            });
        }
    }

    let tools = parse_chat_tools(request_body);

    let mut result = None;
    let mut finish_reason = None;
    let mut prompt_tokens = None;
    let mut completion_tokens = None;
    let mut total_tokens = None;

    if ctx.error.is_none() {
        if let Some(response_body) = response_body {
            if let Some(choice) = response_body
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
            {
                result = choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                    .map(String::from);

                finish_reason = choice
                    .get("finish_reason")
                    .and_then(|f| f.as_str())
                    .map(map_finish_reason);
            }

            if let Some(usage) = response_body.get("usage") {
                prompt_tokens = usage.get("prompt_tokens").and_then(|v| v.as_i64());
                completion_tokens = usage.get("completion_tokens").and_then(|v| v.as_i64());
                total_tokens = usage.get("total_tokens").and_then(|v| v.as_i64());
            }
        }
    }

    TraceRecord {
        project: ctx.project(),
        model,
        started_at: ctx.started_at,
        completed_at: ctx.completed_at,
        input: input_items,
        output: None,
        instructions: None,
        prompt: None,
        temperature: request_body.get("temperature").and_then(|v| v.as_f64()),
        tool_choice: request_body.get("tool_choice").cloned(),
        tools,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cached_tokens: None,
        reasoning_tokens: None,
        finish_reason,
        result,
        error: ctx.error.clone(),
        system_fingerprint: response_body
            .and_then(|r| r.get("system_fingerprint"))
            .and_then(|s| s.as_str())
            .map(String::from),
        reasoning: request_body.get("reasoning").cloned(),
        response_schema: request_body.get("response_format").cloned(),
        trace_metadata: ctx.metadata.clone(),
        path: ctx.path(),
        implementation_id: None,
        max_tokens: request_body.get("max_tokens").and_then(|v| v.as_i64()),
    }
}

fn parse_responses(
    request_body: &Value,
    response_body: Option<&Value>,
    ctx: &ParseContext,
) -> TraceRecord {
    let model = request_body
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string();

    let instructions = request_body
        .get("instructions")
        .and_then(|i| i.as_str())
        .map(String::from);

    let mut input_items = Vec::new();
    if let Some(instructions) = &instructions {
        input_items.push(TraceInputItem::Message {
            role: MessageRole::System,
            content: MessageContent::Text(instructions.clone()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        });
    }

    match request_body.get("input") {
        Some(Value::String(s)) => {
            input_items.push(TraceInputItem::Message {
                role: MessageRole::User,
                content: MessageContent::Text(s.clone()),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            });
        }
        Some(Value::Array(items)) => {
            for item in items {
                push_responses_input_item(&mut input_items, item);
            }
        }
        _ => {}
    }

    let tools = parse_responses_tools(request_body);

    let mut output_items = None;
    let mut result = None;
    let mut finish_reason = None;
    let mut prompt_tokens = None;
    let mut completion_tokens = None;
    let mut total_tokens = None;
    let mut cached_tokens = None;
    let mut reasoning_tokens = None;

    if ctx.error.is_none() {
        if let Some(response_body) = response_body {
            if let Some(output) = response_body.get("output").and_then(|o| o.as_array()) {
                let (items, text_blocks) = parse_output_items(output);
                if !text_blocks.is_empty() {
                    result = Some(text_blocks.join("\n"));
                }
                if !items.is_empty() {
                    output_items = Some(items);
                }
            }

            finish_reason = response_body
                .get("status")
                .and_then(|s| s.as_str())
                .map(map_responses_status);

            if let Some(usage) = response_body.get("usage") {
                prompt_tokens = usage.get("input_tokens").and_then(|v| v.as_i64());
                completion_tokens = usage.get("output_tokens").and_then(|v| v.as_i64());
                total_tokens = usage.get("total_tokens").and_then(|v| v.as_i64());
                cached_tokens = usage
                    .get("input_tokens_details")
                    .and_then(|d| d.get("cached_tokens"))
                    .and_then(|v| v.as_i64());
                reasoning_tokens = usage
                    .get("output_tokens_details")
                    .and_then(|d| d.get("reasoning_tokens"))
                    .and_then(|v| v.as_i64());
            }
        }
    }

    TraceRecord {
        project: ctx.project(),
        model,
        started_at: ctx.started_at,
        completed_at: ctx.completed_at,
        input: input_items,
        output: output_items,
        instructions,
        prompt: None,
        temperature: request_body.get("temperature").and_then(|v| v.as_f64()),
        tool_choice: request_body.get("tool_choice").cloned(),
        tools,
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cached_tokens,
        reasoning_tokens,
        finish_reason,
        result,
        error: ctx.error.clone(),
        system_fingerprint: None,
        reasoning: request_body.get("reasoning").cloned(),
        response_schema: request_body
            .get("text")
            .and_then(|t| t.get("format"))
            .cloned(),
        trace_metadata: ctx.metadata.clone(),
        path: ctx.path(),
        implementation_id: None,
        max_tokens: request_body.get("max_output_tokens").and_then(|v| v.as_i64()),
    }
}

fn parse_chat_tools(request_body: &Value) -> Option<Vec<ToolDefinition>> {
    request_body.get("tools").and_then(|t| t.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|t| {
                let f = t.get("function")?;
                Some(ToolDefinition {
                    kind: "function".to_string(),
                    function: FunctionDefinition {
                        name: f.get("name")?.as_str()?.to_string(),
                        description: f
                            .get("description")
                            .and_then(|d| d.as_str())
                            .map(String::from),
                        parameters: f.get("parameters").cloned(),
                    },
                })
            })
            .collect()
    })
}

fn parse_responses_tools(request_body: &Value) -> Option<Vec<ToolDefinition>> {
    request_body.get("tools").and_then(|t| t.as_array()).map(|arr| {
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
                        parameters: t.get("parameters").cloned(),
                    },
                })
            })
            .collect()
    })
}

fn parse_output_items(output: &[Value]) -> (Vec<OutputItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut text_blocks = Vec::new();

    for item in output {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("message") => {
                let id = item
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string();
                let status = item
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string();
                let content: Vec<OutputMessageContent> = item
                    .get("content")
                    .and_then(|c| c.as_array())
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| {
                                let text = p.get("text").and_then(|t| t.as_str())?.to_string();
                                text_blocks.push(text.clone());
                                Some(OutputMessageContent {
                                    kind: p
                                        .get("type")
                                        .and_then(|t| t.as_str())
                                        .unwrap_or("output_text")
                                        .to_string(),
                                    text,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                items.push(OutputItem::Message { id, content, status });
            }
            Some("function_call") => {
                items.push(OutputItem::FunctionToolCall {
                    id: item.get("id").and_then(|i| i.as_str()).unwrap_or_default().to_string(),
                    call_id: item
                        .get("call_id")
                        .and_then(|i| i.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: item.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                    arguments: item
                        .get("arguments")
                        .and_then(|a| a.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    status: item
                        .get("status")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            _ => {}
        }
    }

    (items, text_blocks)
}

fn push_responses_input_item(items: &mut Vec<TraceInputItem>, item: &Value) {
    match item.get("type").and_then(|t| t.as_str()) {
        Some("function_call") => {
            items.push(TraceInputItem::FunctionCall {
                call_id: item
                    .get("call_id")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: item.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                arguments: parse_arguments(item.get("arguments")),
            });
        }
        Some("function_call_output") => {
            let call_id = item
                .get("call_id")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            let name = items
                .iter()
                .rev()
                .find_map(|prior| match prior {
                    TraceInputItem::FunctionCall {
                        call_id: cid,
                        name,
                        ..
                    } if *cid == call_id => Some(name.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            items.push(TraceInputItem::FunctionResult {
                call_id,
                name,
                result: item.get("output").cloned().unwrap_or(Value::Null),
            });
        }
        _ => {
            let role = parse_role(item.get("role").and_then(|r| r.as_str()).unwrap_or("user"));
            let content = parse_content(item.get("content"));
            items.push(TraceInputItem::Message {
                role,
                content,
                name: None,
                tool_call_id: None,
                tool_calls: None,
            });
        }
    }
}

fn parse_arguments(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}

fn parse_role(role: &str) -> MessageRole {
    match role {
        "system" => MessageRole::System,
        "assistant" => MessageRole::Assistant,
        "developer" => MessageRole::Developer,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

fn parse_content(content: Option<&Value>) -> MessageContent {
    match content {
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        Some(Value::Array(parts)) => MessageContent::Parts(parts.clone()),
        _ => MessageContent::Text(String::new()),
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        "function_call" => FinishReason::FunctionCall,
        _ => FinishReason::Stop,
    }
}

fn map_responses_status(status: &str) -> FinishReason {
    match status {
        "incomplete" => FinishReason::Length,
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
    fn parses_basic_chat_completion() {
        let request = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.5
        });
        let response = serde_json::json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        });

        let record = OpenAiParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.model, "gpt-4");
        assert_eq!(record.result.as_deref(), Some("hello"));
        assert_eq!(record.prompt_tokens, Some(5));
        assert_eq!(record.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn unknown_finish_reason_collapses_to_stop() {
        let request = serde_json::json!({"model": "gpt-4", "messages": []});
        let response = serde_json::json!({
            "choices": [{"message": {"content": null}, "finish_reason": "something_new"}]
        });
        let record = OpenAiParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn responses_instructions_prepended_as_system_message() {
        let request = serde_json::json!({
            "model": "gpt-4o",
            "instructions": "Be concise",
            "input": "hi there"
        });
        let record = OpenAiParser.parse(&request, None, &ctx());

        assert_eq!(record.instructions.as_deref(), Some("Be concise"));
        assert_eq!(record.input.len(), 2);
        match &record.input[0] {
            TraceInputItem::Message { role, content, .. } => {
                assert_eq!(*role, MessageRole::System);
                assert_eq!(content.as_text(), Some("Be concise"));
            }
            _ => panic!("expected system message"),
        }
        match &record.input[1] {
            TraceInputItem::Message { role, content, .. } => {
                assert_eq!(*role, MessageRole::User);
                assert_eq!(content.as_text(), Some("hi there"));
            }
            _ => panic!("expected user message"),
        }
    }

    #[test]
    fn responses_input_array_with_function_call_round_trip() {
        let request = serde_json::json!({
            "model": "gpt-4o",
            "input": [
                {"role": "user", "content": "what's the weather?"},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{\"city\":\"nyc\"}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "72F"}
            ]
        });
        let record = OpenAiParser.parse(&request, None, &ctx());

        assert_eq!(record.input.len(), 3);
        assert!(matches!(record.input[1], TraceInputItem::FunctionCall { .. }));
        match &record.input[2] {
            TraceInputItem::FunctionResult { call_id, name, result } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "get_weather");
                assert_eq!(result, &Value::String("72F".to_string()));
            }
            _ => panic!("expected function result"),
        }
    }

    #[test]
    fn responses_output_message_and_function_call_extracted() {
        let request = serde_json::json!({"model": "gpt-4o", "input": "hi"});
        let response = serde_json::json!({
            "status": "completed",
            "output": [
                {
                    "type": "message",
                    "id": "msg_1",
                    "status": "completed",
                    "content": [{"type": "output_text", "text": "hello there"}]
                },
                {
                    "type": "function_call",
                    "id": "fc_1",
                    "call_id": "call_1",
                    "name": "get_weather",
                    "arguments": "{\"city\":\"nyc\"}",
                    "status": "completed"
                }
            ],
            "usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "total_tokens": 15,
                "input_tokens_details": {"cached_tokens": 2},
                "output_tokens_details": {"reasoning_tokens": 1}
            }
        });

        let record = OpenAiParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.result.as_deref(), Some("hello there"));
        assert_eq!(record.finish_reason, Some(FinishReason::Stop));
        assert_eq!(record.prompt_tokens, Some(10));
        assert_eq!(record.completion_tokens, Some(5));
        assert_eq!(record.cached_tokens, Some(2));
        assert_eq!(record.reasoning_tokens, Some(1));
        let output = record.output.expect("output items");
        assert_eq!(output.len(), 2);
        assert!(matches!(output[0], OutputItem::Message { .. }));
        assert!(matches!(output[1], OutputItem::FunctionToolCall { .. }));
    }

    #[test]
    fn responses_incomplete_status_maps_to_length() {
        let request = serde_json::json!({"model": "gpt-4o", "input": "hi"});
        let response = serde_json::json!({"status": "incomplete", "output": []});
        let record = OpenAiParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.finish_reason, Some(FinishReason::Length));
    }
}
