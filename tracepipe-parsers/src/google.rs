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

//! Parser for the Google generative-language API format
//! (`generativelanguage.googleapis.com` / `aiplatform.googleapis.com`).

use serde_json::Value;
use tracepipe_core::model::{FinishReason, MessageContent, MessageRole, TraceInputItem, TraceRecord};

use crate::{ParseContext, ProviderParser};

pub struct GoogleGenAiParser;

impl ProviderParser for GoogleGenAiParser {
    fn can_parse(&self, url: &str) -> bool {
        url.contains("googleapis.com")
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
            .map(String::from)
            .or_else(|| {
                ctx.metadata
                    .as_ref()
                    .and_then(|m| m.get("model"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            })
            .or_else(|| model_from_url(&ctx.url))
            .unwrap_or_else(|| "unknown".to_string());

        let mut input_items = Vec::new();
        if let Some(contents) = request_body.get("contents").and_then(|c| c.as_array()) {
            for content in contents {
                let role_str = content.get("role").and_then(|r| r.as_str()).unwrap_or("user");
                let role = match role_str {
                    "model" => MessageRole::Assistant,
                    _ => MessageRole::User,
                };

                if let Some(parts) = content.get("parts").and_then(|p| p.as_array()) {
                    for part in parts {
                        push_part(&mut input_items, part, role);
                    }
                }
            }
        }

        let system_text: Option<String> = request_body
            .get("systemInstruction")
            .and_then(|si| si.get("parts"))
            .and_then(|p| p.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|s| !s.is_empty());

        if let Some(system_text) = &system_text {
            input_items.insert(
                0,
                TraceInputItem::Message {
                    role: MessageRole::System,
                    content: MessageContent::Text(system_text.clone()),
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
                if let Some(candidate) = response_body
                    .get("candidates")
                    .and_then(|c| c.as_array())
                    .and_then(|arr| arr.first())
                {
                    let mut text_parts = Vec::new();
                    if let Some(parts) = candidate
                        .get("content")
                        .and_then(|c| c.get("parts"))
                        .and_then(|p| p.as_array())
                    {
                        for part in parts {
                            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                                text_parts.push(text.to_string());
                            } else if part.get("functionCall").is_some() {
                                push_part(&mut input_items, part, MessageRole::Assistant);
                            }
                        }
                    }
                    if !text_parts.is_empty() {
                        result = Some(text_parts.join("\n"));
                    }

                    finish_reason = candidate
                        .get("finishReason")
                        .and_then(|f| f.as_str())
                        .map(map_finish_reason);
                }

                if let Some(usage) = response_body.get("usageMetadata") {
                    prompt_tokens = usage.get("promptTokenCount").and_then(|v| v.as_i64());
                    completion_tokens = usage.get("candidatesTokenCount").and_then(|v| v.as_i64());
                    total_tokens = usage.get("totalTokenCount").and_then(|v| v.as_i64());
                }
            }
        }

        let generation_config = request_body.get("generationConfig");

        TraceRecord {
            project: ctx.project(),
            model,
            started_at: ctx.started_at,
            completed_at: ctx.completed_at,
            input: input_items,
            output: None,
            instructions: system_text,
            prompt: None,
            temperature: generation_config
                .and_then(|g| g.get("temperature"))
                .and_then(|v| v.as_f64()),
            tool_choice: None,
            tools: None,
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
            max_tokens: generation_config
                .and_then(|g| g.get("maxOutputTokens"))
                .and_then(|v| v.as_i64()),
        }
    }
}

/// Recovers `model` from a request path of the form
/// `.../models/{model}:generateContent`. Returns `None` if the path
/// carries no `models/` segment.
fn model_from_url(url: &str) -> Option<String> {
    let after_models = url.split("/models/").nth(1)?;
    let segment = after_models.split(['?', '#']).next().unwrap_or(after_models);
    let name = segment.split(':').next().unwrap_or(segment);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn push_part(items: &mut Vec<TraceInputItem>, part: &Value, role: MessageRole) {
    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
        items.push(TraceInputItem::Message {
            role,
            content: MessageContent::Text(text.to_string()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        });
    } else if let Some(func_call) = part.get("functionCall") {
        let name = func_call
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let call_id = format!("fc_{name}_{}", items.len());
        items.push(TraceInputItem::FunctionCall {
            call_id,
            name,
            arguments: func_call.get("args").cloned().unwrap_or(Value::Null),
        });
    } else if let Some(func_response) = part.get("functionResponse") {
        let name = func_response
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();
        let call_id = format!("fc_{name}_{}", items.len());
        items.push(TraceInputItem::FunctionResult {
            call_id,
            name,
            result: func_response.get("response").cloned().unwrap_or(Value::Null),
        });
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" => FinishReason::ContentFilter,
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
    fn system_instruction_prepended_and_roles_mapped() {
        let request = serde_json::json!({
            "systemInstruction": {"parts": [{"text": "Be concise"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]}
            ]
        });
        let record = GoogleGenAiParser.parse(&request, None, &ctx());
        assert_eq!(record.input.len(), 3);
        match &record.input[0] {
            TraceInputItem::Message { role, .. } => assert_eq!(*role, MessageRole::System),
            _ => panic!("expected system message"),
        }
        match &record.input[2] {
            TraceInputItem::Message { role, .. } => assert_eq!(*role, MessageRole::Assistant),
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn function_call_and_response_extracted() {
        let request = serde_json::json!({
            "contents": [{"role": "model", "parts": [
                {"functionCall": {"name": "lookup", "args": {"q": "x"}}}
            ]}]
        });
        let record = GoogleGenAiParser.parse(&request, None, &ctx());
        assert!(matches!(record.input[0], TraceInputItem::FunctionCall { .. }));
    }

    #[test]
    fn model_recovered_from_url_when_body_and_metadata_omit_it() {
        let request = serde_json::json!({"contents": []});
        let ctx = ParseContext {
            url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent".to_string(),
            ..ctx()
        };
        let record = GoogleGenAiParser.parse(&request, None, &ctx);
        assert_eq!(record.model, "gemini-1.5-pro");
    }

    #[test]
    fn safety_finish_reason_maps_to_content_filter() {
        let request = serde_json::json!({"contents": []});
        let response = serde_json::json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        });
        let record = GoogleGenAiParser.parse(&request, Some(&response), &ctx());
        assert_eq!(record.finish_reason, Some(FinishReason::ContentFilter));
    }
}
