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

//! Provider parser registry: decodes a raw HTTP capture into a
//! provider-agnostic [`TraceRecord`], without losing semantic structure
//! like tool calls and multimodal content.

mod anthropic;
mod google;
mod openai;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracepipe_core::error::ParseError;
use tracepipe_core::model::TraceRecord;

pub use anthropic::AnthropicParser;
pub use google::GoogleGenAiParser;
pub use openai::OpenAiParser;

/// Everything a provider parser needs beyond the decoded JSON bodies.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub call_path: Option<String>,
    /// The resolved request URL, used by the Google parser to recover
    /// `model` from the path when the request body omits it.
    pub url: String,
}

impl ParseContext {
    pub(crate) fn project(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("project"))
            .and_then(|p| p.as_str())
            .unwrap_or("Default Project")
            .to_string()
    }

    pub(crate) fn task_id(&self) -> Option<i64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("task_id"))
            .and_then(|t| t.as_i64())
    }

    pub(crate) fn path(&self) -> Option<String> {
        self.call_path.clone().or_else(|| {
            self.metadata
                .as_ref()
                .and_then(|m| m.get("path"))
                .and_then(|p| p.as_str())
                .map(String::from)
        })
    }
}

/// A provider's detection + normalization capability. Implementations are
/// plain values held in an ordered registry; the first whose `can_parse`
/// returns true handles the capture.
pub trait ProviderParser: Send + Sync {
    fn can_parse(&self, url: &str) -> bool;

    fn parse(
        &self,
        request_body: &Value,
        response_body: Option<&Value>,
        ctx: &ParseContext,
    ) -> TraceRecord;
}

/// The raw capture as delivered at the ingestion boundary. Byte fields
/// may arrive hex-encoded or as UTF-8 strings; the HTTP layer is
/// responsible for decoding into `request_bytes`/`response_bytes` before
/// constructing this struct.
#[derive(Debug, Clone)]
pub struct HttpCapture {
    pub url: Option<String>,
    pub request_bytes: Vec<u8>,
    pub request_headers: HashMap<String, String>,
    pub response_bytes: Option<Vec<u8>>,
    pub response_headers: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub call_path: Option<String>,
    pub request_method: Option<String>,
    pub request_path: Option<String>,
}

fn resolve_url(capture: &HttpCapture) -> Option<String> {
    if let Some(url) = &capture.url {
        return Some(url.clone());
    }
    if let Some(metadata_url) = capture
        .metadata
        .as_ref()
        .and_then(|m| m.get("url"))
        .and_then(|u| u.as_str())
    {
        return Some(metadata_url.to_string());
    }

    let host = capture
        .request_headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("host"))
        .map(|(_, v)| v.clone())?;
    let path = capture.request_path.clone().unwrap_or_default();
    Some(format!("https://{host}{path}"))
}

pub struct ParserRegistry {
    parsers: Vec<Box<dyn ProviderParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            parsers: vec![
                Box::new(OpenAiParser),
                Box::new(AnthropicParser),
                Box::new(GoogleGenAiParser),
            ],
        }
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a capture into a `TraceRecord`. The only fatal errors are
    /// `UnsupportedProvider` and `MalformedRequest`; a malformed or absent
    /// response is non-fatal and yields a record with `result: None`.
    pub fn parse(&self, capture: &HttpCapture) -> Result<TraceRecord, ParseError> {
        let url = resolve_url(capture).ok_or(ParseError::UnsupportedProvider)?;
        let parser = self
            .parsers
            .iter()
            .find(|p| p.can_parse(&url))
            .ok_or(ParseError::UnsupportedProvider)?;

        let request_str = String::from_utf8_lossy(&capture.request_bytes);
        let request_body: Value = serde_json::from_str(&request_str)
            .map_err(|e| ParseError::MalformedRequest(e.to_string()))?;

        let response_body = capture.response_bytes.as_ref().and_then(|bytes| {
            let s = String::from_utf8_lossy(bytes);
            serde_json::from_str::<Value>(&s).ok()
        });

        let ctx = ParseContext {
            started_at: capture.started_at,
            completed_at: capture.completed_at,
            error: capture.error.clone(),
            metadata: capture.metadata.clone(),
            call_path: capture.call_path.clone(),
            url: url.clone(),
        };

        Ok(parser.parse(&request_body, response_body.as_ref(), &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_provider_when_no_parser_matches() {
        let registry = ParserRegistry::new();
        let capture = HttpCapture {
            url: Some("https://example.com/v1/chat".to_string()),
            request_bytes: b"{}".to_vec(),
            request_headers: HashMap::new(),
            response_bytes: None,
            response_headers: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            metadata: None,
            call_path: None,
            request_method: None,
            request_path: None,
        };
        assert!(matches!(
            registry.parse(&capture),
            Err(ParseError::UnsupportedProvider)
        ));
    }

    #[test]
    fn malformed_request_body_is_fatal() {
        let registry = ParserRegistry::new();
        let capture = HttpCapture {
            url: Some("https://api.openai.com/v1/chat/completions".to_string()),
            request_bytes: b"not json".to_vec(),
            request_headers: HashMap::new(),
            response_bytes: None,
            response_headers: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            metadata: None,
            call_path: None,
            request_method: None,
            request_path: None,
        };
        assert!(matches!(
            registry.parse(&capture),
            Err(ParseError::MalformedRequest(_))
        ));
    }

    #[test]
    fn missing_response_yields_null_result() {
        let registry = ParserRegistry::new();
        let capture = HttpCapture {
            url: Some("https://api.openai.com/v1/chat/completions".to_string()),
            request_bytes: br#"{"model":"gpt-4","messages":[{"role":"user","content":"hi"}]}"#
                .to_vec(),
            request_headers: HashMap::new(),
            response_bytes: None,
            response_headers: HashMap::new(),
            started_at: Utc::now(),
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

    #[test]
    fn url_reconstructed_from_host_header() {
        let registry = ParserRegistry::new();
        let mut headers = HashMap::new();
        headers.insert("Host".to_string(), "api.anthropic.com".to_string());
        let capture = HttpCapture {
            url: None,
            request_bytes: br#"{"model":"claude-3","messages":[]}"#.to_vec(),
            request_headers: headers,
            response_bytes: None,
            response_headers: HashMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            metadata: None,
            call_path: None,
            request_method: None,
            request_path: Some("/v1/messages".to_string()),
        };
        assert!(registry.parse(&capture).is_ok());
    }
}
