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

//! Error taxonomy (§7). `ApiError` is the boundary type every HTTP handler
//! returns; `ParseError` is the narrower set the provider parsers raise.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("row not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Errors raised by the provider parser registry (§4.A). Unlike `ApiError`
/// there is deliberately no `MalformedResponse` variant: a malformed or
/// absent response is non-fatal and yields a `TraceRecord` with
/// `result: None` rather than an error.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no parser claims this URL")]
    UnsupportedProvider,
    #[error("malformed request body: {0}")]
    MalformedRequest(String),
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::UnsupportedProvider => ApiError::BadRequest(err.to_string()),
            ParseError::MalformedRequest(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}
