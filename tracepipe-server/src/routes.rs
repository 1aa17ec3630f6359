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

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ingest::{post_http_trace, post_trace};
use crate::state::AppState;

async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Builds the full application router (§6): `POST /v1/http-traces`,
/// `POST /v1/traces`, `GET /healthz`.
pub fn router(state: AppState, enable_cors: bool) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(health_check))
        .route("/v1/http-traces", post(post_http_trace))
        .route("/v1/traces", post(post_trace))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}
