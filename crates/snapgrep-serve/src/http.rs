// Copyright 2025 Snapgrep Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP surface: JSON in, JSON out, explicit status mapping.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};

use crate::error::StoreError;
use crate::service::{SearchRequest, SearchService};

pub fn router(service: SearchService) -> Router {
    Router::new()
        .route("/search", post(search_handler))
        .route("/healthz", get(health_handler))
        .with_state(service)
}

async fn search_handler(
    State(service): State<SearchService>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    tracing::info!(repo = %req.repo, commit = %req.commit, pattern = %req.pattern, "search request");
    let started = std::time::Instant::now();
    match service.search(&req).await {
        Ok(resp) => {
            tracing::info!(
                repo = %req.repo,
                matches = resp.matches.len(),
                limit_hit = resp.limit_hit,
                deadline_hit = resp.deadline_hit,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "search complete"
            );
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(repo = %req.repo, error = %e, "search failed");
            } else {
                tracing::info!(repo = %req.repo, error = %e, "search rejected");
            }
            let body = serde_json::json!({ "error": e.to_string() });
            (status, Json(body)).into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

fn status_for(e: &StoreError) -> StatusCode {
    match e {
        StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        StoreError::Fetch { temporary: true, .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::FetchTimeout => StatusCode::REQUEST_TIMEOUT,
        StoreError::Fetch { .. } | StoreError::Corrupt(_) | StoreError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
