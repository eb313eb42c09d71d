use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Every successful response body is `{"data": ...}` (spec.md §6); every
/// failure is `CoreError`'s `{"error": {...}}` shape. Handlers return
/// `Result<impl IntoResponse, CoreError>` and wrap their payload with
/// this at the very end.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "data": data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (axum::http::StatusCode::CREATED, Json(json!({ "data": data }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

impl PageQuery {
    const DEFAULT_LIMIT: usize = 50;
    const MAX_LIMIT: usize = 200;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Opaque-cursor pagination over an already-loaded, stably-ordered
/// slice (spec.md §6). The cursor is just the id of the last item
/// returned; a caller presenting an unknown or stale cursor resumes
/// from the start rather than erroring, which keeps the endpoint
/// forgiving of a client restarting its walk.
pub fn paginate<T: Clone>(
    all: &[T],
    cursor: Option<&str>,
    limit: usize,
    id_of: impl Fn(&T) -> &str,
) -> Page<T> {
    let start = cursor
        .and_then(|c| all.iter().position(|item| id_of(item) == c))
        .map(|pos| pos + 1)
        .unwrap_or(0);

    let remaining = &all[start.min(all.len())..];
    let has_more = remaining.len() > limit;
    let items: Vec<T> = remaining.iter().take(limit).cloned().collect();
    let next_cursor = if has_more {
        items.last().map(|item| id_of(item).to_string())
    } else {
        None
    };

    Page {
        items,
        next_cursor,
        has_more,
    }
}
