use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use viewer_api::ConnectionState;

use super::AppState;

fn bad_request(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
        .into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_topics(State(state): State<AppState>) -> Response {
    Json(state.viewer.query().summaries().await).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/topics/{key}
// ═══════════════════════════════════════════════════════════════

/// Неизвестный ключ — пустой массив, не 404.
pub(crate) async fn handle_get_messages(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    Json(state.viewer.query().get_messages(&key).await).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/search?term=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct SearchParams {
    #[serde(default)]
    term: String,
}

#[derive(Serialize)]
pub(crate) struct SearchResult {
    pub term: String,
    pub topic: Option<String>,
}

pub(crate) async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    let topic = state.viewer.query().search(&params.term).await;
    Json(SearchResult {
        term: params.term,
        topic,
    })
    .into_response()
}

// ═══════════════════════════════════════════════════════════════
//  REST: PUT /api/alert-filter | /api/capacity | /api/filter
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct AlertFilterBody {
    #[serde(default)]
    term: String,
}

pub(crate) async fn handle_set_alert_filter(
    State(state): State<AppState>,
    Json(body): Json<AlertFilterBody>,
) -> Response {
    let query = state.viewer.query();
    query.set_active_filter(&body.term);
    Json(serde_json::json!({ "alert_filter": query.active_filter() })).into_response()
}

#[derive(Deserialize)]
pub(crate) struct CapacityBody {
    capacity: usize,
}

pub(crate) async fn handle_set_capacity(
    State(state): State<AppState>,
    Json(body): Json<CapacityBody>,
) -> Response {
    match state.viewer.set_capacity(body.capacity).await {
        Ok(()) => Json(serde_json::json!({ "capacity": body.capacity })).into_response(),
        Err(e) => bad_request(e),
    }
}

#[derive(Deserialize)]
pub(crate) struct FilterBody {
    filter: String,
}

pub(crate) async fn handle_set_filter(
    State(state): State<AppState>,
    Json(body): Json<FilterBody>,
) -> Response {
    match state.viewer.set_filter(body.filter.trim()) {
        Ok(()) => Json(serde_json::json!({ "filter": state.viewer.subscription_filter() }))
            .into_response(),
        Err(e) => bad_request(e),
    }
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/status
// ═══════════════════════════════════════════════════════════════

#[derive(Serialize)]
pub(crate) struct Status {
    connection: ConnectionState,
    capacity: usize,
    topic_count: usize,
    filter: Option<String>,
    alert_filter: Option<String>,
}

pub(crate) async fn handle_status(State(state): State<AppState>) -> Response {
    let viewer = &state.viewer;
    Json(Status {
        connection: viewer.connection_state(),
        capacity: viewer.capacity().await,
        topic_count: viewer.query().topic_count().await,
        filter: viewer.subscription_filter(),
        alert_filter: viewer.query().active_filter(),
    })
    .into_response()
}
