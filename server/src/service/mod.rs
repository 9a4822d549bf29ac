//! HTTP surface: request/response mapping over the storage adapter.
//!
//! Handlers stay thin; everything interesting happens in the rules and
//! persistence layers. Both kinds share the same generic handlers, with
//! per-kind wrappers bound to the original route names.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::TrackerError;
use crate::model::{Entity, EntityPatch, Kind, LimitStatus, NewEntity};
use crate::persistence::traits::EntityRepository;
use crate::persistence::Store;
use crate::rules;

pub struct AppState {
    pub store: Store,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/api/games", get(list_games).post(create_game))
        .route("/api/games/:id", patch(update_game).delete(delete_game))
        .route("/api/active-count", get(game_count))
        .route("/api/settings/limit", post(set_game_limit))
        .route("/api/books", get(list_books).post(create_book))
        .route("/api/books/:id", patch(update_book).delete(delete_book))
        .route("/api/reading-count", get(book_count))
        .route("/api/settings/reading-limit", post(set_book_limit))
        .layer(cors)
        .with_state(state)
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TrackerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TrackerError::LimitExceeded { .. } | TrackerError::DuplicateName { .. } => {
                StatusCode::BAD_REQUEST
            }
            TrackerError::NotFound { .. } => StatusCode::NOT_FOUND,
            TrackerError::Io(_)
            | TrackerError::Json(_)
            | TrackerError::Database(_)
            | TrackerError::Unavailable(_)
            | TrackerError::CorruptFile { .. }
            | TrackerError::InvalidRecord(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct LimitPayload {
    limit: u32,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Response, TrackerError> {
    let mut body = serde_json::Map::new();
    body.insert("status".into(), json!("healthy"));
    body.insert("backend".into(), json!(state.store.backend_name()));
    for kind in Kind::ALL {
        let spec = kind.spec();
        let active = state.store.count_by_status(kind, spec.counting).await?;
        let total = state.store.count_all(kind).await?;
        body.insert(
            format!("{}s", kind.as_str()),
            json!({ "active": active, "total": total }),
        );
    }
    Ok(Json(serde_json::Value::Object(body)).into_response())
}

async fn list(state: &AppState, kind: Kind) -> Result<Response, TrackerError> {
    let entities = state.store.list_all(kind).await?;
    let grouped = rules::group_by_status(kind.spec(), entities);
    Ok(Json(grouped).into_response())
}

async fn create(state: &AppState, kind: Kind, req: NewEntity) -> Result<Entity, TrackerError> {
    state.store.create(kind, req).await
}

async fn update(
    state: &AppState,
    kind: Kind,
    id: i64,
    patch: EntityPatch,
) -> Result<Entity, TrackerError> {
    state.store.update(kind, id, patch).await
}

async fn delete(state: &AppState, kind: Kind, id: i64) -> Result<Response, TrackerError> {
    state.store.delete(kind, id).await?;
    Ok(Json(json!({ "success": true })).into_response())
}

async fn count(state: &AppState, kind: Kind) -> Result<LimitStatus, TrackerError> {
    state.store.limit_status(kind).await
}

async fn set_limit(state: &AppState, kind: Kind, limit: u32) -> Result<LimitStatus, TrackerError> {
    state.store.set_limit(kind, limit).await
}

async fn list_games(State(state): State<Arc<AppState>>) -> Result<Response, TrackerError> {
    list(&state, Kind::Game).await
}

async fn create_game(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewEntity>,
) -> Result<Json<Entity>, TrackerError> {
    Ok(Json(create(&state, Kind::Game, req).await?))
}

async fn update_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<EntityPatch>,
) -> Result<Json<Entity>, TrackerError> {
    Ok(Json(update(&state, Kind::Game, id, patch).await?))
}

async fn delete_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, TrackerError> {
    delete(&state, Kind::Game, id).await
}

async fn game_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LimitStatus>, TrackerError> {
    Ok(Json(count(&state, Kind::Game).await?))
}

async fn set_game_limit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LimitPayload>,
) -> Result<Json<LimitStatus>, TrackerError> {
    Ok(Json(set_limit(&state, Kind::Game, payload.limit).await?))
}

async fn list_books(State(state): State<Arc<AppState>>) -> Result<Response, TrackerError> {
    list(&state, Kind::Book).await
}

async fn create_book(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewEntity>,
) -> Result<Json<Entity>, TrackerError> {
    Ok(Json(create(&state, Kind::Book, req).await?))
}

async fn update_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<EntityPatch>,
) -> Result<Json<Entity>, TrackerError> {
    Ok(Json(update(&state, Kind::Book, id, patch).await?))
}

async fn delete_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, TrackerError> {
    delete(&state, Kind::Book, id).await
}

async fn book_count(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LimitStatus>, TrackerError> {
    Ok(Json(count(&state, Kind::Book).await?))
}

async fn set_book_limit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LimitPayload>,
) -> Result<Json<LimitStatus>, TrackerError> {
    Ok(Json(set_limit(&state, Kind::Book, payload.limit).await?))
}
