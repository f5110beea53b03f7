use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::generation::{build_prompt, build_prompt_from_context};
use crate::rag::NewDocument;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let provider_ok = state.provider.health_check().await.unwrap_or(false);
    let documents = state.store.count_documents().await?;
    let vectors = state.index.read().await.ntotal();

    Ok(Json(json!({
        "status": "ok",
        "provider": state.provider.name(),
        "provider_reachable": provider_ok,
        "documents": documents,
        "vectors": vectors,
    })))
}

pub async fn add_document(
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewDocument>,
) -> Result<impl IntoResponse, ApiError> {
    let docs = state.pipeline.add_documents(vec![input]).await?;
    Ok((StatusCode::CREATED, Json(json!({ "documents": docs }))))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let docs = state.store.list_documents().await?;
    let listed: Vec<_> = docs
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "title": d.title,
                "url": d.url,
                "timestamp": d.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "documents": listed })))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.pipeline.delete_document(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let passages = state.retriever.search(&req.query).await?;
    Ok(Json(json!({ "passages": passages })))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub query: String,
    /// pre-assembled context; when absent, retrieval runs first
    #[serde(default)]
    pub context: Option<String>,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let prompt = match req.context {
        Some(context) => build_prompt_from_context(&req.query, &context),
        None => {
            let passages = state.retriever.search(&req.query).await?;
            build_prompt(&req.query, &passages)
        }
    };

    let (request_id, rx) = state.generation.start(prompt).await?;
    tracing::debug!("generation {} streaming", request_id);

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Some((Ok(Event::default().data(payload)), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn cancel_generation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.generation.cancel().await;
    StatusCode::NO_CONTENT
}
