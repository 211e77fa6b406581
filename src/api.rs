//! HTTP API over the pipeline
//!
//! - `POST /api/events`: validate and publish an event (202 on ack)
//! - `GET /api/events`: every consumed event, newest first
//! - `GET /api/events/user/:user_id`: events of one user (404 if none)
//! - `GET /api/events/type/:event_type`: events of one type, any case (404 if none)
//! - `GET /health`: liveness plus store size
//!
//! Queries read the store, so an event shows up only after the consumer
//! has applied it.

use crate::error::EventError;
use crate::producer::EventProducer;
use crate::store::{sort_newest_first, EventStore};
use crate::types::ActivityEvent;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for API handlers
pub struct AppState {
    pub producer: Arc<EventProducer>,
    pub store: Arc<EventStore>,
}

/// Response after a successful publish
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub message: String,
    pub event_id: String,
}

/// Query response; `user_id` / `event_type` echo the filter when present
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub count: usize,
    pub events: Vec<Arc<ActivityEvent>>,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub stored_events: usize,
}

/// Error body for 400 and 500 responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body for 404 responses
#[derive(Debug, Serialize)]
pub struct NotFoundResponse {
    pub message: String,
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/events", get(list_handler).post(publish_handler))
        .route("/api/events/user/:user_id", get(by_user_handler))
        .route("/api/events/type/:event_type", get(by_type_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.producer.provider_name().to_string(),
        stored_events: state.store.len(),
    })
}

async fn publish_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<ActivityEvent>, JsonRejection>,
) -> Response {
    let event = match body {
        Ok(Json(event)) => event,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected event body");
            return bad_request(rejection.body_text());
        }
    };

    if let Err(e) = event.validate() {
        let message = match e {
            EventError::Validation(message) => message,
            other => other.to_string(),
        };
        return bad_request(message);
    }

    match state.producer.publish(&event).await {
        Ok(_) => (
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/api/events/{}", event.id))],
            Json(PublishResponse {
                message: "Event published successfully".to_string(),
                event_id: event.id,
            }),
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to publish event".to_string(),
            }),
        )
            .into_response(),
    }
}

async fn list_handler(State(state): State<Arc<AppState>>) -> Json<EventsResponse> {
    Json(events_response(state.store.all(), None, None))
}

async fn by_user_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Response {
    let events = state.store.by_user(&user_id);
    if events.is_empty() {
        return not_found(format!("No events found for user {}", user_id));
    }
    Json(events_response(events, Some(user_id), None)).into_response()
}

async fn by_type_handler(
    State(state): State<Arc<AppState>>,
    Path(event_type): Path<String>,
) -> Response {
    let events = state.store.by_type(&event_type);
    if events.is_empty() {
        return not_found(format!("No events found for type {}", event_type));
    }
    Json(events_response(events, None, Some(event_type))).into_response()
}

fn events_response(
    mut events: Vec<Arc<ActivityEvent>>,
    user_id: Option<String>,
    event_type: Option<String>,
) -> EventsResponse {
    sort_newest_first(&mut events);
    EventsResponse {
        user_id,
        event_type,
        count: events.len(),
        events,
    }
}

fn bad_request(error: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(NotFoundResponse { message })).into_response()
}
