//! # Trigger API Handlers
//!
//! Enabling and disabling trigger instances, on-demand test and poll runs and
//! the recorded event log.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::framework::AuthValue;
use crate::models::{trigger_event, trigger_instance};
use crate::runtime::EnableTrigger;
use crate::server::AppState;

const DEFAULT_EVENTS_LIMIT: u64 = 50;
const MAX_EVENTS_LIMIT: u64 = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct TriggerPath {
    /// Trigger instance ID
    #[param(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateTriggerRequest {
    #[schema(example = "zendesk")]
    pub piece: String,
    #[schema(example = "new_ticket_in_view")]
    pub trigger: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub auth: Option<AuthValue>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub props: Map<String, Value>,
    /// Requested polling interval, clamped to the configured minimum
    pub poll_interval_seconds: Option<u64>,
}

/// A trigger instance as exposed by the API; credentials are never returned
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerInstanceView {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub piece: String,
    pub trigger: String,
    pub strategy: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub props: Value,
    pub poll_interval_seconds: i64,
    pub next_poll_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub last_error: Option<Value>,
    /// Where the vendor should deliver events, for webhook triggers
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TriggerInstanceView {
    fn from_model(model: trigger_instance::Model, state: &AppState) -> Self {
        let webhook_url = (model.strategy == "webhook").then(|| state.config.webhook_url(&model.id));
        Self {
            id: model.id,
            piece: model.piece_name,
            trigger: model.trigger_name,
            strategy: model.strategy,
            status: model.status,
            props: model.props,
            poll_interval_seconds: model.poll_interval_seconds,
            next_poll_at: model.next_poll_at.map(|t| t.with_timezone(&Utc)),
            last_polled_at: model.last_polled_at.map(|t| t.with_timezone(&Utc)),
            last_error: model.last_error,
            webhook_url,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerEventView {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub source: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl From<trigger_event::Model> for TriggerEventView {
    fn from(model: trigger_event::Model) -> Self {
        Self {
            id: model.id,
            source: model.source,
            payload: model.payload,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TriggerRunResponse {
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<Value>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Maximum number of events to return (default: 50, max: 500)
    pub limit: Option<u64>,
}

/// Enable a trigger
#[utoipa::path(
    post,
    path = "/triggers",
    request_body = CreateTriggerRequest,
    responses(
        (status = 201, description = "Trigger enabled", body = TriggerInstanceView),
        (status = 400, description = "Invalid props or auth", body = ApiError),
        (status = 404, description = "Unknown piece or trigger", body = ApiError),
        (status = 502, description = "Vendor rejected the subscription", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn create_trigger(
    State(state): State<AppState>,
    Json(request): Json<CreateTriggerRequest>,
) -> Result<(StatusCode, Json<TriggerInstanceView>), ApiError> {
    let instance = state
        .runtime
        .enable(EnableTrigger {
            piece: request.piece,
            trigger: request.trigger,
            auth: request.auth.unwrap_or(AuthValue::None),
            props: request.props,
            poll_interval_seconds: request.poll_interval_seconds,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TriggerInstanceView::from_model(instance, &state)),
    ))
}

#[utoipa::path(
    get,
    path = "/triggers/{id}",
    params(TriggerPath),
    responses(
        (status = 200, description = "Trigger instance", body = TriggerInstanceView),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn get_trigger(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
) -> Result<Json<TriggerInstanceView>, ApiError> {
    let instance = state.runtime.get(path.id).await?;
    Ok(Json(TriggerInstanceView::from_model(instance, &state)))
}

/// Disable a trigger; repeated calls are no-ops
#[utoipa::path(
    delete,
    path = "/triggers/{id}",
    params(TriggerPath),
    responses(
        (status = 200, description = "Trigger disabled", body = TriggerInstanceView),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn delete_trigger(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
) -> Result<Json<TriggerInstanceView>, ApiError> {
    let instance = state.runtime.disable(path.id).await?;
    Ok(Json(TriggerInstanceView::from_model(instance, &state)))
}

/// Fetch sample events without advancing the trigger's cursor
#[utoipa::path(
    post,
    path = "/triggers/{id}/test",
    params(TriggerPath),
    responses(
        (status = 200, description = "Sample events", body = TriggerRunResponse),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn test_trigger(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
) -> Result<Json<TriggerRunResponse>, ApiError> {
    let events = state.runtime.test(path.id).await?;
    Ok(Json(TriggerRunResponse { events }))
}

/// Poll now, outside the schedule
#[utoipa::path(
    post,
    path = "/triggers/{id}/poll",
    params(TriggerPath),
    responses(
        (status = 200, description = "New events", body = TriggerRunResponse),
        (status = 404, description = "Unknown instance", body = ApiError),
        (status = 409, description = "Instance disabled or not a polling trigger", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn poll_trigger(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
) -> Result<Json<TriggerRunResponse>, ApiError> {
    let events = state.runtime.poll(path.id).await?;
    Ok(Json(TriggerRunResponse { events }))
}

/// Recorded events, newest first
#[utoipa::path(
    get,
    path = "/triggers/{id}/events",
    params(TriggerPath, EventsQuery),
    responses(
        (status = 200, description = "Recorded events", body = [TriggerEventView]),
        (status = 400, description = "Invalid limit", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError)
    ),
    tag = "triggers"
)]
pub async fn list_events(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<TriggerEventView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
    if !(1..=MAX_EVENTS_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {}",
            MAX_EVENTS_LIMIT
        )));
    }

    let events = state.runtime.events(path.id, limit).await?;
    Ok(Json(events.into_iter().map(TriggerEventView::from).collect()))
}
