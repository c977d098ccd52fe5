//! # Webhook Handlers
//!
//! Public delivery endpoint for vendor webhooks. The raw body and headers are
//! handed to the trigger untouched so that it can verify signatures itself.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::framework::WebhookPayload;
use crate::handlers::triggers::TriggerPath;
use crate::runtime::WebhookOutcome;
use crate::server::AppState;

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAcceptResponse {
    pub accepted: bool,
    /// Number of events recorded from this delivery
    pub events: usize,
}

/// Build the payload a trigger sees. Non-JSON bodies are kept as a string.
pub fn webhook_payload(
    headers: &HeaderMap,
    query: BTreeMap<String, String>,
    body: &[u8],
) -> WebhookPayload {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let parsed = if body.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(body)
            .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(body).into_owned()))
    };

    WebhookPayload {
        body: parsed,
        raw_body: body.to_vec(),
        headers,
        query,
    }
}

/// Receive a vendor webhook delivery
#[utoipa::path(
    post,
    path = "/webhooks/{id}",
    params(TriggerPath),
    request_body(content = String, description = "Raw vendor payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Delivery accepted", body = WebhookAcceptResponse),
        (status = 401, description = "Invalid signature", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError),
        (status = 409, description = "Instance disabled or not a webhook trigger", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<TriggerPath>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    debug!(
        instance_id = %path.id,
        body_size = body.len(),
        "Processing webhook delivery"
    );

    let payload = webhook_payload(&headers, query, &body);
    match state.runtime.deliver_webhook(path.id, payload).await? {
        WebhookOutcome::Handshake(reply) => Ok(Json(reply).into_response()),
        WebhookOutcome::Events(events) => {
            info!(instance_id = %path.id, events = events.len(), "Webhook accepted");
            Ok(Json(WebhookAcceptResponse {
                accepted: true,
                events: events.len(),
            })
            .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_webhook_payload_lowercases_headers_and_parses_json() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Zendesk-Webhook-Signature",
            HeaderValue::from_static("c2ln"),
        );
        let payload = webhook_payload(&headers, BTreeMap::new(), br#"{"ticket":{"id":7}}"#);

        assert_eq!(payload.header("x-zendesk-webhook-signature"), Some("c2ln"));
        assert_eq!(payload.body["ticket"]["id"], 7);
        assert_eq!(payload.raw_body, br#"{"ticket":{"id":7}}"#.to_vec());
    }

    #[test]
    fn test_webhook_payload_keeps_non_json_body() {
        let payload = webhook_payload(&HeaderMap::new(), BTreeMap::new(), b"challenge=abc");
        assert_eq!(payload.body, JsonValue::String("challenge=abc".into()));

        let empty = webhook_payload(&HeaderMap::new(), BTreeMap::new(), b"");
        assert_eq!(empty.body, JsonValue::Null);
    }
}
