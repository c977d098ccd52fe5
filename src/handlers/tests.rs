//! # Tests for Handlers
//!
//! This module contains unit tests for API handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::framework::Registry;
use crate::handlers::pieces::{PiecePath, get_piece, list_pieces};
use crate::handlers::{healthz, root};
use crate::http::HttpClientFactory;
use crate::models::ServiceInfo;
use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use sea_orm::DatabaseConnection;

fn disconnected_state() -> AppState {
    let config = Arc::new(AppConfig::default());
    let registry = Arc::new(Registry::with_builtin_pieces(&config.pieces));
    AppState::new(
        config,
        DatabaseConnection::default(),
        registry,
        HttpClientFactory::default(),
    )
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "pieces");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_service_info_serializes() {
    let json_value = serde_json::to_value(ServiceInfo::default()).unwrap();
    assert_eq!(json_value["service"], "pieces");
    assert!(json_value.get("version").is_some());
}

#[tokio::test]
async fn test_healthz_reports_unavailable_database() {
    let err = healthz(State(disconnected_state())).await.unwrap_err();
    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(&*err.code, "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_list_pieces_does_not_touch_the_database() {
    let Json(pieces) = list_pieces(State(disconnected_state())).await;
    assert_eq!(pieces.len(), 4);
    assert!(pieces.iter().any(|p| p.name == "pinecone" && p.triggers.is_empty()));
}

#[tokio::test]
async fn test_get_unknown_piece_is_not_found() {
    let err = get_piece(
        State(disconnected_state()),
        Path(PiecePath {
            piece: "salesforce".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}
