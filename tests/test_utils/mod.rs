//! Test utilities shared by the integration tests.
//!
//! Sets up in-memory SQLite databases with migrations applied and builds a
//! trigger runtime whose vendor base URLs point at a mock server.

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use pieces::config::AppConfig;
use pieces::framework::{AuthValue, Registry};
use pieces::http::HttpClientFactory;
use pieces::runtime::TriggerRuntime;
use pieces::server::AppState;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::json;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;

    Ok(db)
}

/// Config with every vendor redirected to `mock_uri`
pub fn test_config(mock_uri: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.profile = "test".to_string();
    config.public_base_url = "https://pieces.test".to_string();
    config.polling.jitter_pct_max = 0.0;
    config.pieces.bexio_api_base = mock_uri.to_string();
    config.pieces.xero_api_base = mock_uri.to_string();
    config.pieces.xero_connections_url = format!("{}/connections", mock_uri);
    config.pieces.pinecone_control_base = mock_uri.to_string();
    config.pieces.zendesk_base_override = Some(mock_uri.to_string());
    config
}

/// Application state over a fresh database, vendors pointed at `mock_uri`
#[allow(dead_code)]
pub async fn test_state(mock_uri: &str) -> Result<AppState> {
    let config = Arc::new(test_config(mock_uri));
    let db = setup_test_db().await?;
    let registry = Arc::new(Registry::with_builtin_pieces(&config.pieces));
    Ok(AppState::new(config, db, registry, HttpClientFactory::default()))
}

/// Trigger runtime over a fresh database, vendors pointed at `mock_uri`
#[allow(dead_code)]
pub async fn test_runtime(mock_uri: &str) -> Result<(TriggerRuntime, DatabaseConnection)> {
    let state = test_state(mock_uri).await?;
    Ok((state.runtime, state.db))
}

/// Zendesk custom credentials
#[allow(dead_code)]
pub fn zendesk_auth() -> AuthValue {
    serde_json::from_value(json!({
        "type": "custom",
        "props": {"email": "agent@acme.com", "token": "tok", "subdomain": "acme"}
    }))
    .expect("valid auth value")
}
