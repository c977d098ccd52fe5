//! # Server Configuration
//!
//! Router assembly, OpenAPI documentation and the serve loop. The polling
//! scheduler runs alongside the HTTP server and both stop on Ctrl-C.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::framework::Registry;
use crate::handlers;
use crate::http::HttpClientFactory;
use crate::runtime::TriggerRuntime;
use crate::scheduler::PollingScheduler;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    pub runtime: TriggerRuntime,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: Arc<Registry>,
        http: HttpClientFactory,
    ) -> Self {
        let runtime = TriggerRuntime::new(db.clone(), registry.clone(), http, config.clone());
        Self {
            db,
            config,
            registry,
            runtime,
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/pieces", get(handlers::pieces::list_pieces))
        .route("/pieces/{piece}", get(handlers::pieces::get_piece))
        .route(
            "/pieces/{piece}/actions/{action}/run",
            post(handlers::pieces::run_action),
        )
        .route(
            "/pieces/{piece}/options/{prop}",
            post(handlers::pieces::options),
        )
        .route(
            "/pieces/{piece}/auth/validate",
            post(handlers::pieces::validate_auth),
        )
        .route("/triggers", post(handlers::triggers::create_trigger))
        .route(
            "/triggers/{id}",
            get(handlers::triggers::get_trigger).delete(handlers::triggers::delete_trigger),
        )
        .route("/triggers/{id}/test", post(handlers::triggers::test_trigger))
        .route("/triggers/{id}/poll", post(handlers::triggers::poll_trigger))
        .route("/triggers/{id}/events", get(handlers::triggers::list_events))
        .route("/webhooks/{id}", post(handlers::webhooks::receive_webhook))
        .layer(middleware::from_fn(telemetry::trace_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and the polling scheduler with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let http = HttpClientFactory::new(config.http_timeout(), &config.http_user_agent)?;
    let registry = Arc::new(Registry::with_builtin_pieces(&config.pieces));
    info!(pieces = registry.len(), "Piece registry loaded");

    let state = AppState::new(config.clone(), db.clone(), registry, http);
    let shutdown = CancellationToken::new();

    let scheduler = PollingScheduler::new(state.runtime.clone(), db);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.child_token()));

    let app = create_app(state);
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = scheduler_handle.await {
        error!(error = %err, "Polling scheduler task panicked");
    }

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::pieces::list_pieces,
        crate::handlers::pieces::get_piece,
        crate::handlers::pieces::run_action,
        crate::handlers::pieces::options,
        crate::handlers::pieces::validate_auth,
        crate::handlers::triggers::create_trigger,
        crate::handlers::triggers::get_trigger,
        crate::handlers::triggers::delete_trigger,
        crate::handlers::triggers::test_trigger,
        crate::handlers::triggers::poll_trigger,
        crate::handlers::triggers::list_events,
        crate::handlers::webhooks::receive_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ApiError,
            crate::framework::PieceMetadata,
            crate::framework::piece::ActionMetadata,
            crate::framework::piece::TriggerMetadata,
            crate::framework::TriggerStrategy,
            crate::framework::DropdownState,
            crate::framework::DropdownOption,
            crate::handlers::pieces::PieceCallRequest,
            crate::handlers::pieces::ActionOutput,
            crate::handlers::pieces::ValidateAuthRequest,
            crate::handlers::pieces::ValidateAuthResponse,
            crate::handlers::triggers::CreateTriggerRequest,
            crate::handlers::triggers::TriggerInstanceView,
            crate::handlers::triggers::TriggerEventView,
            crate::handlers::triggers::TriggerRunResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
        )
    ),
    tags(
        (name = "pieces", description = "Piece metadata, actions and options"),
        (name = "triggers", description = "Trigger instance lifecycle"),
        (name = "webhooks", description = "Vendor webhook deliveries"),
    ),
    info(
        title = "Pieces API",
        description = "Connector pieces for Bexio, Xero, Zendesk and Pinecone",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
