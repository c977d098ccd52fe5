//! # Pieces API Handlers
//!
//! Piece metadata, stateless action runs, dynamic dropdown options and
//! credential checks.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::framework::{AuthValue, DropdownState, PieceMetadata};
use crate::server::AppState;

/// Path parameter for a piece
#[derive(Debug, Deserialize, IntoParams)]
pub struct PiecePath {
    /// Piece name (e.g., "zendesk")
    #[param(example = "zendesk")]
    pub piece: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActionPath {
    #[param(example = "zendesk")]
    pub piece: String,
    #[param(example = "create_ticket")]
    pub action: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OptionsPath {
    #[param(example = "pinecone")]
    pub piece: String,
    /// Name of the dropdown property
    #[param(example = "index")]
    pub prop: String,
}

/// Auth and props for an action run or an options lookup
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct PieceCallRequest {
    /// Credentials; may be omitted for pieces without auth
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub auth: Option<AuthValue>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub props: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionOutput {
    #[schema(value_type = Object)]
    pub output: Value,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ValidateAuthRequest {
    #[schema(value_type = Object)]
    pub auth: AuthValue,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidateAuthResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// List all registered pieces
#[utoipa::path(
    get,
    path = "/pieces",
    responses(
        (status = 200, description = "Registered pieces", body = [PieceMetadata])
    ),
    tag = "pieces"
)]
pub async fn list_pieces(State(state): State<AppState>) -> Json<Vec<PieceMetadata>> {
    Json(state.registry.list_metadata())
}

/// Metadata of a single piece
#[utoipa::path(
    get,
    path = "/pieces/{piece}",
    params(PiecePath),
    responses(
        (status = 200, description = "Piece metadata", body = PieceMetadata),
        (status = 404, description = "Unknown piece", body = ApiError)
    ),
    tag = "pieces"
)]
pub async fn get_piece(
    State(state): State<AppState>,
    Path(path): Path<PiecePath>,
) -> Result<Json<PieceMetadata>, ApiError> {
    let piece = state.registry.get(&path.piece)?;
    Ok(Json(piece.metadata()))
}

/// Run an action once
#[utoipa::path(
    post,
    path = "/pieces/{piece}/actions/{action}/run",
    params(ActionPath),
    request_body = PieceCallRequest,
    responses(
        (status = 200, description = "Action output", body = ActionOutput),
        (status = 400, description = "Invalid props or auth", body = ApiError),
        (status = 404, description = "Unknown piece or action", body = ApiError),
        (status = 429, description = "Vendor rate limit", body = ApiError),
        (status = 502, description = "Vendor error", body = ApiError)
    ),
    tag = "pieces"
)]
pub async fn run_action(
    State(state): State<AppState>,
    Path(path): Path<ActionPath>,
    Json(request): Json<PieceCallRequest>,
) -> Result<Json<ActionOutput>, ApiError> {
    let auth = request.auth.unwrap_or(AuthValue::None);
    let output = state
        .runtime
        .run_action(&path.piece, &path.action, &auth, &request.props)
        .await?;
    Ok(Json(ActionOutput { output }))
}

/// Resolve a dynamic dropdown
#[utoipa::path(
    post,
    path = "/pieces/{piece}/options/{prop}",
    params(OptionsPath),
    request_body = PieceCallRequest,
    responses(
        (status = 200, description = "Dropdown state", body = DropdownState),
        (status = 404, description = "Unknown piece or property", body = ApiError)
    ),
    tag = "pieces"
)]
pub async fn options(
    State(state): State<AppState>,
    Path(path): Path<OptionsPath>,
    Json(request): Json<PieceCallRequest>,
) -> Result<Json<DropdownState>, ApiError> {
    let dropdown = state
        .runtime
        .options(&path.piece, &path.prop, request.auth.as_ref(), request.props)
        .await?;
    Ok(Json(dropdown))
}

/// Check credentials against the vendor
///
/// Rejected credentials are reported as `valid: false`; only an unknown piece
/// or an unreachable vendor produces an error response.
#[utoipa::path(
    post,
    path = "/pieces/{piece}/auth/validate",
    params(PiecePath),
    request_body = ValidateAuthRequest,
    responses(
        (status = 200, description = "Validation result", body = ValidateAuthResponse),
        (status = 404, description = "Unknown piece", body = ApiError)
    ),
    tag = "pieces"
)]
pub async fn validate_auth(
    State(state): State<AppState>,
    Path(path): Path<PiecePath>,
    Json(request): Json<ValidateAuthRequest>,
) -> Result<Json<ValidateAuthResponse>, ApiError> {
    use crate::framework::PieceError;
    use crate::runtime::RuntimeError;

    match state.runtime.validate_auth(&path.piece, &request.auth).await {
        Ok(()) => Ok(Json(ValidateAuthResponse {
            valid: true,
            error: None,
        })),
        Err(RuntimeError::Piece(
            err @ (PieceError::InvalidAuth { .. }
            | PieceError::Unauthorized { .. }
            | PieceError::Http { .. }),
        )) => Ok(Json(ValidateAuthResponse {
            valid: false,
            error: Some(err.to_string()),
        })),
        Err(err) => Err(err.into()),
    }
}
