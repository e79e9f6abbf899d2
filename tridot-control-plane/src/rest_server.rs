use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{error, warn};
use tridot_core::{
    NodeHealthRequest, NodeHealthResponse, RegionCapacityView, RegisterNodeRequest,
    RegisterNodeResponse,
};
use uuid::Uuid;

use crate::error::NodeServiceError;
use crate::model::Node;
use crate::service::NodeService;

pub const PROVISION_TOKEN_HEADER: &str = "x-provision-token";

#[derive(Clone)]
pub struct AppState {
    service: Arc<NodeService>,
    provision_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(service: Arc<NodeService>, provision_token: Option<String>) -> Self {
        Self {
            service,
            provision_token: provision_token.map(Arc::from),
        }
    }
}

/// Error body returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Unavailable(&'static str),
    Internal,
}

impl From<NodeServiceError> for ApiError {
    fn from(err: NodeServiceError) -> Self {
        match err {
            NodeServiceError::InvalidInput(message) => Self::BadRequest(message),
            NodeServiceError::RegionNotFound(_) | NodeServiceError::NodeNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            NodeServiceError::Repository(e) => {
                error!(error = %e, "Node repository failure");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid provisioning token".to_string()),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message.to_string()),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Builds the HTTP API. Node endpoints require the provisioning token;
/// the region listing is public.
pub fn router(state: AppState) -> Router {
    let nodes = Router::new()
        .route("/api/v1/nodes/register", post(register_handler))
        .route("/api/v1/nodes/health", post(health_handler))
        .route("/api/v1/nodes/{id}", get(get_node_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_provision_token,
        ));

    Router::new()
        .route("/api/v1/regions", get(regions_handler))
        .merge(nodes)
        .with_state(state)
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(PROVISION_TOKEN_HEADER) {
        return value.to_str().ok();
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

async fn require_provision_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.provision_token.as_deref() else {
        return Err(ApiError::Unavailable("node provisioning is disabled"));
    };
    if presented_token(request.headers()) != Some(expected) {
        warn!(path = %request.uri().path(), "Rejected request with bad provisioning token");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.service.register_node(&request).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterNodeResponse { node_id: node.id }),
    ))
}

async fn health_handler(
    State(state): State<AppState>,
    Json(request): Json<NodeHealthRequest>,
) -> Result<Json<NodeHealthResponse>, ApiError> {
    let capacity_score = state.service.report_health(&request).await?;
    Ok(Json(NodeHealthResponse { capacity_score }))
}

async fn get_node_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(state.service.get_node(id).await?))
}

async fn regions_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<RegionCapacityView>>, ApiError> {
    let capacities = state.service.list_regions_with_capacity().await?;
    Ok(Json(capacities.iter().map(RegionCapacityView::from).collect()))
}
