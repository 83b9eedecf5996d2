//! HTTP API for health checks, plan previews and flow tracking

mod registry;

pub use registry::{FlowRecord, FlowRegistry, FlowStatus};

use crate::chain::HealthProbe;
use crate::config::ApiConfig;
use crate::coordination::{FlowRequest, OperationPlan, Orchestrator};
use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub flows: Arc<FlowRegistry>,
    pub health: Arc<dyn HealthProbe>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/plan", post(preview_plan))
        .route("/flows", post(start_flow))
        .route("/flows/:id", get(get_flow))
        .route("/relay/:chain_id", get(get_relay))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> OrchestratorResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|e| OrchestratorError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Error body with a status derived from the error kind
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Planning(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::Authorization(_) => StatusCode::UNAUTHORIZED,
            OrchestratorError::RelayWalletBusy { .. } => StatusCode::CONFLICT,
            OrchestratorError::ChainNotFound { .. } => StatusCode::NOT_FOUND,
            OrchestratorError::ChainConnection { .. } | OrchestratorError::Funding(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - every configured chain answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.health.health_check().await;
    let ready = !chain_health.is_empty() && chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            executing: state.orchestrator.is_executing(),
            chains: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

async fn preview_plan(
    State(state): State<AppState>,
    Json(request): Json<FlowRequest>,
) -> Result<Json<OperationPlan>, ApiError> {
    let plan = state.orchestrator.preview(&request).await?;
    Ok(Json(plan))
}

/// Start a flow; execution continues in the background
async fn start_flow(
    State(state): State<AppState>,
    Json(request): Json<FlowRequest>,
) -> Result<(StatusCode, Json<FlowAccepted>), ApiError> {
    let flow_id = Uuid::new_v4();
    let flow = state.orchestrator.prepare(flow_id, &request).await?;
    let plan = flow.plan.clone();

    state.flows.register(flow_id, plan.clone());

    let orchestrator = state.orchestrator.clone();
    let flows = state.flows.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.execute(flow).await.map_err(|e| {
            error!("Flow {} ended with error: {}", flow_id, e);
            e.to_string()
        });
        flows.finish(flow_id, outcome);
    });

    Ok((StatusCode::ACCEPTED, Json(FlowAccepted { flow_id, plan })))
}

async fn get_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<Uuid>,
) -> Result<Json<FlowRecord>, (StatusCode, Json<ErrorResponse>)> {
    state.flows.get(flow_id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Flow {} not found", flow_id),
            }),
        )
    })
}

async fn get_relay(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let relay = state.orchestrator.relay_state(chain_id).await?;
    Ok(Json(relay))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    executing: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowAccepted {
    flow_id: Uuid,
    plan: Arc<OperationPlan>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
