//! Operator-facing HTTP API.
//!
//! Exposes the harmonization workflow over JSON HTTP: suggested clusters on
//! demand, mapping-set CRUD, activation, and apply with job tracking.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/clusters` | Run profile → score → cluster → suggest |
//! | `GET`  | `/mapping-sets` | List mapping sets |
//! | `POST` | `/mapping-sets` | Create a mapping set (Draft) |
//! | `GET`  | `/mapping-sets/{id}` | Fetch one mapping set |
//! | `PATCH` | `/mapping-sets/{id}` | Partial update |
//! | `DELETE` | `/mapping-sets/{id}` | Delete (inactive sets only) |
//! | `POST` | `/mapping-sets/{id}/activate` | Make this the single active set |
//! | `POST` | `/mapping-sets/{id}/deactivate` | Return the set to Draft |
//! | `POST` | `/mapping-sets/{id}/apply` | Start an apply job, returns `{job_id}` |
//! | `GET`  | `/apply-jobs/{id}` | Job snapshot (progress + phase) |
//! | `POST` | `/apply-jobs/{id}/cancel` | Request cooperative cancellation |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "duplicate_target", "message": "..." } }
//! ```
//!
//! Validation failures map to 400/409 with a stable machine-readable code;
//! backend failures map to 500 `internal`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::apply::{self, ApplyOptions};
use crate::cluster;
use crate::config::Config;
use crate::db;
use crate::error::HarmonizerError;
use crate::jobs::{JobRegistry, JobSnapshot};
use crate::listing_store::{ListingStore, SqliteListingStore};
use crate::mapping_store::{MappingSetUpdate, MappingStore};
use crate::models::{FieldCluster, FieldMapping, MappingSet};
use crate::progress::NoProgress;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    listings: Arc<SqliteListingStore>,
    mappings: MappingStore,
    jobs: Arc<JobRegistry>,
}

/// Starts the operator HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config: Arc::new(config.clone()),
        listings: Arc::new(SqliteListingStore::new(pool.clone())),
        mappings: MappingStore::new(pool),
        jobs: Arc::new(JobRegistry::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/clusters", get(handle_clusters))
        .route("/mapping-sets", get(handle_list).post(handle_create))
        .route(
            "/mapping-sets/{id}",
            get(handle_get).patch(handle_update).delete(handle_delete),
        )
        .route("/mapping-sets/{id}/activate", post(handle_activate))
        .route("/mapping-sets/{id}/deactivate", post(handle_deactivate))
        .route("/mapping-sets/{id}/apply", post(handle_apply))
        .route("/apply-jobs/{id}", get(handle_job))
        .route("/apply-jobs/{id}/cancel", post(handle_cancel))
        .layer(cors)
        .with_state(state);

    info!("harmonizer API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"not_found"`, `"duplicate_target"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<HarmonizerError> for AppError {
    fn from(err: HarmonizerError) -> Self {
        let (status, code) = match &err {
            HarmonizerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            HarmonizerError::EmptySample => (StatusCode::BAD_REQUEST, "empty_sample"),
            HarmonizerError::InvalidFieldName(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            HarmonizerError::DuplicateName(_) => (StatusCode::CONFLICT, "duplicate_name"),
            HarmonizerError::DuplicateTarget { .. } => (StatusCode::CONFLICT, "duplicate_target"),
            HarmonizerError::DuplicateOriginal(_) => (StatusCode::CONFLICT, "duplicate_original"),
            HarmonizerError::ActiveMappingDelete(_) => (StatusCode::CONFLICT, "active_mapping"),
            HarmonizerError::ApplyInFlight(_) => (StatusCode::CONFLICT, "apply_in_flight"),
            HarmonizerError::MappingNoLongerActive(_) => {
                (StatusCode::CONFLICT, "mapping_inactive")
            }
            HarmonizerError::StoreUnavailable(_) | HarmonizerError::Corrupt(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /clusters ============

#[derive(Serialize)]
struct ClustersResponse {
    clusters: Vec<FieldCluster>,
}

/// Runs the review pipeline on demand. Nothing is persisted; clusters are
/// recomputed per request.
async fn handle_clusters(State(state): State<AppState>) -> Result<Json<ClustersResponse>, AppError> {
    let clusters = cluster::suggested_clusters(state.listings.as_ref(), &state.config).await?;
    Ok(Json(ClustersResponse { clusters }))
}

// ============ Mapping set CRUD ============

#[derive(Serialize)]
struct MappingSetListResponse {
    mapping_sets: Vec<MappingSet>,
}

async fn handle_list(
    State(state): State<AppState>,
) -> Result<Json<MappingSetListResponse>, AppError> {
    let mapping_sets = state.mappings.list().await?;
    Ok(Json(MappingSetListResponse { mapping_sets }))
}

#[derive(Deserialize)]
struct CreateMappingSetRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    mappings: Vec<FieldMapping>,
}

async fn handle_create(
    State(state): State<AppState>,
    Json(req): Json<CreateMappingSetRequest>,
) -> Result<(StatusCode, Json<MappingSet>), AppError> {
    let set = state
        .mappings
        .create(&req.name, req.description, req.mappings)
        .await?;
    Ok((StatusCode::CREATED, Json(set)))
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MappingSet>, AppError> {
    Ok(Json(state.mappings.get(&id).await?))
}

#[derive(Deserialize)]
struct UpdateMappingSetRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    mappings: Option<Vec<FieldMapping>>,
}

async fn handle_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateMappingSetRequest>,
) -> Result<Json<MappingSet>, AppError> {
    let set = state
        .mappings
        .update(
            &id,
            MappingSetUpdate {
                name: req.name,
                description: req.description,
                mappings: req.mappings,
            },
        )
        .await?;
    Ok(Json(set))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.mappings.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_activate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MappingSet>, AppError> {
    state.mappings.activate(&id).await?;
    Ok(Json(state.mappings.get(&id).await?))
}

async fn handle_deactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MappingSet>, AppError> {
    state.mappings.deactivate(&id).await?;
    Ok(Json(state.mappings.get(&id).await?))
}

// ============ Apply jobs ============

#[derive(Serialize)]
struct ApplyStartedResponse {
    job_id: String,
}

/// Registers an apply job and spawns the batch rewrite in the background.
/// The job id correlates progress snapshots and cancellation.
async fn handle_apply(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ApplyStartedResponse>), AppError> {
    let set = state.mappings.get(&id).await?;
    if !set.is_active {
        return Err(HarmonizerError::MappingNoLongerActive(set.name).into());
    }

    let job = state.jobs.start(&set.id)?;
    let job_id = job.id().to_string();

    let listings = Arc::clone(&state.listings);
    let mappings = state.mappings.clone();
    let opts = ApplyOptions::from(&state.config.apply);
    tokio::spawn(async move {
        let store: &dyn ListingStore = listings.as_ref();
        apply::run_with_job(store, &mappings, &set, job, &opts, Box::new(NoProgress)).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApplyStartedResponse { job_id }),
    ))
}

async fn handle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    state
        .jobs
        .snapshot(&id)
        .map(Json)
        .ok_or_else(|| not_found(format!("no apply job with id: {}", id)))
}

#[derive(Serialize)]
struct CancelResponse {
    job_id: String,
    cancelled: bool,
}

async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    if !state.jobs.cancel(&id) {
        return Err(not_found(format!("no apply job with id: {}", id)));
    }
    Ok(Json(CancelResponse {
        job_id: id,
        cancelled: true,
    }))
}
