//! # HTTP Route Handlers
//!
//! ## Optimization Pipeline
//!
//! `POST /optimize` accepts a logical plan tree and the definitions (metadata and
//! optional statistics) of the tables it reads:
//!
//! 1. **Annotate**: assign node ids, derive schemas and correlation.
//! 2. **Catalog**: build a per-request in-memory catalog from the definitions.
//! 3. **Search**: run the physical search under the empty root property.
//! 4. **Respond**: the physical plan, its cost and row estimate, a rendered tree and
//!    the memo counters.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: malformed tree, unknown table, column missing from a schema.
//! - 422 Unprocessable Entity: no feasible physical plan exists.
//! - 500 Internal Server Error: everything else (evaluation or statistics failures).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use physopt_core::catalog::{InMemoryCatalog, TableDefinition};
use physopt_core::error::OptimizerError;
use physopt_core::memo::MemoStats;
use physopt_core::plan::{PhysicalPlan, PlanBuilder, PlanNode};

use crate::state::{AppState, ServerConfig};

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /config: the effective cost constants and storage capabilities.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ServerConfig> {
    Json(state.config.clone())
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRequest {
    pub plan: PlanNode,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Serialize)]
pub struct OptimizeResponse {
    pub plan: PhysicalPlan,
    pub cost: f64,
    pub rows: u64,
    /// Indented operator tree.
    pub display: String,
    pub memo: MemoStats,
}

/// POST /optimize
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    run_optimization(&state, req).map(Json)
}

fn run_optimization(state: &AppState, req: OptimizeRequest) -> Result<OptimizeResponse, (StatusCode, String)> {
    let plan = PlanBuilder::new().build(req.plan).map_err(reject)?;
    debug!("Received plan with {} table definitions", req.tables.len());

    let mut search = state.search(InMemoryCatalog::from_definitions(req.tables));
    let optimized = search.optimize(&plan).map_err(reject)?;

    Ok(OptimizeResponse {
        display: optimized.plan.display(),
        plan: optimized.plan,
        cost: optimized.cost,
        rows: optimized.rows,
        memo: search.memo_stats(),
    })
}

fn reject(err: OptimizerError) -> (StatusCode, String) {
    let status = status_for(&err);
    warn!("Optimization rejected ({}): {}", status, err);
    (status, format!("Optimization failed: {}", err))
}

fn status_for(err: &OptimizerError) -> StatusCode {
    match err {
        OptimizerError::Context { source, .. } => status_for(source),
        OptimizerError::InvalidPlan(_) | OptimizerError::SchemaLookup { .. } => StatusCode::BAD_REQUEST,
        OptimizerError::NoFeasiblePlan => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
