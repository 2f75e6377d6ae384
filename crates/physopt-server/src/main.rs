//! # physopt-server: HTTP Service for the Physical Optimizer
//!
//! Accepts logical plans with the statistics of the tables they read and answers with
//! the cheapest physical plan found by the property-driven search.
//!
//! ```text
//! Client (planner front end)
//!   |
//!   | HTTP POST /optimize (JSON logical plan + table definitions)
//!   v
//! physopt-server (this binary)
//!   |
//!   +-> annotate plan (ids, schemas, correlation)
//!   +-> per-request catalog
//!   +-> physical search (memoized, property-driven)
//!   |
//!   | HTTP response (JSON physical plan, cost, rows, rendered tree)
//!   v
//! Client
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`   - Health check
//! - `GET  /config`   - Effective cost model and storage capabilities
//! - `POST /optimize` - Optimize a logical plan
//!
//! ## Configuration
//!
//! `--config <file>` reads a TOML file (see `state`); `--listen` sets the bind
//! address, `0.0.0.0:3000` by default. Logging is controlled by `RUST_LOG`
//! (defaults to `physopt=debug`).

mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::state::{AppState, ServerConfig, ServerError};

#[derive(Parser)]
#[command(name = "physopt-server")]
#[command(about = "HTTP service for the physopt physical plan optimizer")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("physopt=debug".parse()?))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    tracing::debug!("Loaded configuration: {:?}", config);
    let state = Arc::new(AppState::new(config));

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/config", get(routes::get_config))
        .route("/optimize", post(routes::optimize))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!("physopt-server listening on http://{}", args.listen);
    axum::serve(listener, app).await?;
    Ok(())
}
