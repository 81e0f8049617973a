pub mod backend;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod invoker;
pub mod metrics;
pub mod models;
pub mod relay;
pub mod state;
pub mod stream;
pub mod translate;

use axum::{
    routing::{get, post},
    Router,
};
use config::RelayConfig;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub fn build_state(config: &RelayConfig) -> Result<state::AppState, std::io::Error> {
    let state = state::AppState::new(config).map_err(std::io::Error::other)?;
    info!(backends = %state.registry.ids().join(","), "backend registry configured");
    Ok(state)
}

pub fn build_app(state: state::AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .route(handlers::STRUCTURE_PATH, post(handlers::llm_structure))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
