pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use crate::collectors::CpuCollector;
use crate::config::AgentConfig;
use crate::tunnel::TunnelSupervisor;

#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub cpu: Arc<CpuCollector>,
    pub tunnel: Arc<TunnelSupervisor>,
}

pub fn build_app(state: AgentState) -> Router {
    Router::new()
        .route("/v1/snapshot", get(routes::get_snapshot))
        .route("/v1/services", get(routes::list_services))
        .route("/v1/health", get(routes::get_health))
        .route("/v1/proxy/status", get(routes::proxy_status))
        .route("/v1/proxy/start", post(routes::proxy_start))
        .route("/v1/proxy/stop", post(routes::proxy_stop))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
