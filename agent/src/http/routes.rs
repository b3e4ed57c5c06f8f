use std::collections::HashMap;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use fleetwatch_shared::{ProxyConfig, Snapshot, TunnelStatus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::collectors::{ServiceCatalogItem, disk, gpu, systemd};
use crate::error::ApiError;

use super::AgentState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().ok_or(ApiError::Unauthorized)?;
    let token = parts.next().ok_or(ApiError::Unauthorized)?;

    if !scheme.eq_ignore_ascii_case("bearer") || token != expected_token {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

/// `GET /v1/snapshot` — invokes all scrapers concurrently; any failing
/// scraper contributes a null/empty substructure, never fails the endpoint.
pub async fn get_snapshot(
    State(state): State<AgentState>,
    headers: HeaderMap,
) -> Result<Json<Snapshot>, ApiError> {
    check_auth(&headers, &state.config.token)?;

    let cpu_fut = state.cpu.sample();
    let disk_fut = disk::collect(&state.config.disks);
    let gpu_fut = async {
        if state.config.gpu.enabled() {
            gpu::collect().await
        } else {
            None
        }
    };
    let services_fut = systemd::collect(&state.config.services_allowlist);

    let (cpu_pct, disks, gpus, services) = tokio::join!(cpu_fut, disk_fut, gpu_fut, services_fut);

    Ok(Json(Snapshot {
        node_id: state.config.node_id.clone(),
        ts: Utc::now(),
        cpu_pct,
        disks,
        gpus,
        services,
    }))
}

/// `GET /v1/services` — service catalog via systemd discovery.
pub async fn list_services(
    State(state): State<AgentState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ServiceCatalogItem>>, ApiError> {
    check_auth(&headers, &state.config.token)?;
    Ok(Json(systemd::discover_services().await))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Ok,
    Degraded,
    Error,
    Disabled,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: CheckStatus,
    timestamp: chrono::DateTime<Utc>,
    checks: HashMap<String, CheckStatus>,
    details: HashMap<String, Option<String>>,
}

/// `GET /v1/health` (unauthenticated) — exercises each scraper and reports
/// per-scraper status plus an overall ok/degraded summary.
pub async fn get_health(State(state): State<AgentState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut details = HashMap::new();
    let mut overall = CheckStatus::Ok;

    state.cpu.sample().await;
    checks.insert("cpu".to_string(), CheckStatus::Ok);
    details.insert("cpu".to_string(), None);

    let disks = disk::collect(&state.config.disks).await;
    if state.config.disks.is_empty() || !disks.is_empty() {
        checks.insert("disk".to_string(), CheckStatus::Ok);
        details.insert("disk".to_string(), None);
    } else {
        checks.insert("disk".to_string(), CheckStatus::Degraded);
        details.insert(
            "disk".to_string(),
            Some("No disk data available".to_string()),
        );
        overall = CheckStatus::Degraded;
    }

    if state.config.gpu.enabled() {
        match gpu::collect().await {
            Some(gpus) => {
                checks.insert("gpu".to_string(), CheckStatus::Ok);
                details.insert(
                    "gpu".to_string(),
                    Some(format!(
                        "NVIDIA driver available, {} GPU(s) detected",
                        gpus.len()
                    )),
                );
            }
            None => {
                checks.insert("gpu".to_string(), CheckStatus::Degraded);
                details.insert(
                    "gpu".to_string(),
                    Some("GPU not available or driver not installed".to_string()),
                );
                overall = CheckStatus::Degraded;
            }
        }
    } else {
        checks.insert("gpu".to_string(), CheckStatus::Disabled);
        details.insert(
            "gpu".to_string(),
            Some("GPU monitoring disabled in config".to_string()),
        );
    }

    if state.config.services_allowlist.is_empty() {
        checks.insert("systemd".to_string(), CheckStatus::Ok);
        details.insert("systemd".to_string(), Some("No services configured".to_string()));
    } else {
        let probe = vec![state.config.services_allowlist[0].clone()];
        join_all(vec![systemd::collect(&probe)]).await;
        checks.insert("systemd".to_string(), CheckStatus::Ok);
        details.insert("systemd".to_string(), None);
    }

    Json(HealthResponse {
        status: overall,
        timestamp: Utc::now(),
        checks,
        details,
    })
}

#[derive(Debug, Deserialize, Default)]
pub struct ProxyStartRequest {
    #[serde(default)]
    pub config: Option<ProxyConfig>,
}

pub async fn proxy_status(
    State(state): State<AgentState>,
    headers: HeaderMap,
) -> Result<Json<TunnelStatus>, ApiError> {
    check_auth(&headers, &state.config.token)?;
    Ok(Json(state.tunnel.get_status().await))
}

pub async fn proxy_start(
    State(state): State<AgentState>,
    headers: HeaderMap,
    body: Option<Json<ProxyStartRequest>>,
) -> Result<Json<TunnelStatus>, ApiError> {
    check_auth(&headers, &state.config.token)?;
    let override_cfg = body.and_then(|Json(req)| req.config);
    state
        .tunnel
        .start(override_cfg)
        .await
        .map_err(|e| match e {
            crate::tunnel::TunnelError::ConfigMissing => ApiError::ProxyConfigMissing,
            crate::tunnel::TunnelError::Disabled => ApiError::ProxyDisabled,
            _ => ApiError::ProxyConfigMissing,
        })?;
    Ok(Json(state.tunnel.get_status().await))
}

pub async fn proxy_stop(
    State(state): State<AgentState>,
    headers: HeaderMap,
) -> Result<Json<TunnelStatus>, ApiError> {
    check_auth(&headers, &state.config.token)?;
    state.tunnel.stop().await;
    Ok(Json(state.tunnel.get_status().await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn auth_accepts_matching_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret"),
        );
        assert!(check_auth(&headers, "secret").is_ok());
    }

    #[test]
    fn auth_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(check_auth(&headers, "secret").is_err());
    }

    #[test]
    fn auth_rejects_wrong_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(check_auth(&headers, "secret").is_err());
    }

    #[test]
    fn auth_rejects_non_bearer_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic secret"),
        );
        assert!(check_auth(&headers, "secret").is_err());
    }
}
