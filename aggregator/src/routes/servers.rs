use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use fleetwatch_shared::{LatestSnapshot, ProxyConfig, Server, ServerPatch, TunnelStatus};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, DbError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ServerView {
    #[serde(flatten)]
    pub server: Server,
    pub online: bool,
    pub latest: Option<LatestSnapshot>,
}

fn to_view(state: &AppState, server: Server) -> ServerView {
    let latest = state.latest.get_latest(server.id);
    let online = latest.as_ref().is_some_and(|l| l.online);
    ServerView {
        server,
        online,
        latest,
    }
}

pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Vec<ServerView>>, ApiError> {
    let servers = state.store.list_all_servers().await?;
    Ok(Json(servers.into_iter().map(|s| to_view(&state, s)).collect()))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ServerView>, ApiError> {
    let server = state.store.get_server(id).await?.ok_or(ApiError::NotFound(id))?;
    Ok(Json(to_view(&state, server)))
}

pub async fn create_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<ServerPatch>,
) -> Result<Json<ServerView>, ApiError> {
    state.check_admin(&headers)?;
    if patch.name.as_deref().unwrap_or("").is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let server = state.store.create_server(patch).await.map_err(|e| match e {
        DbError::DuplicateName(name) => ApiError::Conflict(name),
        other => ApiError::Internal(other),
    })?;
    Ok(Json(to_view(&state, server)))
}

pub async fn update_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(patch): Json<ServerPatch>,
) -> Result<Json<ServerView>, ApiError> {
    state.check_admin(&headers)?;
    let server = state.store.update_server(id, patch).await.map_err(|e| match e {
        DbError::DuplicateName(name) => ApiError::Conflict(name),
        DbError::ServerNotFound(id) => ApiError::NotFound(id),
        other => ApiError::Internal(other),
    })?;
    Ok(Json(to_view(&state, server)))
}

pub async fn delete_server(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(), ApiError> {
    state.check_admin(&headers)?;
    let deleted = state.store.delete_server(id).await?;
    if !deleted {
        return Err(ApiError::NotFound(id));
    }
    state.latest.forget(id).await;
    Ok(())
}

pub async fn services_catalog(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let server = state.store.get_server(id).await?.ok_or(ApiError::NotFound(id))?;
    let url = format!("{}/v1/services", server.base_url());
    let resp = state
        .http
        .get(&url)
        .bearer_auth(&server.token)
        .send()
        .await
        .map_err(|e| ApiError::BadGateway {
            detail: e.to_string(),
        })?;

    if !resp.status().is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(ApiError::BadGateway { detail });
    }
    let body = resp.json().await.map_err(|e| ApiError::BadGateway {
        detail: e.to_string(),
    })?;
    Ok(Json(body))
}

pub async fn get_proxy_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<Option<ProxyConfig>>, ApiError> {
    state.check_admin(&headers)?;
    let _ = state.store.get_server(id).await?.ok_or(ApiError::NotFound(id))?;
    let config = state.store.get_proxy_config(id).await?;
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub struct ProxyPutRequest {
    #[serde(default)]
    pub config: Option<ProxyConfig>,
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn put_proxy_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(req): Json<ProxyPutRequest>,
) -> Result<Json<TunnelStatus>, ApiError> {
    state.check_admin(&headers)?;
    let server = state.store.get_server(id).await?.ok_or(ApiError::NotFound(id))?;

    if let Some(config) = &req.config {
        state.store.set_proxy_config(id, config.clone()).await?;
    }

    let effective_config = req.config.or(server.proxy_config);

    match req.action.as_deref() {
        Some("start") => {
            if !effective_config.as_ref().is_some_and(|c| c.enabled) {
                return Err(ApiError::BadRequest(
                    "cannot start proxy: config missing or disabled".to_string(),
                ));
            }
            forward_proxy_command(&state, &server, "start", effective_config).await
        }
        Some("stop") => forward_proxy_command(&state, &server, "stop", None).await,
        Some(other) => Err(ApiError::BadRequest(format!("unknown action {other:?}"))),
        None => {
            let url = format!("{}/v1/proxy/status", server.base_url());
            fetch_tunnel_status(&state, &server, &url, None).await
        }
    }
}

async fn forward_proxy_command(
    state: &AppState,
    server: &Server,
    action: &str,
    config: Option<ProxyConfig>,
) -> Result<Json<TunnelStatus>, ApiError> {
    let url = format!("{}/v1/proxy/{action}", server.base_url());
    let body = config.map(|c| serde_json::json!({ "config": c }));
    fetch_tunnel_status(state, server, &url, body).await
}

async fn fetch_tunnel_status(
    state: &AppState,
    server: &Server,
    url: &str,
    body: Option<serde_json::Value>,
) -> Result<Json<TunnelStatus>, ApiError> {
    let mut req = if body.is_some() {
        state.http.post(url)
    } else {
        state.http.get(url)
    };
    req = req.bearer_auth(&server.token);
    if let Some(body) = body {
        req = req.json(&body);
    }

    let resp = req.send().await.map_err(|e| ApiError::BadGateway {
        detail: e.to_string(),
    })?;

    if !resp.status().is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(ApiError::BadGateway { detail });
    }

    let status = resp.json::<TunnelStatus>().await.map_err(|e| ApiError::BadGateway {
        detail: e.to_string(),
    })?;
    Ok(Json(status))
}
