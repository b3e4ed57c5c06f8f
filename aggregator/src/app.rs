use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;

use crate::routes::{events, history, servers, timeseries};
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let cors = build_cors(&state.config.cors_origins);

    Router::new()
        .route("/api/servers", get(servers::list_servers).post(servers::create_server))
        .route(
            "/api/servers/{id}",
            get(servers::get_server)
                .put(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/api/servers/{id}/services/catalog", get(servers::services_catalog))
        .route(
            "/api/servers/{id}/proxy",
            get(servers::get_proxy_config).put(servers::put_proxy_config),
        )
        .route("/api/servers/{id}/timeseries", get(timeseries::get_timeseries))
        .route("/api/history/hourly", get(history::get_hourly_history))
        .route("/api/history/hourly/export", get(history::export_hourly_history))
        .route("/api/events", get(events::get_events))
        .layer(cors)
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<_> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::config::AggregatorConfig;
    use crate::db::Store;
    use crate::store::StateStore;

    async fn test_app() -> Router {
        let store = Arc::new(Store::test_store().await);
        let config = Arc::new(AggregatorConfig::default());
        build_app(AppState::new(config, store, StateStore::new()))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_servers_starts_empty() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/api/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn get_unknown_server_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/api/servers/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_then_list_server_roundtrips() {
        let app = test_app().await;
        let payload = json!({
            "name": "web-1",
            "host": "10.0.0.5",
            "agent_port": 9109,
            "token": "secret",
            "enabled": true,
        });
        let create = app
            .clone()
            .oneshot(
                Request::post("/api/servers")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create.status(), StatusCode::OK);
        let created = body_json(create).await;
        assert_eq!(created["name"], "web-1");
        assert_eq!(created["online"], false);

        let list = app
            .oneshot(Request::get("/api/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let servers = body_json(list).await;
        assert_eq!(servers.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_duplicate_name_is_conflict() {
        let app = test_app().await;
        let payload = json!({"name": "web-1", "host": "10.0.0.5"});
        let first = app
            .clone()
            .oneshot(
                Request::post("/api/servers")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(
                Request::post("/api/servers")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn events_default_limit_returns_empty_list() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/api/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn history_rejects_out_of_range_limit() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::get("/api/history/hourly?limit=0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn timeseries_unknown_server_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::get(
                    "/api/servers/1/timeseries?metric=cpu_pct&from=2026-01-01T00:00:00Z&to=2026-01-02T00:00:00Z",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
