use std::sync::Arc;

use crate::config::AggregatorConfig;
use crate::db::Store;
use crate::store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AggregatorConfig>,
    pub store: Arc<Store>,
    pub latest: StateStore,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Arc<AggregatorConfig>, store: Arc<Store>, latest: StateStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.collector_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        AppState {
            config,
            store,
            latest,
            http,
        }
    }

    pub fn check_admin(&self, headers: &axum::http::HeaderMap) -> Result<(), crate::error::ApiError> {
        if self.config.is_dev_mode() {
            return Ok(());
        }
        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(crate::error::ApiError::Unauthorized)?;
        let mut parts = header.splitn(2, ' ');
        let scheme = parts.next().ok_or(crate::error::ApiError::Unauthorized)?;
        let token = parts.next().ok_or(crate::error::ApiError::Unauthorized)?;
        if !scheme.eq_ignore_ascii_case("bearer") || token != self.config.admin_token {
            return Err(crate::error::ApiError::Unauthorized);
        }
        Ok(())
    }
}
