use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{TimeseriesAgg, TimeseriesMetric};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TimeseriesQuery {
    pub metric: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default = "default_agg")]
    pub agg: String,
}

fn default_agg() -> String {
    "avg".to_string()
}

#[derive(Debug, Serialize)]
pub struct TimeseriesPointView {
    pub ts: DateTime<Utc>,
    pub value: Option<f64>,
}

pub async fn get_timeseries(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<TimeseriesQuery>,
) -> Result<Json<Vec<TimeseriesPointView>>, ApiError> {
    state
        .store
        .get_server(id)
        .await?
        .ok_or(ApiError::NotFound(id))?;

    let metric = TimeseriesMetric::parse(&query.metric)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown metric {:?}", query.metric)))?;
    let agg = TimeseriesAgg::parse(&query.agg)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown agg {:?}", query.agg)))?;
    if query.from > query.to {
        return Err(ApiError::BadRequest("from must not be after to".to_string()));
    }

    let points = state
        .store
        .query_timeseries(id, metric, query.from, query.to, agg)
        .await?;

    Ok(Json(
        points
            .into_iter()
            .map(|(ts, value)| TimeseriesPointView { ts, value })
            .collect(),
    ))
}
