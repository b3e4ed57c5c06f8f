use axum::Json;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use fleetwatch_shared::HourlySampleWithServer;
use serde::{Deserialize, Serialize};

use crate::db::{SortBy, SortOrder};
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub server_ids: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Parses a comma-separated id list. Non-numeric tokens are dropped, not an error.
fn parse_server_ids(raw: &str) -> Option<Vec<i64>> {
    let ids: Vec<i64> = raw.split(',').filter_map(|tok| tok.trim().parse().ok()).collect();
    if ids.is_empty() { None } else { Some(ids) }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub rows: Vec<HourlySampleWithServer>,
    pub total_count: i64,
}

pub async fn get_hourly_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ApiError::UnprocessableEntity("limit".to_string()));
    }

    let sort_by = match &query.sort_by {
        Some(s) => SortBy::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown sort_by {s:?}")))?,
        None => SortBy::Ts,
    };
    let sort_order = match &query.sort_order {
        Some(s) => SortOrder::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown sort_order {s:?}")))?,
        None => SortOrder::Desc,
    };
    let server_ids = query.server_ids.as_deref().and_then(parse_server_ids);

    let (rows, total_count) = state
        .store
        .query_hourly_history(
            server_ids.as_deref(),
            query.from,
            query.to,
            limit,
            query.offset,
            sort_by,
            sort_order,
        )
        .await?;

    Ok(Json(HistoryResponse { rows, total_count }))
}

const EXPORT_LIMIT: i64 = 1000;

pub async fn export_hourly_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let sort_by = match &query.sort_by {
        Some(s) => SortBy::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown sort_by {s:?}")))?,
        None => SortBy::Ts,
    };
    let sort_order = match &query.sort_order {
        Some(s) => SortOrder::parse(s).ok_or_else(|| ApiError::BadRequest(format!("unknown sort_order {s:?}")))?,
        None => SortOrder::Desc,
    };
    let server_ids = query.server_ids.as_deref().and_then(parse_server_ids);

    let (rows, _) = state
        .store
        .query_hourly_history(
            server_ids.as_deref(),
            query.from,
            query.to,
            EXPORT_LIMIT,
            0,
            sort_by,
            sort_order,
        )
        .await?;

    let mut csv = String::from(
        "id,server_id,server_name,ts,cpu_pct_avg,cpu_pct_max,disk_used_pct,disk_used_bytes,disk_total_bytes,\
         gpu_util_pct_avg,gpu_util_pct_max,gpu_mem_used_mb,gpu_mem_total_mb\n",
    );
    for row in &rows {
        let s = &row.sample;
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            s.id,
            s.server_id,
            row.server_name,
            s.ts.to_rfc3339(),
            opt(s.cpu_pct_avg),
            opt(s.cpu_pct_max),
            opt(s.disk_used_pct),
            opt(s.disk_used_bytes),
            opt(s.disk_total_bytes),
            opt(s.gpu_util_pct_avg),
            opt(s.gpu_util_pct_max),
            opt(s.gpu_mem_used_mb),
            opt(s.gpu_mem_total_mb),
        ));
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=history_export.csv".to_string(),
            ),
        ],
        csv,
    )
        .into_response())
}

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_ids_dropping_invalid_tokens() {
        assert_eq!(parse_server_ids("1,2,x,3"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn all_invalid_tokens_yields_no_filter() {
        assert_eq!(parse_server_ids("x,y"), None);
    }
}
