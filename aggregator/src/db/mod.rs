pub mod models;

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fleetwatch_shared::{EventType, EventWithServer, HourlySampleWithServer, ProxyConfig, Server, ServerPatch};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::DbError;
use models::{EventWithServerRow, HourlySampleWithServerRow, ServerRow, TimeseriesPoint};

/// Events of the same `(server_id, type)` within this window are deduped.
const EVENT_DEDUP_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

pub enum TimeseriesMetric {
    CpuPct,
    DiskUsedPct,
    GpuUtilPct,
}

impl TimeseriesMetric {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cpu_pct" => Some(Self::CpuPct),
            "disk_used_pct" => Some(Self::DiskUsedPct),
            "gpu_util_pct" => Some(Self::GpuUtilPct),
            _ => None,
        }
    }
}

pub enum TimeseriesAgg {
    Avg,
    Max,
}

impl TimeseriesAgg {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "avg" => Some(Self::Avg),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Ts,
    CpuPctAvg,
    CpuPctMax,
    DiskUsedPct,
    GpuUtilPctAvg,
    GpuUtilPctMax,
    ServerName,
}

impl SortBy {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ts" => Self::Ts,
            "cpu_pct_avg" => Self::CpuPctAvg,
            "cpu_pct_max" => Self::CpuPctMax,
            "disk_used_pct" => Self::DiskUsedPct,
            "gpu_util_pct_avg" => Self::GpuUtilPctAvg,
            "gpu_util_pct_max" => Self::GpuUtilPctMax,
            "server_name" => Self::ServerName,
            _ => return None,
        })
    }

    fn column(self) -> &'static str {
        match self {
            SortBy::Ts => "h.ts",
            SortBy::CpuPctAvg => "h.cpu_pct_avg",
            SortBy::CpuPctMax => "h.cpu_pct_max",
            SortBy::DiskUsedPct => "h.disk_used_pct",
            SortBy::GpuUtilPctAvg => "h.gpu_util_pct_avg",
            SortBy::GpuUtilPctMax => "h.gpu_util_pct_max",
            SortBy::ServerName => "s.name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl Store {
    pub async fn connect(database_path: &std::path::Path) -> Result<Self, DbError> {
        let url = format!("sqlite://{}", database_path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn test_store() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .expect("valid memory URL")
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("connect to in-memory SQLite");

        let store = Store { pool };
        store.migrate().await.expect("run migrations");
        store
    }

    async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn list_all_servers(&self) -> Result<Vec<Server>, DbError> {
        let rows: Vec<ServerRow> = sqlx::query_as("SELECT * FROM servers ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ServerRow::into_server).collect())
    }

    pub async fn list_enabled_servers(&self) -> Result<Vec<Server>, DbError> {
        let rows: Vec<ServerRow> =
            sqlx::query_as("SELECT * FROM servers WHERE enabled = 1 ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(ServerRow::into_server).collect())
    }

    pub async fn get_server(&self, id: i64) -> Result<Option<Server>, DbError> {
        let row: Option<ServerRow> = sqlx::query_as("SELECT * FROM servers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ServerRow::into_server))
    }

    pub async fn get_server_by_name(&self, name: &str) -> Result<Option<Server>, DbError> {
        let row: Option<ServerRow> = sqlx::query_as("SELECT * FROM servers WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ServerRow::into_server))
    }

    pub async fn create_server(&self, patch: ServerPatch) -> Result<Server, DbError> {
        let name = patch.name.ok_or_else(|| DbError::DuplicateName(String::new()))?;
        if self.get_server_by_name(&name).await?.is_some() {
            return Err(DbError::DuplicateName(name));
        }

        let host = patch.host.unwrap_or_default();
        let agent_port = patch.agent_port.unwrap_or_else(Server::default_agent_port);
        let token = patch.token.unwrap_or_default();
        let enabled = patch.enabled.unwrap_or(true);
        let services = serde_json::to_string(&patch.services.unwrap_or_default()).unwrap();
        let proxy_config = patch
            .proxy_config
            .as_ref()
            .map(|cfg| serde_json::to_string(cfg).unwrap());
        let created_at = Utc::now();

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO servers (name, host, agent_port, token, enabled, services, proxy_config, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&name)
        .bind(&host)
        .bind(agent_port as i64)
        .bind(&token)
        .bind(enabled)
        .bind(&services)
        .bind(&proxy_config)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        self.get_server(id).await?.ok_or(DbError::ServerNotFound(id))
    }

    pub async fn update_server(&self, id: i64, patch: ServerPatch) -> Result<Server, DbError> {
        let existing = self.get_server(id).await?.ok_or(DbError::ServerNotFound(id))?;

        if let Some(new_name) = &patch.name {
            if new_name != &existing.name {
                if let Some(other) = self.get_server_by_name(new_name).await? {
                    if other.id != id {
                        return Err(DbError::DuplicateName(new_name.clone()));
                    }
                }
            }
        }

        let name = patch.name.unwrap_or(existing.name);
        let host = patch.host.unwrap_or(existing.host);
        let agent_port = patch.agent_port.unwrap_or(existing.agent_port);
        let token = patch.token.unwrap_or(existing.token);
        let enabled = patch.enabled.unwrap_or(existing.enabled);
        let services = serde_json::to_string(&patch.services.unwrap_or(existing.services)).unwrap();
        let proxy_config = patch
            .proxy_config
            .or(existing.proxy_config)
            .map(|cfg| serde_json::to_string(&cfg).unwrap());

        sqlx::query(
            "UPDATE servers SET name = ?, host = ?, agent_port = ?, token = ?, enabled = ?, \
             services = ?, proxy_config = ? WHERE id = ?",
        )
        .bind(&name)
        .bind(&host)
        .bind(agent_port as i64)
        .bind(&token)
        .bind(enabled)
        .bind(&services)
        .bind(&proxy_config)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_server(id).await?.ok_or(DbError::ServerNotFound(id))
    }

    pub async fn delete_server(&self, id: i64) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_last_seen(&self, id: i64, ts: DateTime<Utc>) -> Result<(), DbError> {
        sqlx::query("UPDATE servers SET last_seen_at = ? WHERE id = ?")
            .bind(ts)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_proxy_config(&self, id: i64) -> Result<Option<ProxyConfig>, DbError> {
        Ok(self.get_server(id).await?.and_then(|s| s.proxy_config))
    }

    pub async fn set_proxy_config(&self, id: i64, config: ProxyConfig) -> Result<(), DbError> {
        let raw = serde_json::to_string(&config).unwrap();
        sqlx::query("UPDATE servers SET proxy_config = ? WHERE id = ?")
            .bind(raw)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_hourly_sample(
        &self,
        server_id: i64,
        ts: DateTime<Utc>,
        agg: fleetwatch_shared::RollupAggregates,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO samples_hourly \
             (server_id, ts, cpu_pct_avg, cpu_pct_max, disk_used_pct, disk_used_bytes, disk_total_bytes, \
              gpu_util_pct_avg, gpu_util_pct_max, gpu_mem_used_mb, gpu_mem_total_mb) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (server_id, ts) DO UPDATE SET \
               cpu_pct_avg = excluded.cpu_pct_avg, cpu_pct_max = excluded.cpu_pct_max, \
               disk_used_pct = excluded.disk_used_pct, disk_used_bytes = excluded.disk_used_bytes, \
               disk_total_bytes = excluded.disk_total_bytes, gpu_util_pct_avg = excluded.gpu_util_pct_avg, \
               gpu_util_pct_max = excluded.gpu_util_pct_max, gpu_mem_used_mb = excluded.gpu_mem_used_mb, \
               gpu_mem_total_mb = excluded.gpu_mem_total_mb",
        )
        .bind(server_id)
        .bind(ts)
        .bind(agg.cpu_pct_avg)
        .bind(agg.cpu_pct_max)
        .bind(agg.disk_used_pct)
        .bind(agg.disk_used_bytes.map(|v| v as i64))
        .bind(agg.disk_total_bytes.map(|v| v as i64))
        .bind(agg.gpu_util_pct_avg)
        .bind(agg.gpu_util_pct_max)
        .bind(agg.gpu_mem_used_mb.map(|v| v as i64))
        .bind(agg.gpu_mem_total_mb.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn query_timeseries(
        &self,
        server_id: i64,
        metric: TimeseriesMetric,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        agg: TimeseriesAgg,
    ) -> Result<Vec<(DateTime<Utc>, Option<f64>)>, DbError> {
        let column = match (&metric, &agg) {
            (TimeseriesMetric::CpuPct, TimeseriesAgg::Avg) => "cpu_pct_avg",
            (TimeseriesMetric::CpuPct, TimeseriesAgg::Max) => "cpu_pct_max",
            (TimeseriesMetric::DiskUsedPct, _) => "disk_used_pct",
            (TimeseriesMetric::GpuUtilPct, TimeseriesAgg::Avg) => "gpu_util_pct_avg",
            (TimeseriesMetric::GpuUtilPct, TimeseriesAgg::Max) => "gpu_util_pct_max",
        };

        let sql = format!(
            "SELECT ts, {column} AS value FROM samples_hourly \
             WHERE server_id = ? AND ts >= ? AND ts <= ? ORDER BY ts ASC"
        );
        let rows: Vec<TimeseriesPoint> = sqlx::query_as(&sql)
            .bind(server_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.ts, r.value)).collect())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn query_hourly_history(
        &self,
        server_ids: Option<&[i64]>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<(Vec<HourlySampleWithServer>, i64), DbError> {
        let mut conditions = Vec::new();
        if let Some(ids) = server_ids {
            if ids.is_empty() {
                return Ok((Vec::new(), 0));
            }
            let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
            conditions.push(format!("h.server_id IN ({list})"));
        }
        if from.is_some() {
            conditions.push("h.ts >= ?".to_string());
        }
        if to.is_some() {
            conditions.push("h.ts <= ?".to_string());
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM samples_hourly h {where_clause}");
        let mut count_query = sqlx::query_scalar(&count_sql);
        if let Some(from) = from {
            count_query = count_query.bind(from);
        }
        if let Some(to) = to {
            count_query = count_query.bind(to);
        }
        let total_count: i64 = count_query.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT h.*, s.name AS server_name FROM samples_hourly h \
             JOIN servers s ON s.id = h.server_id {where_clause} \
             ORDER BY {} {} LIMIT ? OFFSET ?",
            sort_by.column(),
            sort_order.sql()
        );
        let mut query = sqlx::query_as(&sql);
        if let Some(from) = from {
            query = query.bind(from);
        }
        if let Some(to) = to {
            query = query.bind(to);
        }
        let rows: Vec<HourlySampleWithServerRow> = query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((
            rows.into_iter().map(|r| r.into_sample_with_server()).collect(),
            total_count,
        ))
    }

    /// Implements the 60-second dedup predicate. Returns `None` when deduped.
    pub async fn save_event(
        &self,
        server_id: i64,
        event_type: EventType,
        message: &str,
    ) -> Result<Option<i64>, DbError> {
        let now = Utc::now();
        let window_start = now - ChronoDuration::seconds(EVENT_DEDUP_WINDOW_SECS);

        let recent: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM events WHERE server_id = ? AND type = ? AND ts >= ? LIMIT 1",
        )
        .bind(server_id)
        .bind(event_type.as_str())
        .bind(window_start)
        .fetch_optional(&self.pool)
        .await?;

        if recent.is_some() {
            return Ok(None);
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO events (server_id, ts, type, message) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(server_id)
        .bind(now)
        .bind(event_type.as_str())
        .bind(message)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(id))
    }

    pub async fn get_recent_events(&self, limit: i64) -> Result<Vec<EventWithServer>, DbError> {
        let rows: Vec<EventWithServerRow> = sqlx::query_as(
            "SELECT e.*, s.name AS server_name FROM events e \
             JOIN servers s ON s.id = e.server_id ORDER BY e.ts DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.into_event_with_server())
            .collect())
    }

    pub async fn cleanup_old_data(&self, retention_days: i64) -> Result<(i64, i64), DbError> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let samples = sqlx::query("DELETE FROM samples_hourly WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let events = sqlx::query("DELETE FROM events WHERE ts < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok((samples.rows_affected() as i64, events.rows_affected() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_shared::RollupAggregates;

    fn patch(name: &str) -> ServerPatch {
        ServerPatch {
            name: Some(name.to_string()),
            host: Some("10.0.0.1".to_string()),
            agent_port: Some(9109),
            token: Some("secret".to_string()),
            enabled: Some(true),
            services: Some(vec!["nginx.service".to_string()]),
            proxy_config: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_server_roundtrips() {
        let store = Store::test_store().await;
        let created = store.create_server(patch("web-1")).await.unwrap();
        let fetched = store.get_server(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "web-1");
        assert_eq!(fetched.services, vec!["nginx.service".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let store = Store::test_store().await;
        store.create_server(patch("web-1")).await.unwrap();
        let result = store.create_server(patch("web-1")).await;
        assert!(matches!(result, Err(DbError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn delete_server_cascades_to_samples_and_events() {
        let store = Store::test_store().await;
        let server = store.create_server(patch("web-1")).await.unwrap();
        store
            .save_hourly_sample(
                server.id,
                Utc::now(),
                RollupAggregates {
                    cpu_pct_avg: Some(10.0),
                    cpu_pct_max: Some(10.0),
                    disk_used_pct: None,
                    disk_used_bytes: None,
                    disk_total_bytes: None,
                    gpu_util_pct_avg: None,
                    gpu_util_pct_max: None,
                    gpu_mem_used_mb: None,
                    gpu_mem_total_mb: None,
                },
            )
            .await
            .unwrap();
        store
            .save_event(server.id, EventType::ServerUp, "server came back online")
            .await
            .unwrap();

        store.delete_server(server.id).await.unwrap();

        let (rows, count) = store
            .query_hourly_history(None, None, None, 100, 0, SortBy::Ts, SortOrder::Desc)
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(rows.is_empty());
        assert!(store.get_recent_events(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_event_dedupes_within_window() {
        let store = Store::test_store().await;
        let server = store.create_server(patch("web-1")).await.unwrap();
        let first = store
            .save_event(server.id, EventType::ServerDown, "server went offline")
            .await
            .unwrap();
        let second = store
            .save_event(server.id, EventType::ServerDown, "server went offline")
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn history_pagination_returns_disjoint_pages() {
        let store = Store::test_store().await;
        let server = store.create_server(patch("web-1")).await.unwrap();
        for i in 0..50 {
            store
                .save_hourly_sample(
                    server.id,
                    Utc::now() - ChronoDuration::hours(i),
                    RollupAggregates {
                        cpu_pct_avg: Some(i as f64),
                        cpu_pct_max: Some(i as f64),
                        disk_used_pct: None,
                        disk_used_bytes: None,
                        disk_total_bytes: None,
                        gpu_util_pct_avg: None,
                        gpu_util_pct_max: None,
                        gpu_mem_used_mb: None,
                        gpu_mem_total_mb: None,
                    },
                )
                .await
                .unwrap();
        }

        let (page1, total) = store
            .query_hourly_history(None, None, None, 10, 0, SortBy::Ts, SortOrder::Desc)
            .await
            .unwrap();
        let (page2, _) = store
            .query_hourly_history(None, None, None, 10, 10, SortBy::Ts, SortOrder::Desc)
            .await
            .unwrap();

        assert_eq!(total, 50);
        assert_eq!(page1.len(), 10);
        assert_eq!(page2.len(), 10);
        let ids1: std::collections::HashSet<_> = page1.iter().map(|r| r.sample.id).collect();
        let ids2: std::collections::HashSet<_> = page2.iter().map(|r| r.sample.id).collect();
        assert!(ids1.is_disjoint(&ids2));
    }
}
