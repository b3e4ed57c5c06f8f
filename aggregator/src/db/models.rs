use chrono::{DateTime, Utc};
use fleetwatch_shared::{Event, EventType, EventWithServer, HourlySampleWithServer, ProxyConfig, Server};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ServerRow {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub agent_port: i64,
    pub token: String,
    pub enabled: bool,
    pub services: String,
    pub proxy_config: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ServerRow {
    pub fn into_server(self) -> Server {
        Server {
            id: self.id,
            name: self.name,
            host: self.host,
            agent_port: self.agent_port as u16,
            token: self.token,
            enabled: self.enabled,
            services: serde_json::from_str(&self.services).unwrap_or_default(),
            proxy_config: self
                .proxy_config
                .and_then(|raw| serde_json::from_str::<ProxyConfig>(&raw).ok()),
            last_seen_at: self.last_seen_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EventWithServerRow {
    pub id: i64,
    pub server_id: i64,
    pub ts: DateTime<Utc>,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub message: String,
    pub server_name: String,
}

impl EventWithServerRow {
    pub fn into_event_with_server(self) -> Option<EventWithServer> {
        Some(EventWithServer {
            event: Event {
                id: self.id,
                server_id: self.server_id,
                ts: self.ts,
                event_type: parse_event_type(&self.event_type)?,
                message: self.message,
            },
            server_name: self.server_name,
        })
    }
}

pub fn parse_event_type(s: &str) -> Option<EventType> {
    match s {
        "server_up" => Some(EventType::ServerUp),
        "server_down" => Some(EventType::ServerDown),
        "service_failed" => Some(EventType::ServiceFailed),
        "service_recovered" => Some(EventType::ServiceRecovered),
        _ => None,
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct HourlySampleWithServerRow {
    pub id: i64,
    pub server_id: i64,
    pub ts: DateTime<Utc>,
    pub cpu_pct_avg: Option<f64>,
    pub cpu_pct_max: Option<f64>,
    pub disk_used_pct: Option<f64>,
    pub disk_used_bytes: Option<i64>,
    pub disk_total_bytes: Option<i64>,
    pub gpu_util_pct_avg: Option<f64>,
    pub gpu_util_pct_max: Option<f64>,
    pub gpu_mem_used_mb: Option<i64>,
    pub gpu_mem_total_mb: Option<i64>,
    pub server_name: String,
}

impl HourlySampleWithServerRow {
    pub fn into_sample_with_server(self) -> HourlySampleWithServer {
        HourlySampleWithServer {
            sample: fleetwatch_shared::HourlySample {
                id: self.id,
                server_id: self.server_id,
                ts: self.ts,
                cpu_pct_avg: self.cpu_pct_avg,
                cpu_pct_max: self.cpu_pct_max,
                disk_used_pct: self.disk_used_pct,
                disk_used_bytes: self.disk_used_bytes,
                disk_total_bytes: self.disk_total_bytes,
                gpu_util_pct_avg: self.gpu_util_pct_avg,
                gpu_util_pct_max: self.gpu_util_pct_max,
                gpu_mem_used_mb: self.gpu_mem_used_mb,
                gpu_mem_total_mb: self.gpu_mem_total_mb,
            },
            server_name: self.server_name,
        }
    }
}

#[derive(Debug, Clone, Copy, FromRow)]
pub struct TimeseriesPoint {
    pub ts: DateTime<Utc>,
    pub value: Option<f64>,
}
