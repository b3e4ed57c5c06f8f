use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tunnel::ProxyConfig;

/// Identity and config for a monitored host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub agent_port: u16,
    pub token: String,
    pub enabled: bool,
    pub services: Vec<String>,
    pub proxy_config: Option<ProxyConfig>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Server {
    pub fn default_agent_port() -> u16 {
        9109
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.agent_port)
    }
}

/// Fields accepted by create/update. All optional so `update_server` can
/// express a partial patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub agent_port: Option<u16>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub services: Option<Vec<String>>,
    #[serde(default)]
    pub proxy_config: Option<ProxyConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_formats_host_and_port() {
        let server = Server {
            id: 1,
            name: "web-1".into(),
            host: "10.0.0.5".into(),
            agent_port: 9109,
            token: "t".into(),
            enabled: true,
            services: vec![],
            proxy_config: None,
            last_seen_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(server.base_url(), "http://10.0.0.5:9109");
    }
}
