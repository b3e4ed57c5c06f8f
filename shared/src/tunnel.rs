use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embedded JSON config for a server's SSH tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub auto_start: bool,
    pub server_listen_port: u16,
    pub center_proxy_port: u16,
    pub center_ssh_host: String,
    #[serde(default = "default_ssh_port")]
    pub center_ssh_port: u16,
    pub center_ssh_user: String,
    pub identity_file: String,
    pub strict_host_key_checking: bool,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Disabled,
    Stopped,
    Connecting,
    Connected,
    Error,
}

impl TunnelState {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelState::Disabled => "disabled",
            TunnelState::Stopped => "stopped",
            TunnelState::Connecting => "connecting",
            TunnelState::Connected => "connected",
            TunnelState::Error => "error",
        }
    }
}

/// State of the SSH child as observed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub status: TunnelState,
    pub pid: Option<u32>,
    pub listen_port: Option<u16>,
    pub target: Option<String>,
    pub last_error: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl TunnelStatus {
    pub fn disabled() -> Self {
        TunnelStatus {
            status: TunnelState::Disabled,
            pid: None,
            listen_port: None,
            target: None,
            last_error: None,
            connected_since: None,
            retry_count: 0,
        }
    }

    pub fn stopped() -> Self {
        TunnelStatus {
            status: TunnelState::Stopped,
            ..TunnelStatus::disabled()
        }
    }
}

/// Exponential backoff with a 64 s cap: `min(60, 2^min(6,retry))`
/// seconds between reconnect attempts. The formula tops out at `2^6 = 64`,
/// with the outer `min(60, ...)` bounding the sleep actually used.
pub fn backoff_seconds(retry_count: u32) -> u64 {
    let exp = retry_count.min(6);
    let raw = 2u64.saturating_pow(exp);
    raw.min(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(1), 2);
        assert_eq!(backoff_seconds(2), 4);
        assert_eq!(backoff_seconds(3), 8);
        assert_eq!(backoff_seconds(6), 60);
        assert_eq!(backoff_seconds(10), 60);
    }

    #[test]
    fn backoff_is_monotone_non_decreasing() {
        let mut prev = 0;
        for retry in 0..20 {
            let cur = backoff_seconds(retry);
            assert!(cur >= prev);
            assert!((1..=60).contains(&cur));
            prev = cur;
        }
    }
}
