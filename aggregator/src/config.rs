//! Aggregator configuration, loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. YAML config file (`--config`, else `FLEETWATCH_CONFIG`, else `./aggregator.yaml`)
//! 3. Built-in defaults (lowest priority)

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub database_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
    pub cors_origins: Vec<String>,
    pub admin_token: String,
    pub frontend_enabled: bool,
    pub frontend_path: Option<PathBuf>,
    pub collector_interval_secs: u64,
    pub collector_timeout_secs: u64,
    pub collector_retry_count: u32,
    pub collector_retry_delay_secs: u64,
    /// Parsed for config-surface compatibility only; the rollup engine
    /// always runs a fixed, aligned top-of-hour cadence.
    pub aggregator_period_hours: u32,
    pub aggregator_align_to_hour: bool,
    pub retention_days: i64,
    pub retention_cleanup_hour: u32,
    pub backup_path: Option<PathBuf>,
    pub backup_retention_days: i64,
    pub backup_hour: u32,
    pub logging_level: String,
    pub logging_file: Option<PathBuf>,
}

/// A placeholder admin token means development mode: write endpoints bypass the check.
pub const DEV_ADMIN_TOKEN_PLACEHOLDER: &str = "changeme";

impl AggregatorConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn is_dev_mode(&self) -> bool {
        self.admin_token.is_empty() || self.admin_token == DEV_ADMIN_TOKEN_PLACEHOLDER
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            database_path: PathBuf::from("./fleetwatch.db"),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            cors_origins: vec!["*".to_string()],
            admin_token: DEV_ADMIN_TOKEN_PLACEHOLDER.to_string(),
            frontend_enabled: false,
            frontend_path: None,
            collector_interval_secs: 5,
            collector_timeout_secs: 2,
            collector_retry_count: 0,
            collector_retry_delay_secs: 1,
            aggregator_period_hours: 1,
            aggregator_align_to_hour: true,
            retention_days: 30,
            retention_cleanup_hour: 3,
            backup_path: None,
            backup_retention_days: 7,
            backup_hour: 4,
            logging_level: "info".to_string(),
            logging_file: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database: Option<FileDatabase>,
    api: Option<FileApi>,
    frontend: Option<FileFrontend>,
    collector: Option<FileCollector>,
    aggregator: Option<FileAggregatorSection>,
    retention: Option<FileRetention>,
    backup: Option<FileBackup>,
    logging: Option<FileLogging>,
}

#[derive(Debug, Default, Deserialize)]
struct FileDatabase {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileApi {
    host: Option<String>,
    port: Option<u16>,
    cors_origins: Option<Vec<String>>,
    admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileFrontend {
    enabled: Option<bool>,
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileCollector {
    interval: Option<u64>,
    timeout: Option<u64>,
    retry_count: Option<u32>,
    retry_delay: Option<u64>,
}

/// The rollup engine is not parameterized by these; they are parsed for
/// config-surface compatibility only and have no effect on rollup cadence.
#[derive(Debug, Default, Deserialize)]
struct FileAggregatorSection {
    period_hours: Option<u32>,
    align_to_hour: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRetention {
    days: Option<i64>,
    cleanup_hour: Option<u32>,
}

/// Backup execution is not implemented; these fields are parsed for
/// config-surface compatibility only.
#[derive(Debug, Default, Deserialize)]
struct FileBackup {
    path: Option<String>,
    retention_days: Option<i64>,
    backup_hour: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileLogging {
    level: Option<String>,
    file: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl AggregatorConfig {
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.or_else(|| std::env::var("FLEETWATCH_CONFIG").ok().map(PathBuf::from));
        let file = match &path {
            Some(path) => Self::load_file(path)?,
            None => {
                let default_path = PathBuf::from("./aggregator.yaml");
                if default_path.exists() {
                    Self::load_file(&default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let defaults = AggregatorConfig::default();
        let database = file.database.unwrap_or_default();
        let api = file.api.unwrap_or_default();
        let frontend = file.frontend.unwrap_or_default();
        let collector = file.collector.unwrap_or_default();
        let aggregator = file.aggregator.unwrap_or_default();
        let retention = file.retention.unwrap_or_default();
        let backup = file.backup.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();

        let database_path = std::env::var("FLEETWATCH_DATABASE_PATH")
            .ok()
            .or(database.path)
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);
        let api_host = std::env::var("FLEETWATCH_API_HOST")
            .ok()
            .or(api.host)
            .unwrap_or(defaults.api_host);
        let api_port = std::env::var("FLEETWATCH_API_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(api.port)
            .unwrap_or(defaults.api_port);
        let cors_origins = api.cors_origins.unwrap_or(defaults.cors_origins);
        let admin_token = std::env::var("FLEETWATCH_ADMIN_TOKEN")
            .ok()
            .or(api.admin_token)
            .unwrap_or(defaults.admin_token);

        let frontend_enabled = frontend.enabled.unwrap_or(defaults.frontend_enabled);
        let frontend_path = frontend.path.map(PathBuf::from).or(defaults.frontend_path);

        let collector_interval_secs = collector.interval.unwrap_or(defaults.collector_interval_secs);
        let collector_timeout_secs = collector.timeout.unwrap_or(defaults.collector_timeout_secs);
        let collector_retry_count = collector.retry_count.unwrap_or(defaults.collector_retry_count);
        let collector_retry_delay_secs = collector
            .retry_delay
            .unwrap_or(defaults.collector_retry_delay_secs);

        let aggregator_period_hours = aggregator.period_hours.unwrap_or(defaults.aggregator_period_hours);
        let aggregator_align_to_hour = aggregator
            .align_to_hour
            .unwrap_or(defaults.aggregator_align_to_hour);

        let retention_days = retention.days.unwrap_or(defaults.retention_days);
        let retention_cleanup_hour = retention.cleanup_hour.unwrap_or(defaults.retention_cleanup_hour);

        let backup_path = backup.path.map(PathBuf::from).or(defaults.backup_path);
        let backup_retention_days = backup.retention_days.unwrap_or(defaults.backup_retention_days);
        let backup_hour = backup.backup_hour.unwrap_or(defaults.backup_hour);

        let logging_level = std::env::var("RUST_LOG")
            .ok()
            .or(logging.level)
            .unwrap_or(defaults.logging_level);
        let logging_file = logging.file.map(PathBuf::from).or(defaults.logging_file);

        Ok(AggregatorConfig {
            database_path,
            api_host,
            api_port,
            cors_origins,
            admin_token,
            frontend_enabled,
            frontend_path,
            collector_interval_secs,
            collector_timeout_secs,
            collector_retry_count,
            collector_retry_delay_secs,
            aggregator_period_hours,
            aggregator_align_to_hour,
            retention_days,
            retention_cleanup_hour,
            backup_path,
            backup_retention_days,
            backup_hour,
            logging_level,
            logging_file,
        })
    }

    fn load_file(path: &PathBuf) -> Result<FileConfig, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_dev_mode() {
        let cfg = AggregatorConfig::default();
        assert!(cfg.is_dev_mode());
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let cfg = AggregatorConfig::default();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:8000");
    }
}
