//! Agent configuration, loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. YAML config file (`--config`, else `FLEETWATCH_CONFIG`, else `./agent.yaml`)
//! 3. Built-in defaults (lowest priority)

use std::path::PathBuf;

use fleetwatch_shared::ProxyConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuMode {
    Auto,
    Off,
    Nvidia,
}

impl GpuMode {
    fn parse(s: &str) -> Self {
        match s {
            "off" => GpuMode::Off,
            "nvidia" => GpuMode::Nvidia,
            _ => GpuMode::Auto,
        }
    }

    pub fn enabled(self) -> bool {
        !matches!(self, GpuMode::Off)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub node_id: String,
    pub listen: String,
    pub token: String,
    pub disks: Vec<String>,
    pub services_allowlist: Vec<String>,
    pub gpu: GpuMode,
    pub proxy: Option<ProxyConfig>,
    pub logging_level: String,
    pub logging_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            node_id: "localhost".to_string(),
            listen: "0.0.0.0:9109".to_string(),
            token: String::new(),
            disks: vec!["/".to_string()],
            services_allowlist: Vec::new(),
            gpu: GpuMode::Auto,
            proxy: None,
            logging_level: "info".to_string(),
            logging_file: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    node_id: Option<String>,
    listen: Option<String>,
    token: Option<String>,
    disks: Option<Vec<String>>,
    services_allowlist: Option<Vec<String>>,
    gpu: Option<String>,
    proxy: Option<ProxyConfig>,
    logging: Option<FileLogging>,
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

impl AgentConfig {
    /// Loads configuration: env > file > default. A present-but-invalid
    /// file is fatal; an absent file falls back to defaults silently.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.or_else(|| std::env::var("FLEETWATCH_CONFIG").ok().map(PathBuf::from));
        let file = match &path {
            Some(path) => Self::load_file(path)?,
            None => {
                let default_path = PathBuf::from("./agent.yaml");
                if default_path.exists() {
                    Self::load_file(&default_path)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let defaults = AgentConfig::default();

        let node_id = std::env::var("FLEETWATCH_NODE_ID")
            .ok()
            .or(file.node_id)
            .unwrap_or(defaults.node_id);
        let listen = std::env::var("FLEETWATCH_LISTEN")
            .ok()
            .or(file.listen)
            .unwrap_or(defaults.listen);
        let token = std::env::var("FLEETWATCH_TOKEN")
            .ok()
            .or(file.token)
            .unwrap_or(defaults.token);
        let disks = file.disks.unwrap_or(defaults.disks);
        let services_allowlist = file.services_allowlist.unwrap_or(defaults.services_allowlist);
        let gpu = std::env::var("FLEETWATCH_GPU")
            .ok()
            .or(file.gpu)
            .map(|s| GpuMode::parse(&s))
            .unwrap_or(defaults.gpu);
        let proxy = file.proxy.or(defaults.proxy);

        let logging = file.logging.unwrap_or_default();
        let logging_level = std::env::var("RUST_LOG")
            .ok()
            .or(logging.level)
            .unwrap_or(defaults.logging_level);
        let logging_file = logging.file.map(PathBuf::from).or(defaults.logging_file);

        Ok(AgentConfig {
            node_id,
            listen,
            token,
            disks,
            services_allowlist,
            gpu,
            proxy,
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
    fn gpu_mode_parses_known_values() {
        assert_eq!(GpuMode::parse("off"), GpuMode::Off);
        assert_eq!(GpuMode::parse("nvidia"), GpuMode::Nvidia);
        assert_eq!(GpuMode::parse("auto"), GpuMode::Auto);
        assert_eq!(GpuMode::parse("bogus"), GpuMode::Auto);
    }

    #[test]
    fn default_config_has_sane_listen_address() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.listen, "0.0.0.0:9109");
        assert!(cfg.gpu.enabled());
    }
}
