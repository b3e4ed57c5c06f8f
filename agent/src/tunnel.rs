use std::net::TcpListener as StdTcpListener;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetwatch_shared::{ProxyConfig, TunnelState, TunnelStatus, backoff_seconds};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Inner {
    desired_running: bool,
    config: Option<ProxyConfig>,
    child: Option<Child>,
    stderr_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
    status: TunnelStatus,
}

/// Maintains an outbound SSH local-forward tunnel, restarting it with
/// exponential backoff whenever it dies while desired.
pub struct TunnelSupervisor {
    inner: Mutex<Inner>,
}

impl TunnelSupervisor {
    pub fn new() -> Arc<Self> {
        Arc::new(TunnelSupervisor {
            inner: Mutex::new(Inner {
                desired_running: false,
                config: None,
                child: None,
                stderr_task: None,
                monitor_task: None,
                status: TunnelStatus::disabled(),
            }),
        })
    }

    pub async fn configure(&self, config: Option<ProxyConfig>) {
        let mut inner = self.inner.lock().await;
        let should_disable = config.as_ref().is_none_or(|c| !c.enabled);
        inner.config = config;
        if should_disable && !inner.desired_running {
            inner.status.status = TunnelState::Disabled;
        }
    }

    pub async fn get_status(&self) -> TunnelStatus {
        let inner = self.inner.lock().await;
        let mut status = clone_status(&inner.status);
        if let Some(cfg) = &inner.config {
            status.listen_port = Some(cfg.server_listen_port);
            status.target = Some(format!("127.0.0.1:{}", cfg.center_proxy_port));
        }
        status
    }

    pub async fn start(
        self: &Arc<Self>,
        config_override: Option<ProxyConfig>,
    ) -> Result<(), TunnelError> {
        let mut inner = self.inner.lock().await;
        if let Some(cfg) = config_override {
            inner.config = Some(cfg);
        }

        let Some(cfg) = inner.config.clone() else {
            return Err(TunnelError::ConfigMissing);
        };
        if !cfg.enabled {
            return Err(TunnelError::Disabled);
        }

        inner.desired_running = true;
        inner.status.status = TunnelState::Connecting;
        inner.status.last_error = None;
        inner.status.listen_port = Some(cfg.server_listen_port);
        inner.status.target = Some(format!("127.0.0.1:{}", cfg.center_proxy_port));

        stop_process_locked(&mut inner).await;

        let needs_spawn = inner
            .monitor_task
            .as_ref()
            .is_none_or(|handle| handle.is_finished());
        if needs_spawn {
            let supervisor = Arc::clone(self);
            inner.monitor_task = Some(tokio::spawn(async move {
                supervisor.monitor_loop().await;
            }));
        }

        Ok(())
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.desired_running = false;
        stop_process_locked(&mut inner).await;
        inner.status.status = match &inner.config {
            Some(cfg) if cfg.enabled => TunnelState::Stopped,
            _ => TunnelState::Disabled,
        };
        inner.status.connected_since = None;

        if let Some(task) = inner.monitor_task.take() {
            task.abort();
        }
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            let (desired, cfg) = {
                let inner = self.inner.lock().await;
                (inner.desired_running, inner.config.clone())
            };

            if !desired {
                return;
            }
            let Some(cfg) = cfg.filter(|c| c.enabled) else {
                let mut inner = self.inner.lock().await;
                inner.status.status = TunnelState::Disabled;
                return;
            };

            if !is_port_available(cfg.server_listen_port) {
                let mut inner = self.inner.lock().await;
                inner.status.status = TunnelState::Error;
                inner.status.last_error = Some(format!(
                    "PORT_IN_USE: 127.0.0.1:{}",
                    cfg.server_listen_port
                ));
                inner.status.retry_count += 1;
                let retry_count = inner.status.retry_count;
                let desired_running = inner.desired_running;
                drop(inner);
                if !desired_running {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(backoff_seconds(retry_count))).await;
                continue;
            }

            match self.launch_and_wait(&cfg).await {
                Ok(()) => {}
                Err(e) => {
                    let mut inner = self.inner.lock().await;
                    inner.status.status = TunnelState::Error;
                    inner.status.last_error = Some(e.to_string());
                    inner.status.retry_count += 1;
                    inner.status.pid = None;
                    inner.status.connected_since = None;
                    inner.child = None;
                }
            }

            let (desired_running, retry_count) = {
                let inner = self.inner.lock().await;
                (inner.desired_running, inner.status.retry_count)
            };
            if !desired_running {
                return;
            }
            tokio::time::sleep(Duration::from_secs(backoff_seconds(retry_count))).await;
        }
    }

    async fn launch_and_wait(self: &Arc<Self>, cfg: &ProxyConfig) -> Result<(), TunnelError> {
        let argv = build_ssh_argv(cfg)?;

        {
            let mut inner = self.inner.lock().await;
            inner.status.status = TunnelState::Connecting;
            inner.status.listen_port = Some(cfg.server_listen_port);
            inner.status.target = Some(format!("127.0.0.1:{}", cfg.center_proxy_port));
            inner.status.last_error = None;
        }

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TunnelError::Spawn)?;

        let pid = child.id();
        let stderr = child.stderr.take();

        {
            let mut inner = self.inner.lock().await;
            inner.status.pid = pid;
        }

        if let Some(stderr) = stderr {
            let supervisor = Arc::clone(self);
            let stderr_task = tokio::spawn(async move {
                supervisor.read_stderr(stderr).await;
            });
            let mut inner = self.inner.lock().await;
            inner.stderr_task = Some(stderr_task);
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        let still_alive = child.try_wait().ok().flatten().is_none();
        if still_alive {
            let mut inner = self.inner.lock().await;
            inner.status.status = TunnelState::Connected;
            inner.status.connected_since = Some(Utc::now());
            inner.status.retry_count = 0;
            inner.status.last_error = None;
            info!("proxy connected");
        }

        {
            let mut inner = self.inner.lock().await;
            inner.child = Some(child);
        }

        let exit_status = {
            let mut inner = self.inner.lock().await;
            let child = inner.child.as_mut().expect("child set above");
            child.wait().await.map_err(TunnelError::Wait)?
        };

        let desired = {
            let mut inner = self.inner.lock().await;
            if inner.desired_running {
                let code = exit_status.code().unwrap_or(-1);
                inner.status.status = TunnelState::Error;
                if inner.status.last_error.is_none() {
                    inner.status.last_error = Some(format!("ssh exited with code {code}"));
                }
                inner.status.retry_count += 1;
                inner.status.pid = None;
                inner.status.connected_since = None;
                inner.child = None;
            }
            inner.desired_running
        };

        if desired {
            warn!("proxy disconnected (status={exit_status:?})");
        }
        Ok(())
    }

    async fn read_stderr(self: Arc<Self>, stderr: tokio::process::ChildStderr) {
        let mut lines = tokio::io::BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let mut inner = self.inner.lock().await;
                    inner.status.last_error = Some(text.to_string());
                    drop(inner);
                    info!("proxy ssh: {text}");
                }
                Ok(None) => return,
                Err(_) => return,
            }
        }
    }
}

async fn stop_process_locked(inner: &mut Inner) {
    if let Some(task) = inner.stderr_task.take() {
        task.abort();
    }
    let Some(mut child) = inner.child.take() else {
        inner.status.pid = None;
        return;
    };
    inner.status.pid = None;

    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    } else {
        let _ = child.start_kill();
    }
    let timed_out = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .is_err();
    if timed_out {
        let _ = child.kill().await;
    }
}

fn clone_status(status: &TunnelStatus) -> TunnelStatus {
    TunnelStatus {
        status: status.status,
        pid: status.pid,
        listen_port: status.listen_port,
        target: status.target.clone(),
        last_error: status.last_error.clone(),
        connected_since: status.connected_since,
        retry_count: status.retry_count,
    }
}

fn is_port_available(port: u16) -> bool {
    StdTcpListener::bind(("127.0.0.1", port)).is_ok()
}

fn build_ssh_argv(cfg: &ProxyConfig) -> Result<Vec<String>, TunnelError> {
    let mut argv = vec![
        "ssh".to_string(),
        "-N".to_string(),
        "-L".to_string(),
        format!(
            "127.0.0.1:{}:127.0.0.1:{}",
            cfg.server_listen_port, cfg.center_proxy_port
        ),
        format!("{}@{}", cfg.center_ssh_user, cfg.center_ssh_host),
        "-p".to_string(),
        cfg.center_ssh_port.to_string(),
        "-i".to_string(),
        cfg.identity_file.clone(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ExitOnForwardFailure=yes".to_string(),
        "-o".to_string(),
        "ServerAliveInterval=30".to_string(),
        "-o".to_string(),
        "ServerAliveCountMax=3".to_string(),
    ];

    if cfg.strict_host_key_checking {
        argv.push("-o".to_string());
        argv.push("StrictHostKeyChecking=yes".to_string());
    } else {
        argv.push("-o".to_string());
        argv.push("StrictHostKeyChecking=no".to_string());
        argv.push("-o".to_string());
        argv.push("UserKnownHostsFile=/dev/null".to_string());
    }

    Ok(argv)
}

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("proxy config missing")]
    ConfigMissing,
    #[error("proxy is disabled in config")]
    Disabled,
    #[error("failed to spawn ssh: {0}")]
    Spawn(std::io::Error),
    #[error("failed waiting on ssh child: {0}")]
    Wait(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(listen_port: u16) -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            auto_start: false,
            server_listen_port: listen_port,
            center_proxy_port: 8080,
            center_ssh_host: "center.example".to_string(),
            center_ssh_port: 22,
            center_ssh_user: "monitor".to_string(),
            identity_file: "/etc/monitor/id_rsa".to_string(),
            strict_host_key_checking: false,
        }
    }

    #[test]
    fn build_ssh_argv_matches_expected_shape() {
        let cfg = test_config(9200);
        let argv = build_ssh_argv(&cfg).unwrap();
        assert_eq!(argv[0], "ssh");
        assert!(argv.contains(&"-N".to_string()));
        assert!(argv.contains(&"127.0.0.1:9200:127.0.0.1:8080".to_string()));
        assert!(argv.contains(&"monitor@center.example".to_string()));
        assert!(argv.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[tokio::test]
    async fn configure_with_disabled_config_sets_disabled_status() {
        let mut cfg = test_config(9201);
        cfg.enabled = false;
        let supervisor = TunnelSupervisor::new();
        supervisor.configure(Some(cfg)).await;
        let status = supervisor.get_status().await;
        assert_eq!(status.status, TunnelState::Disabled);
    }

    #[tokio::test]
    async fn start_without_config_fails() {
        let supervisor = TunnelSupervisor::new();
        let result = supervisor.start(None).await;
        assert!(matches!(result, Err(TunnelError::ConfigMissing)));
    }

    #[tokio::test]
    async fn start_with_disabled_config_fails() {
        let mut cfg = test_config(9202);
        cfg.enabled = false;
        let supervisor = TunnelSupervisor::new();
        let result = supervisor.start(Some(cfg)).await;
        assert!(matches!(result, Err(TunnelError::Disabled)));
    }
}
