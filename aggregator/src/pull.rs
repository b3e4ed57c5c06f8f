use std::sync::Arc;
use std::time::Duration;

use fleetwatch_shared::{BufferEntry, LatestSnapshot, PrevState, Server, Snapshot, aggregate_gpu_metrics, detect_transitions};
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::db::Store;
use crate::store::StateStore;

const MAX_CONCURRENT_PULLS: usize = 32;

pub struct PullScheduler {
    http: reqwest::Client,
    store: Arc<Store>,
    state: StateStore,
    timeout: Duration,
}

impl PullScheduler {
    pub fn new(store: Arc<Store>, state: StateStore, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        PullScheduler {
            http,
            store,
            state,
            timeout,
        }
    }

    /// Primes every enabled server's prior state so the first pull after
    /// startup never manufactures a spurious `server_down`.
    pub async fn prime_prev_state(&self) -> Result<(), crate::error::DbError> {
        for server in self.store.list_enabled_servers().await? {
            self.state.set_prev_state(server.id, PrevState::default());
        }
        Ok(())
    }

    /// Runs the periodic fixed-cadence tick loop until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        let servers = match self.store.list_enabled_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                warn!(error = %e, "pull tick: failed to load enabled servers");
                return;
            }
        };

        stream::iter(servers.into_iter().map(|server| async move {
            self.pull_one(&server).await;
        }))
        .buffer_unordered(MAX_CONCURRENT_PULLS)
        .collect::<Vec<()>>()
        .await;
    }

    async fn pull_one(&self, server: &Server) {
        let url = format!("{}/v1/snapshot", server.base_url());
        let result = self
            .http
            .get(&url)
            .bearer_auth(&server.token)
            .timeout(self.timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<Snapshot>().await {
                Ok(snapshot) => self.handle_success(server, snapshot).await,
                Err(e) => {
                    warn!(server = %server.name, error = %e, "failed to parse snapshot response");
                    self.handle_failure(server).await;
                }
            },
            Ok(resp) => {
                warn!(server = %server.name, status = %resp.status(), "agent returned non-2xx");
                self.handle_failure(server).await;
            }
            Err(e) => {
                warn!(server = %server.name, error = %e, "failed to reach agent");
                self.handle_failure(server).await;
            }
        }
    }

    async fn handle_success(&self, server: &Server, snapshot: Snapshot) {
        let latest = LatestSnapshot::from_snapshot(&snapshot);
        self.state.set_latest(server.id, latest.clone());

        let gpu_agg = aggregate_gpu_metrics(snapshot.gpus.as_deref());
        let disk = snapshot.disks.first();
        self.state
            .append_buffer(
                server.id,
                BufferEntry {
                    cpu_pct: snapshot.cpu_pct,
                    disk_used_pct: disk.map(|d| d.used_pct),
                    disk_used_bytes: disk.map(|d| d.used_bytes),
                    disk_total_bytes: disk.map(|d| d.total_bytes),
                    gpu_util_pct: gpu_agg.gpu_util_pct,
                    gpu_mem_used_mb: gpu_agg.gpu_mem_used_mb,
                    gpu_mem_total_mb: gpu_agg.gpu_mem_total_mb,
                },
            )
            .await;

        if let Err(e) = self.store.update_last_seen(server.id, snapshot.ts).await {
            warn!(server = %server.name, error = %e, "failed to update last_seen_at");
        }

        let current_services = snapshot
            .services
            .iter()
            .map(|s| (s.name.clone(), s.active_state))
            .collect();
        self.detect_and_persist_events(server, true, &current_services).await;
    }

    async fn handle_failure(&self, server: &Server) {
        let sticky = match self.state.get_latest(server.id) {
            Some(prior) => LatestSnapshot::sticky_offline(&prior),
            None => LatestSnapshot::offline_unknown(chrono::Utc::now()),
        };
        self.state.set_latest(server.id, sticky);
        self.detect_and_persist_events(server, false, &Default::default()).await;
    }

    async fn detect_and_persist_events(
        &self,
        server: &Server,
        online: bool,
        services: &std::collections::HashMap<String, fleetwatch_shared::ActiveState>,
    ) {
        let prev = self.state.get_prev_state(server.id);
        let events = detect_transitions(&prev, online, services);

        for event in events {
            match self
                .store
                .save_event(server.id, event.event_type, &event.message)
                .await
            {
                Ok(_) => {}
                Err(e) => warn!(server = %server.name, error = %e, "failed to persist event"),
            }
        }

        self.state.set_prev_state(
            server.id,
            PrevState {
                online: Some(online),
                services: services.clone(),
            },
        );
    }
}
