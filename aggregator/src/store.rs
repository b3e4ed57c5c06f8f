use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use fleetwatch_shared::{BufferEntry, LatestSnapshot, PrevState};
use tokio::sync::Mutex;

/// Process-wide concurrent-safe cache: latest per-server view, hourly sample
/// buffers, and prior state for transition detection.
#[derive(Clone, Default)]
pub struct StateStore {
    latest: Arc<DashMap<i64, LatestSnapshot>>,
    buffers: Arc<Mutex<HashMap<i64, Vec<BufferEntry>>>>,
    prev_state: Arc<DashMap<i64, PrevState>>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore::default()
    }

    pub fn get_latest(&self, server_id: i64) -> Option<LatestSnapshot> {
        self.latest.get(&server_id).map(|r| r.clone())
    }

    pub fn set_latest(&self, server_id: i64, snapshot: LatestSnapshot) {
        self.latest.insert(server_id, snapshot);
    }

    pub fn get_all_latest(&self) -> HashMap<i64, LatestSnapshot> {
        self.latest
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub async fn append_buffer(&self, server_id: i64, entry: BufferEntry) {
        let mut buffers = self.buffers.lock().await;
        buffers.entry(server_id).or_default().push(entry);
    }

    /// Atomically drains every server's buffer and clears it. Readers never
    /// observe a partially-drained buffer.
    pub async fn drain_all_buffers(&self) -> HashMap<i64, Vec<BufferEntry>> {
        let mut buffers = self.buffers.lock().await;
        std::mem::take(&mut *buffers)
    }

    pub fn get_prev_state(&self, server_id: i64) -> PrevState {
        self.prev_state
            .get(&server_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_prev_state(&self, server_id: i64, state: PrevState) {
        self.prev_state.insert(server_id, state);
    }

    pub async fn forget(&self, server_id: i64) {
        self.latest.remove(&server_id);
        self.prev_state.remove(&server_id);
        self.buffers.lock().await.remove(&server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_snapshot() -> LatestSnapshot {
        LatestSnapshot {
            ts: Utc::now(),
            online: true,
            cpu_pct: Some(10.0),
            disk_used_pct: None,
            disk_used_bytes: None,
            disk_total_bytes: None,
            gpu_count: 0,
            gpu_util_pct: None,
            gpu_util_pct_avg: None,
            gpu_mem_used_mb: None,
            gpu_mem_total_mb: None,
            gpus: None,
            services_failed_count: 0,
        }
    }

    #[tokio::test]
    async fn set_then_get_latest_roundtrips() {
        let store = StateStore::new();
        store.set_latest(1, sample_snapshot());
        assert!(store.get_latest(1).is_some());
        assert!(store.get_latest(2).is_none());
    }

    #[tokio::test]
    async fn drain_all_buffers_clears_state() {
        let store = StateStore::new();
        store.append_buffer(1, BufferEntry::default()).await;
        store.append_buffer(1, BufferEntry::default()).await;
        store.append_buffer(2, BufferEntry::default()).await;

        let drained = store.drain_all_buffers().await;
        assert_eq!(drained.get(&1).map(|v| v.len()), Some(2));
        assert_eq!(drained.get(&2).map(|v| v.len()), Some(1));

        let drained_again = store.drain_all_buffers().await;
        assert!(drained_again.is_empty());
    }

    #[tokio::test]
    async fn forget_removes_server_from_all_maps() {
        let store = StateStore::new();
        store.set_latest(1, sample_snapshot());
        store.append_buffer(1, BufferEntry::default()).await;
        store.set_prev_state(1, PrevState::default());

        store.forget(1).await;

        assert!(store.get_latest(1).is_none());
        assert!(store.drain_all_buffers().await.is_empty());
        assert!(store.get_prev_state(1).online.is_none());
    }
}
