use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetwatch_shared::{canonical_hour, next_hour_boundary, rollup_buffer};
use tracing::{error, info};

use crate::db::Store;
use crate::store::StateStore;

const RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct RollupEngine {
    store: Arc<Store>,
    state: StateStore,
}

impl RollupEngine {
    pub fn new(store: Arc<Store>, state: StateStore) -> Self {
        RollupEngine { store, state }
    }

    /// Wakes at each UTC top-of-hour, drains the buffers, and persists one
    /// row per server that has data. Runs until cancelled.
    pub async fn run(self: Arc<Self>) {
        loop {
            let now = Utc::now();
            let boundary = next_hour_boundary(now);
            let wait = (boundary - now)
                .to_std()
                .unwrap_or(Duration::from_secs(0));
            tokio::time::sleep(wait).await;

            loop {
                match self.run_rollup_once(boundary).await {
                    Ok(()) => break,
                    Err(e) => {
                        error!(error = %e, "rollup tick failed, retrying in 60s");
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn run_rollup_once(&self, boundary: chrono::DateTime<Utc>) -> Result<(), crate::error::DbError> {
        let ts = canonical_hour(boundary - chrono::Duration::hours(1));
        let buffers = self.state.drain_all_buffers().await;

        let mut written = 0;
        for (server_id, entries) in buffers {
            let Some(agg) = rollup_buffer(&entries) else {
                continue;
            };
            self.store.save_hourly_sample(server_id, ts, agg).await?;
            written += 1;
        }

        if written > 0 {
            info!(hour = %ts, servers = written, "hourly rollup written");
        }
        Ok(())
    }
}
