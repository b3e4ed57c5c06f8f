use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use tracing::{info, warn};

use crate::db::Store;

const RETRY_DELAY: Duration = Duration::from_secs(3600);
const CHECK_INTERVAL: Duration = Duration::from_secs(3600);

pub struct RetentionCleaner {
    store: Arc<Store>,
    retention_days: i64,
    cleanup_hour: u32,
}

impl RetentionCleaner {
    pub fn new(store: Arc<Store>, retention_days: i64, cleanup_hour: u32) -> Self {
        RetentionCleaner {
            store,
            retention_days,
            cleanup_hour,
        }
    }

    /// Wakes hourly, runs the purge once per day at the configured UTC hour.
    pub async fn run(self: Arc<Self>) {
        let mut last_run_date = None;
        let mut ticker = tokio::time::interval(CHECK_INTERVAL);

        loop {
            ticker.tick().await;
            let now = Utc::now();
            if now.hour() != self.cleanup_hour {
                continue;
            }
            if last_run_date == Some(now.date_naive()) {
                continue;
            }

            match self.store.cleanup_old_data(self.retention_days).await {
                Ok((samples, events)) => {
                    if samples > 0 || events > 0 {
                        info!(samples, events, "retention cleanup removed aged rows");
                    }
                    last_run_date = Some(now.date_naive());
                }
                Err(e) => {
                    warn!(error = %e, "retention cleanup failed, retrying in 1h");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}
