use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point-in-time measurement as reported by an agent's `/v1/snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub node_id: String,
    pub ts: DateTime<Utc>,
    pub cpu_pct: Option<f64>,
    #[serde(default)]
    pub disks: Vec<DiskInfo>,
    #[serde(default)]
    pub gpus: Option<Vec<GpuInfo>>,
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub mount: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub used_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub index: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub util_pct: f64,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState {
    Active,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Unknown,
}

impl ActiveState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActiveState::Active => "active",
            ActiveState::Inactive => "inactive",
            ActiveState::Failed => "failed",
            ActiveState::Activating => "activating",
            ActiveState::Deactivating => "deactivating",
            ActiveState::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ActiveState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => ActiveState::Active,
            "inactive" => ActiveState::Inactive,
            "failed" => ActiveState::Failed,
            "activating" => ActiveState::Activating,
            "deactivating" => ActiveState::Deactivating,
            _ => ActiveState::Unknown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub active_state: ActiveState,
    #[serde(default)]
    pub sub_state: String,
}

/// Derived multi-GPU aggregates: util is max/avg over
/// cards, memory is summed over cards. Missing per-card fields are ignored,
/// never coerced to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuAggregate {
    pub gpu_count: usize,
    pub gpu_util_pct: Option<f64>,
    pub gpu_util_pct_avg: Option<f64>,
    pub gpu_mem_used_mb: Option<u64>,
    pub gpu_mem_total_mb: Option<u64>,
}

pub fn aggregate_gpu_metrics(gpus: Option<&[GpuInfo]>) -> GpuAggregate {
    let Some(gpus) = gpus.filter(|g| !g.is_empty()) else {
        return GpuAggregate::default();
    };

    let util: Vec<f64> = gpus.iter().map(|g| g.util_pct).collect();
    let mem_used: Vec<u64> = gpus.iter().map(|g| g.mem_used_mb).collect();
    let mem_total: Vec<u64> = gpus.iter().map(|g| g.mem_total_mb).collect();

    GpuAggregate {
        gpu_count: gpus.len(),
        gpu_util_pct: util.iter().cloned().fold(None, |acc, v| match acc {
            None => Some(v),
            Some(a) => Some(a.max(v)),
        }),
        gpu_util_pct_avg: if util.is_empty() {
            None
        } else {
            Some(util.iter().sum::<f64>() / util.len() as f64)
        },
        gpu_mem_used_mb: Some(mem_used.iter().sum()),
        gpu_mem_total_mb: Some(mem_total.iter().sum()),
    }
}

/// The aggregator's derived per-server "current" view. Produced from a
/// successful pull, or carried forward with sticky metrics on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestSnapshot {
    pub ts: DateTime<Utc>,
    pub online: bool,
    pub cpu_pct: Option<f64>,
    pub disk_used_pct: Option<f64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    #[serde(default)]
    pub gpus: Option<Vec<GpuInfo>>,
    pub gpu_count: usize,
    pub gpu_util_pct: Option<f64>,
    pub gpu_util_pct_avg: Option<f64>,
    pub gpu_mem_used_mb: Option<u64>,
    pub gpu_mem_total_mb: Option<u64>,
    pub services_failed_count: u32,
}

impl LatestSnapshot {
    /// Derives a LatestSnapshot from a freshly-pulled Snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let disk = snapshot.disks.first();
        let gpu_agg = aggregate_gpu_metrics(snapshot.gpus.as_deref());
        let services_failed_count = snapshot
            .services
            .iter()
            .filter(|s| s.active_state == ActiveState::Failed)
            .count() as u32;

        LatestSnapshot {
            ts: snapshot.ts,
            online: true,
            cpu_pct: snapshot.cpu_pct,
            disk_used_pct: disk.map(|d| d.used_pct),
            disk_used_bytes: disk.map(|d| d.used_bytes),
            disk_total_bytes: disk.map(|d| d.total_bytes),
            gpus: snapshot.gpus.clone(),
            gpu_count: gpu_agg.gpu_count,
            gpu_util_pct: gpu_agg.gpu_util_pct,
            gpu_util_pct_avg: gpu_agg.gpu_util_pct_avg,
            gpu_mem_used_mb: gpu_agg.gpu_mem_used_mb,
            gpu_mem_total_mb: gpu_agg.gpu_mem_total_mb,
            services_failed_count,
        }
    }

    /// Builds the sticky offline view carried forward on pull failure
    /// numeric fields preserved, `online` flipped, `ts` kept.
    pub fn sticky_offline(prior: &LatestSnapshot) -> Self {
        LatestSnapshot {
            online: false,
            ..prior.clone()
        }
    }

    /// First-ever-pull-failed case: no prior sample exists to carry forward.
    pub fn offline_unknown(now: DateTime<Utc>) -> Self {
        LatestSnapshot {
            ts: now,
            online: false,
            cpu_pct: None,
            disk_used_pct: None,
            disk_used_bytes: None,
            disk_total_bytes: None,
            gpus: None,
            gpu_count: 0,
            gpu_util_pct: None,
            gpu_util_pct_avg: None,
            gpu_mem_used_mb: None,
            gpu_mem_total_mb: None,
            services_failed_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(util: f64, used: u64, total: u64) -> GpuInfo {
        GpuInfo {
            index: 0,
            name: None,
            util_pct: util,
            mem_used_mb: used,
            mem_total_mb: total,
            temperature_c: None,
        }
    }

    #[test]
    fn gpu_aggregation_heterogeneous() {
        let gpus = vec![
            gpu(45.0, 3000, 12288),
            gpu(90.0, 6000, 8192),
            gpu(20.0, 16000, 40960),
        ];
        let agg = aggregate_gpu_metrics(Some(&gpus));
        assert_eq!(agg.gpu_count, 3);
        assert_eq!(agg.gpu_util_pct, Some(90.0));
        assert!((agg.gpu_util_pct_avg.unwrap() - 51.666_666_666_666_664).abs() < 1e-9);
        assert_eq!(agg.gpu_mem_used_mb, Some(25000));
        assert_eq!(agg.gpu_mem_total_mb, Some(61440));
    }

    #[test]
    fn gpu_aggregation_empty_is_none() {
        let agg = aggregate_gpu_metrics(None);
        assert_eq!(agg.gpu_count, 0);
        assert_eq!(agg.gpu_util_pct, None);
        assert_eq!(agg.gpu_mem_used_mb, None);
    }

    #[test]
    fn gpu_aggregation_ignores_missing_fields_never_coerces_to_zero() {
        // A card reporting util_pct = 0.0 is a real reading, not "missing".
        let gpus = vec![gpu(0.0, 100, 200)];
        let agg = aggregate_gpu_metrics(Some(&gpus));
        assert_eq!(agg.gpu_util_pct, Some(0.0));
        assert_eq!(agg.gpu_util_pct_avg, Some(0.0));
    }

    #[test]
    fn services_failed_count_counts_only_failed() {
        let snapshot = Snapshot {
            node_id: "n1".into(),
            ts: Utc::now(),
            cpu_pct: Some(10.0),
            disks: vec![],
            gpus: None,
            services: vec![
                ServiceInfo {
                    name: "a".into(),
                    active_state: ActiveState::Failed,
                    sub_state: "failed".into(),
                },
                ServiceInfo {
                    name: "b".into(),
                    active_state: ActiveState::Active,
                    sub_state: "running".into(),
                },
            ],
        };
        let latest = LatestSnapshot::from_snapshot(&snapshot);
        assert_eq!(latest.services_failed_count, 1);
        assert!(latest.online);
    }

    #[test]
    fn sticky_offline_preserves_numbers_flips_online() {
        let prior = LatestSnapshot {
            ts: Utc::now(),
            online: true,
            cpu_pct: Some(42.0),
            disk_used_pct: Some(10.0),
            disk_used_bytes: Some(1),
            disk_total_bytes: Some(2),
            gpus: None,
            gpu_count: 0,
            gpu_util_pct: None,
            gpu_util_pct_avg: None,
            gpu_mem_used_mb: None,
            gpu_mem_total_mb: None,
            services_failed_count: 0,
        };
        let sticky = LatestSnapshot::sticky_offline(&prior);
        assert!(!sticky.online);
        assert_eq!(sticky.cpu_pct, Some(42.0));
        assert_eq!(sticky.ts, prior.ts);
    }
}
