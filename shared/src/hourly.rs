use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A rollup row covering exactly one UTC hour for one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySample {
    pub id: i64,
    pub server_id: i64,
    pub ts: DateTime<Utc>,
    pub cpu_pct_avg: Option<f64>,
    pub cpu_pct_max: Option<f64>,
    pub disk_used_pct: Option<f64>,
    pub disk_used_bytes: Option<i64>,
    pub disk_total_bytes: Option<i64>,
    pub gpu_util_pct_avg: Option<f64>,
    pub gpu_util_pct_max: Option<f64>,
    pub gpu_mem_used_mb: Option<i64>,
    pub gpu_mem_total_mb: Option<i64>,
}

/// A row joined with the owning server's name, as returned by history queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySampleWithServer {
    #[serde(flatten)]
    pub sample: HourlySample,
    pub server_name: String,
}

/// Raw per-pull fields buffered between rollup ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferEntry {
    pub cpu_pct: Option<f64>,
    pub disk_used_pct: Option<f64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub gpu_util_pct: Option<f64>,
    pub gpu_mem_used_mb: Option<u64>,
    pub gpu_mem_total_mb: Option<u64>,
}

/// Computes the aggregates for one hour's buffer. Returns
/// `None` when the buffer is empty — callers skip the row entirely (sparse
/// timeseries).
pub fn rollup_buffer(entries: &[BufferEntry]) -> Option<RollupAggregates> {
    if entries.is_empty() {
        return None;
    }

    let cpu_vals: Vec<f64> = entries.iter().filter_map(|e| e.cpu_pct).collect();
    let gpu_vals: Vec<f64> = entries.iter().filter_map(|e| e.gpu_util_pct).collect();

    let disk_used_pct = entries.iter().rev().find_map(|e| e.disk_used_pct);
    let disk_used_bytes = entries.iter().rev().find_map(|e| e.disk_used_bytes);
    let disk_total_bytes = entries.iter().rev().find_map(|e| e.disk_total_bytes);
    let gpu_mem_used_mb = entries.iter().rev().find_map(|e| e.gpu_mem_used_mb);
    let gpu_mem_total_mb = entries.iter().rev().find_map(|e| e.gpu_mem_total_mb);

    Some(RollupAggregates {
        cpu_pct_avg: mean(&cpu_vals).map(round2),
        cpu_pct_max: max(&cpu_vals).map(round2),
        disk_used_pct: disk_used_pct.map(round2),
        disk_used_bytes,
        disk_total_bytes,
        gpu_util_pct_avg: mean(&gpu_vals).map(round2),
        gpu_util_pct_max: max(&gpu_vals).map(round2),
        gpu_mem_used_mb,
        gpu_mem_total_mb,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupAggregates {
    pub cpu_pct_avg: Option<f64>,
    pub cpu_pct_max: Option<f64>,
    pub disk_used_pct: Option<f64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_total_bytes: Option<u64>,
    pub gpu_util_pct_avg: Option<f64>,
    pub gpu_util_pct_max: Option<f64>,
    pub gpu_mem_used_mb: Option<u64>,
    pub gpu_mem_total_mb: Option<u64>,
}

fn mean(vals: &[f64]) -> Option<f64> {
    if vals.is_empty() {
        None
    } else {
        Some(vals.iter().sum::<f64>() / vals.len() as f64)
    }
}

fn max(vals: &[f64]) -> Option<f64> {
    vals.iter().cloned().fold(None, |acc, v| match acc {
        None => Some(v),
        Some(a) => Some(a.max(v)),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_aggregation_scenario() {
        let entries = vec![
            BufferEntry {
                cpu_pct: Some(10.0),
                ..Default::default()
            },
            BufferEntry {
                cpu_pct: Some(20.0),
                ..Default::default()
            },
            BufferEntry {
                cpu_pct: Some(30.0),
                ..Default::default()
            },
            BufferEntry {
                cpu_pct: Some(40.0),
                ..Default::default()
            },
            BufferEntry {
                cpu_pct: None,
                ..Default::default()
            },
            BufferEntry {
                cpu_pct: Some(50.0),
                disk_used_pct: Some(63.7),
                disk_used_bytes: Some(100),
                disk_total_bytes: Some(200),
                ..Default::default()
            },
        ];

        let agg = rollup_buffer(&entries).unwrap();
        assert_eq!(agg.cpu_pct_avg, Some(30.0));
        assert_eq!(agg.cpu_pct_max, Some(50.0));
        assert_eq!(agg.disk_used_pct, Some(63.7));
        assert_eq!(agg.disk_used_bytes, Some(100));
        assert_eq!(agg.disk_total_bytes, Some(200));
    }

    #[test]
    fn empty_buffer_produces_no_row() {
        assert!(rollup_buffer(&[]).is_none());
    }

    #[test]
    fn disk_fields_scan_backward_for_last_non_null() {
        let entries = vec![
            BufferEntry {
                disk_used_pct: Some(10.0),
                ..Default::default()
            },
            BufferEntry {
                disk_used_pct: None,
                ..Default::default()
            },
        ];
        let agg = rollup_buffer(&entries).unwrap();
        // Last entry's disk_used_pct is None, so we fall back to the newest
        // entry carrying a value, not null.
        assert_eq!(agg.disk_used_pct, Some(10.0));
    }
}
