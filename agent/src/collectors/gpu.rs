use fleetwatch_shared::GpuInfo;
use tokio::process::Command;

/// Shells out to `nvidia-smi`. Returns `None` when the driver/binary is
/// unavailable or the process exits non-zero — never an error to the caller.
pub async fn collect() -> Option<Vec<GpuInfo>> {
    let output = Command::new("nvidia-smi")
        .arg("--query-gpu=index,utilization.gpu,memory.used,memory.total")
        .arg("--format=csv,noheader,nounits")
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let gpus: Vec<GpuInfo> = stdout.lines().filter_map(parse_csv_line).collect();

    if gpus.is_empty() { None } else { Some(gpus) }
}

fn parse_csv_line(line: &str) -> Option<GpuInfo> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return None;
    }
    Some(GpuInfo {
        index: fields[0].parse().ok()?,
        name: None,
        util_pct: fields[1].parse().ok()?,
        mem_used_mb: fields[2].parse().ok()?,
        mem_total_mb: fields[3].parse().ok()?,
        temperature_c: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_csv_line() {
        let gpu = parse_csv_line("0, 56, 2048, 8192").unwrap();
        assert_eq!(gpu.index, 0);
        assert_eq!(gpu.util_pct, 56.0);
        assert_eq!(gpu.mem_used_mb, 2048);
        assert_eq!(gpu.mem_total_mb, 8192);
    }

    #[test]
    fn skips_malformed_line() {
        assert!(parse_csv_line("garbage").is_none());
        assert!(parse_csv_line("not,a,number,field").is_none());
    }
}
