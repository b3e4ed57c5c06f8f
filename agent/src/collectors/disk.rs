use fleetwatch_shared::DiskInfo;

/// Samples usage for each configured mount point via `statvfs`. A mount that
/// fails to stat (missing, permission denied) is skipped, not substituted
/// with zeros.
pub async fn collect(mounts: &[String]) -> Vec<DiskInfo> {
    let mounts = mounts.to_vec();
    tokio::task::spawn_blocking(move || {
        mounts
            .into_iter()
            .filter_map(|mount| stat_one(&mount))
            .collect()
    })
    .await
    .unwrap_or_default()
}

fn stat_one(mount: &str) -> Option<DiskInfo> {
    let stat = nix::sys::statvfs::statvfs(mount).ok()?;
    let block_size = stat.fragment_size().max(1);
    let total_bytes = stat.blocks() * block_size;
    let free_bytes = stat.blocks_available() * block_size;
    let used_bytes = total_bytes.saturating_sub(free_bytes);
    let used_pct = if total_bytes == 0 {
        0.0
    } else {
        round2(used_bytes as f64 / total_bytes as f64 * 100.0)
    };

    Some(DiskInfo {
        mount: mount.to_string(),
        used_bytes,
        total_bytes,
        used_pct,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_mount_is_collectible() {
        let disks = collect(&["/".to_string()]).await;
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].mount, "/");
        assert!(disks[0].used_pct >= 0.0 && disks[0].used_pct <= 100.0);
    }

    #[tokio::test]
    async fn nonexistent_mount_is_skipped_not_zeroed() {
        let disks = collect(&["/definitely/not/a/real/mount/point".to_string()]).await;
        assert!(disks.is_empty());
    }
}
