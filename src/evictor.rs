//! Evictor. Periodic TTL + disk-pressure eviction over the HLS
//! recordings cache and the MP4 cache; never races active builds
//!.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use sysinfo::Disks;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::BuildRegistry;

const STALE_LOCK_AGE: Duration = Duration::from_secs(30 * 60);
const STALE_TMP_AGE: Duration = Duration::from_secs(60 * 60);

struct Item {
    path: PathBuf,
    mtime: SystemTime,
    size_bytes: u64,
}

/// Runs until `cancel` fires, ticking every `interval`.
pub async fn run(
    hls_root: PathBuf,
    data_dir: PathBuf,
    ttl: Duration,
    min_free_bytes: u64,
    target_freed_bytes: u64,
    interval: Duration,
    registry: Arc<BuildRegistry>,
    cancel: CancellationToken,
) {
    startup_cleanup(&data_dir).await;

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("evictor stopping");
                return;
            }
            _ = tick.tick() => {
                pass(&hls_root, &data_dir, ttl, min_free_bytes, target_freed_bytes, &registry).await;
            }
        }
    }
}

async fn pass(
    hls_root: &Path,
    data_dir: &Path,
    ttl: Duration,
    min_free_bytes: u64,
    target_freed_bytes: u64,
    registry: &BuildRegistry,
) {
    registry.sweep_stale().await;

    let mut items = Vec::new();
    items.extend(scan_hls_dirs(hls_root, registry).await);
    items.extend(scan_mp4_cache(&data_dir.join("vod-cache")).await);
    items.sort_by_key(|i| i.mtime);

    let now = SystemTime::now();
    let mut freed = 0u64;
    let mut remaining = Vec::new();
    for item in items {
        let age = now.duration_since(item.mtime).unwrap_or_default();
        if age > ttl {
            freed += item.size_bytes;
            evict(&item.path).await;
        } else {
            remaining.push(item);
        }
    }
    if freed > 0 {
        info!(freed_bytes = freed, "evictor: TTL pass complete");
    }

    let free_bytes = free_space(data_dir);
    if free_bytes >= min_free_bytes {
        return;
    }

    let mut pressure_freed = 0u64;
    for item in remaining {
        if pressure_freed >= target_freed_bytes {
            break;
        }
        pressure_freed += item.size_bytes;
        evict(&item.path).await;
    }
    if pressure_freed > 0 {
        warn!(freed_bytes = pressure_freed, free_bytes, min_free_bytes, "evictor: disk pressure pass complete");
    }
}

async fn scan_hls_dirs(hls_root: &Path, registry: &BuildRegistry) -> Vec<Item> {
    let recordings = hls_root.join("recordings");
    let mut out = Vec::new();
    let Ok(mut rd) = fs::read_dir(&recordings).await else {
        return out;
    };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        if registry.is_running(&path).await {
            continue;
        }
        if has_fresh_sibling_activity(&path).await {
            continue;
        }
        if let Some((mtime, size)) = dir_mtime_and_size(&path).await {
            out.push(Item { path, mtime, size_bytes: size });
        }
    }
    out
}

async fn scan_mp4_cache(vod_cache: &Path) -> Vec<Item> {
    let mut out = Vec::new();
    let Ok(mut rd) = fs::read_dir(vod_cache).await else {
        return out;
    };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".mp4") {
            continue;
        }
        if crate::mp4::sibling(&path, ".lock").exists() {
            continue;
        }
        let Ok(meta) = fs::metadata(&path).await else {
            continue;
        };
        let Ok(mtime) = meta.modified() else {
            continue;
        };
        out.push(Item { path, mtime, size_bytes: meta.len() });
    }
    out
}

async fn has_fresh_sibling_activity(cache_dir: &Path) -> bool {
    let tmp = crate::layout::staging_playlist_path(cache_dir);
    if let Ok(meta) = fs::metadata(&tmp).await {
        if let Ok(modified) = meta.modified() {
            if SystemTime::now().duration_since(modified).unwrap_or_default() < STALE_TMP_AGE {
                return true;
            }
        }
    }
    false
}

async fn dir_mtime_and_size(dir: &Path) -> Option<(SystemTime, u64)> {
    let mut latest: Option<SystemTime> = None;
    let mut total = 0u64;
    let mut rd = fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = rd.next_entry().await {
        if let Ok(meta) = entry.metadata().await {
            total += meta.len();
            if let Ok(modified) = meta.modified() {
                latest = Some(latest.map_or(modified, |l| l.max(modified)));
            }
        }
    }
    latest.map(|m| (m, total))
}

async fn evict(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    if let Err(e) = result {
        warn!(?path, error = %e, "evictor: failed to remove item");
    } else {
        info!(?path, "evictor: removed");
    }
}

fn free_space(data_dir: &Path) -> u64 {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| data_dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
        .unwrap_or(u64::MAX)
}

/// One-off startup cleanup: remove all `.lock` files and any `.tmp` older
/// than 1 h from the MP4 cache.
async fn startup_cleanup(data_dir: &Path) {
    let vod_cache = data_dir.join("vod-cache");
    let Ok(mut rd) = fs::read_dir(&vod_cache).await else {
        return;
    };
    while let Ok(Some(entry)) = rd.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".lock") {
            let _ = fs::remove_file(&path).await;
            continue;
        }
        if name.ends_with(".tmp") {
            if let Ok(meta) = fs::metadata(&path).await {
                if let Ok(modified) = meta.modified() {
                    if SystemTime::now().duration_since(modified).unwrap_or_default() > STALE_TMP_AGE {
                        let _ = fs::remove_file(&path).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_registry() -> BuildRegistry {
        BuildRegistry::new(
            Arc::new(crate::admission::AdmissionGate::new(4)),
            Arc::new(crate::breaker::CircuitBreaker::new(crate::breaker::BreakerParams {
                window: Duration::from_secs(600),
                min_requests: 100,
                failure_rate: 1.1,
                consecutive_failures: 100,
                retry_after: Duration::from_secs(60),
            })),
            Duration::from_secs(120),
            Duration::from_secs(30),
            tokio_util::sync::CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn ttl_pass_removes_old_cache_dir_but_not_running() {
        let hls_root = tempdir().unwrap();
        let recordings = hls_root.path().join("recordings");
        fs::create_dir_all(&recordings).await.unwrap();

        let old_dir = recordings.join("old");
        fs::create_dir_all(&old_dir).await.unwrap();
        fs::write(old_dir.join("seg_00000.ts"), b"x").await.unwrap();

        let running_dir = recordings.join("running");
        fs::create_dir_all(&running_dir).await.unwrap();
        fs::write(running_dir.join("seg_00000.ts"), b"x").await.unwrap();

        let registry = test_registry();
        let outcome = registry.schedule_or_attach(&running_dir, "hdd".into()).await;
        assert!(matches!(outcome, crate::registry::ScheduleOutcome::Scheduled(_)));

        let data_dir = tempdir().unwrap();
        pass(hls_root.path(), data_dir.path(), Duration::from_millis(1), u64::MAX, 0, &registry).await;

        assert!(!old_dir.exists(), "stale non-active dir should be evicted");
        assert!(running_dir.exists(), "active build dir must survive");
    }

    #[tokio::test]
    async fn startup_cleanup_removes_locks_and_old_tmp() {
        let data_dir = tempdir().unwrap();
        let vod_cache = data_dir.path().join("vod-cache");
        fs::create_dir_all(&vod_cache).await.unwrap();
        fs::write(vod_cache.join("a.mp4.lock"), b"").await.unwrap();
        fs::write(vod_cache.join("b.mp4.tmp"), b"").await.unwrap();

        startup_cleanup(data_dir.path()).await;

        assert!(!vod_cache.join("a.mp4.lock").exists());
        assert!(vod_cache.join("b.mp4.tmp").exists(), "fresh tmp file is not yet stale");
    }
}
