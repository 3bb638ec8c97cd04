//! On-disk layout helpers shared across components: CacheDir naming,
//! the segment allowlist, and path confinement.

use std::path::{Path, PathBuf};

use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::config::Config;

/// `hlsRoot/recordings/sha256(serviceRef)`
pub fn cache_dir(cfg: &Config, service_ref: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(service_ref.as_bytes());
    let hash = hex::encode(hasher.finalize());
    cfg.hls_root.join("recordings").join(hash)
}

/// `dataDir/vod-cache/sha1(serviceRef).mp4`
pub fn mp4_cache_path(cfg: &Config, service_ref: &str) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(service_ref.as_bytes());
    let hash = hex::encode(hasher.finalize());
    cfg.data_dir.join("vod-cache").join(format!("{hash}.mp4"))
}

pub fn final_playlist_path(dir: &Path) -> PathBuf {
    dir.join("index.m3u8")
}

pub fn live_playlist_path(dir: &Path) -> PathBuf {
    dir.join("index.live.m3u8")
}

pub fn staging_playlist_path(dir: &Path) -> PathBuf {
    dir.join("index.final.tmp")
}

pub fn concat_list_path(dir: &Path) -> PathBuf {
    dir.join("concat.txt")
}

/// `isAllowedSegment(name) = true ⇔ name = "init.mp4"` OR (`name` begins with
/// `seg_` AND suffix ∈ {.ts, .m4s}).
pub fn is_allowed_segment(name: &str) -> bool {
    if name == "init.mp4" {
        return true;
    }
    name.starts_with("seg_") && (name.ends_with(".ts") || name.ends_with(".m4s"))
}

/// Confine `name` to `dir`: it must be an allowlisted segment name and its
/// canonical path must remain inside `dir` (rejects symlink escapes).
pub async fn confine_segment(dir: &Path, name: &str) -> Option<PathBuf> {
    if !is_allowed_segment(name) {
        return None;
    }
    if name.contains('/') || name.contains('\\') {
        return None;
    }
    let candidate = dir.join(name);
    let canon_dir = tokio::fs::canonicalize(dir).await.ok()?;
    let canon_file = tokio::fs::canonicalize(&candidate).await.ok()?;
    if canon_file.starts_with(&canon_dir) {
        Some(canon_file)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_allowlist() {
        assert!(is_allowed_segment("init.mp4"));
        assert!(is_allowed_segment("seg_00001.ts"));
        assert!(is_allowed_segment("seg_00001.m4s"));
        assert!(!is_allowed_segment("seg_00001.mp4"));
        assert!(!is_allowed_segment("../etc/passwd"));
        assert!(!is_allowed_segment("index.m3u8"));
        assert!(!is_allowed_segment("concat.txt"));
    }

    #[test]
    fn cache_dir_is_stable_hash() {
        let cfg_raw = crate::config::RawConfig {
            hls_root: "/hls".into(),
            data_dir: "/data".into(),
            vod_max_concurrent: 1,
            vod_cache_ttl_secs: 1,
            stable_window_secs: 1,
            playback_policy: crate::config::PlaybackPolicy::Either,
            recording_roots: vec![],
            recording_path_mappings: vec![],
            transcoder_bin: "ffmpeg".into(),
            prober_bin: "ffprobe".into(),
            receiver_authority: String::new(),
            receiver_stream_port: 80,
            receiver_user: None,
            receiver_password: None,
            preflight_timeout_secs: 5,
            breaker_window_secs: 600,
            breaker_min_requests: 5,
            breaker_failure_rate: 0.5,
            breaker_consecutive_failures: 5,
            breaker_retry_after_secs: 60,
            startup_grace_secs: 25,
            stall_timeout_secs: 90,
            supervisor_tick_secs: 5,
            stale_after_secs: 120,
            fail_backoff_secs: 30,
            build_timeout_secs: 7200,
            evictor_interval_secs: 3600,
            evictor_min_free_bytes: 1,
            evictor_target_freed_bytes: 1,
            probe_size_fast: 1,
            analyze_duration_fast_us: 1,
            probe_size_robust: 1,
            analyze_duration_robust_us: 1,
            bind_addr: "127.0.0.1:0".into(),
        };
        let cfg = Config::from_raw(cfg_raw).unwrap();
        let a = cache_dir(&cfg, "x:/a.ts");
        let b = cache_dir(&cfg, "x:/a.ts");
        let c = cache_dir(&cfg, "x:/b.ts");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
