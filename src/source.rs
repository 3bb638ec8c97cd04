//! Source resolver. Chooses `local` vs. `receiver` per policy, stability,
//! and credentials.

use std::path::PathBuf;
use std::time::SystemTime;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::info;

use crate::config::{Config, PlaybackPolicy};
use crate::id::receiver_path_suffix;
use crate::parts::{self, last_part};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Receiver,
}

#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub kind: SourceKind,
    /// Local: the base path of the (possibly multi-part) recording.
    /// Receiver: the fully-built URL.
    pub spec: String,
    pub duration_hint: Option<f64>,
    pub root_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid recording reference")]
    Invalid,
    #[error("source not yet stable")]
    NotReady,
    #[error("recording not found")]
    NotFound,
}

/// Characters that must stay literal in a receiver URL path: `:` and `/`.
/// Encode everything else that isn't already a valid path character.
const ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'?')
    .add(b'#')
    .add(b'[')
    .add(b']')
    .add(b'{')
    .add(b'}');

pub async fn resolve(service_ref: &str, cfg: &Config) -> Result<ResolvedSource, ResolveError> {
    let receiver_path = receiver_path_suffix(service_ref).ok_or(ResolveError::Invalid)?;
    let root_key = cfg.root_key(receiver_path);
    let allow_local = matches!(cfg.playback_policy, PlaybackPolicy::LocalOnly | PlaybackPolicy::Either);
    let allow_receiver = matches!(cfg.playback_policy, PlaybackPolicy::ReceiverOnly | PlaybackPolicy::Either);

    if allow_local {
        if let Some(local_base) = cfg.map_to_local(receiver_path) {
            match parts::discover_parts(&local_base).await {
                Ok(found_parts) => {
                    let last = last_part(&found_parts).expect("non-empty by construction");
                    if is_stable(last, cfg.stable_window).await {
                        let duration_hint = None;
                        return Ok(ResolvedSource {
                            kind: SourceKind::Local,
                            spec: local_base.to_string_lossy().to_string(),
                            duration_hint,
                            root_key,
                        });
                    }
                    if allow_receiver {
                        info!(%service_ref, "local recording not yet stable, falling through to receiver");
                    } else {
                        return Err(ResolveError::NotReady);
                    }
                }
                Err(_) if !allow_receiver => return Err(ResolveError::NotFound),
                Err(_) => {}
            }
        }
    }

    if allow_receiver {
        let url = build_receiver_url(cfg, receiver_path);
        return Ok(ResolvedSource {
            kind: SourceKind::Receiver,
            spec: url,
            duration_hint: None,
            root_key,
        });
    }

    Err(ResolveError::NotFound)
}

async fn is_stable(path: &PathBuf, window: std::time::Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age >= window,
        Err(_) => false,
    }
}

fn build_receiver_url(cfg: &Config, receiver_path: &str) -> String {
    let encoded_path = utf8_percent_encode(receiver_path, ENCODE_SET).to_string();
    let auth = match (&cfg.receiver_user, &cfg.receiver_password) {
        (Some(u), Some(p)) => format!("{u}:{p}@"),
        (Some(u), None) => format!("{u}@"),
        _ => String::new(),
    };
    format!(
        "http://{auth}{host}:{port}/{path}",
        host = cfg.receiver_authority,
        port = cfg.receiver_stream_port,
        path = encoded_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_preserves_colon_and_slash() {
        let raw = Config {
            receiver_authority: "receiver.local".into(),
            receiver_stream_port: 8088,
            receiver_user: Some("admin".into()),
            receiver_password: Some("secret".into()),
            ..test_config()
        };
        let url = build_receiver_url(&raw, "media/hdd/movie name.ts");
        assert!(url.contains("admin:secret@receiver.local:8088/"));
        assert!(url.contains("media/hdd/movie"));
        assert!(!url.contains("%2F"));
        assert!(!url.contains("%3A"));
        assert!(url.contains("%20"));
    }

    fn test_config() -> Config {
        Config::from_raw(crate::config::RawConfig {
            hls_root: "/hls".into(),
            data_dir: "/data".into(),
            vod_max_concurrent: 1,
            vod_cache_ttl_secs: 1,
            stable_window_secs: 1,
            playback_policy: PlaybackPolicy::Either,
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
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_receiver_when_local_unmapped() {
        let cfg = test_config();
        let resolved = resolve("tuner1:/media/hdd/show.ts", &cfg).await.unwrap();
        assert_eq!(resolved.kind, SourceKind::Receiver);
    }

    #[tokio::test]
    async fn resolves_local_when_stable() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("rec.ts");
        tokio::fs::write(&base, b"x").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut cfg = test_config();
        cfg.stable_window = std::time::Duration::from_millis(1);
        cfg.recording_path_mappings.push(crate::config::PathMapping {
            receiver_prefix: "/media/hdd".into(),
            local_prefix: dir.path().to_path_buf(),
        });
        let service_ref = "tuner1:/media/hdd/rec.ts";
        let resolved = resolve(service_ref, &cfg).await.unwrap();
        assert_eq!(resolved.kind, SourceKind::Local);
        assert_eq!(resolved.spec, base.to_string_lossy());
    }
}
