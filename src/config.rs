use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Ordered `(receiverPrefix -> localPrefix)` rule. First matching prefix wins.
#[derive(Debug, Clone)]
pub struct PathMapping {
    pub receiver_prefix: String,
    pub local_prefix: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlaybackPolicy {
    LocalOnly,
    ReceiverOnly,
    Either,
}

/// Runtime configuration, parsed once at startup and never mutated.
///
/// Build tasks snapshot the fields they need via `Arc<Config>` clones so a
/// hypothetical future reload never changes the semantics of an in-flight
/// build.
#[derive(Parser, Debug, Clone)]
#[command(name = "recording-gateway", about = "Recording playback gateway")]
pub struct RawConfig {
    /// Directory holding HLS cache dirs (hlsRoot/recordings/<hash>/...)
    #[arg(long, env = "HLS_ROOT")]
    pub hls_root: PathBuf,

    /// Directory holding the MP4 remux cache and scratch files
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long, env = "VOD_MAX_CONCURRENT", default_value_t = 2)]
    pub vod_max_concurrent: usize,

    #[arg(long, env = "VOD_CACHE_TTL_SECS", default_value_t = 24 * 3600)]
    pub vod_cache_ttl_secs: u64,

    #[arg(long, env = "STABLE_WINDOW_SECS", default_value_t = 30)]
    pub stable_window_secs: u64,

    #[arg(long, env = "PLAYBACK_POLICY", value_enum, default_value_t = PlaybackPolicy::Either)]
    pub playback_policy: PlaybackPolicy,

    /// `id=receiverPath` pairs, repeatable.
    #[arg(long = "recording-root", env = "RECORDING_ROOTS", value_delimiter = ',')]
    pub recording_roots: Vec<String>,

    /// `receiverPrefix=localPrefix` pairs, repeatable, order preserved.
    #[arg(long = "path-mapping", env = "RECORDING_PATH_MAPPINGS", value_delimiter = ',')]
    pub recording_path_mappings: Vec<String>,

    #[arg(long, env = "TRANSCODER_BIN", default_value = "ffmpeg")]
    pub transcoder_bin: String,

    #[arg(long, env = "PROBER_BIN", default_value = "ffprobe")]
    pub prober_bin: String,

    #[arg(long, env = "RECEIVER_AUTHORITY", default_value = "")]
    pub receiver_authority: String,

    #[arg(long, env = "RECEIVER_STREAM_PORT", default_value_t = 80)]
    pub receiver_stream_port: u16,

    #[arg(long, env = "RECEIVER_USER")]
    pub receiver_user: Option<String>,

    #[arg(long, env = "RECEIVER_PASSWORD")]
    pub receiver_password: Option<String>,

    #[arg(long, env = "PREFLIGHT_TIMEOUT_SECS", default_value_t = 5)]
    pub preflight_timeout_secs: u64,

    #[arg(long, env = "BREAKER_WINDOW_SECS", default_value_t = 600)]
    pub breaker_window_secs: u64,

    #[arg(long, env = "BREAKER_MIN_REQUESTS", default_value_t = 5)]
    pub breaker_min_requests: u32,

    #[arg(long, env = "BREAKER_FAILURE_RATE", default_value_t = 0.5)]
    pub breaker_failure_rate: f64,

    #[arg(long, env = "BREAKER_CONSECUTIVE_FAILURES", default_value_t = 5)]
    pub breaker_consecutive_failures: u32,

    #[arg(long, env = "BREAKER_RETRY_AFTER_SECS", default_value_t = 60)]
    pub breaker_retry_after_secs: u64,

    #[arg(long, env = "STARTUP_GRACE_SECS", default_value_t = 25)]
    pub startup_grace_secs: u64,

    #[arg(long, env = "STALL_TIMEOUT_SECS", default_value_t = 90)]
    pub stall_timeout_secs: u64,

    #[arg(long, env = "SUPERVISOR_TICK_SECS", default_value_t = 5)]
    pub supervisor_tick_secs: u64,

    #[arg(long, env = "STALE_AFTER_SECS", default_value_t = 120)]
    pub stale_after_secs: u64,

    #[arg(long, env = "FAIL_BACKOFF_SECS", default_value_t = 30)]
    pub fail_backoff_secs: u64,

    #[arg(long, env = "BUILD_TIMEOUT_SECS", default_value_t = 2 * 3600)]
    pub build_timeout_secs: u64,

    #[arg(long, env = "EVICTOR_INTERVAL_SECS", default_value_t = 3600)]
    pub evictor_interval_secs: u64,

    #[arg(long, env = "EVICTOR_MIN_FREE_BYTES", default_value_t = 5 * 1024 * 1024 * 1024)]
    pub evictor_min_free_bytes: u64,

    #[arg(long, env = "EVICTOR_TARGET_FREED_BYTES", default_value_t = 1024 * 1024 * 1024)]
    pub evictor_target_freed_bytes: u64,

    #[arg(long, env = "PROBE_SIZE_FAST", default_value_t = 2_000_000)]
    pub probe_size_fast: u64,

    #[arg(long, env = "ANALYZE_DURATION_FAST_US", default_value_t = 2_000_000)]
    pub analyze_duration_fast_us: u64,

    #[arg(long, env = "PROBE_SIZE_ROBUST", default_value_t = 10_000_000)]
    pub probe_size_robust: u64,

    #[arg(long, env = "ANALYZE_DURATION_ROBUST_US", default_value_t = 10_000_000)]
    pub analyze_duration_robust_us: u64,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,
}

/// Parsed, immutable configuration handed to every component.
pub struct Config {
    pub hls_root: PathBuf,
    pub data_dir: PathBuf,
    pub vod_max_concurrent: usize,
    pub vod_cache_ttl: Duration,
    pub stable_window: Duration,
    pub playback_policy: PlaybackPolicy,
    pub recording_roots: HashMap<String, String>,
    pub recording_path_mappings: Vec<PathMapping>,
    pub transcoder_bin: String,
    pub prober_bin: String,
    pub receiver_authority: String,
    pub receiver_stream_port: u16,
    pub receiver_user: Option<String>,
    pub receiver_password: Option<String>,
    pub preflight_timeout: Duration,
    pub breaker_window: Duration,
    pub breaker_min_requests: u32,
    pub breaker_failure_rate: f64,
    pub breaker_consecutive_failures: u32,
    pub breaker_retry_after: Duration,
    pub startup_grace: Duration,
    pub stall_timeout: Duration,
    pub supervisor_tick: Duration,
    pub stale_after: Duration,
    pub fail_backoff: Duration,
    pub build_timeout: Duration,
    pub evictor_interval: Duration,
    pub evictor_min_free_bytes: u64,
    pub evictor_target_freed_bytes: u64,
    pub probe_size_fast: u64,
    pub analyze_duration_fast: Duration,
    pub probe_size_robust: u64,
    pub analyze_duration_robust: Duration,
    pub bind_addr: String,
}

impl Config {
    pub fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
        let mut recording_roots = HashMap::new();
        for entry in &raw.recording_roots {
            if let Some((id, path)) = entry.split_once('=') {
                recording_roots.insert(id.to_string(), path.to_string());
            }
        }
        let mut recording_path_mappings = Vec::new();
        for entry in &raw.recording_path_mappings {
            if let Some((receiver_prefix, local_prefix)) = entry.split_once('=') {
                recording_path_mappings.push(PathMapping {
                    receiver_prefix: receiver_prefix.to_string(),
                    local_prefix: PathBuf::from(local_prefix),
                });
            }
        }
        Ok(Config {
            hls_root: raw.hls_root,
            data_dir: raw.data_dir,
            vod_max_concurrent: raw.vod_max_concurrent.max(1),
            vod_cache_ttl: Duration::from_secs(raw.vod_cache_ttl_secs),
            stable_window: Duration::from_secs(raw.stable_window_secs),
            playback_policy: raw.playback_policy,
            recording_roots,
            recording_path_mappings,
            transcoder_bin: raw.transcoder_bin,
            prober_bin: raw.prober_bin,
            receiver_authority: raw.receiver_authority,
            receiver_stream_port: raw.receiver_stream_port,
            receiver_user: raw.receiver_user,
            receiver_password: raw.receiver_password,
            preflight_timeout: Duration::from_secs(raw.preflight_timeout_secs),
            breaker_window: Duration::from_secs(raw.breaker_window_secs),
            breaker_min_requests: raw.breaker_min_requests,
            breaker_failure_rate: raw.breaker_failure_rate,
            breaker_consecutive_failures: raw.breaker_consecutive_failures,
            breaker_retry_after: Duration::from_secs(raw.breaker_retry_after_secs),
            startup_grace: Duration::from_secs(raw.startup_grace_secs),
            stall_timeout: Duration::from_secs(raw.stall_timeout_secs),
            supervisor_tick: Duration::from_secs(raw.supervisor_tick_secs),
            stale_after: Duration::from_secs(raw.stale_after_secs),
            fail_backoff: Duration::from_secs(raw.fail_backoff_secs),
            build_timeout: Duration::from_secs(raw.build_timeout_secs),
            evictor_interval: Duration::from_secs(raw.evictor_interval_secs),
            evictor_min_free_bytes: raw.evictor_min_free_bytes,
            evictor_target_freed_bytes: raw.evictor_target_freed_bytes,
            probe_size_fast: raw.probe_size_fast,
            analyze_duration_fast: Duration::from_micros(raw.analyze_duration_fast_us),
            probe_size_robust: raw.probe_size_robust,
            analyze_duration_robust: Duration::from_micros(raw.analyze_duration_robust_us),
            bind_addr: raw.bind_addr,
        })
    }

    /// Map a serviceRef's receiver path to a rootKey via `recording_roots`, falling back to "hdd".
    pub fn root_key(&self, receiver_path: &str) -> String {
        for (id, prefix) in &self.recording_roots {
            if receiver_path.starts_with(prefix.as_str()) {
                return id.clone();
            }
        }
        "hdd".to_string()
    }

    /// Resolve a receiver path to a local filesystem path via the first matching prefix rule.
    pub fn map_to_local(&self, receiver_path: &str) -> Option<PathBuf> {
        for mapping in &self.recording_path_mappings {
            if let Some(rest) = receiver_path.strip_prefix(mapping.receiver_prefix.as_str()) {
                return Some(mapping.local_prefix.join(rest.trim_start_matches('/')));
            }
        }
        None
    }
}
