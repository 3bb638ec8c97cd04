//! Build state registry. Per-cache-dir map of in-flight builds;
//! dedup and stale cleanup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::admission::{AdmissionGate, AdmissionTicket, RejectReason};
use crate::breaker::CircuitBreaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    Fast,
    Robust,
}

pub struct BuildState {
    pub status: Status,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub last_progress_at: Instant,
    pub attempt_mode: AttemptMode,
    pub last_error: Option<String>,
    pub root_key: String,
    pub segment_count: usize,
    cancel: CancellationToken,
}

impl BuildState {
    pub fn is_stale_failed(&self, fail_backoff: std::time::Duration) -> bool {
        self.status == Status::Failed && self.updated_at.elapsed() > fail_backoff
    }
}

pub enum ScheduleOutcome {
    /// A build is already running (not stale) or recently failed (backoff).
    Attached,
    /// A fresh RUNNING record was inserted; caller must now spawn the build task.
    Scheduled(BuildHandle),
    CircuitOpen,
    TooManyBuilds { max_concurrent: usize },
}

pub struct BuildHandle {
    pub cache_dir: PathBuf,
    pub ticket: AdmissionTicket,
    pub cancel: CancellationToken,
    pub root_key: String,
}

pub struct BuildRegistry {
    builds: Mutex<HashMap<PathBuf, BuildState>>,
    admission: Arc<AdmissionGate>,
    breaker: Arc<CircuitBreaker>,
    stale_after: std::time::Duration,
    fail_backoff: std::time::Duration,
    shutdown: CancellationToken,
}

impl BuildRegistry {
    pub fn new(
        admission: Arc<AdmissionGate>,
        breaker: Arc<CircuitBreaker>,
        stale_after: std::time::Duration,
        fail_backoff: std::time::Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            builds: Mutex::new(HashMap::new()),
            admission,
            breaker,
            stale_after,
            fail_backoff,
            shutdown,
        }
    }

    pub async fn schedule_or_attach(&self, cache_dir: &Path, root_key: String) -> ScheduleOutcome {
        let mut to_cancel = Vec::new();
        let outcome = {
            let mut builds = self.builds.lock().await;
            let now = Instant::now();
            Self::sweep_stale_locked(&mut builds, now, self.stale_after, self.fail_backoff, &mut to_cancel);

            if let Some(existing) = builds.get(cache_dir) {
                match existing.status {
                    Status::Running => return self.finish_attach(to_cancel).await,
                    Status::Failed if !existing.is_stale_failed(self.fail_backoff) => {
                        return self.finish_attach(to_cancel).await;
                    }
                    Status::Failed => {
                        builds.remove(cache_dir);
                    }
                }
            }

            if !self.breaker.allow(&root_key) {
                self.admission.record_rejection(RejectReason::CircuitOpen);
                info!(root_key = %root_key, "build rejected: circuit open");
                None
            } else {
                match self.admission.try_acquire() {
                    Ok(ticket) => {
                        let cancel = self.shutdown.child_token();
                        builds.insert(
                            cache_dir.to_path_buf(),
                            BuildState {
                                status: Status::Running,
                                created_at: now,
                                updated_at: now,
                                last_progress_at: now,
                                attempt_mode: AttemptMode::Fast,
                                last_error: None,
                                root_key: root_key.clone(),
                                segment_count: 0,
                                cancel: cancel.clone(),
                            },
                        );
                        Some(ScheduleOutcome::Scheduled(BuildHandle {
                            cache_dir: cache_dir.to_path_buf(),
                            ticket,
                            cancel,
                            root_key,
                        }))
                    }
                    Err(RejectReason::SemaphoreFull) => {
                        Some(ScheduleOutcome::TooManyBuilds { max_concurrent: self.admission.capacity() })
                    }
                    Err(RejectReason::CircuitOpen) => Some(ScheduleOutcome::CircuitOpen),
                }
            }
        };

        for cancel in to_cancel {
            cancel.cancel();
        }

        outcome.unwrap_or(ScheduleOutcome::CircuitOpen)
    }

    async fn finish_attach(&self, to_cancel: Vec<CancellationToken>) -> ScheduleOutcome {
        for cancel in to_cancel {
            cancel.cancel();
        }
        ScheduleOutcome::Attached
    }

    /// Record build progress (extends `last_progress_at` and optionally the
    /// observed segment count / attempt mode).
    pub async fn record_progress(&self, cache_dir: &Path, segment_count: usize, mode: AttemptMode) {
        let mut builds = self.builds.lock().await;
        if let Some(state) = builds.get_mut(cache_dir) {
            let now = Instant::now();
            state.last_progress_at = now;
            state.updated_at = now;
            state.segment_count = segment_count;
            state.attempt_mode = mode;
        }
    }

    pub async fn mark_failed(&self, cache_dir: &Path, error: String) {
        let mut builds = self.builds.lock().await;
        let now = Instant::now();
        let keep_existing_stale = builds
            .get(cache_dir)
            .map(|s| s.status == Status::Failed && s.last_error.as_deref() == Some("stale: canceled"))
            .unwrap_or(false);
        if keep_existing_stale {
            return;
        }
        builds.insert(
            cache_dir.to_path_buf(),
            BuildState {
                status: Status::Failed,
                created_at: builds.get(cache_dir).map(|s| s.created_at).unwrap_or(now),
                updated_at: now,
                last_progress_at: now,
                attempt_mode: AttemptMode::Fast,
                last_error: Some(error),
                root_key: builds.get(cache_dir).map(|s| s.root_key.clone()).unwrap_or_default(),
                segment_count: builds.get(cache_dir).map(|s| s.segment_count).unwrap_or(0),
                cancel: CancellationToken::new(),
            },
        );
    }

    pub async fn remove(&self, cache_dir: &Path) {
        self.builds.lock().await.remove(cache_dir);
    }

    pub async fn snapshot(&self, cache_dir: &Path) -> Option<BuildSnapshot> {
        let builds = self.builds.lock().await;
        builds.get(cache_dir).map(|s| BuildSnapshot {
            status: s.status,
            created_at: s.created_at,
            last_progress_at: s.last_progress_at,
            attempt_mode: s.attempt_mode,
            last_error: s.last_error.clone(),
            segment_count: s.segment_count,
        })
    }

    /// Run outside any active request: kills hung builds and expires old
    /// FAILED records. Also exposed directly for the evictor's periodic
    /// sweep pass.
    pub async fn sweep_stale(&self) {
        let mut to_cancel = Vec::new();
        {
            let mut builds = self.builds.lock().await;
            let now = Instant::now();
            Self::sweep_stale_locked(&mut builds, now, self.stale_after, self.fail_backoff, &mut to_cancel);
        }
        for cancel in to_cancel {
            cancel.cancel();
        }
    }

    fn sweep_stale_locked(
        builds: &mut HashMap<PathBuf, BuildState>,
        now: Instant,
        stale_after: std::time::Duration,
        fail_backoff: std::time::Duration,
        to_cancel: &mut Vec<CancellationToken>,
    ) {
        let mut remove_keys = Vec::new();
        for (key, state) in builds.iter_mut() {
            match state.status {
                Status::Failed if now.duration_since(state.updated_at) > fail_backoff => {
                    remove_keys.push(key.clone());
                }
                Status::Running => {
                    let last_activity = state.updated_at.max(state.last_progress_at);
                    if now.duration_since(last_activity) > stale_after {
                        info!(cache_dir = ?key, "sweep_stale: transitioning hung build to FAILED");
                        to_cancel.push(state.cancel.clone());
                        state.status = Status::Failed;
                        state.last_error = Some("stale: canceled".to_string());
                        state.updated_at = now;
                    }
                }
                Status::Failed => {}
            }
        }
        for key in remove_keys {
            builds.remove(&key);
        }
    }

    pub async fn is_running(&self, cache_dir: &Path) -> bool {
        matches!(
            self.builds.lock().await.get(cache_dir).map(|s| s.status),
            Some(Status::Running)
        )
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.admission
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[derive(Debug, Clone)]
pub struct BuildSnapshot {
    pub status: Status,
    pub created_at: Instant,
    pub last_progress_at: Instant,
    pub attempt_mode: AttemptMode,
    pub last_error: Option<String>,
    pub segment_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerParams;
    use std::time::Duration;

    fn registry(capacity: usize) -> BuildRegistry {
        BuildRegistry::new(
            Arc::new(AdmissionGate::new(capacity)),
            Arc::new(CircuitBreaker::new(BreakerParams {
                window: Duration::from_secs(600),
                min_requests: 100,
                failure_rate: 1.1,
                consecutive_failures: 100,
                retry_after: Duration::from_secs(60),
            })),
            Duration::from_secs(120),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn dedups_concurrent_requests_for_same_cache_dir() {
        let reg = registry(4);
        let dir = PathBuf::from("/hls/recordings/abc");
        let first = reg.schedule_or_attach(&dir, "hdd".into()).await;
        assert!(matches!(first, ScheduleOutcome::Scheduled(_)));
        let second = reg.schedule_or_attach(&dir, "hdd".into()).await;
        assert!(matches!(second, ScheduleOutcome::Attached));
        assert_eq!(reg.admission().in_use(), 1);
    }

    #[tokio::test]
    async fn rejects_when_admission_full() {
        let reg = registry(1);
        let dir_a = PathBuf::from("/hls/recordings/a");
        let dir_b = PathBuf::from("/hls/recordings/b");
        let first = reg.schedule_or_attach(&dir_a, "hdd".into()).await;
        assert!(matches!(first, ScheduleOutcome::Scheduled(_)));
        let second = reg.schedule_or_attach(&dir_b, "hdd".into()).await;
        assert!(matches!(second, ScheduleOutcome::TooManyBuilds { max_concurrent: 1 }));
    }

    #[tokio::test]
    async fn failed_record_suppresses_retry_until_backoff_expires() {
        let reg = registry(4);
        let dir = PathBuf::from("/hls/recordings/c");
        reg.mark_failed(&dir, "boom".into()).await;
        let attempt = reg.schedule_or_attach(&dir, "hdd".into()).await;
        assert!(matches!(attempt, ScheduleOutcome::Attached));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let attempt2 = reg.schedule_or_attach(&dir, "hdd".into()).await;
        assert!(matches!(attempt2, ScheduleOutcome::Scheduled(_)));
    }

    #[tokio::test]
    async fn sweep_stale_transitions_hung_running_build_and_cancels() {
        let reg = BuildRegistry::new(
            Arc::new(AdmissionGate::new(4)),
            Arc::new(CircuitBreaker::new(BreakerParams {
                window: Duration::from_secs(600),
                min_requests: 100,
                failure_rate: 1.1,
                consecutive_failures: 100,
                retry_after: Duration::from_secs(60),
            })),
            Duration::from_millis(5),
            Duration::from_millis(5),
            CancellationToken::new(),
        );
        let dir = PathBuf::from("/hls/recordings/d");
        let outcome = reg.schedule_or_attach(&dir, "hdd".into()).await;
        let handle = match outcome {
            ScheduleOutcome::Scheduled(h) => h,
            _ => panic!("expected Scheduled"),
        };
        assert!(!handle.cancel.is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        reg.sweep_stale().await;
        assert!(handle.cancel.is_cancelled());
        assert!(!reg.is_running(&dir).await);
    }
}
