//! The runtime dependency struct: global mutable state (registry, admission,
//! breaker) owned here and injected into every handler via
//! `axum::extract::State`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::admission::AdmissionGate;
use crate::breaker::{BreakerParams, CircuitBreaker};
use crate::config::Config;
use crate::preflight::{HttpPreflight, Preflight};
use crate::receiver::ReceiverClient;
use crate::registry::BuildRegistry;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub registry: Arc<BuildRegistry>,
    pub preflight: Arc<dyn Preflight>,
    pub receiver: Arc<dyn ReceiverClient>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, receiver: Arc<dyn ReceiverClient>) -> Self {
        let shutdown = CancellationToken::new();
        let admission = Arc::new(AdmissionGate::new(cfg.vod_max_concurrent));
        let breaker = Arc::new(CircuitBreaker::new(BreakerParams {
            window: cfg.breaker_window,
            min_requests: cfg.breaker_min_requests,
            failure_rate: cfg.breaker_failure_rate,
            consecutive_failures: cfg.breaker_consecutive_failures,
            retry_after: cfg.breaker_retry_after,
        }));
        let registry = Arc::new(BuildRegistry::new(
            admission,
            breaker,
            cfg.stale_after,
            cfg.fail_backoff,
            shutdown.child_token(),
        ));
        let preflight = Arc::new(HttpPreflight::new(cfg.preflight_timeout));

        Self {
            cfg,
            registry,
            preflight,
            receiver,
            shutdown,
        }
    }
}
