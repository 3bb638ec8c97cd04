//! Circuit breaker. Per-storage-root (rootKey) failure-rate breaker
//! gating build starts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct RootState {
    state: State,
    window_start: Instant,
    requests_in_window: u32,
    failures_in_window: u32,
    consecutive_failures: u32,
    next_retry: Instant,
    half_open_probe_outstanding: bool,
}

impl RootState {
    fn new(now: Instant) -> Self {
        Self {
            state: State::Closed,
            window_start: now,
            requests_in_window: 0,
            failures_in_window: 0,
            consecutive_failures: 0,
            next_retry: now,
            half_open_probe_outstanding: false,
        }
    }
}

pub struct BreakerParams {
    pub window: Duration,
    pub min_requests: u32,
    pub failure_rate: f64,
    pub consecutive_failures: u32,
    pub retry_after: Duration,
}

pub struct CircuitBreaker {
    params: BreakerParams,
    roots: Mutex<HashMap<String, RootState>>,
}

impl CircuitBreaker {
    pub fn new(params: BreakerParams) -> Self {
        Self {
            params,
            roots: Mutex::new(HashMap::new()),
        }
    }

    /// `true` if a build may start for `root_key` right now. In HALF_OPEN,
    /// exactly one probe is allowed through until it reports.
    pub fn allow(&self, root_key: &str) -> bool {
        let now = Instant::now();
        let mut roots = self.roots.lock().unwrap();
        let root = roots.entry(root_key.to_string()).or_insert_with(|| RootState::new(now));
        self.roll_window(root, now);

        match root.state {
            State::Closed => true,
            State::Open => {
                if now >= root.next_retry {
                    root.state = State::HalfOpen;
                    root.half_open_probe_outstanding = true;
                    info!(root_key, "breaker half-open: allowing one probe");
                    true
                } else {
                    false
                }
            }
            State::HalfOpen => {
                if root.half_open_probe_outstanding {
                    false
                } else {
                    root.half_open_probe_outstanding = true;
                    true
                }
            }
        }
    }

    /// Report the outcome of a build attributed to `root_key`.
    pub fn report(&self, root_key: &str, success: bool) {
        let now = Instant::now();
        let mut roots = self.roots.lock().unwrap();
        let root = roots.entry(root_key.to_string()).or_insert_with(|| RootState::new(now));
        self.roll_window(root, now);

        root.requests_in_window += 1;
        if success {
            root.consecutive_failures = 0;
            if root.state == State::HalfOpen {
                root.state = State::Closed;
                root.requests_in_window = 0;
                root.failures_in_window = 0;
                info!(root_key, "breaker closed after successful probe");
            }
            root.half_open_probe_outstanding = false;
            return;
        }

        root.failures_in_window += 1;
        root.consecutive_failures += 1;

        if root.state == State::HalfOpen {
            self.trip(root, now, root_key, "half-open probe failed");
            return;
        }

        let rate_trip = root.requests_in_window >= self.params.min_requests
            && (f64::from(root.failures_in_window) / f64::from(root.requests_in_window)) >= self.params.failure_rate;
        let consecutive_trip = root.consecutive_failures >= self.params.consecutive_failures;

        if rate_trip || consecutive_trip {
            self.trip(root, now, root_key, "failure threshold exceeded");
        }
    }

    fn trip(&self, root: &mut RootState, now: Instant, root_key: &str, reason: &str) {
        root.state = State::Open;
        root.next_retry = now + self.params.retry_after;
        root.half_open_probe_outstanding = false;
        info!(root_key, reason, "breaker open");
    }

    fn roll_window(&self, root: &mut RootState, now: Instant) {
        if root.state == State::Closed && now.duration_since(root.window_start) > self.params.window {
            root.window_start = now;
            root.requests_in_window = 0;
            root.failures_in_window = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerParams {
            window: Duration::from_secs(600),
            min_requests: 4,
            failure_rate: 0.5,
            consecutive_failures: 3,
            retry_after: Duration::from_millis(20),
        })
    }

    #[test]
    fn closed_by_default() {
        let b = breaker();
        assert!(b.allow("hdd"));
    }

    #[test]
    fn trips_on_consecutive_failures() {
        let b = breaker();
        for _ in 0..3 {
            assert!(b.allow("hdd"));
            b.report("hdd", false);
        }
        assert!(!b.allow("hdd"));
    }

    #[test]
    fn half_open_allows_one_probe_then_closes_on_success() {
        let b = breaker();
        for _ in 0..3 {
            b.allow("hdd");
            b.report("hdd", false);
        }
        assert!(!b.allow("hdd"));
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.allow("hdd"));
        assert!(!b.allow("hdd"), "second concurrent probe must be refused while one is outstanding");
        b.report("hdd", true);
        assert!(b.allow("hdd"));
    }

    #[test]
    fn half_open_failure_reopens() {
        let b = breaker();
        for _ in 0..3 {
            b.allow("hdd");
            b.report("hdd", false);
        }
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.allow("hdd"));
        b.report("hdd", false);
        assert!(!b.allow("hdd"));
    }

    #[test]
    fn roots_are_independent() {
        let b = breaker();
        for _ in 0..3 {
            b.allow("hdd");
            b.report("hdd", false);
        }
        assert!(!b.allow("hdd"));
        assert!(b.allow("usb"));
    }
}
