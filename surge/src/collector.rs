use metrics_util::AtomicBucket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Lock-free sink shared by every VU of a run.
///
/// VUs write into it on the hot path; the ramp loop periodically drains it into the run's
/// [`Measurements`](crate::measurement::Measurements).
pub(crate) struct Collector {
    http_reqs: AtomicU64,
    http_req_failed: AtomicU64,
    http_req_duration: AtomicBucket<Duration>,
    iterations: AtomicU64,
    iterations_interrupted: AtomicU64,
    iteration_duration: AtomicBucket<Duration>,
    checks: Mutex<Vec<CheckCount>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckCount {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Everything recorded since the previous drain.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub http_req_duration: Vec<Duration>,
    /// (failed, total)
    pub http_req_failed: (u64, u64),
    pub iterations: u64,
    pub iterations_interrupted: u64,
    pub iteration_duration: Vec<Duration>,
    pub checks: Vec<CheckCount>,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            http_reqs: AtomicU64::new(0),
            http_req_failed: AtomicU64::new(0),
            http_req_duration: AtomicBucket::new(),
            iterations: AtomicU64::new(0),
            iterations_interrupted: AtomicU64::new(0),
            iteration_duration: AtomicBucket::new(),
            checks: Mutex::new(vec![]),
        }
    }

    pub fn record_request(&self, elapsed: Duration, failed: bool) {
        self.http_reqs.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.http_req_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.http_req_duration.push(elapsed);
    }

    pub fn record_iteration(&self, elapsed: Duration) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.iteration_duration.push(elapsed);
    }

    pub fn record_interrupted(&self) {
        self.iterations_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_check(&self, name: &str, passed: bool) {
        let mut checks = self.checks.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = match checks.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                checks.push(CheckCount {
                    name: name.to_string(),
                    passes: 0,
                    fails: 0,
                });
                checks.len() - 1
            }
        };

        if passed {
            checks[idx].passes += 1;
        } else {
            checks[idx].fails += 1;
        }
    }

    pub fn drain(&self) -> Snapshot {
        let total = self.http_reqs.swap(0, Ordering::Relaxed);
        let failed = self.http_req_failed.swap(0, Ordering::Relaxed);

        let mut http_req_duration = vec![];
        self.http_req_duration
            .clear_with(|dur| http_req_duration.extend_from_slice(dur));

        let mut iteration_duration = vec![];
        self.iteration_duration
            .clear_with(|dur| iteration_duration.extend_from_slice(dur));

        let checks = std::mem::take(&mut *self.checks.lock().unwrap_or_else(PoisonError::into_inner));

        Snapshot {
            http_req_duration,
            http_req_failed: (failed, total),
            iterations: self.iterations.swap(0, Ordering::Relaxed),
            iterations_interrupted: self.iterations_interrupted.swap(0, Ordering::Relaxed),
            iteration_duration,
            checks,
        }
    }
}
