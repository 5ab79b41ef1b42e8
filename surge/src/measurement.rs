use crate::collector::Snapshot;
use pdatastructs::tdigest::{TDigest, K1};
use std::time::Duration;
use surge_core::{
    Aggregation, CheckSummary, RateSummary, TrendSummary, CHECKS, HTTP_REQS, HTTP_REQ_DURATION,
    HTTP_REQ_FAILED, ITERATIONS, ITERATION_DURATION, VUS, VUS_MAX,
};
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Running aggregate of a duration metric, kept in milliseconds.
#[derive(Debug, Clone)]
pub(crate) struct Trend {
    digest: TDigest<K1>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Trend {
    pub fn new() -> Self {
        Self {
            digest: default_tdigest(),
            count: 0,
            sum: 0.,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, dur: Duration) {
        let ms = dur.as_secs_f64() * 1_000.;
        self.digest.insert(ms);
        self.count += 1;
        self.sum += ms;
        self.min = self.min.min(ms);
        self.max = self.max.max(ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn quantile(&self, quantile: f64) -> f64 {
        if self.count == 0 {
            return 0.;
        }

        let ms = self.digest.quantile(quantile);

        // NOTE: TDigest can return NaN for sparse digests.
        if ms.is_finite() {
            ms.clamp(self.min, self.max)
        } else {
            error!("NaN latency quantile calculation, falling back to the mean.");
            self.avg()
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.max
        }
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count,
            avg: self.avg(),
            min: self.min(),
            med: self.quantile(0.5),
            max: self.max(),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
        }
    }

    fn aggregate(&self, aggregation: Aggregation) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        match aggregation {
            Aggregation::Avg => Some(self.avg()),
            Aggregation::Min => Some(self.min()),
            Aggregation::Max => Some(self.max()),
            Aggregation::Med => Some(self.quantile(0.5)),
            Aggregation::Count => Some(self.count as f64),
            Aggregation::Percentile(p) => Some(self.quantile(p / 100.)),
            Aggregation::Rate | Aggregation::Value => None,
        }
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}

/// Everything aggregated over a run so far.
#[derive(Debug, Clone)]
pub(crate) struct Measurements {
    pub http_req_duration: Trend,
    pub http_req_failed: RateSummary,
    pub iteration_duration: Trend,
    pub iterations: u64,
    pub iterations_interrupted: u64,
    pub checks: Vec<CheckSummary>,
    pub vus: usize,
    pub vus_min: Option<usize>,
    pub vus_max: usize,
    pub elapsed: Duration,
}

impl Measurements {
    pub fn new() -> Self {
        Self {
            http_req_duration: Trend::new(),
            http_req_failed: RateSummary::default(),
            iteration_duration: Trend::new(),
            iterations: 0,
            iterations_interrupted: 0,
            checks: vec![],
            vus: 0,
            vus_min: None,
            vus_max: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn merge(&mut self, snapshot: Snapshot) {
        for dur in snapshot.http_req_duration {
            self.http_req_duration.add(dur);
        }
        let (failed, total) = snapshot.http_req_failed;
        self.http_req_failed.hits += failed;
        self.http_req_failed.total += total;

        for dur in snapshot.iteration_duration {
            self.iteration_duration.add(dur);
        }
        self.iterations += snapshot.iterations;
        self.iterations_interrupted += snapshot.iterations_interrupted;

        for check in snapshot.checks {
            match self.checks.iter_mut().find(|c| c.name == check.name) {
                Some(existing) => {
                    existing.passes += check.passes;
                    existing.fails += check.fails;
                }
                None => self.checks.push(CheckSummary {
                    name: check.name,
                    passes: check.passes,
                    fails: check.fails,
                }),
            }
        }
    }

    pub fn record_vus(&mut self, vus: usize) {
        self.vus = vus;
        self.vus_min = Some(self.vus_min.map_or(vus, |min| min.min(vus)));
        self.vus_max = self.vus_max.max(vus);
    }

    fn checks_rate(&self) -> RateSummary {
        let (hits, total) = self.checks.iter().fold((0, 0), |(hits, total), c| {
            (hits + c.passes, total + c.passes + c.fails)
        });
        RateSummary { hits, total }
    }

    fn rate_of(summary: &RateSummary) -> Option<f64> {
        (summary.total > 0).then(|| summary.rate())
    }

    fn per_second(&self, count: u64) -> f64 {
        count as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }

    /// Value of `aggregation` over a built-in metric, `None` when there is nothing to
    /// aggregate yet.
    pub fn aggregate(&self, metric: &str, aggregation: Aggregation) -> Option<f64> {
        match (metric, aggregation) {
            (HTTP_REQ_DURATION, agg) => self.http_req_duration.aggregate(agg),
            (ITERATION_DURATION, agg) => self.iteration_duration.aggregate(agg),
            (HTTP_REQ_FAILED, Aggregation::Rate) => Self::rate_of(&self.http_req_failed),
            (CHECKS, Aggregation::Rate) => Self::rate_of(&self.checks_rate()),
            (HTTP_REQS, Aggregation::Count) => Some(self.http_req_failed.total as f64),
            (HTTP_REQS, Aggregation::Rate) => Some(self.per_second(self.http_req_failed.total)),
            (ITERATIONS, Aggregation::Count) => Some(self.iterations as f64),
            (ITERATIONS, Aggregation::Rate) => Some(self.per_second(self.iterations)),
            (VUS, Aggregation::Value) => Some(self.vus as f64),
            (VUS, Aggregation::Min) => self.vus_min.map(|min| min as f64),
            (VUS, Aggregation::Max) | (VUS_MAX, _) => Some(self.vus_max as f64),
            _ => None,
        }
    }
}
