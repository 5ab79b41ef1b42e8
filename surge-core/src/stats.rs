use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Aggregated values of a trend metric, in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Fraction of samples that were "hits" (failed requests, passed checks, ...).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RateSummary {
    pub hits: u64,
    pub total: u64,
}

impl RateSummary {
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.hits as f64 / self.total as f64
        }
    }

    pub fn misses(&self) -> u64 {
        self.total - self.hits
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

impl CheckSummary {
    pub fn all_passed(&self) -> bool {
        self.fails == 0 && self.passes > 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric never received a sample.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Statistics for a completed Scenario run.
#[derive(Clone, Debug, Serialize)]
pub struct RunStatistics {
    pub name: String,
    pub elapsed: Duration,
    pub vus_max: usize,
    pub iterations: u64,
    pub iterations_interrupted: u64,
    pub iteration_duration: TrendSummary,
    pub http_reqs: u64,
    pub http_req_duration: TrendSummary,
    pub http_req_failed: RateSummary,
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
}

impl RunStatistics {
    /// The verdict: every threshold held.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn check(&self, name: &str) -> Option<&CheckSummary> {
        self.checks.iter().find(|c| c.name == name)
    }

    pub fn checks_rate(&self) -> RateSummary {
        let (hits, total) = self.checks.iter().fold((0, 0), |(hits, total), c| {
            (hits + c.passes, total + c.passes + c.fails)
        });
        RateSummary { hits, total }
    }

    fn threshold_marker(&self, metric: &str) -> &'static str {
        let mut outcomes = self
            .thresholds
            .iter()
            .filter(|t| t.metric == metric)
            .map(|t| t.passed);
        match outcomes.next() {
            None => " ",
            Some(first) if first && outcomes.all(|passed| passed) => "✓",
            Some(_) => "✗",
        }
    }
}

const LABEL_WIDTH: usize = 32;

fn label(f: &mut fmt::Formatter<'_>, marker: &str, name: &str) -> fmt::Result {
    write!(f, "   {marker} {:.<width$}: ", name, width = LABEL_WIDTH)
}

fn ms(value: f64) -> String {
    humantime::format_duration(Duration::from_micros((value * 1_000.).round() as u64)).to_string()
}

impl fmt::Display for TrendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "avg={} min={} med={} max={} p(90)={} p(95)={}",
            ms(self.avg),
            ms(self.min),
            ms(self.med),
            ms(self.max),
            ms(self.p90),
            ms(self.p95),
        )
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  scenario: {}", self.name)?;
        writeln!(f)?;

        for check in &self.checks {
            let marker = if check.fails == 0 { "✓" } else { "✗" };
            writeln!(f, "     {marker} {}", check.name)?;
            if check.fails > 0 {
                let total = check.passes + check.fails;
                writeln!(
                    f,
                    "      ↳  {:.0}% ✓ {} / ✗ {}",
                    check.passes as f64 / total as f64 * 100.,
                    check.passes,
                    check.fails
                )?;
            }
        }
        if !self.checks.is_empty() {
            writeln!(f)?;
        }

        let secs = self.elapsed.as_secs_f64().max(f64::EPSILON);
        let checks = self.checks_rate();

        label(f, self.threshold_marker("checks"), "checks")?;
        writeln!(
            f,
            "{:.2}% ✓ {} ✗ {}",
            checks.rate() * 100.,
            checks.hits,
            checks.misses()
        )?;

        label(
            f,
            self.threshold_marker("http_req_duration"),
            "http_req_duration",
        )?;
        writeln!(f, "{}", self.http_req_duration)?;

        label(
            f,
            self.threshold_marker("http_req_failed"),
            "http_req_failed",
        )?;
        writeln!(
            f,
            "{:.2}% ✓ {} ✗ {}",
            self.http_req_failed.rate() * 100.,
            self.http_req_failed.hits,
            self.http_req_failed.misses()
        )?;

        label(f, self.threshold_marker("http_reqs"), "http_reqs")?;
        writeln!(
            f,
            "{} {:.2}/s",
            self.http_reqs,
            self.http_reqs as f64 / secs
        )?;

        label(
            f,
            self.threshold_marker("iteration_duration"),
            "iteration_duration",
        )?;
        writeln!(f, "{}", self.iteration_duration)?;

        label(f, self.threshold_marker("iterations"), "iterations")?;
        writeln!(
            f,
            "{} {:.2}/s ({} interrupted)",
            self.iterations,
            self.iterations as f64 / secs,
            self.iterations_interrupted
        )?;

        label(f, self.threshold_marker("vus_max"), "vus_max")?;
        writeln!(f, "{}", self.vus_max)?;

        if !self.thresholds.is_empty() {
            writeln!(f)?;
            writeln!(f, "  thresholds:")?;
            for t in &self.thresholds {
                let marker = if t.passed { "✓" } else { "✗" };
                let observed = t
                    .observed
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "no data".to_string());
                writeln!(
                    f,
                    "   {marker} {} {} (observed {observed})",
                    t.metric, t.expression
                )?;
            }
        }

        writeln!(f)?;
        write!(
            f,
            "  verdict: {}",
            if self.passed() { "PASSED" } else { "FAILED" }
        )
    }
}
