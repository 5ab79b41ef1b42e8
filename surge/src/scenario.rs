//! Scenario logic and constants
use crate::collector::Collector;
use crate::measurement::Measurements;
use crate::thresholds;
use crate::timer::Timer;
use crate::transaction::{TransactionData, TRANSACTION_HOOK};
use crate::vus::VuPool;
use governor::{Quota, RateLimiter};
use std::{
    fmt::Display,
    future::Future,
    num::NonZeroU32,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use surge_core::{
    target_at, RunStatistics, ScenarioConfig, Stage, Threshold, ThresholdError, RAMP_INTERVAL,
};
use thiserror::Error;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid threshold: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("Scenario `{0}` has no stages to run")]
    NoStages(String),

    #[error("Setup aborted: {0}")]
    Setup(String),
}

type RunnerFuture = Pin<Box<dyn Future<Output = Result<RunStatistics, ScenarioError>> + Send>>;

/// Load test scenario structure
///
/// Pairs a setup, run once before any load, with an iteration that every VU loops over.
/// The setup's output is handed to each iteration as an `Arc`. Configure it through
/// [`ConfigurableScenario`] and `.await` it to run.
#[pin_project::pin_project]
pub struct Scenario<S, I> {
    setup: Option<S>,
    iteration: I,
    config: ScenarioConfig,
    invalid: Vec<ThresholdError>,
    runner_fut: Option<RunnerFuture>,
}

impl<S, I> Scenario<S, I> {
    pub fn new(name: &str, setup: S, iteration: I) -> Self {
        Self {
            setup: Some(setup),
            iteration,
            config: ScenarioConfig::new(name),
            invalid: vec![],
            runner_fut: None,
        }
    }

    #[doc(hidden)]
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }
}

impl<S, SF, D, E, I, F> Future for Scenario<S, I>
where
    S: FnOnce() -> SF + Send + 'static,
    SF: Future<Output = Result<D, E>> + Send + 'static,
    D: Send + Sync + 'static,
    E: Display + Send + 'static,
    I: Fn(Arc<D>) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    type Output = Result<RunStatistics, ScenarioError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Some(setup) = this.setup.take() {
            let iteration = this.iteration.clone();
            let config = this.config.clone();
            let invalid = std::mem::take(this.invalid);
            *this.runner_fut = Some(Box::pin(async move {
                run_scenario(setup, iteration, config, invalid).await
            }));
        }

        if let Some(runner) = this.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn vus(self, vus: usize) -> Self;
    fn stage(self, duration: Duration, target: usize) -> Self;
    fn stages(self, stages: &[Stage]) -> Self;
    fn duration(self, duration: Duration) -> Self;
    fn threshold(self, metric: &str, expressions: &[&str]) -> Self;
    fn graceful_stop(self, graceful_stop: Duration) -> Self;
    fn max_rps(self, max_rps: NonZeroU32) -> Self;
}

impl<S, SF, D, E, I, F> ConfigurableScenario<Result<RunStatistics, ScenarioError>>
    for Scenario<S, I>
where
    S: FnOnce() -> SF + Send + 'static,
    SF: Future<Output = Result<D, E>> + Send + 'static,
    D: Send + Sync + 'static,
    E: Display + Send + 'static,
    I: Fn(Arc<D>) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    /// Number of VUs the first stage ramps from. Defaults to 0.
    fn vus(mut self, vus: usize) -> Self {
        self.config.start_vus = vus;
        self
    }

    /// Append a stage ramping linearly to `target` VUs over `duration`.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let _ = Scenario::new("ramp", || async { Ok::<_, String>(()) }, |_: Arc<()>| async {})
    ///         .stage(Duration::from_secs(10), 5)
    ///         .stage(Duration::from_secs(30), 5)
    ///         .stage(Duration::from_secs(10), 0)
    ///         .await;
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    fn stages(mut self, stages: &[Stage]) -> Self {
        self.config.stages.extend_from_slice(stages);
        self
    }

    /// Hold the current VU count for `duration`.
    ///
    /// NOTE: Combine with `.vus()` for a constant-VU run.
    fn duration(mut self, duration: Duration) -> Self {
        let target = self.config.last_target();
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Add a pass/fail criterion on a built-in metric, e.g.
    /// `.threshold("http_req_duration", &["p(95)<300"])`.
    ///
    /// Malformed expressions are reported when the scenario is awaited, before any load
    /// is generated.
    fn threshold(mut self, metric: &str, expressions: &[&str]) -> Self {
        match Threshold::parse(metric, expressions) {
            Ok(threshold) => self.config.thresholds.push(threshold),
            Err(err) => self.invalid.push(err),
        }
        self
    }

    /// How long VUs get to finish their in-flight iteration once the last stage ends.
    fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.config.graceful_stop = graceful_stop;
        self
    }

    /// Cap the rate of transactions across all VUs.
    fn max_rps(mut self, max_rps: NonZeroU32) -> Self {
        self.config.max_rps = Some(max_rps);
        self
    }
}

#[instrument(name = "scenario", skip_all, fields(name = config.name))]
pub(crate) async fn run_scenario<S, SF, D, E, I, F>(
    setup: S,
    iteration: I,
    config: ScenarioConfig,
    invalid: Vec<ThresholdError>,
) -> Result<RunStatistics, ScenarioError>
where
    S: FnOnce() -> SF,
    SF: Future<Output = Result<D, E>>,
    D: Send + Sync + 'static,
    E: Display,
    I: Fn(Arc<D>) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    if let Some(err) = invalid.into_iter().next() {
        error!("Refusing to run: {err}");
        return Err(err.into());
    }
    if config.stages.is_empty() {
        return Err(ScenarioError::NoStages(config.name.clone()));
    }

    info!("Running {} with config {:?}", config.name, &config);

    let hook = TransactionData {
        limiter: config
            .max_rps
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps)))),
        collector: Arc::new(Collector::new()),
    };

    let data = match TRANSACTION_HOOK.scope(hook.clone(), setup()).await {
        Ok(data) => Arc::new(data),
        Err(err) => {
            error!("Setup failed: {err}");
            return Err(ScenarioError::Setup(err.to_string()));
        }
    };
    debug!("Setup complete");

    let duration = config.duration();
    let mut measurements = Measurements::new();
    let mut pool = VuPool::new(iteration, data, hook.clone());

    // NOTE: This loop is time-sensitive. Any long awaits or blocking will throw off the ramp
    let mut timer = Timer::new(RAMP_INTERVAL).await;
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        let target = target_at(config.start_vus, &config.stages, elapsed);
        pool.set_concurrency(target);
        publish_vus(&mut measurements, pool.concurrency());

        elapsed = timer.tick().await;
        measurements.merge(hook.collector.drain());
        trace!(
            vus = pool.concurrency(),
            requests = measurements.http_req_duration.count(),
            "Ramp tick at {elapsed:?}"
        );
    }

    info!(
        "Stages complete after {} ({timer} ticks); stopping VUs",
        humantime::format_duration(elapsed)
    );
    let aborted = pool.shutdown(config.graceful_stop).await;
    if aborted > 0 {
        warn!("{aborted} VUs were interrupted by the graceful stop");
    }
    measurements.merge(hook.collector.drain());
    publish_vus(&mut measurements, 0);
    measurements.elapsed = timer.elapsed();

    let outcomes = thresholds::evaluate(&config.thresholds, &measurements);
    let stats = RunStatistics {
        name: config.name.clone(),
        elapsed: measurements.elapsed,
        vus_max: measurements.vus_max,
        iterations: measurements.iterations,
        iterations_interrupted: measurements.iterations_interrupted,
        iteration_duration: measurements.iteration_duration.summary(),
        http_reqs: measurements.http_req_failed.total,
        http_req_duration: measurements.http_req_duration.summary(),
        http_req_failed: measurements.http_req_failed.clone(),
        checks: measurements.checks.clone(),
        thresholds: outcomes,
    };

    if stats.passed() {
        info!("Scenario complete; all thresholds passed");
    } else {
        warn!("Scenario complete; thresholds failed");
    }

    Ok(stats)
}

fn publish_vus(measurements: &mut Measurements, vus: usize) {
    measurements.record_vus(vus);

    #[cfg(feature = "metrics")]
    {
        metrics::gauge!(surge_core::VUS).set(vus as f64);
        metrics::gauge!(surge_core::VUS_MAX).set(measurements.vus_max as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::transaction_hook;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use surge_core::TransactionLabels;

    const LABELS: TransactionLabels = TransactionLabels { name: "fake" };

    async fn no_setup() -> Result<(), Infallible> {
        Ok(())
    }

    async fn fake_request(latency: Duration, ok: bool) -> Result<(), ()> {
        transaction_hook(LABELS, async move {
            tokio::time::sleep(latency).await;
            if ok {
                Ok(())
            } else {
                Err(())
            }
        })
        .await
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn ramps_and_collects() {
        let stats = Scenario::new("ramp", no_setup, |_: Arc<()>| async {
            let _ = fake_request(Duration::from_millis(5), true).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .stage(Duration::from_millis(500), 3)
        .stage(Duration::from_millis(500), 3)
        .stage(Duration::from_millis(300), 0)
        .threshold("http_req_duration", &["p(95)<300"])
        .threshold("http_req_failed", &["rate<0.001"])
        .graceful_stop(Duration::from_secs(1))
        .await
        .unwrap();

        assert_eq!(stats.name, "ramp");
        assert_eq!(stats.vus_max, 3);
        assert!(stats.http_reqs > 10);
        assert_eq!(stats.http_req_failed.hits, 0);
        assert_eq!(stats.iterations_interrupted, 0);
        assert_eq!(stats.thresholds.len(), 2);
        assert!(stats.passed());
        assert!(stats.elapsed >= Duration::from_millis(1_300));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn failed_requests_fail_the_verdict() {
        let stats = Scenario::new("failing", no_setup, |_: Arc<()>| async {
            let _ = fake_request(Duration::from_millis(1), false).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .vus(2)
        .duration(Duration::from_millis(300))
        .threshold("http_req_failed", &["rate<0.001"])
        .await
        .unwrap();

        assert_eq!(stats.vus_max, 2);
        assert!(stats.http_req_failed.hits > 0);
        assert_eq!(stats.http_req_failed.hits, stats.http_reqs);
        assert!(!stats.passed());
        assert!(logs_contain("thresholds failed"));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn setup_data_reaches_iterations() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let stats = Scenario::new(
            "setup",
            || async { Ok::<_, Infallible>(41usize) },
            move |data: Arc<usize>| {
                let counter = counter.clone();
                async move {
                    assert_eq!(*data, 41);
                    counter.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        )
        .vus(1)
        .duration(Duration::from_millis(200))
        .await
        .unwrap();

        assert!(stats.iterations > 0);
        assert_eq!(stats.iterations, seen.load(Ordering::Relaxed) as u64);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn setup_error_aborts() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();

        let res = Scenario::new(
            "broken-setup",
            || async { Err::<(), _>("connection refused") },
            move |_: Arc<()>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            },
        )
        .vus(1)
        .duration(Duration::from_millis(200))
        .await;

        assert!(matches!(res, Err(ScenarioError::Setup(msg)) if msg == "connection refused"));
        assert_eq!(ran.load(Ordering::Relaxed), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn invalid_threshold_is_rejected_before_load() {
        let res = Scenario::new("invalid", no_setup, |_: Arc<()>| async {
            let _ = fake_request(Duration::from_millis(1), true).await;
        })
        .vus(1)
        .duration(Duration::from_secs(5))
        .threshold("http_req_duration", &["p(95)~300"])
        .await;

        assert!(matches!(res, Err(ScenarioError::Threshold(_))));
        assert!(logs_contain("Refusing to run"));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn no_stages() {
        let res = Scenario::new("empty", no_setup, |_: Arc<()>| async {}).await;
        assert!(matches!(res, Err(ScenarioError::NoStages(name)) if name == "empty"));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn panicking_iterations_are_isolated() {
        let stats = Scenario::new("panics", no_setup, |_: Arc<()>| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("iteration failed");
        })
        .vus(2)
        .duration(Duration::from_millis(200))
        .await
        .unwrap();

        assert_eq!(stats.iterations, 0);
        assert!(stats.iterations_interrupted >= 2);
        assert!(stats.passed());
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn graceful_stop_interrupts_long_iterations() {
        let stats = Scenario::new("slow", no_setup, |_: Arc<()>| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .vus(2)
        .duration(Duration::from_millis(200))
        .graceful_stop(Duration::from_millis(100))
        .await
        .unwrap();

        assert_eq!(stats.iterations, 0);
        assert_eq!(stats.iterations_interrupted, 2);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn max_rps_limits_requests() {
        let stats = Scenario::new("limited", no_setup, |_: Arc<()>| async {
            let _ = fake_request(Duration::ZERO, true).await;
        })
        .vus(4)
        .duration(Duration::from_secs(1))
        .max_rps(NonZeroU32::new(20).unwrap())
        .await
        .unwrap();

        // Burst of 20 plus roughly 20 more over the second.
        assert!(stats.http_reqs <= 50, "http_reqs was {}", stats.http_reqs);
        assert!(stats.http_reqs >= 20);
    }

    #[test]
    fn builder_collects_config() {
        let scenario = Scenario::new("builder", no_setup, |_: Arc<()>| async {})
            .vus(1)
            .stage(Duration::from_secs(10), 5)
            .duration(Duration::from_secs(30))
            .stages(&[Stage::new(Duration::from_secs(10), 0)])
            .threshold("http_req_duration", &["p(95)<300"])
            .graceful_stop(Duration::from_secs(5));

        let config = scenario.config();
        assert_eq!(config.start_vus, 1);
        assert_eq!(
            config.stages,
            vec![
                Stage::new(Duration::from_secs(10), 5),
                Stage::new(Duration::from_secs(30), 5),
                Stage::new(Duration::from_secs(10), 0),
            ]
        );
        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.graceful_stop, Duration::from_secs(5));
    }
}
