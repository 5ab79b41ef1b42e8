use crate::collector::Collector;
use governor::DefaultDirectRateLimiter;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use surge_core::TransactionLabels;

/// Decides whether a transaction's output counts towards `http_req_failed`.
pub trait TransactionOutcome {
    fn is_failure(&self) -> bool;
}

impl<T, E> TransactionOutcome for Result<T, E> {
    fn is_failure(&self) -> bool {
        self.is_err()
    }
}

/// Transaction hook used by the `#[transaction]` macro. Not intended to be used manually.
pub async fn transaction_hook<T>(labels: TransactionLabels, func: T) -> T::Output
where
    T: Future,
    T::Output: TransactionOutcome,
{
    if let Ok(hook) = TRANSACTION_HOOK.try_with(|v| v.clone()) {
        if let Some(limiter) = &hook.limiter {
            limiter.until_ready().await;
        }

        let start = Instant::now();
        let res = func.await;
        let elapsed = start.elapsed();
        let failed = res.is_failure();

        hook.collector.record_request(elapsed, failed);

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(surge_core::HTTP_REQS, "name" => labels.name).increment(1);
            metrics::histogram!(surge_core::HTTP_REQ_DURATION, "name" => labels.name)
                .record(elapsed.as_secs_f64() * 1_000.);
            if failed {
                metrics::counter!(surge_core::HTTP_REQ_FAILED, "name" => labels.name).increment(1);
            }
        }

        tracing::trace!(name = labels.name, ?elapsed, failed, "Transaction complete");
        res
    } else {
        tracing::warn!(name = labels.name, "No hook available.");
        func.await
    }
}

#[derive(Clone)]
pub(crate) struct TransactionData {
    pub limiter: Option<Arc<DefaultDirectRateLimiter>>,
    pub collector: Arc<Collector>,
}

tokio::task_local! {
    pub(crate) static TRANSACTION_HOOK: TransactionData;
}
