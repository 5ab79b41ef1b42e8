use crate::transaction::{TransactionData, TRANSACTION_HOOK};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

struct Vu {
    id: usize,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// The set of running virtual users.
///
/// Every VU is a task looping over the iteration until it is asked to stop. Stopping is
/// cooperative: a VU finishes the iteration it is in before exiting, so shrinking the pool
/// never cuts a request short.
pub(crate) struct VuPool<I, D> {
    iteration: I,
    data: Arc<D>,
    hook: TransactionData,
    active: Vec<Vu>,
    retiring: Vec<Vu>,
    next_id: usize,
}

impl<I, F, D> VuPool<I, D>
where
    I: Fn(Arc<D>) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
    D: Send + Sync + 'static,
{
    pub fn new(iteration: I, data: Arc<D>, hook: TransactionData) -> Self {
        Self {
            iteration,
            data,
            hook,
            active: vec![],
            retiring: vec![],
            next_id: 1,
        }
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.retiring.retain(|vu| !vu.handle.is_finished());

        if self.active.len() == concurrency {
            return;
        }

        if self.active.len() > concurrency {
            for vu in self.active.drain(concurrency..) {
                trace!(vu = vu.id, "Retiring VU");
                vu.stop.store(true, Ordering::Relaxed);
                self.retiring.push(vu);
            }
        } else {
            while self.active.len() < concurrency {
                let vu = self.spawn_vu();
                self.active.push(vu);
            }
        }

        debug!("Concurrency set to {concurrency}");
    }

    pub fn concurrency(&self) -> usize {
        self.active.len()
    }

    fn spawn_vu(&mut self) -> Vu {
        let id = self.next_id;
        self.next_id += 1;

        let stop = Arc::new(AtomicBool::new(false));
        let task = vu_loop(
            self.iteration.clone(),
            self.data.clone(),
            stop.clone(),
            self.hook.clone(),
        );
        let handle = tokio::spawn(
            TRANSACTION_HOOK
                .scope(self.hook.clone(), task)
                .instrument(tracing::debug_span!("vu", id)),
        );

        trace!(vu = id, "Spawned VU");
        Vu { id, stop, handle }
    }

    /// Stops every VU, giving in-flight iterations up to `graceful_stop` to finish before
    /// the stragglers are aborted. Returns the number of aborted VUs.
    pub async fn shutdown(mut self, graceful_stop: Duration) -> usize {
        let mut vus: Vec<Vu> = self.active.drain(..).chain(self.retiring.drain(..)).collect();
        for vu in &vus {
            vu.stop.store(true, Ordering::Relaxed);
        }

        let mut outcomes: Vec<Option<Result<(), JoinError>>> = vus.iter().map(|_| None).collect();
        let joined = tokio::time::timeout(
            graceful_stop,
            join_all(
                vus.iter_mut()
                    .zip(outcomes.iter_mut())
                    .map(|(vu, outcome)| async move { *outcome = Some((&mut vu.handle).await) }),
            ),
        )
        .await;
        if joined.is_err() {
            debug!("Graceful stop of {graceful_stop:?} elapsed");
        }

        let mut aborted = 0;
        for (vu, outcome) in vus.iter_mut().zip(outcomes) {
            let outcome = match outcome {
                Some(outcome) => outcome,
                None if vu.handle.is_finished() => match (&mut vu.handle).now_or_never() {
                    Some(outcome) => outcome,
                    None => continue,
                },
                None => {
                    warn!(vu = vu.id, "VU did not stop within {graceful_stop:?}; aborting.");
                    vu.handle.abort();
                    self.hook.collector.record_interrupted();
                    aborted += 1;
                    continue;
                }
            };
            if let Err(err) = outcome {
                error!(vu = vu.id, "VU task failed: {err}");
            }
        }
        aborted
    }
}

async fn vu_loop<I, F, D>(iteration: I, data: Arc<D>, stop: Arc<AtomicBool>, hook: TransactionData)
where
    I: Fn(Arc<D>) -> F,
    F: Future<Output = ()>,
{
    while !stop.load(Ordering::Relaxed) {
        let start = Instant::now();
        match AssertUnwindSafe(iteration(data.clone())).catch_unwind().await {
            Ok(()) => hook.collector.record_iteration(start.elapsed()),
            Err(_) => {
                error!("Iteration panicked; the VU moves on to the next iteration.");
                hook.collector.record_interrupted();
            }
        }

        // NOTE: An iteration that never awaits would otherwise starve the runtime.
        tokio::task::yield_now().await;
    }
    trace!("VU stopped");
}
