//! Named assertions over a value, aggregated into the `checks` metric.
//!
//! A failing check never aborts the iteration; it is only counted.
use crate::transaction::TRANSACTION_HOOK;
#[allow(unused)]
use tracing::{debug, trace};

/// Evaluate named predicates against a value, recording each outcome.
///
/// Returns `true` when every predicate held.
///
/// ```ignore
/// let res = create_pull_request().await;
/// check!(res, {
///     "is status 201" => |r: &Response| r.status() == 201,
///     "has reviewers" => has_reviewers,
/// });
/// ```
#[macro_export]
macro_rules! check {
    ($value:expr, { $($name:expr => $predicate:expr),+ $(,)? }) => {{
        let value = &$value;
        let mut all_passed = true;
        $(
            let passed = $crate::check::evaluate(value, $predicate);
            $crate::check::record($name, passed);
            all_passed &= passed;
        )+
        all_passed
    }};
}

#[doc(hidden)]
pub fn evaluate<T: ?Sized, P: FnOnce(&T) -> bool>(value: &T, predicate: P) -> bool {
    predicate(value)
}

#[doc(hidden)]
pub fn record(name: &str, passed: bool) {
    let recorded = TRANSACTION_HOOK
        .try_with(|hook| hook.collector.record_check(name, passed))
        .is_ok();

    if !recorded {
        trace!(check = name, passed, "Check outside of a scenario; not recorded.");
    }

    #[cfg(feature = "metrics")]
    metrics::counter!(
        surge_core::CHECKS,
        "check" => name.to_string(),
        "result" => if passed { "pass" } else { "fail" }
    )
    .increment(1);

    if !passed {
        debug!(check = name, "Check failed");
    }
}
