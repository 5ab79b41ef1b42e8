use crate::measurement::Measurements;
use surge_core::{Threshold, ThresholdOutcome};
use tracing::{debug, warn};

/// Evaluate every expression of every threshold against the run's aggregates.
pub(crate) fn evaluate(thresholds: &[Threshold], measurements: &Measurements) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .flat_map(|threshold| {
            threshold.expressions.iter().map(move |expr| {
                let observed = measurements.aggregate(&threshold.metric, expr.aggregation);
                let passed = match observed {
                    Some(value) => expr.holds(value),
                    None => {
                        warn!(
                            "No samples for threshold `{}: {expr}`; not failing the run on it.",
                            threshold.metric
                        );
                        true
                    }
                };

                debug!(metric = %threshold.metric, %expr, ?observed, passed, "Threshold evaluated");

                ThresholdOutcome {
                    metric: threshold.metric.clone(),
                    expression: expr.to_string(),
                    observed,
                    passed,
                }
            })
        })
        .collect()
}
