use serde::Serialize;
use std::fmt;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const CHECKS: &str = "checks";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Labels attached to a transaction, generated by the `#[transaction]` macro.
#[derive(Copy, Clone, Debug)]
pub struct TransactionLabels {
    pub name: &'static str,
}

#[macro_export]
macro_rules! generate_labels {
    ($base_name:expr) => {
        ::surge::core::TransactionLabels {
            name: stringify!($base_name),
        }
    };
}

/// How samples of a metric are aggregated, which in turn decides the threshold
/// aggregations that make sense for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

impl MetricKind {
    /// Kind of a built-in metric, `None` for names the driver does not know.
    pub fn of(metric: &str) -> Option<MetricKind> {
        match metric {
            HTTP_REQS | ITERATIONS => Some(MetricKind::Counter),
            HTTP_REQ_DURATION | ITERATION_DURATION => Some(MetricKind::Trend),
            HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
            VUS | VUS_MAX => Some(MetricKind::Gauge),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(name)
    }
}
