use crate::MetricKind;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("Threshold `{0}` has no comparison operator")]
    MissingOperator(String),

    #[error("Unknown aggregation `{0}`")]
    UnknownAggregation(String),

    #[error("Percentile `{0}` must be between 0 and 100")]
    InvalidPercentile(String),

    #[error("Threshold value `{0}` is not a number")]
    InvalidValue(String),

    #[error("Unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("Aggregation `{aggregation}` cannot be used with {kind} metric `{metric}`")]
    Unsupported {
        metric: String,
        kind: MetricKind,
        aggregation: Aggregation,
    },
}

/// The statistic of a metric a threshold expression compares against.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `0..=100`.
    Percentile(f64),
}

impl Aggregation {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        use Aggregation::*;
        match kind {
            MetricKind::Trend => matches!(self, Avg | Min | Max | Med | Count | Percentile(_)),
            MetricKind::Rate => matches!(self, Rate),
            MetricKind::Counter => matches!(self, Count | Rate),
            MetricKind::Gauge => matches!(self, Value | Min | Max),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "count" => Aggregation::Count,
            "rate" => Aggregation::Rate,
            "value" => Aggregation::Value,
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdError::UnknownAggregation(s.to_string()))?;
                let pct: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| ThresholdError::InvalidPercentile(inner.to_string()))?;
                if !(0. ..=100.).contains(&pct) {
                    return Err(ThresholdError::InvalidPercentile(inner.to_string()));
                }
                Aggregation::Percentile(pct)
            }
        };
        Ok(agg)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Value => f.write_str("value"),
            Aggregation::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // NOTE: two-character operators first so `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn symbol(&self) -> &'static str {
        Self::OPERATORS
            .iter()
            .find(|(_, op)| op == self)
            .map(|(sym, _)| *sym)
            .unwrap_or("?")
    }
}

/// One predicate of a threshold, e.g. `p(95)<300`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.value)
    }
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (idx, sym, comparison) = Comparison::OPERATORS
            .iter()
            .filter_map(|(sym, op)| s.find(sym).map(|idx| (idx, *sym, *op)))
            .min_by_key(|(idx, sym, _)| (*idx, std::cmp::Reverse(sym.len())))
            .ok_or_else(|| ThresholdError::MissingOperator(s.to_string()))?;

        let aggregation = s[..idx].trim().parse()?;
        let raw_value = s[idx + sym.len()..].trim();
        let value = raw_value
            .parse()
            .map_err(|_| ThresholdError::InvalidValue(raw_value.to_string()))?;

        Ok(Self {
            aggregation,
            comparison,
            value,
        })
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.symbol(),
            self.value
        )
    }
}

/// A metric and the expressions that must all hold for the run to pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expressions: Vec<ThresholdExpr>,
}

impl Threshold {
    pub fn parse(metric: &str, expressions: &[&str]) -> Result<Self, ThresholdError> {
        let expressions = expressions
            .iter()
            .map(|e| e.parse())
            .collect::<Result<Vec<ThresholdExpr>, _>>()?;

        let threshold = Self {
            metric: metric.to_string(),
            expressions,
        };
        threshold.validate()?;
        Ok(threshold)
    }

    /// Checks the metric is known and every aggregation makes sense for its kind.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let kind = MetricKind::of(&self.metric)
            .ok_or_else(|| ThresholdError::UnknownMetric(self.metric.clone()))?;

        for expr in &self.expressions {
            if !expr.aggregation.applies_to(kind) {
                return Err(ThresholdError::Unsupported {
                    metric: self.metric.clone(),
                    kind,
                    aggregation: expr.aggregation,
                });
            }
        }
        Ok(())
    }
}
