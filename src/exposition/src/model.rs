//! In-memory representation of metric families, shared by the parser and the
//! scrape engine.

use serde::{Deserialize, Serialize};

/// The five metric kinds of the text exposition format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    /// Families without a `# TYPE` directive.
    #[default]
    Untyped,
}

impl MetricKind {
    /// The token used by `# TYPE` directives and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }

    pub(crate) fn from_token(token: &str) -> Option<Self> {
        match token {
            "counter" => Some(MetricKind::Counter),
            "gauge" => Some(MetricKind::Gauge),
            "histogram" => Some(MetricKind::Histogram),
            "summary" => Some(MetricKind::Summary),
            "untyped" => Some(MetricKind::Untyped),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A label key/value pair. Labels keep their wire order on the metric; use
/// [`label_sets_equal`] for the order-insensitive comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Set equality over `(name, value)` pairs, insensitive to wire order.
pub fn label_sets_equal(a: &[LabelPair], b: &[LabelPair]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut left: Vec<(&str, &str)> = a.iter().map(|l| (l.name.as_str(), l.value.as_str())).collect();
    let mut right: Vec<(&str, &str)> = b.iter().map(|l| (l.name.as_str(), l.value.as_str())).collect();
    left.sort_unstable();
    right.sort_unstable();
    left == right
}

/// One histogram bucket. The upper bound may be `+Inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

/// One summary quantile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramValue {
    pub sample_sum: f64,
    pub sample_count: u64,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryValue {
    pub sample_sum: f64,
    pub sample_count: u64,
    pub quantiles: Vec<Quantile>,
}

/// Per-kind payload of a metric. `Simple` serves counters, gauges and untyped
/// families; the parent family kind disambiguates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricValue {
    Simple(f64),
    Histogram(HistogramValue),
    Summary(SummaryValue),
}

/// One observation within a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Labels excluding the reserved `le` and `quantile` labels, which are
    /// consumed into buckets and quantiles during parsing.
    pub labels: Vec<LabelPair>,
    /// Milliseconds since the epoch; 0 means unset ("use scrape time").
    pub timestamp_ms: i64,
    pub value: MetricValue,
}

/// A group of same-name metrics sharing kind and help text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub help: String,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            help: String::new(),
            metrics: Vec::new(),
        }
    }
}
