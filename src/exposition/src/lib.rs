//! Prometheus text exposition format (v0.0.4): metric model and parser.

pub mod model;
pub mod parser;
mod reader;

pub use model::{
    Bucket, HistogramValue, LabelPair, Metric, MetricFamily, MetricKind, MetricValue, Quantile,
    SummaryValue, label_sets_equal,
};
pub use parser::{ParseError, ParseErrorKind, parse_text};
