//! Pipeline events and the family-to-event transformation.
//!
//! Every parsed metric becomes at most one event. Counters, gauges and
//! untyped metrics carry single-value metadata; histograms and summaries
//! carry the aggregated delta from the cache, and their first observation per
//! series produces no event at all.

use std::collections::HashMap;

use promfeed_exposition::{LabelPair, Metric, MetricFamily, MetricKind, MetricValue};
use serde::{Deserialize, Serialize};

use crate::delta::AggregatedDelta;

/// One normalized pipeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// The scraped URL.
    pub provider: String,
    /// Sample timestamp from the wire, or the scrape start time when the
    /// sample carried none.
    pub timestamp_ms: i64,
    pub payload: HashMap<String, String>,
    pub metadata: EventMetadata,
}

/// Metric-metadata annotation attached to every event. Values are
/// stringified on purpose; downstream consumers treat them as opaque text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventMetadata {
    #[serde(rename = "metric")]
    Single {
        #[serde(rename = "metricName")]
        name: String,
        #[serde(rename = "metricValue")]
        value: String,
    },
    #[serde(rename = "aggregatedMetric")]
    Aggregated {
        #[serde(rename = "metricName")]
        name: String,
        #[serde(rename = "metricSum")]
        sum: String,
        #[serde(rename = "metricCount")]
        count: String,
    },
}

impl MetricEvent {
    /// Serialize the event to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Build the event for one metric of one family. Returns `None` for
/// histogram/summary metrics whose delta was suppressed (first observation).
pub fn build_event(
    url: &str,
    scrape_time_ms: i64,
    family: &MetricFamily,
    metric: &Metric,
    delta: Option<AggregatedDelta>,
) -> Option<MetricEvent> {
    let mut payload = base_payload(family.kind, &metric.labels);

    let metadata = match &metric.value {
        MetricValue::Simple(value) => EventMetadata::Single {
            name: family.name.clone(),
            value: value.to_string(),
        },
        MetricValue::Histogram(histogram) => {
            let delta = delta?;
            for bucket in &histogram.buckets {
                payload.insert(
                    format!("bucket_{}", format_bound(bucket.upper_bound)),
                    bucket.cumulative_count.to_string(),
                );
            }
            aggregated_metadata(delta)
        }
        MetricValue::Summary(summary) => {
            let delta = delta?;
            for quantile in &summary.quantiles {
                payload.insert(
                    format!("quantile_{}", format_bound(quantile.quantile)),
                    quantile.value.to_string(),
                );
            }
            aggregated_metadata(delta)
        }
    };

    Some(MetricEvent {
        provider: url.to_string(),
        timestamp_ms: event_timestamp(metric, scrape_time_ms),
        payload,
        metadata,
    })
}

fn aggregated_metadata(delta: AggregatedDelta) -> EventMetadata {
    EventMetadata::Aggregated {
        name: delta.name,
        sum: delta.sum.to_string(),
        count: delta.count.to_string(),
    }
}

fn base_payload(kind: MetricKind, labels: &[LabelPair]) -> HashMap<String, String> {
    let mut payload = HashMap::new();
    payload.insert("Type".to_string(), kind.as_str().to_string());
    for label in labels {
        payload.insert(format!("label_{}", label.name), label.value.clone());
    }
    payload
}

fn event_timestamp(metric: &Metric, scrape_time_ms: i64) -> i64 {
    if metric.timestamp_ms != 0 {
        metric.timestamp_ms
    } else {
        scrape_time_ms
    }
}

/// Wire spelling for payload keys: infinities keep their exposition form.
fn format_bound(bound: f64) -> String {
    if bound == f64::INFINITY {
        "+Inf".to_string()
    } else if bound == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        bound.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promfeed_exposition::{Bucket, HistogramValue, Quantile, SummaryValue};

    fn counter_family(name: &str) -> MetricFamily {
        MetricFamily::new(name, MetricKind::Counter)
    }

    #[test]
    fn single_value_event_carries_labels_and_type() {
        let family = counter_family("http_requests_total");
        let metric = Metric {
            labels: vec![LabelPair::new("method", "post"), LabelPair::new("code", "200")],
            timestamp_ms: 0,
            value: MetricValue::Simple(1027.0),
        };

        let event = build_event("http://a/metrics", 1700000000000, &family, &metric, None)
            .expect("counter events are never suppressed");

        assert_eq!(event.provider, "http://a/metrics");
        assert_eq!(event.timestamp_ms, 1700000000000);
        assert_eq!(event.payload.get("Type").map(String::as_str), Some("counter"));
        assert_eq!(event.payload.get("label_method").map(String::as_str), Some("post"));
        assert_eq!(event.payload.get("label_code").map(String::as_str), Some("200"));
        assert_eq!(
            event.metadata,
            EventMetadata::Single {
                name: "http_requests_total".to_string(),
                value: "1027".to_string(),
            }
        );
    }

    #[test]
    fn wire_timestamp_wins_over_scrape_time() {
        let family = counter_family("c");
        let metric = Metric {
            labels: vec![],
            timestamp_ms: 1395066363000,
            value: MetricValue::Simple(1.0),
        };
        let event = build_event("u", 42, &family, &metric, None).unwrap();
        assert_eq!(event.timestamp_ms, 1395066363000);
    }

    #[test]
    fn histogram_event_requires_a_delta() {
        let family = MetricFamily::new("h", MetricKind::Histogram);
        let metric = Metric {
            labels: vec![],
            timestamp_ms: 0,
            value: MetricValue::Histogram(HistogramValue {
                sample_sum: 17.0,
                sample_count: 5,
                buckets: vec![
                    Bucket { upper_bound: 0.5, cumulative_count: 2 },
                    Bucket { upper_bound: f64::INFINITY, cumulative_count: 5 },
                ],
            }),
        };

        assert!(build_event("u", 0, &family, &metric, None).is_none());

        let delta = AggregatedDelta { name: "h".to_string(), sum: 7.0, count: 3 };
        let event = build_event("u", 0, &family, &metric, Some(delta)).unwrap();
        assert_eq!(event.payload.get("bucket_0.5").map(String::as_str), Some("2"));
        assert_eq!(event.payload.get("bucket_+Inf").map(String::as_str), Some("5"));
        assert_eq!(
            event.metadata,
            EventMetadata::Aggregated {
                name: "h".to_string(),
                sum: "7".to_string(),
                count: "3".to_string(),
            }
        );
    }

    #[test]
    fn summary_event_expands_quantiles() {
        let family = MetricFamily::new("s", MetricKind::Summary);
        let metric = Metric {
            labels: vec![],
            timestamp_ms: 0,
            value: MetricValue::Summary(SummaryValue {
                sample_sum: 100.0,
                sample_count: 10,
                quantiles: vec![Quantile { quantile: 0.5, value: 4773.0 }],
            }),
        };

        let delta = AggregatedDelta { name: "s".to_string(), sum: 0.0, count: 0 };
        let event = build_event("u", 0, &family, &metric, Some(delta)).unwrap();
        assert_eq!(event.payload.get("Type").map(String::as_str), Some("summary"));
        assert_eq!(event.payload.get("quantile_0.5").map(String::as_str), Some("4773"));
    }

    #[test]
    fn metadata_serializes_with_wire_key_names() {
        let single = EventMetadata::Single {
            name: "m".to_string(),
            value: "1".to_string(),
        };
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["kind"], "metric");
        assert_eq!(json["metricName"], "m");
        assert_eq!(json["metricValue"], "1");

        let aggregated = EventMetadata::Aggregated {
            name: "h".to_string(),
            sum: "7".to_string(),
            count: "3".to_string(),
        };
        let json = serde_json::to_value(&aggregated).unwrap();
        assert_eq!(json["kind"], "aggregatedMetric");
        assert_eq!(json["metricSum"], "7");
        assert_eq!(json["metricCount"], "3");
    }
}
