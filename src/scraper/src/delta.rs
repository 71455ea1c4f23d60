//! Previous-sample memory for histogram and summary aggregates.
//!
//! Histograms and summaries expose cumulative totals since target start; the
//! pipeline wants the change per scrape. The cache remembers the last
//! observed sum/count per `(url, family, label set)` and hands out the
//! difference. The first observation of a key is swallowed, there being
//! nothing to diff against yet.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use promfeed_exposition::{LabelPair, Metric, MetricValue};

/// Sum/count change between two consecutive observations of one series.
///
/// The count delta is signed: when a target restarts, its cumulative totals
/// go backwards and the delta comes out negative. It is emitted as computed.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedDelta {
    pub name: String,
    pub sum: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Copy)]
struct AggregateSample {
    sum: f64,
    count: u64,
}

/// Shared across all per-URL scrape tasks; distinct URLs occupy disjoint key
/// spaces. Entries live for the lifetime of the engine.
#[derive(Debug, Default)]
pub struct DeltaCache {
    entries: RwLock<HashMap<String, AggregateSample>>,
}

impl DeltaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_histogram(
        &self,
        url: &str,
        name: &str,
        metric: &Metric,
    ) -> Option<AggregatedDelta> {
        let MetricValue::Histogram(histogram) = &metric.value else {
            return None;
        };
        self.observe(url, name, &metric.labels, histogram.sample_sum, histogram.sample_count)
    }

    pub fn observe_summary(
        &self,
        url: &str,
        name: &str,
        metric: &Metric,
    ) -> Option<AggregatedDelta> {
        let MetricValue::Summary(summary) = &metric.value else {
            return None;
        };
        self.observe(url, name, &metric.labels, summary.sample_sum, summary.sample_count)
    }

    fn observe(
        &self,
        url: &str,
        name: &str,
        labels: &[LabelPair],
        sum: f64,
        count: u64,
    ) -> Option<AggregatedDelta> {
        let key = cache_key(url, name, labels);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = entries.insert(key, AggregateSample { sum, count })?;
        Some(AggregatedDelta {
            name: name.to_string(),
            sum: sum - previous.sum,
            count: count as i64 - previous.count as i64,
        })
    }
}

/// `url ";" name (";" label ":" value)*` with labels sorted by name, so the
/// key is stable across scrapes no matter how the endpoint orders labels.
fn cache_key(url: &str, name: &str, labels: &[LabelPair]) -> String {
    let mut pairs: Vec<&LabelPair> = labels.iter().collect();
    pairs.sort_by(|a, b| a.name.cmp(&b.name));
    let mut key = format!("{url};{name}");
    for pair in pairs {
        key.push(';');
        key.push_str(&pair.name);
        key.push(':');
        key.push_str(&pair.value);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use promfeed_exposition::HistogramValue;

    fn histogram_metric(labels: Vec<LabelPair>, sum: f64, count: u64) -> Metric {
        Metric {
            labels,
            timestamp_ms: 0,
            value: MetricValue::Histogram(HistogramValue {
                sample_sum: sum,
                sample_count: count,
                buckets: Vec::new(),
            }),
        }
    }

    #[test]
    fn first_observation_is_suppressed() {
        let cache = DeltaCache::new();
        let metric = histogram_metric(vec![], 10.0, 2);
        assert_eq!(cache.observe_histogram("http://a", "h", &metric), None);
    }

    #[test]
    fn subsequent_observations_yield_deltas() {
        let cache = DeltaCache::new();
        let labels = vec![LabelPair::new("l", "x")];

        assert!(
            cache
                .observe_histogram("http://a", "h", &histogram_metric(labels.clone(), 10.0, 2))
                .is_none()
        );

        let second = cache
            .observe_histogram("http://a", "h", &histogram_metric(labels.clone(), 17.0, 5))
            .unwrap();
        assert_eq!(second, AggregatedDelta { name: "h".to_string(), sum: 7.0, count: 3 });

        let third = cache
            .observe_histogram("http://a", "h", &histogram_metric(labels, 17.0, 5))
            .unwrap();
        assert_eq!(third.sum, 0.0);
        assert_eq!(third.count, 0);
    }

    #[test]
    fn restart_produces_a_negative_delta() {
        let cache = DeltaCache::new();
        cache.observe_histogram("http://a", "h", &histogram_metric(vec![], 100.0, 50));
        let delta = cache
            .observe_histogram("http://a", "h", &histogram_metric(vec![], 5.0, 1))
            .unwrap();
        assert_eq!(delta.sum, -95.0);
        assert_eq!(delta.count, -49);
    }

    #[test]
    fn key_is_insensitive_to_label_order() {
        let cache = DeltaCache::new();
        let forward = vec![LabelPair::new("a", "1"), LabelPair::new("b", "2")];
        let reversed = vec![LabelPair::new("b", "2"), LabelPair::new("a", "1")];

        assert!(
            cache
                .observe_histogram("http://a", "h", &histogram_metric(forward, 1.0, 1))
                .is_none()
        );
        let delta = cache
            .observe_histogram("http://a", "h", &histogram_metric(reversed, 3.0, 2))
            .unwrap();
        assert_eq!(delta.sum, 2.0);
        assert_eq!(delta.count, 1);
    }

    #[test]
    fn urls_have_disjoint_key_spaces() {
        let cache = DeltaCache::new();
        assert!(
            cache
                .observe_histogram("http://a", "h", &histogram_metric(vec![], 1.0, 1))
                .is_none()
        );
        assert!(
            cache
                .observe_histogram("http://b", "h", &histogram_metric(vec![], 1.0, 1))
                .is_none()
        );
    }

    #[test]
    fn mismatched_payload_yields_nothing() {
        let cache = DeltaCache::new();
        let simple = Metric {
            labels: vec![],
            timestamp_ms: 0,
            value: MetricValue::Simple(1.0),
        };
        assert!(cache.observe_histogram("http://a", "h", &simple).is_none());
        assert!(cache.observe_summary("http://a", "h", &simple).is_none());
    }
}
