//! Scraping input for a telemetry pipeline.
//!
//! The engine periodically fetches Prometheus-format exposures from a set of
//! URLs, normalizes every sample into a [`MetricEvent`] carrying a
//! metric-metadata annotation, and publishes the events to a
//! [`MemorySubject`]. Histogram and summary families are cumulative on the
//! wire; for those the input emits the sum/count delta between consecutive
//! scrapes instead of the raw totals.

pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod event;
pub mod subject;

pub use config::{Configuration, ScrapeConfig};
pub use delta::{AggregatedDelta, DeltaCache};
pub use engine::{ACCEPT_HEADER, DelimitedDecoder, PROTOBUF_MEDIA_TYPE, ScrapeEngine};
pub use error::InputError;
pub use event::{EventMetadata, MetricEvent};
pub use subject::{MemorySubject, SubjectError};
