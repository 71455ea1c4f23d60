//! Per-URL scrape loops: HTTP fetch, content-type dispatch, event building
//! and publication.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use promfeed_exposition::{MetricFamily, MetricValue, parse_text};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::ScrapeConfig;
use crate::delta::DeltaCache;
use crate::error::InputError;
use crate::event::build_event;
use crate::subject::MemorySubject;

/// Accept header offering the delimited protobuf encoding, falling back to
/// text format 0.0.4.
pub const ACCEPT_HEADER: &str = "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily;encoding=delimited;q=0.7,text/plain;version=0.0.4;q=0.3";

/// Media type that selects the delimited protobuf decoder.
pub const PROTOBUF_MEDIA_TYPE: &str = "application/vnd.google.protobuf";

/// Decoder for the delimited protobuf exposition encoding.
///
/// The engine calls [`parse_delimited`](DelimitedDecoder::parse_delimited)
/// repeatedly until it reports an exhausted stream with `Ok(None)`. No
/// decoder ships with this crate; endpoints answering with the protobuf
/// media type fail the scrape cycle unless one is configured.
pub trait DelimitedDecoder: Send + Sync {
    fn parse_delimited(
        &self,
        stream: &mut dyn Read,
    ) -> Result<Option<MetricFamily>, Box<dyn std::error::Error + Send + Sync>>;
}

struct ScrapeShared {
    client: reqwest::Client,
    cache: DeltaCache,
    subject: Arc<MemorySubject>,
    decoder: Option<Box<dyn DelimitedDecoder>>,
    interval: Duration,
}

/// The scrape input. Owns one scheduling loop per configured URL; all loops
/// share one HTTP client and one delta cache and publish to one subject.
pub struct ScrapeEngine {
    subject: Arc<MemorySubject>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ScrapeEngine {
    /// Validate the configuration and launch one scrape loop per URL.
    /// Must be called within a tokio runtime.
    pub fn start(config: ScrapeConfig, subject: Arc<MemorySubject>) -> Result<Self, InputError> {
        Self::start_with_decoder(config, subject, None)
    }

    /// As [`start`](Self::start), with a decoder for endpoints that answer
    /// in the delimited protobuf encoding.
    pub fn start_with_decoder(
        config: ScrapeConfig,
        subject: Arc<MemorySubject>,
        decoder: Option<Box<dyn DelimitedDecoder>>,
    ) -> Result<Self, InputError> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(ScrapeShared {
            client: reqwest::Client::new(),
            cache: DeltaCache::new(),
            subject: Arc::clone(&subject),
            decoder,
            interval: config.scrape_interval(),
        });

        let tasks = config
            .urls
            .iter()
            .cloned()
            .map(|url| {
                let shared = Arc::clone(&shared);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(run_scrape_loop(shared, url, shutdown))
            })
            .collect();

        info!(
            urls = config.urls.len(),
            interval_ms = config.scrape_interval_ms,
            "scrape engine started"
        );
        Ok(Self {
            subject,
            tasks,
            shutdown: shutdown_tx,
        })
    }

    pub fn subject(&self) -> &Arc<MemorySubject> {
        &self.subject
    }

    /// Stop every scrape loop and close the subject. Idempotent; a second
    /// call is a no-op.
    pub async fn shutdown(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(error) = task.await {
                if !error.is_cancelled() {
                    warn!(%error, "scrape task failed");
                }
            }
        }
        self.subject.close();
    }
}

impl Drop for ScrapeEngine {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn run_scrape_loop(
    shared: Arc<ScrapeShared>,
    url: String,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%url, "scrape loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let next_start = Instant::now() + shared.interval;

        tokio::select! {
            result = scrape_once(&shared, &url) => match result {
                Ok(published) => debug!(%url, events = published, "scrape cycle complete"),
                Err(error) => warn!(%url, %error, "scrape cycle abandoned"),
            },
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = sleep_until(next_start) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(%url, "scrape loop stopped");
}

/// One GET → parse → publish cycle. Returns the number of published events.
async fn scrape_once(shared: &ScrapeShared, url: &str) -> Result<usize, InputError> {
    let request_time_ms = epoch_millis(SystemTime::now());

    let response = shared
        .client
        .get(url)
        .header(ACCEPT, ACCEPT_HEADER)
        .send()
        .await?
        .error_for_status()?;

    let is_protobuf = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(media_type)
        .is_some_and(|media| media.eq_ignore_ascii_case(PROTOBUF_MEDIA_TYPE));

    let body = response.bytes().await?;
    let families = if is_protobuf {
        decode_delimited(shared, &body)?
    } else {
        parse_text(std::str::from_utf8(&body)?)?
    };

    let mut published = 0;
    for family in &families {
        for metric in &family.metrics {
            let delta = match &metric.value {
                MetricValue::Histogram(_) => {
                    shared.cache.observe_histogram(url, &family.name, metric)
                }
                MetricValue::Summary(_) => shared.cache.observe_summary(url, &family.name, metric),
                MetricValue::Simple(_) => None,
            };
            if let Some(event) = build_event(url, request_time_ms, family, metric, delta) {
                shared.subject.publish(event)?;
                published += 1;
            }
        }
    }
    Ok(published)
}

fn decode_delimited(shared: &ScrapeShared, body: &[u8]) -> Result<Vec<MetricFamily>, InputError> {
    let Some(decoder) = shared.decoder.as_ref() else {
        return Err(InputError::Decode(
            "endpoint answered with the protobuf encoding but no delimited decoder is configured"
                .to_string(),
        ));
    };

    let mut stream = std::io::Cursor::new(body);
    let mut families = Vec::new();
    loop {
        match decoder.parse_delimited(&mut stream) {
            Ok(Some(family)) => families.push(family),
            Ok(None) => return Ok(families),
            Err(error) => return Err(InputError::Decode(error.to_string())),
        }
    }
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(err) => -(err.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrapeConfig;

    #[test]
    fn media_type_strips_parameters() {
        assert_eq!(media_type("text/plain; version=0.0.4"), "text/plain");
        assert_eq!(
            media_type(
                "application/vnd.google.protobuf;proto=io.prometheus.client.MetricFamily"
            ),
            "application/vnd.google.protobuf"
        );
        assert_eq!(media_type("text/plain"), "text/plain");
    }

    #[test]
    fn epoch_millis_handles_pre_epoch_times() {
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        assert_eq!(
            epoch_millis(UNIX_EPOCH + Duration::from_millis(1500)),
            1500
        );
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_millis(250)), -250);
    }

    #[tokio::test]
    async fn start_rejects_invalid_configuration() {
        let subject = Arc::new(MemorySubject::new());
        let result = ScrapeEngine::start(ScrapeConfig::default(), subject);
        assert!(matches!(result, Err(InputError::Config(_))));
    }

    #[test]
    fn protobuf_body_without_decoder_is_an_error() {
        let shared = ScrapeShared {
            client: reqwest::Client::new(),
            cache: DeltaCache::new(),
            subject: Arc::new(MemorySubject::new()),
            decoder: None,
            interval: Duration::from_secs(5),
        };
        let result = decode_delimited(&shared, b"\x00");
        assert!(matches!(result, Err(InputError::Decode(_))));
    }
}
