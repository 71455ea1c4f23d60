//! Single-pass parser for the Prometheus text exposition format (v0.0.4).
//!
//! The parser reassembles counter, gauge, histogram, summary and untyped
//! families from a line-oriented exposition. `_sum`, `_count` and `_bucket`
//! suffixed sample lines attach to their unsuffixed histogram/summary parent,
//! and lines sharing a label set collapse into a single [`Metric`]. Parsing
//! is single-shot: it either yields every family in the input, in first-seen
//! order, or fails at the first syntactic violation with the offending line
//! number. There is no partial result.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{
    Bucket, HistogramValue, LabelPair, Metric, MetricFamily, MetricKind, MetricValue, Quantile,
    SummaryValue, label_sets_equal,
};
use crate::reader::CharReader;

/// Fatal parse failure, tagged with the 1-based line it occurred on.
#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseErrorKind {
    #[error("invalid metric name")]
    InvalidMetricName,
    #[error("invalid label name")]
    InvalidLabelName,
    #[error("invalid escape sequence `\\{0}`")]
    InvalidEscape(char),
    #[error("expected `{0}`")]
    Expected(char),
    #[error("expected `,` or `}}` after label value")]
    ExpectedLabelSeparator,
    #[error("expected newline at end of line")]
    ExpectedNewline,
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unknown metric kind `{0}`")]
    UnknownKind(String),
    #[error("`# TYPE` for `{0}` after samples were seen")]
    TypeAfterSamples(String),
    #[error("invalid sample value `{0}`")]
    InvalidValue(String),
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
    #[error("invalid `le` label value `{0}`")]
    InvalidBucketBound(String),
    #[error("histogram sample `{0}` is missing the `le` label")]
    MissingBucketBound(String),
    #[error("invalid `quantile` label value `{0}`")]
    InvalidQuantile(String),
    #[error("duplicate label set for metric `{0}`")]
    DuplicateLabelSet(String),
    #[error("histogram sample `{0}` carries no `_bucket`, `_sum` or `_count` suffix")]
    StrayHistogramSample(String),
    #[error("summary sample `{0}` has neither a quantile label nor a `_sum`/`_count` suffix")]
    StraySummarySample(String),
    #[error("internal: {0}")]
    Internal(&'static str),
}

/// Parse a complete exposition into its metric families, in first-seen order.
pub fn parse_text(input: &str) -> Result<Vec<MetricFamily>, ParseError> {
    TextParser::new(input).run()
}

/// Relation of a sample line's raw name to the family it resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleRole {
    /// Raw name equals the family name.
    Base,
    Sum,
    Count,
    Bucket,
}

/// Labels of one sample line after the reserved `le`/`quantile` labels have
/// been consumed.
#[derive(Debug, Default)]
struct ParsedLabels {
    labels: Vec<LabelPair>,
    bucket_bound: Option<f64>,
    quantile: Option<f64>,
}

struct TextParser<'a> {
    reader: CharReader<'a>,
    line: usize,
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl<'a> TextParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            reader: CharReader::new(input),
            line: 1,
            families: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<Vec<MetricFamily>, ParseError> {
        loop {
            self.reader.skip_blanks();
            match self.reader.peek() {
                None => break,
                Some('\n') => {
                    self.reader.read();
                    self.line += 1;
                }
                Some('#') => self.parse_directive()?,
                Some(_) => self.parse_sample()?,
            }
        }
        Ok(self.families)
    }

    fn fail<T>(&self, kind: ParseErrorKind) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line,
            kind,
        })
    }

    /// Consume optional trailing blanks and the terminating newline. Every
    /// non-blank line must end in `\n`; end of input is not accepted here.
    fn expect_newline(&mut self) -> Result<(), ParseError> {
        self.reader.skip_blanks();
        match self.reader.read() {
            Some('\n') => {
                self.line += 1;
                Ok(())
            }
            _ => self.fail(ParseErrorKind::ExpectedNewline),
        }
    }

    // Directives and comments

    fn parse_directive(&mut self) -> Result<(), ParseError> {
        self.reader.read(); // '#'
        self.reader.skip_blanks();
        let keyword = self.reader.read_until(&[' ', '\t', '\n']);
        match keyword.as_str() {
            "HELP" => self.parse_help(),
            "TYPE" => self.parse_type(),
            _ => self.skip_comment(),
        }
    }

    fn skip_comment(&mut self) -> Result<(), ParseError> {
        loop {
            match self.reader.read() {
                Some('\n') => {
                    self.line += 1;
                    return Ok(());
                }
                Some(_) => {}
                None => return self.fail(ParseErrorKind::ExpectedNewline),
            }
        }
    }

    fn parse_help(&mut self) -> Result<(), ParseError> {
        self.reader.skip_blanks();
        let name = self.read_metric_name()?;
        self.reader.skip_blanks();
        let help = self.read_help_text()?;
        self.expect_newline()?;
        let idx = self.family_for_directive(&name);
        self.families[idx].help = help;
        Ok(())
    }

    fn parse_type(&mut self) -> Result<(), ParseError> {
        self.reader.skip_blanks();
        let name = self.read_metric_name()?;
        self.reader.skip_blanks();
        let token = self.reader.read_until(&[' ', '\t', '\n']);
        let Some(kind) = MetricKind::from_token(&token) else {
            return self.fail(ParseErrorKind::UnknownKind(token));
        };
        let idx = self.family_for_directive(&name);
        if !self.families[idx].metrics.is_empty() {
            return self.fail(ParseErrorKind::TypeAfterSamples(name));
        }
        self.families[idx].kind = kind;
        self.expect_newline()
    }

    /// Help text runs to the end of the line. `\\` and `\n` are the only
    /// recognized escapes.
    fn read_help_text(&mut self) -> Result<String, ParseError> {
        let mut text = String::new();
        loop {
            match self.reader.peek() {
                None | Some('\n') => return Ok(text),
                Some('\\') => {
                    self.reader.read();
                    match self.reader.read() {
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some(c) => return self.fail(ParseErrorKind::InvalidEscape(c)),
                        None => return self.fail(ParseErrorKind::UnexpectedEof),
                    }
                }
                Some(c) => {
                    self.reader.read();
                    text.push(c);
                }
            }
        }
    }

    // Samples

    fn parse_sample(&mut self) -> Result<(), ParseError> {
        let raw_name = self.read_metric_name()?;
        let (idx, role) = self.resolve_family(&raw_name);
        let kind = self.families[idx].kind;

        self.reader.skip_blanks();
        let parsed = if self.reader.peek() == Some('{') {
            self.parse_labels(kind, role)?
        } else {
            ParsedLabels::default()
        };
        if kind == MetricKind::Histogram && role == SampleRole::Bucket && parsed.bucket_bound.is_none()
        {
            return self.fail(ParseErrorKind::MissingBucketBound(raw_name));
        }

        self.reader.skip_blanks();
        let value = self.parse_value()?;
        self.reader.skip_blanks();
        let timestamp = match self.reader.peek() {
            Some('\n') | None => None,
            Some(_) => Some(self.parse_timestamp()?),
        };
        let line = self.line;
        self.expect_newline()?;

        self.record_sample(idx, role, &raw_name, parsed, value, timestamp, line)
    }

    /// Attach a raw sample name to a family: exact name first, then the
    /// `_count` / `_sum` / `_bucket` suffixes against an aggregable parent,
    /// else a fresh untyped family. A suffix only strips when at least one
    /// character precedes it.
    fn resolve_family(&mut self, raw_name: &str) -> (usize, SampleRole) {
        if let Some(&idx) = self.index.get(raw_name) {
            return (idx, SampleRole::Base);
        }
        if let Some(base) = strip_suffix(raw_name, "_count") {
            if let Some(&idx) = self.index.get(base) {
                if matches!(self.families[idx].kind, MetricKind::Summary | MetricKind::Histogram) {
                    return (idx, SampleRole::Count);
                }
            }
        }
        if let Some(base) = strip_suffix(raw_name, "_sum") {
            if let Some(&idx) = self.index.get(base) {
                if matches!(self.families[idx].kind, MetricKind::Summary | MetricKind::Histogram) {
                    return (idx, SampleRole::Sum);
                }
            }
        }
        if let Some(base) = strip_suffix(raw_name, "_bucket") {
            if let Some(&idx) = self.index.get(base) {
                if self.families[idx].kind == MetricKind::Histogram {
                    return (idx, SampleRole::Bucket);
                }
            }
        }
        (self.push_family(raw_name), SampleRole::Base)
    }

    /// Directive names are never suffix-stripped.
    fn family_for_directive(&mut self, name: &str) -> usize {
        match self.index.get(name) {
            Some(&idx) => idx,
            None => self.push_family(name),
        }
    }

    fn push_family(&mut self, name: &str) -> usize {
        let idx = self.families.len();
        self.families.push(MetricFamily::new(name, MetricKind::Untyped));
        self.index.insert(name.to_string(), idx);
        idx
    }

    #[allow(clippy::too_many_arguments)]
    fn record_sample(
        &mut self,
        idx: usize,
        role: SampleRole,
        raw_name: &str,
        parsed: ParsedLabels,
        value: f64,
        timestamp: Option<i64>,
        line: usize,
    ) -> Result<(), ParseError> {
        let fail = |kind| Err(ParseError { line, kind });
        let family = &mut self.families[idx];
        let kind = family.kind;

        match kind {
            MetricKind::Counter | MetricKind::Gauge | MetricKind::Untyped => {
                let duplicate = family
                    .metrics
                    .iter()
                    .any(|m| label_sets_equal(&m.labels, &parsed.labels));
                if duplicate {
                    return fail(ParseErrorKind::DuplicateLabelSet(raw_name.to_string()));
                }
                family.metrics.push(Metric {
                    labels: parsed.labels,
                    timestamp_ms: timestamp.unwrap_or(0),
                    value: MetricValue::Simple(value),
                });
                Ok(())
            }
            MetricKind::Summary => {
                let midx = Self::merge_target(
                    family,
                    parsed.labels,
                    MetricValue::Summary(SummaryValue::default()),
                );
                let metric = &mut family.metrics[midx];
                if let Some(ts) = timestamp {
                    metric.timestamp_ms = ts;
                }
                let MetricValue::Summary(summary) = &mut metric.value else {
                    return fail(ParseErrorKind::Internal("summary family with foreign payload"));
                };
                if let Some(q) = parsed.quantile {
                    summary.quantiles.push(Quantile {
                        quantile: q,
                        value: 0.0,
                    });
                }
                match role {
                    SampleRole::Sum => summary.sample_sum = value,
                    SampleRole::Count => summary.sample_count = value as u64,
                    SampleRole::Base => match summary.quantiles.last_mut() {
                        Some(quantile) => quantile.value = value,
                        None => {
                            return fail(ParseErrorKind::StraySummarySample(raw_name.to_string()));
                        }
                    },
                    SampleRole::Bucket => {
                        return fail(ParseErrorKind::Internal("bucket sample on a summary family"));
                    }
                }
                Ok(())
            }
            MetricKind::Histogram => {
                let midx = Self::merge_target(
                    family,
                    parsed.labels,
                    MetricValue::Histogram(HistogramValue::default()),
                );
                let metric = &mut family.metrics[midx];
                if let Some(ts) = timestamp {
                    metric.timestamp_ms = ts;
                }
                let MetricValue::Histogram(histogram) = &mut metric.value else {
                    return fail(ParseErrorKind::Internal("histogram family with foreign payload"));
                };
                if let Some(bound) = parsed.bucket_bound {
                    histogram.buckets.push(Bucket {
                        upper_bound: bound,
                        cumulative_count: 0,
                    });
                }
                match role {
                    SampleRole::Sum => histogram.sample_sum = value,
                    SampleRole::Count => histogram.sample_count = value as u64,
                    SampleRole::Bucket => match histogram.buckets.last_mut() {
                        Some(bucket) => bucket.cumulative_count = value as u64,
                        None => {
                            return fail(ParseErrorKind::Internal("bucket sample without a bound"));
                        }
                    },
                    SampleRole::Base => {
                        return fail(ParseErrorKind::StrayHistogramSample(raw_name.to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Index of the family metric with an equal label set, appending a fresh
    /// metric when none matches yet.
    fn merge_target(family: &mut MetricFamily, labels: Vec<LabelPair>, empty_value: MetricValue) -> usize {
        match family
            .metrics
            .iter()
            .position(|m| label_sets_equal(&m.labels, &labels))
        {
            Some(idx) => idx,
            None => {
                family.metrics.push(Metric {
                    labels,
                    timestamp_ms: 0,
                    value: empty_value,
                });
                family.metrics.len() - 1
            }
        }
    }

    // Lexing

    fn read_metric_name(&mut self) -> Result<String, ParseError> {
        let mut name = String::new();
        match self.reader.peek() {
            Some(c) if is_metric_name_start(c) => {
                name.push(c);
                self.reader.read();
            }
            _ => return self.fail(ParseErrorKind::InvalidMetricName),
        }
        while let Some(c) = self.reader.peek() {
            if !is_metric_name_char(c) {
                break;
            }
            name.push(c);
            self.reader.read();
        }
        Ok(name)
    }

    fn read_label_name(&mut self) -> Result<String, ParseError> {
        let mut name = String::new();
        match self.reader.peek() {
            Some(c) if is_label_name_start(c) => {
                name.push(c);
                self.reader.read();
            }
            _ => return self.fail(ParseErrorKind::InvalidLabelName),
        }
        while let Some(c) = self.reader.peek() {
            if !is_label_name_char(c) {
                break;
            }
            name.push(c);
            self.reader.read();
        }
        Ok(name)
    }

    /// Double-quoted label value with the `\\`, `\n` and `\"` escapes.
    fn read_label_value(&mut self) -> Result<String, ParseError> {
        if self.reader.read() != Some('"') {
            return self.fail(ParseErrorKind::Expected('"'));
        }
        let mut value = String::new();
        loop {
            match self.reader.peek() {
                None => return self.fail(ParseErrorKind::UnexpectedEof),
                Some('\n') => return self.fail(ParseErrorKind::Expected('"')),
                Some('"') => {
                    self.reader.read();
                    return Ok(value);
                }
                Some('\\') => {
                    self.reader.read();
                    match self.reader.read() {
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('"') => value.push('"'),
                        Some(c) => return self.fail(ParseErrorKind::InvalidEscape(c)),
                        None => return self.fail(ParseErrorKind::UnexpectedEof),
                    }
                }
                Some(c) => {
                    self.reader.read();
                    value.push(c);
                }
            }
        }
    }

    /// `{` block of `name = "value"` pairs. The reserved `le` label of a
    /// histogram `_bucket` line and the reserved `quantile` label of a
    /// summary base line are consumed here instead of being kept as labels.
    fn parse_labels(
        &mut self,
        kind: MetricKind,
        role: SampleRole,
    ) -> Result<ParsedLabels, ParseError> {
        let consume_bound = kind == MetricKind::Histogram && role == SampleRole::Bucket;
        let consume_quantile = kind == MetricKind::Summary && role == SampleRole::Base;

        self.reader.read(); // '{'
        let mut out = ParsedLabels::default();
        self.reader.skip_blanks();
        if self.reader.peek() == Some('}') {
            self.reader.read();
            return Ok(out);
        }
        loop {
            self.reader.skip_blanks();
            let name = self.read_label_name()?;
            self.reader.skip_blanks();
            if self.reader.read() != Some('=') {
                return self.fail(ParseErrorKind::Expected('='));
            }
            self.reader.skip_blanks();
            let value = self.read_label_value()?;

            if consume_bound && name == "le" {
                out.bucket_bound = Some(self.parse_bucket_bound(&value)?);
            } else if consume_quantile && name == "quantile" {
                match value.parse::<f64>() {
                    Ok(q) => out.quantile = Some(q),
                    Err(_) => return self.fail(ParseErrorKind::InvalidQuantile(value)),
                }
            } else {
                out.labels.push(LabelPair { name, value });
            }

            self.reader.skip_blanks();
            match self.reader.read() {
                Some(',') => continue,
                Some('}') => return Ok(out),
                Some(_) => return self.fail(ParseErrorKind::ExpectedLabelSeparator),
                None => return self.fail(ParseErrorKind::UnexpectedEof),
            }
        }
    }

    fn parse_bucket_bound(&self, value: &str) -> Result<f64, ParseError> {
        if value == "+Inf" {
            return Ok(f64::INFINITY);
        }
        match value.parse::<f64>() {
            Ok(bound) => Ok(bound),
            Err(_) => self.fail(ParseErrorKind::InvalidBucketBound(value.to_string())),
        }
    }

    /// Whitespace-terminated value token. `+Inf`, `-Inf` and `Nan` (exactly
    /// this spelling) name the IEEE specials; anything else must be an f64.
    fn parse_value(&mut self) -> Result<f64, ParseError> {
        let token = self.reader.read_until(&[' ', '\t', '\n']);
        if token == "+Inf" {
            return Ok(f64::INFINITY);
        }
        if token == "-Inf" {
            return Ok(f64::NEG_INFINITY);
        }
        if token == "Nan" {
            return Ok(f64::NAN);
        }
        match token.parse::<f64>() {
            Ok(value) => Ok(value),
            Err(_) => self.fail(ParseErrorKind::InvalidValue(token)),
        }
    }

    fn parse_timestamp(&mut self) -> Result<i64, ParseError> {
        let token = self.reader.read_until(&[' ', '\t', '\n']);
        match token.parse::<i64>() {
            Ok(timestamp) => Ok(timestamp),
            Err(_) => self.fail(ParseErrorKind::InvalidTimestamp(token)),
        }
    }
}

fn strip_suffix<'n>(name: &'n str, suffix: &str) -> Option<&'n str> {
    if name.len() > suffix.len() {
        name.strip_suffix(suffix)
    } else {
        None
    }
}

fn is_metric_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_metric_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_label_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_label_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
