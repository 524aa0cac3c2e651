// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./graphite_test.rs"]
mod graphite_test;

use crate::mapper::MetricKind;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;
use time::OffsetDateTime;

static INVALID_NAME_CHARS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new("[^a-zA-Z0-9_:]").unwrap());

// Errors that arise while parsing a plaintext line.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
  #[error("line is not valid utf-8")]
  InvalidUtf8,
  #[error("expected 3 fields (name value timestamp), found {0}")]
  FieldCount(usize),
  #[error("invalid value '{0}'")]
  InvalidValue(String),
  #[error("invalid timestamp '{0}'")]
  InvalidTimestamp(String),
  #[error("timestamp {0} is out of range")]
  TimestampOutOfRange(f64),
}

// Replace every character that is not valid in an exposition metric name with '_'.
#[must_use]
pub fn sanitize_name(name: &str) -> Cow<'_, str> {
  INVALID_NAME_CHARS.replace_all(name, "_")
}

#[must_use]
pub fn help_text(exposed_name: &str) -> String {
  format!("Graphite metric {exposed_name}")
}

//
// RawLine
//

// A syntactically valid line before mapping.
#[derive(Debug, PartialEq)]
pub struct RawLine<'a> {
  pub name: &'a str,
  pub value: f64,
  pub timestamp: OffsetDateTime,
}

// Parses "<name> <value> <timestamp>". Surrounding whitespace is trimmed and any run of whitespace
// separates fields.
pub fn parse_line(line: &[u8]) -> Result<RawLine<'_>, ParseError> {
  let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidUtf8)?;
  let fields: Vec<&str> = line.split_whitespace().collect();
  let [name, value, timestamp] = fields.as_slice() else {
    return Err(ParseError::FieldCount(fields.len()));
  };

  let value: f64 = value
    .parse()
    .map_err(|_| ParseError::InvalidValue((*value).to_string()))?;
  let timestamp = parse_timestamp(
    timestamp
      .parse()
      .map_err(|_| ParseError::InvalidTimestamp((*timestamp).to_string()))?,
  )?;

  Ok(RawLine {
    name: *name,
    value,
    timestamp,
  })
}

// Integer part becomes seconds, the fractional part is truncated to nanoseconds.
pub fn parse_timestamp(timestamp: f64) -> Result<OffsetDateTime, ParseError> {
  if !timestamp.is_finite() {
    return Err(ParseError::TimestampOutOfRange(timestamp));
  }
  let seconds = timestamp.trunc();
  #[allow(clippy::cast_possible_truncation)]
  let nanos = ((timestamp - seconds) * 1e9) as i64;
  #[allow(clippy::cast_possible_truncation)]
  let unix_nanos = i128::from(seconds as i64) * 1_000_000_000 + i128::from(nanos);
  // Seconds outside of i64 saturate above, which the date range check then rejects.
  OffsetDateTime::from_unix_timestamp_nanos(unix_nanos)
    .map_err(|_| ParseError::TimestampOutOfRange(timestamp))
}

//
// Sample
//

// A parsed, mapped value ready for the store. Keyed in the store by `original_name`.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
  pub original_name: String,
  pub name: String,
  pub labels: BTreeMap<String, String>,
  pub help: String,
  pub value: f64,
  pub kind: MetricKind,
  pub timestamp: OffsetDateTime,
}
