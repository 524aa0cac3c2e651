// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::mapper::MetricKind;
use crate::protos::graphite::{Sample, help_text, sanitize_name};
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[must_use]
pub fn make_sample(original_name: &str, value: f64, unix_seconds: i64) -> Sample {
  make_sample_with_labels(original_name, &[], value, unix_seconds)
}

#[must_use]
pub fn make_sample_with_labels(
  original_name: &str,
  labels: &[(&str, &str)],
  value: f64,
  unix_seconds: i64,
) -> Sample {
  let name = sanitize_name(original_name).into_owned();
  Sample {
    original_name: original_name.to_string(),
    help: help_text(&name),
    name,
    labels: labels
      .iter()
      .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
      .collect::<BTreeMap<_, _>>(),
    value,
    kind: MetricKind::Gauge,
    timestamp: OffsetDateTime::from_unix_timestamp(unix_seconds).unwrap(),
  }
}
