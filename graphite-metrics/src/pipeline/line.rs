// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./line_test.rs"]
mod line_test;

use super::time::TimeProvider;
use crate::mapper::{MappingAction, MetricKind, MetricMapper};
use crate::protos::graphite::{Sample, help_text, parse_line, sanitize_name};
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use graphite_common::LossyIntoToFloat;
use prometheus::{Gauge, IntCounter, labels};
use std::sync::Arc;
use time::ext::NumericalDuration;

#[derive(Clone, Debug)]
struct LineStats {
  unparsable: IntCounter,
  dropped_by_action: IntCounter,
  dropped_by_strict_match: IntCounter,
  dropped_invalid_name: IntCounter,
}

impl LineStats {
  fn new(scope: &Scope) -> Self {
    Self {
      unparsable: scope.counter("unparsable_total"),
      dropped_by_action: dropped_counter(scope, "drop_action"),
      dropped_by_strict_match: dropped_counter(scope, "strict_match"),
      dropped_invalid_name: dropped_counter(scope, "invalid_name"),
    }
  }
}

fn dropped_counter(scope: &Scope, reason: &str) -> IntCounter {
  scope.counter_with_labels(
    "dropped_total",
    labels! { "reason".to_string() => reason.to_string() },
  )
}

//
// LineProcessor
//

// Turns a raw line into a mapped sample. Every failure is counted and logged at a limited rate;
// nothing is returned to the caller as an error.
pub struct LineProcessor {
  mapper: Arc<dyn MetricMapper>,
  strict_match: bool,
  time_provider: Arc<dyn TimeProvider>,
  last_processed: Gauge,
  stats: LineStats,
}

impl LineProcessor {
  #[must_use]
  pub fn new(
    mapper: Arc<dyn MetricMapper>,
    strict_match: bool,
    time_provider: Arc<dyn TimeProvider>,
    last_processed: Gauge,
    scope: &Scope,
  ) -> Self {
    Self {
      mapper,
      strict_match,
      time_provider,
      last_processed,
      stats: LineStats::new(scope),
    }
  }

  pub fn process(&self, line: &[u8]) -> Option<Sample> {
    let parsed = match parse_line(line) {
      Ok(parsed) => parsed,
      Err(e) => {
        warn_every!(
          15.seconds(),
          "invalid line {:?}: {}",
          String::from_utf8_lossy(line),
          e
        );
        self.stats.unparsable.inc();
        return None;
      },
    };

    let (name, labels) = match self.mapper.lookup(parsed.name, MetricKind::Gauge) {
      Some(mapping) if mapping.action == MappingAction::Drop => {
        log::trace!("dropping '{}' by mapping action", parsed.name);
        self.stats.dropped_by_action.inc();
        return None;
      },
      Some(mapping) => (sanitize_name(&mapping.name).into_owned(), mapping.labels),
      None if self.strict_match => {
        log::trace!("dropping unmapped '{}' in strict match mode", parsed.name);
        self.stats.dropped_by_strict_match.inc();
        return None;
      },
      None => (sanitize_name(parsed.name).into_owned(), Default::default()),
    };

    // A template that references missing captures can expand to nothing.
    if name.is_empty() {
      warn_every!(
        15.seconds(),
        "mapping for '{}' produced an empty name",
        parsed.name
      );
      self.stats.dropped_invalid_name.inc();
      return None;
    }

    let now = self.time_provider.now_utc();
    self
      .last_processed
      .set(now.unix_timestamp_nanos().lossy_to_f64() / 1e9);

    Some(Sample {
      original_name: parsed.name.to_string(),
      help: help_text(&name),
      name,
      labels,
      value: parsed.value,
      kind: MetricKind::Gauge,
      timestamp: parsed.timestamp,
    })
  }
}
