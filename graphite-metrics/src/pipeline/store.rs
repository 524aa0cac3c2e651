// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./store_test.rs"]
mod store_test;

use crate::protos::graphite::Sample;
use ahash::AHashMap;
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use std::sync::Arc;
use time::ext::NumericalDuration;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Debug)]
struct StoreStats {
  series: IntGauge,
  evicted: IntCounter,
  rejected: IntCounter,
}

impl StoreStats {
  fn new(scope: &Scope) -> Self {
    Self {
      series: scope.gauge("series"),
      evicted: scope.counter("evicted_total"),
      rejected: scope.counter("rejected_total"),
    }
  }
}

//
// SampleStore
//

// Latest sample per original series name. Writes come only from the sample stage; scrapes copy
// the map under the lock and do all other work outside of it.
pub struct SampleStore {
  samples: Mutex<AHashMap<String, Arc<Sample>>>,
  max_series: Option<usize>,
  stats: StoreStats,
}

impl SampleStore {
  #[must_use]
  pub fn new(scope: &Scope, max_series: Option<usize>) -> Self {
    Self {
      samples: Mutex::default(),
      max_series,
      stats: StoreStats::new(scope),
    }
  }

  // Last write wins: the payload timestamp is not compared. Returns false if the sample was
  // rejected because it would add a series beyond the configured cap.
  pub fn upsert(&self, sample: Sample) -> bool {
    let mut samples = self.samples.lock();
    if let Some(existing) = samples.get_mut(&sample.original_name) {
      *existing = Arc::new(sample);
      return true;
    }

    if self.max_series.is_some_and(|max| samples.len() >= max) {
      self.stats.rejected.inc();
      warn_every!(
        1.minutes(),
        "series limit reached, rejecting new series '{}'",
        sample.original_name
      );
      return false;
    }

    samples.insert(sample.original_name.clone(), Arc::new(sample));
    self.stats.series.set(samples.len().try_into().unwrap_or(i64::MAX));
    true
  }

  // Remove every sample whose timestamp is older than `now - expiry`. Returns the number evicted.
  // An expiry reaching past the earliest representable time expires nothing.
  pub fn sweep(&self, now: OffsetDateTime, expiry: Duration) -> usize {
    let Some(cutoff) = now.checked_sub(expiry) else {
      return 0;
    };
    let mut samples = self.samples.lock();
    let before = samples.len();
    samples.retain(|_, sample| sample.timestamp >= cutoff);
    let evicted = before - samples.len();
    self.stats.series.set(samples.len().try_into().unwrap_or(i64::MAX));
    drop(samples);

    if evicted > 0 {
      log::debug!("evicted {evicted} expired series");
      self.stats.evicted.inc_by(evicted as u64);
    }
    evicted
  }

  #[must_use]
  pub fn snapshot(&self) -> Vec<Arc<Sample>> {
    self.samples.lock().values().cloned().collect()
  }

  #[must_use]
  pub fn get(&self, original_name: &str) -> Option<Arc<Sample>> {
    self.samples.lock().get(original_name).cloned()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.samples.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
