// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./exporter_test.rs"]
mod exporter_test;

use crate::pipeline::store::SampleStore;
use crate::pipeline::time::TimeProvider;
use crate::protos::graphite::Sample;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge as GaugeProto, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Gauge, Opts};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::Duration;

pub const LAST_PROCESSED_NAME: &str = "graphite_last_processed_timestamp_seconds";
pub const SAMPLE_EXPIRY_NAME: &str = "graphite_sample_expiry_seconds";
pub const BUILD_INFO_NAME: &str = "graphite_exporter_build_info";

#[must_use]
pub fn last_processed_gauge() -> Gauge {
  Gauge::with_opts(Opts::new(
    LAST_PROCESSED_NAME,
    "Unix timestamp of the last processed graphite metric.",
  ))
  .unwrap()
}

#[must_use]
pub fn sample_expiry_gauge(expiry: Duration) -> Gauge {
  let gauge = Gauge::with_opts(Opts::new(
    SAMPLE_EXPIRY_NAME,
    "How long in seconds a metric sample is valid for.",
  ))
  .unwrap();
  gauge.set(expiry.as_seconds_f64());
  gauge
}

// Constant 1, labeled with the version the binary was built from.
#[must_use]
pub fn build_info_gauge(version: &str) -> Gauge {
  let gauge = Gauge::with_opts(
    Opts::new(
      BUILD_INFO_NAME,
      "A metric with a constant '1' value labeled by the version from which graphite_exporter was \
       built.",
    )
    .const_label("version", version),
  )
  .unwrap();
  gauge.set(1.0);
  gauge
}

//
// GraphiteCollector
//

// Scrape-time view of the sample store. Per-sample metrics are built on every collect() and never
// registered, so their names may change from scrape to scrape.
pub struct GraphiteCollector {
  store: Arc<SampleStore>,
  expiry: Duration,
  time_provider: Arc<dyn TimeProvider>,
  last_processed: Gauge,
}

impl GraphiteCollector {
  #[must_use]
  pub fn new(
    store: Arc<SampleStore>,
    expiry: Duration,
    time_provider: Arc<dyn TimeProvider>,
    last_processed: Gauge,
  ) -> Self {
    Self {
      store,
      expiry,
      time_provider,
      last_processed,
    }
  }

  fn sample_metric(sample: &Sample) -> Metric {
    let labels = sample
      .labels
      .iter()
      .map(|(name, value)| {
        let mut label = LabelPair::default();
        label.set_name(name.clone());
        label.set_value(value.clone());
        label
      })
      .collect();
    let mut gauge = GaugeProto::default();
    gauge.set_value(sample.value);
    let mut metric = Metric::default();
    metric.set_label(labels);
    metric.set_gauge(gauge);
    metric
  }
}

impl Collector for GraphiteCollector {
  fn desc(&self) -> Vec<&Desc> {
    self.last_processed.desc()
  }

  fn collect(&self) -> Vec<MetricFamily> {
    let mut families = self.last_processed.collect();

    let now = self.time_provider.now_utc();
    let mut grouped: BTreeMap<String, MetricFamily> = BTreeMap::new();
    for sample in self.store.snapshot() {
      if now - sample.timestamp >= self.expiry {
        continue;
      }
      grouped
        .entry(sample.name.clone())
        .or_insert_with(|| {
          let mut family = MetricFamily::default();
          family.set_name(sample.name.clone());
          family.set_help(sample.help.clone());
          family.set_field_type(MetricType::GAUGE);
          family
        })
        .mut_metric()
        .push(Self::sample_metric(&sample));
    }

    families.extend(grouped.into_values());
    families
  }
}
