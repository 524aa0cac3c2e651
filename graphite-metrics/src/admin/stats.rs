// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./stats_test.rs"]
mod stats_test;

use bd_server_stats::stats::Collector;
use prometheus::core::Collector as PromCollector;
use prometheus::{Registry, TextEncoder};

//
// StatsProvider
//

// Everything served on the metrics path. Internal stats are created through scopes of the
// collector. Collectors that build their families at scrape time (the sample exporter, process
// stats) and fixed gauges live in a separate registry that is gathered alongside it.
#[derive(Clone, Default)]
pub struct StatsProvider {
  collector: Collector,
  scrape_registry: Registry,
}

impl StatsProvider {
  #[must_use]
  pub const fn collector(&self) -> &Collector {
    &self.collector
  }

  // A failure here means two components claimed the same metric name.
  pub fn register(&self, collector: Box<dyn PromCollector>) -> anyhow::Result<()> {
    self.scrape_registry.register(collector)?;
    Ok(())
  }

  // Render everything in the Prometheus text exposition format. Both halves are text encoded
  // families so they can be concatenated.
  pub fn prometheus_output(&self) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&self.scrape_registry.gather(), &mut buffer)?;
    buffer.extend(self.collector.prometheus_output());
    Ok(buffer)
  }
}
