// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use graphite_metrics::pipeline::queue::QueuePolicy;
use std::path::PathBuf;
use std::time::Duration;

// Paths served by the web server that the metrics path may not shadow.
const RESERVED_PATHS: &[&str] = &["/", "/healthcheck", "/log_filter"];

//
// QueueOverflow
//

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum QueueOverflow {
  Block,
  #[value(name = "drop_newest")]
  DropNewest,
}

//
// Options
//

#[derive(Parser, Debug, Clone)]
#[command(
  name = "graphite-exporter",
  about = "Accepts Graphite plaintext samples and exposes them for Prometheus scrapes",
  disable_version_flag = true
)]
pub struct Options {
  /// Address on which to expose metrics and the web interface.
  #[arg(
    long = "web.listen-address",
    env = "GRAPHITE_EXPORTER_WEB_LISTEN_ADDRESS",
    default_value = ":9108"
  )]
  pub web_listen_address: String,

  /// Path under which to expose metrics.
  #[arg(
    long = "web.telemetry-path",
    env = "GRAPHITE_EXPORTER_WEB_TELEMETRY_PATH",
    default_value = "/metrics"
  )]
  pub metrics_path: String,

  /// TCP and UDP address on which to accept samples.
  #[arg(
    long = "graphite.listen-address",
    env = "GRAPHITE_EXPORTER_LISTEN_ADDRESS",
    default_value = ":9109"
  )]
  pub graphite_address: String,

  /// Metric mapping configuration file.
  #[arg(long = "graphite.mapping-config", env = "GRAPHITE_EXPORTER_MAPPING_CONFIG")]
  pub mapping_config: Option<PathBuf>,

  /// How long a sample is valid for.
  #[arg(
    long = "graphite.sample-expiry",
    env = "GRAPHITE_EXPORTER_SAMPLE_EXPIRY",
    default_value = "5m",
    value_parser = humantime::parse_duration
  )]
  pub sample_expiry: Duration,

  /// Only store metrics matched by the mapping configuration.
  #[arg(long = "graphite.mapping-strict-match")]
  pub strict_match: bool,

  /// Bound the queue between the network readers and the line parser.
  #[arg(long = "graphite.ingest-queue-capacity")]
  pub ingest_queue_capacity: Option<usize>,

  /// What readers do when the bounded ingest queue is full.
  #[arg(
    long = "graphite.ingest-queue-policy",
    value_enum,
    default_value_t = QueueOverflow::Block
  )]
  pub ingest_queue_policy: QueueOverflow,

  /// Maximum number of distinct series kept. New series beyond this are rejected.
  #[arg(long = "graphite.max-series")]
  pub max_series: Option<usize>,

  /// Close TCP connections that send nothing for this long.
  #[arg(long = "graphite.tcp-idle-timeout", value_parser = humantime::parse_duration)]
  pub tcp_idle_timeout: Option<Duration>,

  /// Write the mapping glob automaton in DOT format to this file and exit.
  #[arg(long = "debug.dump-fsm")]
  pub dump_fsm: Option<PathBuf>,

  /// Print version information and exit.
  #[arg(long = "version")]
  pub version: bool,
}

impl Options {
  pub fn validate(&self) -> anyhow::Result<()> {
    if !self.metrics_path.starts_with('/') {
      bail!(
        "web.telemetry-path '{}' must start with '/'",
        self.metrics_path
      );
    }
    if RESERVED_PATHS.contains(&self.metrics_path.as_str()) {
      bail!(
        "web.telemetry-path '{}' is reserved by the web server",
        self.metrics_path
      );
    }
    if self.sample_expiry.is_zero() {
      bail!("graphite.sample-expiry must be greater than zero");
    }
    if self.ingest_queue_capacity == Some(0) {
      bail!("graphite.ingest-queue-capacity must be greater than zero");
    }
    if self.max_series == Some(0) {
      bail!("graphite.max-series must be greater than zero");
    }
    if self.tcp_idle_timeout.is_some_and(|timeout| timeout.is_zero()) {
      bail!("graphite.tcp-idle-timeout must be greater than zero");
    }
    Ok(())
  }

  #[must_use]
  pub fn queue_policy(&self) -> QueuePolicy {
    match (self.ingest_queue_capacity, self.ingest_queue_policy) {
      (None, _) => QueuePolicy::Unbounded,
      (Some(capacity), QueueOverflow::Block) => QueuePolicy::Block(capacity),
      (Some(capacity), QueueOverflow::DropNewest) => QueuePolicy::DropNewest(capacity),
    }
  }
}
