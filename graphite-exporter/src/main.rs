// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use bd_server_stats::stats::Collector;
use clap::Parser;
use graphite_common::bind_resolver::RealBindResolver;
use graphite_common::global_initialize;
use graphite_exporter::config::Options;
use graphite_exporter::{ServerHooks, VERSION, run_server};
use log::info;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};

struct NullHooks {}

#[async_trait::async_trait]
impl ServerHooks for NullHooks {
  async fn server_started(&self, _collector: Collector) {}
}

fn main() -> anyhow::Result<()> {
  global_initialize();
  let options = Options::parse();

  if options.version {
    println!("graphite-exporter: {VERSION}");
    return Ok(());
  }
  info!("graphite-exporter starting: {VERSION}");

  let num_threads = std::thread::available_parallelism().unwrap_or_else(|_| {
    log::warn!("could not determine number of CPUs. Defaulting to 1");
    NonZeroUsize::MIN
  });
  log::info!("running server with {num_threads} workers");
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(num_threads.into())
    .enable_all()
    .build()?;

  let result = runtime.block_on(async {
    run_server(
      options,
      || async {
        // Trap ctrl+c and sigterm messages and perform a clean shutdown
        let (Ok(mut sigint), Ok(mut sigterm)) = (
          signal(SignalKind::interrupt()),
          signal(SignalKind::terminate()),
        ) else {
          log::error!("unable to install signal handlers, running until killed");
          return std::future::pending().await;
        };
        select! {
          _ = sigint.recv() => info!("received sigint"),
          _ = sigterm.recv() => info!("received sigterm"),
        }
      },
      NullHooks {},
      Arc::new(RealBindResolver {}),
    )
    .await
  });

  if let Err(e) = &result {
    log::error!("fatal error: {e:#}");
  }
  result
}
