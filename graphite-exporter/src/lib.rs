// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

#[cfg(test)]
mod test;

use anyhow::{Context, anyhow};
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use config::Options;
use graphite_common::bind_resolver::BindResolver;
use graphite_metrics::admin::server::AdminState;
use graphite_metrics::admin::stats::StatsProvider;
use graphite_metrics::exporter::{
  GraphiteCollector,
  build_info_gauge,
  last_processed_gauge,
  sample_expiry_gauge,
};
use graphite_metrics::mapper::config::MapperConfig;
use graphite_metrics::mapper::{GlobMapper, MetricMapper};
use graphite_metrics::pipeline::inflow::tcp::TcpInflow;
use graphite_metrics::pipeline::inflow::udp::UdpInflow;
use graphite_metrics::pipeline::inflow::{InflowFactoryContext, PipelineInflow};
use graphite_metrics::pipeline::line::LineProcessor;
use graphite_metrics::pipeline::store::SampleStore;
use graphite_metrics::pipeline::time::{RealTimeProvider, TimeProvider};
use graphite_metrics::pipeline::{IngestPipeline, PipelineConfig};
use log::info;
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use time::ext::NumericalStdDuration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use graphite_common::global_initialize;

  global_initialize();
}

//
// ServerHooks
//

#[async_trait::async_trait]
pub trait ServerHooks {
  async fn server_started(&self, collector: Collector);
}

fn load_mapper(options: &Options) -> anyhow::Result<Arc<dyn MetricMapper>> {
  Ok(match &options.mapping_config {
    Some(path) => Arc::new(MapperConfig::load_from_file(path)?),
    None => Arc::new(GlobMapper::default()),
  })
}

fn dump_fsm(mapper: &dyn MetricMapper, path: &Path) -> anyhow::Result<()> {
  let file = std::fs::File::create(path)
    .with_context(|| format!("unable to create fsm dump file '{}'", path.display()))?;
  let mut writer = BufWriter::new(file);
  mapper
    .dump_automaton(&mut writer)
    .and_then(|()| writer.flush())
    .with_context(|| format!("unable to write fsm dump file '{}'", path.display()))?;
  Ok(())
}

// Build every component, bind all listeners, then run until `shutdown` resolves. Configuration,
// mapping and bind failures are returned before anything starts serving.
pub async fn run_server<ShutdownFuture: Future<Output = ()>>(
  options: Options,
  shutdown: impl FnOnce() -> ShutdownFuture,
  hooks: impl ServerHooks,
  bind_resolver: Arc<dyn BindResolver>,
) -> anyhow::Result<()> {
  options.validate()?;
  let mapper = load_mapper(&options)?;

  if let Some(path) = &options.dump_fsm {
    dump_fsm(mapper.as_ref(), path)?;
    info!("wrote mapping fsm to '{}', exiting", path.display());
    return Ok(());
  }

  let sample_expiry = time::Duration::try_from(options.sample_expiry)?;
  let stats_provider = StatsProvider::default();
  #[cfg(target_os = "linux")]
  stats_provider
    .register(Box::new(
      prometheus::process_collector::ProcessCollector::for_self(),
    ))
    .context("registering process collector")?;
  stats_provider
    .register(Box::new(sample_expiry_gauge(sample_expiry)))
    .context("registering sample expiry gauge")?;
  stats_provider
    .register(Box::new(build_info_gauge(VERSION)))
    .context("registering build info gauge")?;

  let scope = stats_provider.collector().scope("graphite");
  let time_provider: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider {});
  let last_processed = last_processed_gauge();
  let store = Arc::new(SampleStore::new(
    &scope.scope("store"),
    options.max_series,
  ));
  stats_provider
    .register(Box::new(GraphiteCollector::new(
      store.clone(),
      sample_expiry,
      time_provider.clone(),
      last_processed.clone(),
    )))
    .context("registering graphite collector")?;

  let processor = LineProcessor::new(
    mapper,
    options.strict_match,
    time_provider.clone(),
    last_processed,
    &scope.scope("lines"),
  );
  let pipeline = IngestPipeline::new(
    PipelineConfig {
      queue_policy: options.queue_policy(),
      sample_expiry,
      sweep_interval: 1.std_minutes(),
    },
    processor,
    store,
    time_provider,
    &scope.scope("ingest_queue"),
  );

  let shutdown_trigger = ComponentShutdownTrigger::default();
  let make_context = |name: &str| InflowFactoryContext {
    scope: scope.scope(name),
    dispatcher: pipeline.dispatcher(),
    shutdown_trigger_handle: shutdown_trigger.make_handle(),
    bind_resolver: bind_resolver.clone(),
  };
  let tcp_idle_timeout = options
    .tcp_idle_timeout
    .map(time::Duration::try_from)
    .transpose()?;
  let tcp_inflow = Arc::new(
    TcpInflow::new(
      &options.graphite_address,
      tcp_idle_timeout,
      make_context("tcp"),
    )
    .await
    .with_context(|| format!("unable to bind tcp '{}'", options.graphite_address))?,
  );
  let udp_inflow = Arc::new(
    UdpInflow::new(&options.graphite_address, make_context("udp"))
      .await
      .with_context(|| format!("unable to bind udp '{}'", options.graphite_address))?,
  );
  let admin_server = AdminState::new(
    stats_provider.clone(),
    options.metrics_path.clone(),
    options.graphite_address.clone(),
  )
  .bind(bind_resolver.as_ref(), &options.web_listen_address)
  .await
  .with_context(|| format!("unable to bind web '{}'", options.web_listen_address))?;

  info!("starting ingest pipeline");
  pipeline.start(&shutdown_trigger.make_handle());
  tcp_inflow.start().await;
  udp_inflow.start().await;
  let mut admin_task = tokio::spawn(admin_server.serve(shutdown_trigger.make_shutdown()));
  info!("graphite exporter started");
  hooks.server_started(stats_provider.collector().clone()).await;

  let result = tokio::select! {
    () = shutdown() => Ok(()),
    result = &mut admin_task => match result {
      Ok(Ok(())) => Err(anyhow!("web server exited unexpectedly")),
      Ok(Err(e)) => Err(e.context("web server failed")),
      Err(e) => Err(anyhow!("web server task failed: {e}")),
    },
  };

  shutdown_trigger.shutdown().await;
  info!("runtime terminated");
  result
}
