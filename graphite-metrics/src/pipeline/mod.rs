// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod inflow;
pub mod line;
pub mod queue;
pub mod store;
pub mod time;

use self::line::LineProcessor;
use self::queue::{IngestReceiver, IngestSender, QueuePolicy, ingest_queue};
use self::store::SampleStore;
use self::time::TimeProvider;
use crate::protos::graphite::Sample;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use bd_shutdown::{ComponentShutdown, ComponentShutdownTriggerHandle};
use bytes::Bytes;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval_at};

const SAMPLE_QUEUE_SIZE: usize = 1024;

//
// LineDispatch
//

/// Hands raw protocol lines from the network readers to the line stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineDispatch: Send + Sync {
  async fn send(&self, lines: Vec<Bytes>);
}

//
// PipelineConfig
//

#[derive(Clone, Debug)]
pub struct PipelineConfig {
  pub queue_policy: QueuePolicy,
  pub sample_expiry: ::time::Duration,
  pub sweep_interval: std::time::Duration,
}

//
// IngestPipeline
//

// Two single consumer stages. The line stage parses and maps lines in arrival order and hands
// samples to the sample stage, which is the only writer of the store and also runs the periodic
// expiry sweep.
pub struct IngestPipeline {
  config: PipelineConfig,
  dispatcher: Arc<IngestSender>,
  receiver: Mutex<Option<IngestReceiver>>,
  processor: Arc<LineProcessor>,
  store: Arc<SampleStore>,
  time_provider: Arc<dyn TimeProvider>,
}

impl IngestPipeline {
  #[must_use]
  pub fn new(
    config: PipelineConfig,
    processor: LineProcessor,
    store: Arc<SampleStore>,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
  ) -> Self {
    let (dispatcher, receiver) = ingest_queue(config.queue_policy, scope);
    Self {
      config,
      dispatcher: Arc::new(dispatcher),
      receiver: Mutex::new(Some(receiver)),
      processor: Arc::new(processor),
      store,
      time_provider,
    }
  }

  #[must_use]
  pub fn dispatcher(&self) -> Arc<dyn LineDispatch> {
    self.dispatcher.clone()
  }

  #[must_use]
  pub const fn store(&self) -> &Arc<SampleStore> {
    &self.store
  }

  // Spawn both stages. Must only be called once.
  pub fn start(&self, shutdown_trigger_handle: &ComponentShutdownTriggerHandle) {
    let Some(receiver) = self.receiver.lock().take() else {
      debug_assert!(false, "pipeline already started");
      return;
    };
    let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_SIZE);

    tokio::spawn(run_line_stage(
      receiver,
      self.processor.clone(),
      sample_tx,
      shutdown_trigger_handle.make_shutdown(),
    ));
    tokio::spawn(run_sample_stage(
      sample_rx,
      self.store.clone(),
      self.time_provider.clone(),
      self.config.clone(),
      shutdown_trigger_handle.make_shutdown(),
    ));
    info!(
      "ingest pipeline started (queue policy: {:?})",
      self.config.queue_policy
    );
  }
}

async fn run_line_stage(
  mut receiver: IngestReceiver,
  processor: Arc<LineProcessor>,
  sample_tx: mpsc::Sender<Sample>,
  mut shutdown: ComponentShutdown,
) {
  loop {
    tokio::select! {
      line = receiver.recv() => {
        let Some(line) = line else {
          break;
        };
        if let Some(sample) = processor.process(&line) {
          if sample_tx.send(sample).await.is_err() {
            break;
          }
        }
      },
      () = shutdown.cancelled() => break,
    }
  }
  debug!("line stage terminated");
  drop(shutdown);
}

async fn run_sample_stage(
  mut sample_rx: mpsc::Receiver<Sample>,
  store: Arc<SampleStore>,
  time_provider: Arc<dyn TimeProvider>,
  config: PipelineConfig,
  mut shutdown: ComponentShutdown,
) {
  let mut sweep = interval_at(
    tokio::time::Instant::now() + config.sweep_interval,
    config.sweep_interval,
  );
  sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      sample = sample_rx.recv() => {
        let Some(sample) = sample else {
          break;
        };
        store.upsert(sample);
      },
      _ = sweep.tick() => {
        store.sweep(time_provider.now_utc(), config.sample_expiry);
      },
      () = shutdown.cancelled() => break,
    }
  }
  debug!("sample stage terminated");
  drop(shutdown);
}
