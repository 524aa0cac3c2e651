// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./queue_test.rs"]
mod queue_test;

use super::LineDispatch;
use async_trait::async_trait;
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use bytes::Bytes;
use prometheus::IntCounter;
use time::ext::NumericalDuration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

//
// QueuePolicy
//

// How readers hand lines to the line stage when it falls behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueuePolicy {
  // Never blocks or drops. Memory grows with the backlog.
  #[default]
  Unbounded,
  // Readers wait for space. A stalled TCP reader only delays its own connection.
  Block(usize),
  // The incoming line is discarded and counted when the queue is full.
  DropNewest(usize),
}

pub(super) fn ingest_queue(policy: QueuePolicy, scope: &Scope) -> (IngestSender, IngestReceiver) {
  match policy {
    QueuePolicy::Unbounded => {
      let (tx, rx) = mpsc::unbounded_channel();
      (IngestSender::Unbounded(tx), IngestReceiver::Unbounded(rx))
    },
    QueuePolicy::Block(capacity) | QueuePolicy::DropNewest(capacity) => {
      let (tx, rx) = mpsc::channel(capacity.max(1));
      (
        IngestSender::Bounded {
          tx,
          drop_newest: matches!(policy, QueuePolicy::DropNewest(_)),
          dropped: scope.counter("dropped_total"),
        },
        IngestReceiver::Bounded(rx),
      )
    },
  }
}

//
// IngestSender
//

pub(super) enum IngestSender {
  Unbounded(mpsc::UnboundedSender<Bytes>),
  Bounded {
    tx: mpsc::Sender<Bytes>,
    drop_newest: bool,
    dropped: IntCounter,
  },
}

#[async_trait]
impl LineDispatch for IngestSender {
  async fn send(&self, lines: Vec<Bytes>) {
    for line in lines {
      // Send only fails once the line stage is gone during shutdown.
      match self {
        Self::Unbounded(tx) => {
          let _ignored = tx.send(line);
        },
        Self::Bounded {
          tx,
          drop_newest: false,
          ..
        } => {
          let _ignored = tx.send(line).await;
        },
        Self::Bounded {
          tx,
          drop_newest: true,
          dropped,
        } => match tx.try_send(line) {
          Ok(()) | Err(TrySendError::Closed(_)) => {},
          Err(TrySendError::Full(_)) => {
            warn_every!(15.seconds(), "ingest queue full, dropping lines");
            dropped.inc();
          },
        },
      }
    }
  }
}

//
// IngestReceiver
//

pub(super) enum IngestReceiver {
  Unbounded(mpsc::UnboundedReceiver<Bytes>),
  Bounded(mpsc::Receiver<Bytes>),
}

impl IngestReceiver {
  pub(super) async fn recv(&mut self) -> Option<Bytes> {
    match self {
      Self::Unbounded(rx) => rx.recv().await,
      Self::Bounded(rx) => rx.recv().await,
    }
  }
}
