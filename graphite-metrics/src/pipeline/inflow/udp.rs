// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::util::process_buffer_newlines;
use super::{InflowFactoryContext, PipelineInflow};
use crate::pipeline::LineDispatch;
use async_trait::async_trait;
use bd_log::warn_every;
use bd_server_stats::stats::Scope;
use bd_shutdown::{ComponentShutdown, ComponentShutdownTriggerHandle};
use bytes::BytesMut;
use log::{info, warn};
use parking_lot::Mutex;
use prometheus::IntCounter;
use std::net::SocketAddr;
use std::sync::Arc;
use time::ext::NumericalDuration;
use tokio::net::UdpSocket;
use tokio::select;

const MAX_DATAGRAM_SIZE: usize = 65536;

#[derive(Clone, Debug)]
struct UdpServerStats {
  incoming_bytes: IntCounter,
  packets: IntCounter,
  read_errors: IntCounter,
}

impl UdpServerStats {
  fn new(stats: &Scope) -> Self {
    Self {
      incoming_bytes: stats.counter("incoming_bytes_total"),
      packets: stats.counter("packets_total"),
      read_errors: stats.counter("read_errors_total"),
    }
  }
}

//
// UdpInflow
//

pub struct UdpInflow {
  stats: UdpServerStats,
  dispatcher: Arc<dyn LineDispatch>,
  shutdown_trigger_handle: ComponentShutdownTriggerHandle,
  socket: Mutex<Option<UdpSocket>>,
  local_addr: SocketAddr,
}

impl UdpInflow {
  pub async fn new(bind: &str, context: InflowFactoryContext) -> anyhow::Result<Self> {
    let socket = context.bind_resolver.resolve_udp(bind).await?;
    let local_addr = socket.local_addr()?;
    info!("graphite udp server running on {local_addr}");
    Ok(Self {
      stats: UdpServerStats::new(&context.scope),
      dispatcher: context.dispatcher,
      shutdown_trigger_handle: context.shutdown_trigger_handle,
      socket: Mutex::new(Some(socket)),
      local_addr,
    })
  }

  #[must_use]
  pub const fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

#[async_trait]
impl PipelineInflow for UdpInflow {
  async fn start(self: Arc<Self>) {
    let Some(socket) = self.socket.lock().take() else {
      warn!("udp inflow on {} already started", self.local_addr);
      return;
    };

    tokio::spawn(udp_reader(
      self.stats.clone(),
      socket,
      self.local_addr,
      self.dispatcher.clone(),
      self.shutdown_trigger_handle.make_shutdown(),
    ));
  }
}

async fn udp_reader(
  stats: UdpServerStats,
  socket: UdpSocket,
  local_addr: SocketAddr,
  dispatcher: Arc<dyn LineDispatch>,
  mut shutdown: ComponentShutdown,
) {
  let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);
  loop {
    select! {
      res = socket.recv_from(&mut buf) => {
        match res {
          Ok((bytes, peer_addr)) => {
            log::trace!("udp recv from={peer_addr} len={bytes}");
            stats.packets.inc();
            stats.incoming_bytes.inc_by(bytes as u64);
            let mut packet = buf.split_to(bytes);
            buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
              let lines = process_buffer_newlines(&mut packet, false);
              debug_assert!(packet.is_empty());
              dispatcher.send(lines).await;
            });
          },
          Err(e) => {
            warn_every!(15.seconds(), "udp receiver error: {}", e);
            stats.read_errors.inc();
          },
        }
      }
      () = shutdown.cancelled() => {
        break;
      }
    }
  }
  info!("terminated graphite udp server running on {local_addr}");
  drop(shutdown);
}
