// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::util::{SocketHandler, SocketServerStats};
use super::{InflowFactoryContext, PipelineInflow};
use crate::pipeline::LineDispatch;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use bd_shutdown::{ComponentShutdown, ComponentShutdownTriggerHandle};
use graphite_common::bind_resolver::BoundTcpSocket;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use time::Duration;
use tokio::net::TcpListener;
use tokio::select;

//
// TcpInflow
//

pub struct TcpInflow {
  scope: Scope,
  dispatcher: Arc<dyn LineDispatch>,
  shutdown_trigger_handle: ComponentShutdownTriggerHandle,
  socket: Mutex<Option<BoundTcpSocket>>,
  local_addr: SocketAddr,
  idle_timeout: Option<Duration>,
}

impl TcpInflow {
  pub async fn new(
    bind: &str,
    idle_timeout: Option<Duration>,
    context: InflowFactoryContext,
  ) -> anyhow::Result<Self> {
    let socket = context.bind_resolver.resolve_tcp(bind).await?;
    let local_addr = socket.local_addr();
    info!("graphite tcp server running on {local_addr}");
    Ok(Self {
      scope: context.scope,
      dispatcher: context.dispatcher,
      shutdown_trigger_handle: context.shutdown_trigger_handle,
      socket: Mutex::new(Some(socket)),
      local_addr,
      idle_timeout,
    })
  }

  #[must_use]
  pub const fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }
}

#[async_trait]
impl PipelineInflow for TcpInflow {
  async fn start(self: Arc<Self>) {
    let Some(socket) = self.socket.lock().take() else {
      warn!("tcp inflow on {} already started", self.local_addr);
      return;
    };
    let stats = SocketServerStats::new(&self.scope);

    tokio::spawn(accept_tcp_connections(
      stats,
      socket.listen(),
      self.local_addr,
      self.dispatcher.clone(),
      self.idle_timeout,
      self.shutdown_trigger_handle.make_shutdown(),
    ));
  }
}

async fn accept_tcp_connections(
  stats: SocketServerStats,
  listener: TcpListener,
  local_addr: SocketAddr,
  dispatcher: Arc<dyn LineDispatch>,
  idle_timeout: Option<Duration>,
  mut shutdown: ComponentShutdown,
) {
  loop {
    select! {
      res = listener.accept() => {
        match res {
          Ok((socket, peer_addr)) => {
            debug!("accepted tcp connection from {peer_addr}");
            stats.accepts.inc();
            tokio::spawn(SocketHandler::new(
              stats.clone(),
              peer_addr,
              dispatcher.clone(),
              idle_timeout,
            ).run(socket, shutdown.clone()));
          }
          Err(e) => {
            warn!("tcp accept error: {e}");
            stats.accept_failures.inc();
          }
        }
      },
      () = shutdown.cancelled() => {
        break;
      },
    };
  }
  info!("terminated graphite tcp server running on {local_addr}");
  drop(shutdown);
}
