// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::config::Options;
use crate::{ServerHooks, run_server};
use bd_server_stats::stats::Collector;
use bd_shutdown::ComponentShutdownTrigger;
use bytes::Bytes;
use clap::Parser;
use graphite_common::bind_resolver::{
  BindResolver,
  BoundTcpSocket,
  make_reuse_port_tcp_socket,
  make_reuse_port_udp_socket,
};
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use time::ext::NumericalStdDuration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

mod http;
mod mapping;
mod startup;
mod udp;

pub const WEB: &str = "web";
pub const GRAPHITE: &str = "graphite";

pub fn current_time() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap()
    .as_secs()
}

async fn write_all(stream: &mut TcpStream, lines: &[&str]) {
  for line in lines {
    stream.write_all(line.as_bytes()).await.unwrap();
  }
}

// Returns the status code and body.
async fn make_http_request(addr: SocketAddr, path: &str) -> (u16, String) {
  let client = Client::builder(TokioExecutor::new()).build_http::<Empty<Bytes>>();
  let response = client
    .get(format!("http://{addr}{path}").try_into().unwrap())
    .await
    .unwrap();
  let status = response.status().as_u16();
  let body = String::from_utf8(
    response
      .into_body()
      .collect()
      .await
      .unwrap()
      .to_bytes()
      .to_vec(),
  )
  .unwrap();
  (status, body)
}

//
// HelperHooks
//

// Test startup hooks.
struct HelperHooks {
  tx: mpsc::Sender<Collector>,
}

#[async_trait::async_trait]
impl ServerHooks for HelperHooks {
  async fn server_started(&self, collector: Collector) {
    self.tx.send(collector).await.unwrap();
  }
}

//
// HelperBindResolver
//

// Test implementation of the BindResolver which allows for registering a number of sockets bound
// to port 0, which can then be returned later.
pub struct HelperBindResolver {
  tcp_sockets: Mutex<HashMap<String, BoundTcpSocket>>,
  udp_sockets: Mutex<HashMap<String, UdpSocket>>,
}

impl HelperBindResolver {
  pub async fn new(tcp_names: &[&str], udp_names: &[&str]) -> Arc<Self> {
    let mut tcp_sockets = HashMap::new();
    for name in tcp_names {
      tcp_sockets.insert(
        (*name).to_string(),
        make_reuse_port_tcp_socket("127.0.0.1:0").await.unwrap(),
      );
    }
    let mut udp_sockets = HashMap::new();
    for name in udp_names {
      udp_sockets.insert(
        (*name).to_string(),
        make_reuse_port_udp_socket("127.0.0.1:0").await.unwrap(),
      );
    }

    Arc::new(Self {
      tcp_sockets: Mutex::new(tcp_sockets),
      udp_sockets: Mutex::new(udp_sockets),
    })
  }

  // The web server and graphite listener used by most tests.
  pub async fn standard() -> Arc<Self> {
    Self::new(&[WEB, GRAPHITE], &[GRAPHITE]).await
  }

  pub fn local_tcp_addr(&self, name: &str) -> SocketAddr {
    self
      .tcp_sockets
      .lock()
      .get(name)
      .unwrap_or_else(|| {
        panic!("bind resolver could not find TCP '{name}'. Make sure it is registered.",)
      })
      .local_addr()
  }

  // Note that this removes the socket so that it can be closed. For UDP with reuse port the kernel
  // can distribute packets to this socket so for tests we want to force packets to go to the
  // socket being used by the server.
  pub fn take_udp_addr(&self, name: &str) -> SocketAddr {
    self
      .udp_sockets
      .lock()
      .remove(name)
      .unwrap_or_else(|| {
        panic!("bind resolver could not find UDP '{name}'. Make sure it is registered.",)
      })
      .local_addr()
      .unwrap()
  }
}

#[async_trait::async_trait]
impl BindResolver for HelperBindResolver {
  async fn resolve_tcp(&self, name: &str) -> anyhow::Result<BoundTcpSocket> {
    let local_addr = {
      let tcp_sockets = self.tcp_sockets.lock();
      let socket = tcp_sockets
        .get(name)
        .unwrap_or_else(|| panic!("could not resolve '{name}'. Make sure it is registered."));
      socket.local_addr().to_string()
    };
    make_reuse_port_tcp_socket(&local_addr).await
  }

  async fn resolve_udp(&self, name: &str) -> anyhow::Result<UdpSocket> {
    let local_addr = {
      let udp_sockets = self.udp_sockets.lock();
      let socket = udp_sockets
        .get(name)
        .unwrap_or_else(|| panic!("could not resolve '{name}'. Make sure it is registered."));
      socket.local_addr().unwrap().to_string()
    };
    make_reuse_port_udp_socket(&local_addr).await
  }
}

pub fn make_options(extra_args: &[&str]) -> Options {
  Options::try_parse_from(
    [
      "graphite-exporter",
      "--web.listen-address",
      WEB,
      "--graphite.listen-address",
      GRAPHITE,
    ]
    .into_iter()
    .chain(extra_args.iter().copied()),
  )
  .unwrap()
}

//
// Helper
//

// Integration test helper for running the server.
pub struct Helper {
  shutdown_trigger: Option<ComponentShutdownTrigger>,
  shutdown: bool,
  collector: Collector,
  bind_resolver: Arc<HelperBindResolver>,
  metrics_path: String,
}

impl Drop for Helper {
  fn drop(&mut self) {
    assert!(self.shutdown, "call shutdown() at the end of the test");
  }
}

impl Helper {
  pub async fn new(extra_args: &[&str]) -> Self {
    Self::new_with_bind_resolver(extra_args, HelperBindResolver::standard().await).await
  }

  pub async fn new_with_bind_resolver(
    extra_args: &[&str],
    bind_resolver: Arc<HelperBindResolver>,
  ) -> Self {
    let options = make_options(extra_args);
    let metrics_path = options.metrics_path.clone();
    let shutdown_trigger = ComponentShutdownTrigger::default();
    let mut shutdown = shutdown_trigger.make_shutdown();
    let (tx, mut rx) = mpsc::channel(1);
    let cloned_bind_resolver = bind_resolver.clone();
    tokio::spawn(async move {
      run_server(
        options,
        || shutdown.cancelled(),
        HelperHooks { tx },
        cloned_bind_resolver,
      )
      .await
    });
    let collector = rx.recv().await.unwrap();
    Self {
      shutdown_trigger: Some(shutdown_trigger),
      shutdown: false,
      collector,
      bind_resolver,
      metrics_path,
    }
  }

  pub async fn shutdown(mut self) {
    self.shutdown_trigger.take().unwrap().shutdown().await;
    self.shutdown = true;
  }

  pub const fn collector(&self) -> &Collector {
    &self.collector
  }

  pub fn web_addr(&self) -> SocketAddr {
    self.bind_resolver.local_tcp_addr(WEB)
  }

  pub async fn connect_tcp(&self) -> TcpStream {
    TcpStream::connect(self.bind_resolver.local_tcp_addr(GRAPHITE))
      .await
      .unwrap()
  }

  pub async fn send_udp(&self, datagrams: &[&str]) {
    let target = self.bind_resolver.take_udp_addr(GRAPHITE);
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for datagram in datagrams {
      socket.send_to(datagram.as_bytes(), target).await.unwrap();
    }
  }

  pub async fn get(&self, path: &str) -> (u16, String) {
    make_http_request(self.web_addr(), path).await
  }

  pub async fn scrape(&self) -> String {
    let (status, body) = self.get(&self.metrics_path).await;
    assert_eq!(200, status);
    body
  }

  // Scrape until the output contains every expected line.
  pub async fn wait_for_scrape(&self, expected: &[&str]) -> String {
    let mut output = String::new();
    for _ in 0 .. 200 {
      output = self.scrape().await;
      if expected.iter().all(|line| output.contains(line)) {
        return output;
      }
      tokio::time::sleep(10.std_milliseconds()).await;
    }
    panic!("expected {expected:?} in scrape output:\n{output}");
  }
}
