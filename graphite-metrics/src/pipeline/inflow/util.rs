// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./util_test.rs"]
mod util_test;

use crate::pipeline::LineDispatch;
use bd_log::warn_every;
use bd_server_stats::stats::{AutoGauge, Scope};
use bd_shutdown::ComponentShutdown;
use bd_time::TimeDurationExt;
use bytes::{Bytes, BytesMut};
use log::debug;
use memchr::memchr;
use prometheus::{IntCounter, IntGauge};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use time::Duration;
use time::ext::NumericalDuration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::{pin, select};

const BUFFER_SIZE: usize = 8192;
// Longest unterminated line a stream connection may buffer before it is closed.
const MAX_LINE_LENGTH: usize = 64 * 1024;

//
// SocketServerStats
//

#[derive(Clone, Debug)]
pub(super) struct SocketServerStats {
  pub accepts: IntCounter,
  pub accept_failures: IntCounter,
  pub incoming_bytes: IntCounter,
  pub disconnects: IntCounter,
  pub idle_timeouts: IntCounter,
  pub lines_too_long: IntCounter,
  pub active: IntGauge,
}

impl SocketServerStats {
  pub fn new(stats: &Scope) -> Self {
    Self {
      accepts: stats.counter("accepts_total"),
      accept_failures: stats.counter("accept_failures_total"),
      incoming_bytes: stats.counter("incoming_bytes_total"),
      disconnects: stats.counter("disconnects_total"),
      idle_timeouts: stats.counter("idle_timeouts_total"),
      lines_too_long: stats.counter("lines_too_long_total"),
      active: stats.gauge("active"),
    }
  }
}

// Split off every complete line in `buf`, stripping LF or CRLF. If `expect_new_lines` is false
// any trailing bytes are returned as a final line (datagrams need not end in a newline).
pub(super) fn process_buffer_newlines(buf: &mut BytesMut, expect_new_lines: bool) -> Vec<Bytes> {
  let mut ret: Vec<Bytes> = Vec::new();
  while let Some(newline) = memchr(b'\n', buf) {
    let mut incoming = buf.split_to(newline + 1);
    let len = incoming.len();
    if len >= 2 && incoming[len - 2] == b'\r' {
      incoming.truncate(len - 2);
    } else {
      incoming.truncate(len - 1);
    }
    ret.push(incoming.freeze());
  }

  if !expect_new_lines && !buf.is_empty() {
    ret.push(buf.split().freeze());
  }

  ret
}

//
// SocketHandler
//

// Reads one stream connection until EOF, error, idle timeout or shutdown, forwarding complete
// lines as they arrive.
pub(super) struct SocketHandler {
  stats: SocketServerStats,
  peer_addr: SocketAddr,
  dispatcher: Arc<dyn LineDispatch>,
  idle_timeout: Option<Duration>,
}

impl SocketHandler {
  pub(super) fn new(
    stats: SocketServerStats,
    peer_addr: SocketAddr,
    dispatcher: Arc<dyn LineDispatch>,
    idle_timeout: Option<Duration>,
  ) -> Self {
    Self {
      stats,
      peer_addr,
      dispatcher,
      idle_timeout,
    }
  }

  async fn process(&self, lines: Vec<Bytes>) {
    if !lines.is_empty() {
      self.dispatcher.send(lines).await;
    }
  }

  pub(super) async fn run<T>(self, mut socket: T, mut shutdown: ComponentShutdown)
  where
    T: AsyncRead + Unpin,
  {
    let _active_auto_gauge = AutoGauge::new(self.stats.active.clone());
    let mut buf = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
      if buf.capacity() - buf.len() < BUFFER_SIZE {
        buf.reserve(BUFFER_SIZE);
      }

      let idle_timeout = async {
        match self.idle_timeout {
          Some(idle_timeout) => idle_timeout.sleep().await,
          None => std::future::pending().await,
        }
      };
      pin!(idle_timeout);
      let result = select! {
        r = socket.read_buf(&mut buf) => r,
        () = &mut idle_timeout => {
          Err(std::io::Error::new(ErrorKind::TimedOut, "read timeout"))
        }
        () = shutdown.cancelled() => {
          Err(std::io::Error::other("shutting down"))
        }
      };

      match result {
        Ok(0) if buf.is_empty() => {
          debug!("closing reader (empty buffer, eof) {}", self.peer_addr);
          break;
        },
        Ok(0) => {
          // Socket shutdown, process what's remaining including an unterminated final line.
          let lines = process_buffer_newlines(&mut buf, false);
          self.process(lines).await;
          debug!("closing reader {}", self.peer_addr);
          break;
        },
        Ok(bytes) => {
          self.stats.incoming_bytes.inc_by(bytes as u64);
          let lines = process_buffer_newlines(&mut buf, true);
          self.process(lines).await;
          if buf.len() > MAX_LINE_LENGTH {
            warn_every!(
              1.minutes(),
              "line from {} exceeds {} bytes, closing connection",
              self.peer_addr,
              MAX_LINE_LENGTH
            );
            self.stats.lines_too_long.inc();
            break;
          }
        },
        Err(e) if e.kind() == ErrorKind::TimedOut => {
          debug!("read timeout, closing {}", self.peer_addr);
          self.stats.idle_timeouts.inc();
          break;
        },
        Err(e) => {
          debug!("socket closed {}: {e}", self.peer_addr);
          break;
        },
      }
    }

    self.stats.disconnects.inc();
    drop(shutdown);
  }
}
