// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./server_test.rs"]
mod server_test;

use super::stats::StatsProvider;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use bd_log::SwapLogger;
use bd_shutdown::ComponentShutdown;
use graphite_common::bind_resolver::{BindResolver, BoundTcpSocket};
use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

//
// AdminState
//

// State shared by the HTTP handlers: the registry behind the metrics path plus what the index
// page needs to describe.
pub struct AdminState {
  stats_provider: StatsProvider,
  metrics_path: String,
  graphite_address: String,
}

impl AdminState {
  #[must_use]
  pub fn new(
    stats_provider: StatsProvider,
    metrics_path: String,
    graphite_address: String,
  ) -> Arc<Self> {
    Arc::new(Self {
      stats_provider,
      metrics_path,
      graphite_address,
    })
  }

  #[allow(clippy::unused_async)]
  async fn metrics(State(state): State<Arc<Self>>) -> Response {
    match state.stats_provider.prometheus_output() {
      Ok(buffer) => (
        [(axum::http::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        buffer,
      )
        .into_response(),
      Err(e) => {
        warn!("error encoding metrics: {e}");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          format!("error encoding metrics: {e}"),
        )
          .into_response()
      },
    }
  }

  #[allow(clippy::unused_async)]
  async fn root(State(state): State<Arc<Self>>) -> Html<String> {
    Html(format!(
      r#"<html>
<head><title>Graphite Exporter</title></head>
<body>
<h1>Graphite Exporter</h1>
<p>Accepting plaintext Graphite samples over TCP and UDP on {}</p>
<p><a href="{}">Metrics</a></p>
</body>
</html>
"#,
      state.graphite_address, state.metrics_path
    ))
  }

  #[allow(clippy::unused_async)]
  async fn healthcheck() -> String {
    "OK".to_string()
  }

  #[allow(clippy::unused_async)]
  async fn log_filter(Query(mut params): Query<HashMap<String, String>>) -> String {
    let Some(filter) = params.remove("filter") else {
      return "usage: /log_filter?filter=RUST_LOG".to_string();
    };
    info!("updating log filter: {filter}");
    if let Err(e) = SwapLogger::swap(&filter) {
      warn!("error updating log filter: {e}");
    }

    "OK".to_string()
  }

  #[allow(clippy::unused_async)]
  async fn fallback_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
  }

  fn make_router(self: Arc<Self>) -> Router {
    let metrics_path = self.metrics_path.clone();
    Router::new()
      .route("/", get(Self::root))
      .route("/healthcheck", get(Self::healthcheck))
      .route("/log_filter", post(Self::log_filter))
      .route(&metrics_path, get(Self::metrics))
      .fallback(Self::fallback_handler)
      .with_state(self)
  }

  // Bind the admin listener. Split from serving so that a bind failure is a startup error.
  pub async fn bind(
    self: Arc<Self>,
    bind_resolver: &dyn BindResolver,
    bind: &str,
  ) -> anyhow::Result<AdminServer> {
    let socket = bind_resolver.resolve_tcp(bind).await?;
    info!("web server listening on: {}", socket.local_addr());
    Ok(AdminServer {
      state: self,
      socket,
    })
  }
}

//
// AdminServer
//

pub struct AdminServer {
  state: Arc<AdminState>,
  socket: BoundTcpSocket,
}

impl AdminServer {
  #[must_use]
  pub fn local_addr(&self) -> SocketAddr {
    self.socket.local_addr()
  }

  // Serve until shutdown. Returns an error if the server stops for any other reason.
  pub async fn serve(self, mut shutdown: ComponentShutdown) -> anyhow::Result<()> {
    let router = self.state.make_router();
    axum::serve(self.socket.listen(), router)
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;
    Ok(())
  }
}
