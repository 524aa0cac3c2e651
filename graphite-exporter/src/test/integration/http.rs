// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::Helper;

#[tokio::test(flavor = "multi_thread")]
async fn web_endpoints() {
  let helper = Helper::new(&["--web.telemetry-path", "/graphite/metrics"]).await;

  let (status, body) = helper.get("/").await;
  assert_eq!(200, status);
  assert!(body.contains("Graphite Exporter"));
  assert!(body.contains("<a href=\"/graphite/metrics\">"));

  let (status, body) = helper.get("/healthcheck").await;
  assert_eq!(200, status);
  assert_eq!("OK", body.trim());

  let (status, _) = helper.get("/metrics").await;
  assert_eq!(404, status);

  let output = helper.scrape().await;
  assert!(output.contains("# TYPE graphite_sample_expiry_seconds gauge"));
  assert!(output.contains("graphite_sample_expiry_seconds 300\n"));
  assert!(output.contains("graphite_last_processed_timestamp_seconds 0\n"));
  assert!(output.contains(&format!(
    "graphite_exporter_build_info{{version=\"{}\"}} 1\n",
    crate::VERSION
  )));

  helper.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_sample_expiry() {
  let helper = Helper::new(&["--graphite.sample-expiry", "90s"]).await;
  let output = helper.scrape().await;
  assert!(output.contains("graphite_sample_expiry_seconds 90\n"));
  helper.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn internal_stats_exposed() {
  let helper = Helper::new(&[]).await;
  let _stream = helper.connect_tcp().await;
  helper
    .wait_for_scrape(&["graphite:tcp:accepts_total 1\n", "graphite:tcp:active 1\n"])
    .await;
  helper.shutdown().await;
}
