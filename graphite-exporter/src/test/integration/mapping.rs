// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Helper, current_time, write_all};
use std::io::Write;
use tempfile::NamedTempFile;

const MAPPING: &str = r#"
mappings:
  - match: "test.dispatcher.*.*.*"
    name: "dispatcher_events_total"
    labels:
      processor: "$1"
      action: "$2"
      outcome: "$3"
      job: "test_dispatcher"
  - match: "noisy.*"
    action: drop
"#;

fn mapping_file() -> NamedTempFile {
  let mut file = NamedTempFile::new().unwrap();
  file.write_all(MAPPING.as_bytes()).unwrap();
  file
}

#[tokio::test(flavor = "multi_thread")]
async fn mapped_and_dropped() {
  let file = mapping_file();
  let helper = Helper::new(&[
    "--graphite.mapping-config",
    file.path().to_str().unwrap(),
  ])
  .await;
  let now = current_time();

  let mut stream = helper.connect_tcp().await;
  write_all(
    &mut stream,
    &[
      &format!("test.dispatcher.FooProcessor.received.succeeded 5 {now}\n"),
      &format!("noisy.metric 1 {now}\n"),
      &format!("unmapped.metric 2 {now}\n"),
    ],
  )
  .await;

  let output = helper
    .wait_for_scrape(&[
      "dispatcher_events_total{action=\"received\",job=\"test_dispatcher\",outcome=\"succeeded\",\
       processor=\"FooProcessor\"} 5\n",
      "unmapped_metric 2\n",
      "graphite:lines:dropped_total{reason=\"drop_action\"} 1\n",
    ])
    .await;
  assert!(!output.contains("noisy_metric"));
  helper.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn strict_match() {
  let file = mapping_file();
  let helper = Helper::new(&[
    "--graphite.mapping-config",
    file.path().to_str().unwrap(),
    "--graphite.mapping-strict-match",
  ])
  .await;
  let now = current_time();

  let mut stream = helper.connect_tcp().await;
  write_all(
    &mut stream,
    &[
      &format!("unmapped.metric 2 {now}\n"),
      &format!("test.dispatcher.Bar.sent.failed 1 {now}\n"),
    ],
  )
  .await;

  let output = helper
    .wait_for_scrape(&[
      "dispatcher_events_total{action=\"sent\",job=\"test_dispatcher\",outcome=\"failed\",\
       processor=\"Bar\"} 1\n",
      "graphite:lines:dropped_total{reason=\"strict_match\"} 1\n",
    ])
    .await;
  assert!(!output.contains("unmapped_metric"));
  helper.shutdown().await;
}
