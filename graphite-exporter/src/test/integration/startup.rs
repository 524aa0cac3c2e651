// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::make_options;
use crate::{ServerHooks, run_server};
use bd_server_stats::stats::Collector;
use graphite_common::bind_resolver::MockBindResolver;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

struct PanicHooks {}

#[async_trait::async_trait]
impl ServerHooks for PanicHooks {
  async fn server_started(&self, _collector: Collector) {
    panic!("server should not start");
  }
}

// The mock has no expectations so any bind attempt fails the test.
fn no_bind_resolver() -> Arc<MockBindResolver> {
  Arc::new(MockBindResolver::new())
}

#[tokio::test]
async fn dump_fsm_exits_without_binding() {
  let mut mapping = NamedTempFile::new().unwrap();
  mapping
    .write_all(b"mappings:\n  - match: \"a.*.c\"\n    name: \"a_c\"\n")
    .unwrap();
  let dump = tempfile::tempdir().unwrap();
  let dump_path = dump.path().join("fsm.dot");

  run_server(
    make_options(&[
      "--graphite.mapping-config",
      mapping.path().to_str().unwrap(),
      "--debug.dump-fsm",
      dump_path.to_str().unwrap(),
    ]),
    std::future::pending::<()>,
    PanicHooks {},
    no_bind_resolver(),
  )
  .await
  .unwrap();

  let dot = std::fs::read_to_string(&dump_path).unwrap();
  assert!(dot.starts_with("digraph g {"));
  assert!(dot.contains("a_c"));
}

#[tokio::test]
async fn invalid_mapping_is_fatal() {
  let mut mapping = NamedTempFile::new().unwrap();
  mapping
    .write_all(b"mappings:\n  - match: \"a.*\"\n    labels:\n      \"bad-label\": x\n")
    .unwrap();

  let error = run_server(
    make_options(&["--graphite.mapping-config", mapping.path().to_str().unwrap()]),
    std::future::pending::<()>,
    PanicHooks {},
    no_bind_resolver(),
  )
  .await
  .unwrap_err();
  assert!(format!("{error:#}").contains("bad-label"), "{error:#}");
}

#[tokio::test]
async fn missing_mapping_file_is_fatal() {
  assert!(
    run_server(
      make_options(&["--graphite.mapping-config", "/nonexistent/mapping.yml"]),
      std::future::pending::<()>,
      PanicHooks {},
      no_bind_resolver(),
    )
    .await
    .is_err()
  );
}

#[tokio::test]
async fn invalid_options_are_fatal() {
  assert!(
    run_server(
      make_options(&["--web.telemetry-path", "/healthcheck"]),
      std::future::pending::<()>,
      PanicHooks {},
      no_bind_resolver(),
    )
    .await
    .is_err()
  );
}
