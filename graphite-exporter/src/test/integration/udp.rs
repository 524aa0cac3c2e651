// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Helper, current_time};

#[tokio::test(flavor = "multi_thread")]
async fn multi_line_datagram() {
  let helper = Helper::new(&[]).await;
  let now = current_time();

  // The final line of a datagram does not need a terminator.
  helper
    .send_udp(&[&format!(
      "udp.one 1 {now}\nudp.two 2 {now}\r\nudp.three 3 {now}"
    )])
    .await;

  helper
    .wait_for_scrape(&["udp_one 1\n", "udp_two 2\n", "udp_three 3\n"])
    .await;
  helper.shutdown().await;
}
