// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn now_utc(&self) -> OffsetDateTime;
}

//
// RealTimeProvider
//

pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    OffsetDateTime::now_utc()
  }
}

//
// TestTimeProvider
//

// Wall clock pinned to a unix timestamp in whole seconds, advanced explicitly by tests.
#[derive(Default)]
pub struct TestTimeProvider {
  pub time: Arc<AtomicI64>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(unix_seconds: i64) -> Self {
    Self {
      time: Arc::new(AtomicI64::new(unix_seconds)),
    }
  }

  pub fn advance(&self, seconds: i64) {
    self.time.fetch_add(seconds, Ordering::SeqCst);
  }
}

impl TimeProvider for TestTimeProvider {
  fn now_utc(&self) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(self.time.load(Ordering::SeqCst)).unwrap()
  }
}
