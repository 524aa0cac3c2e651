// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod bind_resolver;

use bd_log::SwapLogger;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

pub fn global_initialize() {
  // The filter comes from RUST_LOG and can be swapped at runtime via the admin server.
  SwapLogger::initialize();
}

pub trait LossyIntoToFloat {
  fn lossy_to_f64(self) -> f64;
}

impl LossyIntoToFloat for i128 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}
