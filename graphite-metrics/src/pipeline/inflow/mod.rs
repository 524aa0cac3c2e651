// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::LineDispatch;
use async_trait::async_trait;
use bd_server_stats::stats::Scope;
use bd_shutdown::ComponentShutdownTriggerHandle;
use graphite_common::bind_resolver::BindResolver;
use std::sync::Arc;

pub mod tcp;
pub mod udp;
mod util;

//
// PipelineInflow
//

/// A PipelineInflow reads raw protocol lines from the network and hands them to the
/// [crate::pipeline::LineDispatch]. Binding happens at construction so that bind failures are
/// reported at startup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PipelineInflow {
  /// Start the inflow (accept connections, read packets). This is called after the entire pipeline
  /// is created.
  async fn start(self: Arc<Self>);
}

//
// InflowFactoryContext
//

pub struct InflowFactoryContext {
  pub scope: Scope,
  pub dispatcher: Arc<dyn LineDispatch>,
  pub shutdown_trigger_handle: ComponentShutdownTriggerHandle,
  pub bind_resolver: Arc<dyn BindResolver>,
}
