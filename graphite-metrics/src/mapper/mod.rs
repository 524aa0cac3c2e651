// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod config;
mod fsm;

use self::config::MatchType;
use self::fsm::GlobFsm;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;

//
// MetricKind
//

// The metric type a lookup is performed for. Graphite input is always looked up as a gauge, but
// rules may restrict themselves to other kinds for compatibility with shared mapping files.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
  Gauge,
  Counter,
  Observer,
}

//
// MappingAction
//

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingAction {
  #[default]
  Map,
  Drop,
}

//
// MappingResult
//

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappingResult {
  pub name: String,
  pub labels: BTreeMap<String, String>,
  pub action: MappingAction,
}

//
// MetricMapper
//

/// Translates raw dotted series names into a canonical name plus labels.
#[cfg_attr(test, mockall::automock)]
pub trait MetricMapper: Send + Sync {
  /// Returns the result of the first rule matching `name`, or None if no rule matched.
  fn lookup(&self, name: &str, kind: MetricKind) -> Option<MappingResult>;

  /// Write the compiled glob automaton in Graphviz DOT format.
  fn dump_automaton(&self, writer: &mut dyn Write) -> std::io::Result<()>;
}

//
// MappingRule
//

#[derive(Debug)]
pub(crate) struct MappingRule {
  pub(crate) pattern: String,
  pub(crate) match_type: MatchType,
  pub(crate) regex: Regex,
  pub(crate) metric_kind: Option<MetricKind>,
  pub(crate) name: String,
  pub(crate) labels: BTreeMap<String, String>,
  pub(crate) action: MappingAction,
}

impl MappingRule {
  fn expand(&self, name: &str) -> Option<MappingResult> {
    let captures = self.regex.captures(name)?;
    let mut mapped_name = String::new();
    captures.expand(&self.name, &mut mapped_name);
    let labels = self
      .labels
      .iter()
      .map(|(label, template)| {
        let mut value = String::new();
        captures.expand(template, &mut value);
        (label.clone(), value)
      })
      .collect();

    Some(MappingResult {
      name: mapped_name,
      labels,
      action: self.action,
    })
  }
}

//
// GlobMapper
//

// Rule set loaded from a mapping file. Glob rules are compiled into a component automaton which
// narrows the candidate set; regex rules are evaluated directly. The first rule in file order that
// matches wins regardless of its type.
#[derive(Debug)]
pub struct GlobMapper {
  rules: Vec<MappingRule>,
  fsm: GlobFsm,
}

impl Default for GlobMapper {
  fn default() -> Self {
    Self::new(vec![])
  }
}

impl GlobMapper {
  pub(crate) fn new(rules: Vec<MappingRule>) -> Self {
    let mut fsm = GlobFsm::default();
    for (index, rule) in rules.iter().enumerate() {
      if rule.match_type == MatchType::Glob {
        fsm.add(&rule.pattern, index);
      }
    }
    Self { rules, fsm }
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.rules.len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }
}

impl MetricMapper for GlobMapper {
  fn lookup(&self, name: &str, kind: MetricKind) -> Option<MappingResult> {
    if self.rules.is_empty() {
      return None;
    }

    let glob_candidates = self.fsm.candidates(name);
    for (index, rule) in self.rules.iter().enumerate() {
      if rule.metric_kind.is_some_and(|k| k != kind) {
        continue;
      }
      if rule.match_type == MatchType::Glob && glob_candidates.binary_search(&index).is_err() {
        continue;
      }
      if let Some(result) = rule.expand(name) {
        log::trace!("'{name}' matched mapping '{}'", rule.pattern);
        return Some(result);
      }
    }

    None
  }

  fn dump_automaton(&self, writer: &mut dyn Write) -> std::io::Result<()> {
    self.fsm.dump(&self.rules, writer)
  }
}
