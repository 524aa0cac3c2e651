// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./fsm_test.rs"]
mod fsm_test;

use super::MappingRule;
use std::collections::BTreeMap;
use std::io::Write;

const ROOT: usize = 0;

//
// State
//

#[derive(Debug, Default)]
struct State {
  exact: BTreeMap<String, usize>,
  // Component patterns containing at least one '*', in insertion order.
  wildcard: Vec<(String, usize)>,
  // Indexes of the rules whose full pattern ends at this state.
  accepts: Vec<usize>,
}

//
// GlobFsm
//

// Trie over dot separated name components. Each glob pattern adds one path from the root; a name
// is matched by walking all viable paths in parallel, one component at a time.
#[derive(Debug)]
pub(super) struct GlobFsm {
  states: Vec<State>,
}

impl Default for GlobFsm {
  fn default() -> Self {
    Self {
      states: vec![State::default()],
    }
  }
}

impl GlobFsm {
  pub(super) fn add(&mut self, pattern: &str, rule_index: usize) {
    let mut current = ROOT;
    for component in pattern.split('.') {
      current = if component.contains('*') {
        let existing = self.states[current]
          .wildcard
          .iter()
          .find(|(edge, _)| edge == component)
          .map(|(_, next)| *next);
        existing.unwrap_or_else(|| {
          let next = self.new_state();
          self.states[current]
            .wildcard
            .push((component.to_string(), next));
          next
        })
      } else if let Some(next) = self.states[current].exact.get(component) {
        *next
      } else {
        let next = self.new_state();
        self.states[current]
          .exact
          .insert(component.to_string(), next);
        next
      };
    }
    self.states[current].accepts.push(rule_index);
  }

  fn new_state(&mut self) -> usize {
    self.states.push(State::default());
    self.states.len() - 1
  }

  // Sorted indexes of every glob rule that matches the full name.
  pub(super) fn candidates(&self, name: &str) -> Vec<usize> {
    let mut current = vec![ROOT];
    for component in name.split('.') {
      let mut next = Vec::new();
      for state in current.iter().map(|index| &self.states[*index]) {
        if let Some(exact) = state.exact.get(component) {
          next.push(*exact);
        }
        next.extend(
          state
            .wildcard
            .iter()
            .filter(|(pattern, _)| component_matches(pattern, component))
            .map(|(_, index)| *index),
        );
      }
      if next.is_empty() {
        return vec![];
      }
      current = next;
    }

    let mut matched: Vec<usize> = current
      .into_iter()
      .flat_map(|index| self.states[index].accepts.iter().copied())
      .collect();
    matched.sort_unstable();
    matched.dedup();
    matched
  }

  pub(super) fn dump(&self, rules: &[MappingRule], writer: &mut dyn Write) -> std::io::Result<()> {
    writeln!(writer, "digraph g {{")?;
    writeln!(writer, "  rankdir=LR;")?;
    writeln!(writer, "  node [shape = circle];")?;
    for (index, state) in self.states.iter().enumerate() {
      if index == ROOT {
        writeln!(writer, "  s{index} [label=\"root\"];")?;
      } else if !state.accepts.is_empty() {
        let names: Vec<&str> = state
          .accepts
          .iter()
          .map(|rule| rules[*rule].name.as_str())
          .collect();
        writeln!(
          writer,
          "  s{index} [shape = doublecircle, label=\"{}\"];",
          escape(&names.join("\\n"))
        )?;
      }
    }
    for (index, state) in self.states.iter().enumerate() {
      for (component, next) in &state.exact {
        writeln!(writer, "  s{index} -> s{next} [label=\"{}\"];", escape(component))?;
      }
      for (component, next) in &state.wildcard {
        writeln!(writer, "  s{index} -> s{next} [label=\"{}\"];", escape(component))?;
      }
    }
    writeln!(writer, "}}")
  }
}

fn escape(value: &str) -> String {
  value.replace('"', "\\\"")
}

// Matches a single name component against a pattern where '*' matches any run of characters.
pub(super) fn component_matches(pattern: &str, component: &str) -> bool {
  let mut parts = pattern.split('*');
  let Some(prefix) = parts.next() else {
    return true;
  };
  let Some(mut rest) = component.strip_prefix(prefix) else {
    return false;
  };

  let parts: Vec<&str> = parts.collect();
  let Some((suffix, middle)) = parts.split_last() else {
    // No '*' at all.
    return rest.is_empty();
  };
  for part in middle {
    match rest.find(part) {
      Some(position) => rest = &rest[position + part.len() ..],
      None => return false,
    }
  }
  rest.len() >= suffix.len() && rest.ends_with(suffix)
}
