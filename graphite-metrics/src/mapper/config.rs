// graphite-exporter - Graphite plaintext to Prometheus bridge
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use super::{GlobMapper, MappingAction, MappingRule, MetricKind};
use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

static LABEL_NAME_REGEX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

//
// MatchType
//

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
  #[default]
  Glob,
  Regex,
}

//
// MappingConfigError
//

#[derive(Error, Debug)]
pub enum MappingConfigError {
  #[error("mapping {index}: match pattern is empty")]
  EmptyMatch { index: usize },
  #[error("mapping {index} ('{pattern}'): name is required unless action is drop")]
  MissingName { index: usize, pattern: String },
  #[error("mapping {index} ('{pattern}'): invalid label name '{label}'")]
  InvalidLabelName {
    index: usize,
    pattern: String,
    label: String,
  },
  #[error("mapping {index} ('{pattern}'): invalid glob character '{character}'")]
  InvalidGlob {
    index: usize,
    pattern: String,
    character: char,
  },
  #[error("mapping {index} ('{pattern}'): invalid regex: {source}")]
  InvalidRegex {
    index: usize,
    pattern: String,
    source: regex::Error,
  },
}

//
// MapperDefaults
//

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MapperDefaults {
  pub match_type: MatchType,
}

//
// MappingConfig
//

#[derive(Debug, Deserialize)]
pub struct MappingConfig {
  #[serde(rename = "match")]
  pub pattern: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
  #[serde(default)]
  pub match_type: Option<MatchType>,
  #[serde(default)]
  pub match_metric_type: Option<MetricKind>,
  #[serde(default)]
  pub action: MappingAction,
}

//
// MapperConfig
//

// On-disk mapping file. Keys this mapper does not understand are ignored so files shared with
// other exporters still load.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
  pub defaults: MapperDefaults,
  pub mappings: Vec<MappingConfig>,
}

impl MapperConfig {
  pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
    if yaml.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
  }

  pub fn load_from_file(path: &Path) -> anyhow::Result<GlobMapper> {
    let contents = std::fs::read_to_string(path)
      .with_context(|| format!("unable to read mapping config '{}'", path.display()))?;
    let config = Self::from_yaml(&contents)
      .with_context(|| format!("unable to parse mapping config '{}'", path.display()))?;
    let mapper = config
      .build()
      .with_context(|| format!("invalid mapping config '{}'", path.display()))?;
    log::info!(
      "loaded {} mapping rules from '{}'",
      mapper.len(),
      path.display()
    );
    Ok(mapper)
  }

  pub fn build(self) -> Result<GlobMapper, MappingConfigError> {
    let default_match_type = self.defaults.match_type;
    let rules = self
      .mappings
      .into_iter()
      .enumerate()
      .map(|(index, mapping)| compile_rule(index, mapping, default_match_type))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(GlobMapper::new(rules))
  }
}

fn compile_rule(
  index: usize,
  mapping: MappingConfig,
  default_match_type: MatchType,
) -> Result<MappingRule, MappingConfigError> {
  let pattern = mapping.pattern;
  if pattern.is_empty() {
    return Err(MappingConfigError::EmptyMatch { index });
  }

  let name = match (mapping.name, mapping.action) {
    (Some(name), _) if !name.is_empty() => name,
    (_, MappingAction::Drop) => String::new(),
    _ => return Err(MappingConfigError::MissingName { index, pattern }),
  };

  if let Some(label) = mapping
    .labels
    .keys()
    .find(|label| !LABEL_NAME_REGEX.is_match(label))
  {
    return Err(MappingConfigError::InvalidLabelName {
      index,
      label: label.clone(),
      pattern,
    });
  }

  let match_type = mapping.match_type.unwrap_or(default_match_type);
  let regex_source = match match_type {
    MatchType::Glob => glob_to_regex(&pattern).map_err(|character| {
      MappingConfigError::InvalidGlob {
        index,
        pattern: pattern.clone(),
        character,
      }
    })?,
    MatchType::Regex => format!("^(?:{pattern})$"),
  };
  let regex = Regex::new(&regex_source).map_err(|source| MappingConfigError::InvalidRegex {
    index,
    pattern: pattern.clone(),
    source,
  })?;

  Ok(MappingRule {
    pattern,
    match_type,
    regex,
    metric_kind: mapping.match_metric_type,
    name,
    labels: mapping.labels,
    action: mapping.action,
  })
}

// Each '*' becomes one capture group bounded by the enclosing dot component.
fn glob_to_regex(pattern: &str) -> Result<String, char> {
  let mut regex = String::from("^");
  for c in pattern.chars() {
    match c {
      '*' => regex.push_str("([^.]*)"),
      'a' ..= 'z' | 'A' ..= 'Z' | '0' ..= '9' | '_' | ':' | '-' | '.' => {
        regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
      },
      other => return Err(other),
    }
  }
  regex.push('$');
  Ok(regex)
}
