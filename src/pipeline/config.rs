//! # Pipeline Configuration
//!
//! $$
//! \mathcal C = \text{defaults} \oplus \text{thresholds.yml} \oplus \text{params.yml}
//! $$
//!
//! Typed views over the YAML threshold/parameter documents and the seed file.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::error::PipelineError;

/// `thresholds.yml`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
  pub execution: ExecutionThresholds,
  pub tau: TauThresholds,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ExecutionThresholds {
  pub gross_leverage_cap: f64,
  pub turnover_cap: f64,
  /// Scale of the meta-learner tracking-error penalty.
  #[serde(rename = "TE_max_factor")]
  pub te_max_factor: f64,
}

impl Default for ExecutionThresholds {
  fn default() -> Self {
    Self {
      gross_leverage_cap: 1.75,
      turnover_cap: 0.40,
      te_max_factor: 0.02,
    }
  }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TauThresholds {
  /// Cluster risk-contribution tolerance.
  pub rc_tol: f64,
}

impl Default for TauThresholds {
  fn default() -> Self {
    Self { rc_tol: 0.02 }
  }
}

/// `params.yml`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Params {
  pub household: HouseholdParams,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HouseholdParams {
  /// One-month CVaR budget.
  pub cvar_cap_1m: f64,
  /// Three-year drawdown-at-risk budget.
  pub edar_cap_3y: f64,
}

impl Default for HouseholdParams {
  fn default() -> Self {
    Self {
      cvar_cap_1m: 0.10,
      edar_cap_3y: 0.20,
    }
  }
}

/// Read a YAML document into `T`.
///
/// A missing file, an empty one or a top level that is not a mapping yields
/// `T::default()`. A file that is not valid YAML, or whose known keys have the
/// wrong type, is a [`PipelineError::Config`].
pub fn load_yaml_or_default<T>(path: &Path) -> Result<T, PipelineError>
where
  T: DeserializeOwned + Default,
{
  if !path.exists() {
    warn!(path = %path.display(), "config file not found, using defaults");
    return Ok(T::default());
  }

  let text = fs::read_to_string(path).map_err(PipelineError::io(path))?;
  let value: serde_yaml::Value =
    serde_yaml::from_str(&text).map_err(|source| PipelineError::Config {
      path: path.to_path_buf(),
      source,
    })?;
  if !value.is_mapping() {
    warn!(path = %path.display(), "config file has no top-level mapping, using defaults");
    return Ok(T::default());
  }

  serde_yaml::from_value(value).map_err(|source| PipelineError::Config {
    path: path.to_path_buf(),
    source,
  })
}

pub const DEFAULT_SEED_STREAM: &str = "global";
pub const DEFAULT_SEED: u64 = 42;

/// On-disk layout of the seed file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SeedFile {
  pub seeds: BTreeMap<String, u64>,
}

impl Default for SeedFile {
  fn default() -> Self {
    Self {
      seeds: BTreeMap::from([(DEFAULT_SEED_STREAM.to_string(), DEFAULT_SEED)]),
    }
  }
}

/// Seeds by stream. Accepts either `{seeds: {..}}` or a bare mapping; null
/// entries are dropped and the `global` stream is always present.
pub fn load_seeds(path: &Path) -> Result<BTreeMap<String, u64>, PipelineError> {
  if !path.exists() {
    return Ok(SeedFile::default().seeds);
  }

  let text = fs::read_to_string(path).map_err(PipelineError::io(path))?;
  let value: serde_yaml::Value =
    serde_yaml::from_str(&text).map_err(|source| PipelineError::Config {
      path: path.to_path_buf(),
      source,
    })?;

  let section = match value.get("seeds") {
    Some(inner) if inner.is_mapping() => inner.clone(),
    _ => value,
  };
  let raw: BTreeMap<String, Option<u64>> = match section {
    serde_yaml::Value::Null => BTreeMap::new(),
    other => serde_yaml::from_value(other).map_err(|source| PipelineError::Config {
      path: path.to_path_buf(),
      source,
    })?,
  };

  let mut seeds: BTreeMap<String, u64> = raw
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k, v)))
    .collect();
  seeds.entry(DEFAULT_SEED_STREAM.to_string()).or_insert(DEFAULT_SEED);
  Ok(seeds)
}

/// Write `seeds` in the canonical `{seeds: {..}}` layout.
pub fn save_seeds(seeds: &BTreeMap<String, u64>, path: &Path) -> Result<(), PipelineError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(PipelineError::io(parent))?;
  }
  let text = serde_yaml::to_string(&SeedFile { seeds: seeds.clone() })
    .map_err(|e| PipelineError::Serialization(e.to_string()))?;
  fs::write(path, text).map_err(PipelineError::io(path))
}
