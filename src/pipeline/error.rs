//! # Pipeline Errors
//!
//! $$
//! \text{run}:\ \text{artifacts}\to\text{allocation}\ \cup\ \{\text{abort}\}
//! $$
//!
//! Failures that stop a run: missing or malformed inputs, I/O and config.

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::allocators::GeneratorError;
use crate::allocators::GeneratorKind;

/// Failures that abort an optimization run.
#[derive(Error, Debug)]
pub enum PipelineError {
  /// An upstream stage has not produced its output yet.
  #[error(
    "missing {stage} artifact {}; run the `{stage}` stage before optimization",
    path.display()
  )]
  MissingUpstreamArtifact { stage: &'static str, path: PathBuf },

  /// An input exists but cannot be interpreted.
  #[error("malformed artifact {}: {reason}", path.display())]
  MalformedArtifact { path: PathBuf, reason: String },

  #[error("no generators requested")]
  NoGenerators,

  /// A generator failed in a way the fallback policy does not cover.
  #[error("generator {kind} failed: {source}")]
  Generator {
    kind: GeneratorKind,
    #[source]
    source: GeneratorError,
  },

  #[error("i/o error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config {}: {source}", path.display())]
  Config {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("csv error at {}: {source}", path.display())]
  Csv {
    path: PathBuf,
    #[source]
    source: csv::Error,
  },

  #[error("serialization failed: {0}")]
  Serialization(String),
}

impl PipelineError {
  pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
    move |source| Self::Io {
      path: path.to_path_buf(),
      source,
    }
  }

  pub(crate) fn csv(path: &Path) -> impl FnOnce(csv::Error) -> Self + '_ {
    move |source| Self::Csv {
      path: path.to_path_buf(),
      source,
    }
  }

  pub(crate) fn malformed(path: &Path, reason: impl Into<String>) -> Self {
    Self::MalformedArtifact {
      path: path.to_path_buf(),
      reason: reason.into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_artifact_names_the_stage() {
    let err = PipelineError::MissingUpstreamArtifact {
      stage: "estimate",
      path: PathBuf::from("artifacts/estimates/mu_post.csv"),
    };
    let msg = err.to_string();
    assert!(msg.contains("`estimate` stage"));
    assert!(msg.contains("mu_post.csv"));
  }
}
