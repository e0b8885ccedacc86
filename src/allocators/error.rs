//! # Generator Errors
//!
//! $$
//! \text{generator}:(\mu,\Sigma,\mathcal C)\to\mathbf{w}\ \cup\ \{\text{error}\}
//! $$
//!
//! Error kinds reported by generators and the solver chain.

use thiserror::Error;

/// Failures a single generator (or the meta-learner) can report.
///
/// None of these abort a pipeline run: the orchestration layer logs them and
/// substitutes the uniform allocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
  /// Inputs disagree on the number of assets (or scenarios).
  #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
  ShapeMismatch {
    /// Which input was inconsistent.
    context: &'static str,
    /// Expected dimension.
    expected: usize,
    /// Observed dimension.
    actual: usize,
  },

  /// Every solver backend failed or returned no usable point.
  #[error("solver did not converge: {reason}")]
  SolverNonConvergence {
    /// Status reported by the last backend tried.
    reason: String,
  },

  /// Zero total weight, non-finite sums or similar.
  #[error("numerical degeneracy: {reason}")]
  NumericalDegeneracy {
    /// What degenerated.
    reason: String,
  },
}

impl GeneratorError {
  pub fn shape_mismatch(context: &'static str, expected: usize, actual: usize) -> Self {
    Self::ShapeMismatch {
      context,
      expected,
      actual,
    }
  }

  pub fn non_convergence(reason: impl Into<String>) -> Self {
    Self::SolverNonConvergence {
      reason: reason.into(),
    }
  }

  pub fn degeneracy(reason: impl Into<String>) -> Self {
    Self::NumericalDegeneracy {
      reason: reason.into(),
    }
  }

  /// Whether the pipeline may replace the failed output with uniform weights.
  pub fn is_recoverable(&self) -> bool {
    matches!(
      self,
      Self::ShapeMismatch { .. }
        | Self::SolverNonConvergence { .. }
        | Self::NumericalDegeneracy { .. }
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shape_mismatch_display_names_the_input() {
    let err = GeneratorError::shape_mismatch("covariance", 3, 2);
    assert!(err.to_string().contains("covariance"));
    assert!(err.to_string().contains("expected 3, got 2"));
    assert!(err.is_recoverable());
  }
}
