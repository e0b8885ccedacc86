//! # Meta-Learner
//!
//! $$
//! \max_{\alpha\in\Delta}\ \hat\mu^\top\alpha-\tfrac12\alpha^\top\hat C\alpha
//! -\tfrac{p_{to}}2\lVert\alpha-\mathbf b\rVert_1-p_{te}\sqrt{\operatorname{tr}\Sigma}\,\lVert\alpha-\mathbf b\rVert_2
//! $$
//!
//! Convex blend of generator outputs driven by their scenario-implied returns.

use ndarray::Array1;
use ndarray::Array2;
use ndarray::s;
use ndarray::Axis;
use tracing::warn;

use super::solver::SimplexProgram;
use super::solver::SolverChain;
use super::solver::Term;
use super::types::clip_and_normalize;
use super::types::uniform_weights;

const COV_RIDGE: f64 = 1e-6;

/// Blend knobs.
#[derive(Clone, Debug)]
pub struct MetaLearnerConfig {
  /// At most this many leading generator columns are blended (floored at 1).
  pub j_max: usize,
  /// Weight on one-way distance from the baseline.
  pub penalty_to: f64,
  /// Weight on Euclidean distance from the baseline, scaled by `sqrt(trace(Σ))`.
  pub penalty_te: f64,
  /// Generator the penalties anchor to; clamped into range.
  pub baseline_idx: usize,
}

impl Default for MetaLearnerConfig {
  fn default() -> Self {
    Self {
      j_max: 3,
      penalty_to: 0.1,
      penalty_te: 0.0,
      baseline_idx: 0,
    }
  }
}

/// Sample covariance of the columns of `x` (`T-1` denominator), identity when
/// there are fewer than two rows.
fn sample_cov(x: &Array2<f64>) -> Array2<f64> {
  let (t, j) = x.dim();
  if t < 2 {
    return Array2::eye(j);
  }
  let mean = x.sum_axis(Axis(0)) / t as f64;
  let centered = x - &mean;
  centered.t().dot(&centered) / (t - 1) as f64
}

fn trace_scale(sigma: &Array2<f64>) -> f64 {
  if sigma.is_empty() {
    return 1.0;
  }
  sigma.diag().sum().max(0.0).sqrt()
}

/// Blend coefficients over the first `min(J, j_max)` generator columns of
/// `returns_by_gen` (T rows by J generators).
///
/// Empty when there are no columns; uniform when no backend solves the blend.
pub fn fit_meta_weights(
  returns_by_gen: &Array2<f64>,
  sigma: &Array2<f64>,
  config: &MetaLearnerConfig,
) -> Array1<f64> {
  let j = returns_by_gen.ncols().min(config.j_max.max(1));
  if j == 0 {
    return Array1::zeros(0);
  }

  let returns = returns_by_gen.slice(s![.., ..j]).to_owned();
  let cov = sample_cov(&returns) + Array2::<f64>::eye(j) * COV_RIDGE;
  let mean = if returns.nrows() > 0 {
    returns.sum_axis(Axis(0)) / returns.nrows() as f64
  } else {
    Array1::zeros(j)
  };

  let mut baseline = Array1::zeros(j);
  baseline[config.baseline_idx.min(j - 1)] = 1.0;

  let mut program = SimplexProgram::new(j)
    .term(Term::Reward(mean))
    .term(Term::Quadratic {
      matrix: cov,
      coef: 0.5,
    });
  if config.penalty_to > 0.0 {
    program = program.term(Term::L1Distance {
      anchor: baseline.clone(),
      coef: 0.5 * config.penalty_to,
    });
  }
  if config.penalty_te > 0.0 {
    program = program.term(Term::L2Distance {
      anchor: baseline,
      coef: config.penalty_te * trace_scale(sigma),
    });
  }

  match SolverChain::default().solve(&program) {
    Ok(alpha) => clip_and_normalize(&alpha),
    Err(err) => {
      warn!(error = %err, "meta blend unsolved, using uniform coefficients");
      uniform_weights(j)
    }
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  #[test]
  fn no_generators_gives_empty_blend() {
    let config = MetaLearnerConfig::default();
    let alpha = fit_meta_weights(&Array2::zeros((5, 0)), &Array2::eye(2), &config);
    assert!(alpha.is_empty());
  }

  #[test]
  fn truncates_to_j_max() {
    let returns = array![
      [0.01, 0.02, 0.00, 0.03],
      [0.02, 0.01, 0.01, 0.02],
      [0.00, 0.03, 0.02, 0.01]
    ];
    let config = MetaLearnerConfig {
      j_max: 2,
      ..Default::default()
    };
    let alpha = fit_meta_weights(&returns, &Array2::eye(2), &config);
    assert_eq!(alpha.len(), 2);
    assert_abs_diff_eq!(alpha.sum(), 1.0, epsilon = 1e-6);
  }

  #[test]
  fn zero_j_max_keeps_one_generator() {
    let returns = array![[0.01, 0.02], [0.02, 0.01]];
    let config = MetaLearnerConfig {
      j_max: 0,
      ..Default::default()
    };
    assert_eq!(fit_meta_weights(&returns, &Array2::eye(2), &config), array![1.0]);
  }

  #[test]
  fn strong_turnover_penalty_pins_the_baseline() {
    let returns = array![[0.01, 0.011], [0.012, 0.013], [0.009, 0.010]];
    let config = MetaLearnerConfig {
      penalty_to: 10.0,
      baseline_idx: 7,
      ..Default::default()
    };
    let alpha = fit_meta_weights(&returns, &Array2::eye(2), &config);
    assert_abs_diff_eq!(alpha[1], 1.0, epsilon = 1e-4);
  }

  #[test]
  fn single_observation_uses_identity_covariance() {
    let cov = sample_cov(&array![[0.1, 0.2, 0.3]]);
    assert_eq!(cov, Array2::<f64>::eye(3));
  }

  #[test]
  fn trace_scale_defaults_to_one_when_empty() {
    assert_eq!(trace_scale(&Array2::zeros((0, 0))), 1.0);
    assert_abs_diff_eq!(trace_scale(&(Array2::eye(4) * 0.25)), 1.0, epsilon = 1e-12);
  }
}
