//! # Generator D
//!
//! $$
//! \min_{\mathbf w\in\Delta,\,z,\,\mathbf u\ge0}\ z+\frac{1}{\alpha T}\sum_t u_t
//! \quad\text{s.t.}\quad u_t\ge -\mathbf r_t^\top\mathbf w-z
//! $$
//!
//! Scenario CVaR minimization followed by cluster risk balancing.

use ndarray::Array1;
use ndarray::Array2;
use tracing::warn;

use super::erc::balance_clusters;
use super::error::GeneratorError;
use super::gen_a::shrink_turnover;
use super::solver::Constraint;
use super::solver::SimplexProgram;
use super::solver::SolverChain;
use super::solver::TailLoss;
use super::solver::Term;
use super::types::check_covariance;
use super::types::clip_and_normalize;
use super::types::uniform_weights;
use super::types::ConstraintsBag;

fn scenarios<'a>(
  mu: &Array1<f64>,
  bag: &'a ConstraintsBag,
) -> Result<&'a Array2<f64>, GeneratorError> {
  let Some(scenarios) = bag.scenario_returns.as_ref() else {
    return Err(GeneratorError::shape_mismatch("scenario_returns columns", mu.len(), 0));
  };
  if scenarios.ncols() != mu.len() {
    return Err(GeneratorError::shape_mismatch(
      "scenario_returns columns",
      mu.len(),
      scenarios.ncols(),
    ));
  }
  Ok(scenarios)
}

fn build_program(n: usize, scenarios: &Array2<f64>, bag: &ConstraintsBag) -> SimplexProgram {
  let tail = TailLoss::cvar(scenarios, bag.cvar_alpha);
  let mut program = SimplexProgram::new(n).term(Term::Tail(tail));

  if let Some(cap) = bag.gross_leverage_cap {
    program = program.constraint(Constraint::GrossLeverage(cap));
  }
  if let Some((cap, prev)) = bag.turnover() {
    program = program.constraint(Constraint::Turnover {
      anchor: prev.clone(),
      cap,
    });
  }
  program
}

fn prepare<'a>(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &'a ConstraintsBag,
) -> Result<&'a Array2<f64>, GeneratorError> {
  let scenarios = scenarios(mu, bag)?;
  check_covariance(sigma, mu.len())?;
  bag.validate(mu.len())?;
  Ok(scenarios)
}

fn finish(raw: Array1<f64>, sigma: &Array2<f64>, bag: &ConstraintsBag) -> Array1<f64> {
  let w = clip_and_normalize(&raw);
  let w = balance_clusters(&w, sigma, &bag.clusters, bag.erc_tol);
  // Balancing can undo the solver's turnover cap.
  let w = shrink_turnover(w, bag);
  clip_and_normalize(&w)
}

/// Minimum-CVaR weights, cluster balanced.
///
/// Requires `bag.scenario_returns` with one column per asset; anything else is
/// a shape mismatch. Solver failure degrades to uniform weights.
pub fn generator_d_cvar_erc(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> Result<Array1<f64>, GeneratorError> {
  generator_d_with_status(mu, sigma, bag).map(|(w, _)| w)
}

/// Like [`generator_d_cvar_erc`], also reporting whether the uniform fallback
/// was used.
pub(crate) fn generator_d_with_status(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> Result<(Array1<f64>, bool), GeneratorError> {
  let scenarios = prepare(mu, sigma, bag)?;
  let n = mu.len();
  if n == 0 {
    return Ok((Array1::zeros(0), false));
  }

  let (raw, degraded) = match SolverChain::default().solve(&build_program(n, scenarios, bag)) {
    Ok(w) => (w, false),
    Err(err) => {
      warn!(generator = "D", error = %err, "falling back to uniform weights");
      (uniform_weights(n), true)
    }
  };
  Ok((finish(raw, sigma, bag), degraded))
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use proptest::prelude::*;

  use super::*;
  use crate::allocators::types::half_l1_distance;
  use crate::allocators::types::SUM_TOLERANCE;

  fn scenarios3() -> Array2<f64> {
    array![
      [0.010, 0.004, -0.030],
      [-0.050, 0.002, 0.020],
      [0.020, -0.003, 0.010],
      [0.005, 0.001, -0.040],
      [-0.010, 0.003, 0.030],
      [0.015, -0.002, 0.000]
    ]
  }

  fn sigma3() -> Array2<f64> {
    array![
      [0.04, 0.006, 0.002],
      [0.006, 0.09, 0.01],
      [0.002, 0.01, 0.16]
    ]
  }

  #[test]
  fn missing_scenarios_is_a_shape_error() {
    let bag = ConstraintsBag::default();
    let err = generator_d_cvar_erc(&array![0.1, 0.1, 0.1], &sigma3(), &bag).unwrap_err();
    assert!(matches!(err, GeneratorError::ShapeMismatch { .. }));
  }

  #[test]
  fn wrong_scenario_width_is_a_shape_error() {
    let bag = ConstraintsBag {
      scenario_returns: Some(Array2::zeros((4, 2))),
      ..Default::default()
    };
    let err = generator_d_cvar_erc(&array![0.1, 0.1, 0.1], &sigma3(), &bag).unwrap_err();
    assert!(matches!(err, GeneratorError::ShapeMismatch { expected: 3, actual: 2, .. }));
  }

  #[test]
  fn prefers_the_low_tail_asset() {
    let bag = ConstraintsBag {
      scenario_returns: Some(scenarios3()),
      cvar_alpha: 0.2,
      ..Default::default()
    };
    let w = generator_d_cvar_erc(&array![0.05, 0.01, 0.03], &sigma3(), &bag).unwrap();
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = SUM_TOLERANCE);
    assert!(w[1] > w[0] && w[1] > w[2]);
  }

  #[test]
  fn respects_turnover_cap() {
    let prev = array![0.4, 0.2, 0.4];
    let bag = ConstraintsBag {
      scenario_returns: Some(scenarios3()),
      cvar_alpha: 0.2,
      turnover_cap: Some(0.1),
      w_prev: Some(prev.clone()),
      ..Default::default()
    };
    let w = generator_d_cvar_erc(&array![0.05, 0.01, 0.03], &sigma3(), &bag).unwrap();
    assert!(half_l1_distance(&w, &prev) <= 0.1 + 1e-6);
    assert!(w.iter().all(|&x| x >= -1e-8));
  }

  #[test]
  fn turnover_cap_survives_cluster_balancing() {
    let prev = array![0.4, 0.2, 0.4];
    let bag = ConstraintsBag {
      scenario_returns: Some(scenarios3()),
      cvar_alpha: 0.2,
      turnover_cap: Some(0.1),
      w_prev: Some(prev.clone()),
      clusters: vec![vec![0, 1], vec![2]],
      ..Default::default()
    };
    let mu = array![0.05, 0.01, 0.03];
    let (w, degraded) = generator_d_with_status(&mu, &sigma3(), &bag).unwrap();

    assert!(!degraded);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = SUM_TOLERANCE);
    assert!(half_l1_distance(&w, &prev) <= 0.1 + 1e-6);
  }

  proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn output_stays_on_simplex(
      returns in prop::collection::vec(-0.08f64..0.06, 24),
      raw_prev in prop::collection::vec(0.05f64..1.0, 3),
    ) {
      let prev = Array1::from(raw_prev);
      let prev = &prev / prev.sum();
      let bag = ConstraintsBag {
        scenario_returns: Some(Array2::from_shape_vec((8, 3), returns).unwrap()),
        gross_leverage_cap: Some(1.75),
        turnover_cap: Some(0.2),
        w_prev: Some(prev.clone()),
        clusters: vec![vec![0, 1], vec![2]],
        ..Default::default()
      };
      let w = generator_d_cvar_erc(&array![0.05, 0.01, 0.03], &sigma3(), &bag).unwrap();
      prop_assert!((w.sum() - 1.0).abs() <= SUM_TOLERANCE);
      prop_assert!(w.iter().all(|&x| x >= -1e-8));
      prop_assert!(half_l1_distance(&w, &prev) <= 0.2 + 1e-6);
    }
  }
}
