//! # Penalty Backend
//!
//! $$
//! \min_{\mathbf x}\ f(\mathrm{softmax}(\mathbf x)) + \kappa\,(v + v^2)
//! $$
//!
//! Derivative-free fallback: the simplex is parameterized with a softmax and
//! side constraints enter as an exact penalty on their total violation `v`.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use tracing::debug;

use super::super::error::GeneratorError;
use super::ConvexSolverStrategy;
use super::SimplexProgram;

/// Nelder–Mead over softmax logits.
#[derive(Clone, Debug)]
pub(crate) struct PenaltyBackend {
  pub max_iters: u64,
  pub penalty: f64,
  /// Largest violation accepted in the returned point.
  pub feasibility_tol: f64,
}

impl Default for PenaltyBackend {
  fn default() -> Self {
    Self {
      max_iters: 5000,
      penalty: 1e4,
      feasibility_tol: 1e-4,
    }
  }
}

fn softmax(x: &[f64]) -> Array1<f64> {
  let n = x.len();
  if n == 0 {
    return Array1::zeros(0);
  }

  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps = Array1::from_iter(x.iter().map(|&v| (v - max_x).exp()));
  let sum = exps.sum();

  if sum.is_nan() || sum < 1e-15 {
    Array1::from_elem(n, 1.0 / n as f64)
  } else {
    exps / sum
  }
}

struct PenalizedCost<'a> {
  program: &'a SimplexProgram,
  penalty: f64,
}

impl CostFunction for PenalizedCost<'_> {
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
    let w = softmax(x);
    let v = self.program.violation(&w);
    let value = self.program.objective(&w) + self.penalty * (v + v * v);
    Ok(if value.is_finite() { value } else { f64::MAX })
  }
}

impl ConvexSolverStrategy for PenaltyBackend {
  fn name(&self) -> &'static str {
    "penalty"
  }

  fn solve(&self, program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError> {
    let n = program.n;
    if n == 0 {
      return Ok(Array1::zeros(0));
    }

    let x0 = vec![0.0; n];
    let mut simplex = Vec::with_capacity(n + 1);
    simplex.push(x0.clone());
    for i in 0..n {
      let mut point = x0.clone();
      point[i] = 1.0;
      simplex.push(point);
    }

    let cost = PenalizedCost {
      program,
      penalty: self.penalty,
    };
    let solver = NelderMead::new(simplex)
      .with_sd_tolerance(1e-10)
      .map_err(|e| GeneratorError::non_convergence(format!("nelder-mead setup failed: {e}")))?;
    let res = Executor::new(cost, solver)
      .configure(|state| state.max_iters(self.max_iters))
      .run()
      .map_err(|e| GeneratorError::non_convergence(format!("nelder-mead failed: {e}")))?;

    let best_x = res.state.best_param.unwrap_or(x0);
    let w = softmax(&best_x);
    let violation = program.violation(&w);
    debug!(violation, "penalty solve finished");

    if violation > self.feasibility_tol {
      return Err(GeneratorError::non_convergence(format!(
        "penalty solution violates constraints by {violation:.3e}"
      )));
    }
    Ok(w)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::allocators::solver::Constraint;
  use crate::allocators::solver::Term;

  #[test]
  fn softmax_handles_empty_and_large_logits() {
    assert_eq!(softmax(&[]).len(), 0);
    let w = softmax(&[1000.0, 1000.0]);
    assert_abs_diff_eq!(w[0], 0.5, epsilon = 1e-12);
  }

  #[test]
  fn min_variance_on_two_assets() {
    let program = SimplexProgram::new(2).term(Term::Quadratic {
      matrix: array![[0.04, 0.0], [0.0, 0.01]],
      coef: 1.0,
    });
    let w = PenaltyBackend::default().solve(&program).unwrap();
    assert_abs_diff_eq!(w[0], 0.2, epsilon = 1e-3);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn infeasible_program_is_rejected() {
    let program = SimplexProgram::new(2).constraint(Constraint::GrossLeverage(0.5));
    assert!(matches!(
      PenaltyBackend::default().solve(&program),
      Err(GeneratorError::SolverNonConvergence { .. })
    ));
  }
}
