//! # Simplex Programs
//!
//! $$
//! \min_{\mathbf w\in\Delta^{n-1}}\ \sum_k f_k(\mathbf w)\quad\text{s.t.}\quad g_j(\mathbf w)\le c_j
//! $$
//!
//! Declarative convex problems over the long-only simplex and an ordered chain
//! of interchangeable backends that solve them.

pub(crate) mod conic;
pub(crate) mod penalty;

use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use super::error::GeneratorError;
use super::types::half_l1_distance;

pub(crate) use conic::ConicBackend;
pub(crate) use penalty::PenaltyBackend;

/// Scenario tail loss `min_z z + scale * sum_t max(0, L_t·w - z)`.
///
/// With `scale = 1/(αT)` and `L = -R` this is the Rockafellar–Uryasev CVaR.
#[derive(Clone, Debug)]
pub(crate) struct TailLoss {
  /// One row per scenario; the row dotted with `w` is that scenario's loss.
  pub losses: Array2<f64>,
  pub scale: f64,
}

impl TailLoss {
  /// CVaR at confidence `1 - alpha` of the returns in `scenarios`.
  pub fn cvar(scenarios: &Array2<f64>, alpha: f64) -> Self {
    let t = scenarios.nrows().max(1) as f64;
    Self {
      losses: scenarios.mapv(|r| -r),
      scale: 1.0 / (alpha * t),
    }
  }

  /// Drawdown-at-risk at level `beta` of the drawdown magnitudes in `drawdowns`.
  pub fn drawdown(drawdowns: &Array2<f64>, beta: f64) -> Self {
    let t = drawdowns.nrows().max(1) as f64;
    Self {
      losses: drawdowns.clone(),
      scale: 1.0 / ((1.0 - beta) * t),
    }
  }

  /// Exact value at `w`. The minimizing `z` sits on one of the scenario losses.
  pub fn value(&self, w: &Array1<f64>) -> f64 {
    let mut losses = self.losses.dot(w).to_vec();
    if losses.is_empty() {
      return 0.0;
    }
    losses.sort_by(|a, b| b.total_cmp(a));

    let mut best = f64::INFINITY;
    let mut prefix = 0.0;
    for (k, &z) in losses.iter().enumerate() {
      let excess = prefix - k as f64 * z;
      best = best.min(z + self.scale * excess);
      prefix += z;
    }
    best
  }
}

/// Objective term, all in minimization form.
#[derive(Clone, Debug)]
pub(crate) enum Term {
  /// `-cᵀw`
  Reward(Array1<f64>),
  /// `coef * wᵀQw` with `Q` symmetric.
  Quadratic { matrix: Array2<f64>, coef: f64 },
  /// `coef * ‖w - anchor‖₂`
  L2Distance { anchor: Array1<f64>, coef: f64 },
  /// `coef * ‖w - anchor‖₁`
  L1Distance { anchor: Array1<f64>, coef: f64 },
  /// Tail loss as an objective.
  Tail(TailLoss),
}

/// Inequality constraint on top of the simplex.
#[derive(Clone, Debug)]
pub(crate) enum Constraint {
  /// `‖w‖₁ ≤ cap`
  GrossLeverage(f64),
  /// `0.5‖w - anchor‖₁ ≤ cap`
  Turnover { anchor: Array1<f64>, cap: f64 },
  /// Tail loss `≤ cap`
  Tail { tail: TailLoss, cap: f64 },
}

/// A convex problem over `w ≥ 0, sum(w) = 1`.
#[derive(Clone, Debug)]
pub(crate) struct SimplexProgram {
  pub n: usize,
  pub terms: Vec<Term>,
  pub constraints: Vec<Constraint>,
}

impl SimplexProgram {
  pub fn new(n: usize) -> Self {
    Self {
      n,
      terms: Vec::new(),
      constraints: Vec::new(),
    }
  }

  pub fn term(mut self, term: Term) -> Self {
    self.terms.push(term);
    self
  }

  pub fn constraint(mut self, constraint: Constraint) -> Self {
    self.constraints.push(constraint);
    self
  }

  /// Objective value at `w`.
  pub fn objective(&self, w: &Array1<f64>) -> f64 {
    self
      .terms
      .iter()
      .map(|term| match term {
        Term::Reward(c) => -c.dot(w),
        Term::Quadratic { matrix, coef } => coef * w.dot(&matrix.dot(w)),
        Term::L2Distance { anchor, coef } => {
          let d = w - anchor;
          coef * d.dot(&d).sqrt()
        }
        Term::L1Distance { anchor, coef } => coef * 2.0 * half_l1_distance(w, anchor),
        Term::Tail(tail) => tail.value(w),
      })
      .sum()
  }

  /// Total amount by which `w` breaks the side constraints.
  pub fn violation(&self, w: &Array1<f64>) -> f64 {
    self
      .constraints
      .iter()
      .map(|c| match c {
        Constraint::GrossLeverage(cap) => (w.mapv(f64::abs).sum() - cap).max(0.0),
        Constraint::Turnover { anchor, cap } => (half_l1_distance(w, anchor) - cap).max(0.0),
        Constraint::Tail { tail, cap } => (tail.value(w) - cap).max(0.0),
      })
      .sum()
  }
}

/// A backend able to solve a [`SimplexProgram`].
pub(crate) trait ConvexSolverStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  /// Raw solution for the asset block; callers clip and renormalize.
  fn solve(&self, program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError>;
}

/// Backends tried in order until one returns a finite solution.
pub(crate) struct SolverChain {
  backends: Vec<Box<dyn ConvexSolverStrategy>>,
}

impl Default for SolverChain {
  fn default() -> Self {
    Self {
      backends: vec![
        Box::new(ConicBackend::default()),
        Box::new(PenaltyBackend::default()),
      ],
    }
  }
}

impl SolverChain {
  #[cfg(test)]
  pub fn with_backends(backends: Vec<Box<dyn ConvexSolverStrategy>>) -> Self {
    Self { backends }
  }

  pub fn solve(&self, program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError> {
    let mut last = GeneratorError::non_convergence("no solver backend configured");

    for backend in &self.backends {
      match backend.solve(program) {
        Ok(w) if w.len() == program.n && w.iter().all(|x| x.is_finite()) => {
          debug!(backend = backend.name(), "solver backend succeeded");
          return Ok(w);
        }
        Ok(_) => {
          warn!(backend = backend.name(), "solver backend returned a non-finite point");
          last = GeneratorError::non_convergence(format!(
            "{} returned a non-finite point",
            backend.name()
          ));
        }
        Err(err) => {
          warn!(backend = backend.name(), error = %err, "solver backend failed");
          last = err;
        }
      }
    }

    Err(last)
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  struct Failing;

  impl ConvexSolverStrategy for Failing {
    fn name(&self) -> &'static str {
      "failing"
    }

    fn solve(&self, _program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError> {
      Err(GeneratorError::non_convergence("always fails"))
    }
  }

  struct Fixed(Array1<f64>);

  impl ConvexSolverStrategy for Fixed {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn solve(&self, _program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn tail_value_matches_mean_of_worst_scenarios() {
    // 4 scenarios, alpha = 0.5: CVaR is the mean of the 2 worst losses.
    let scenarios = array![[0.02], [-0.04], [0.01], [-0.02]];
    let tail = TailLoss::cvar(&scenarios, 0.5);
    assert_abs_diff_eq!(tail.value(&array![1.0]), 0.03, epsilon = 1e-12);
  }

  #[test]
  fn chain_falls_through_to_next_backend() {
    let chain = SolverChain::with_backends(vec![
      Box::new(Failing),
      Box::new(Fixed(array![0.25, 0.75])),
    ]);
    let w = chain.solve(&SimplexProgram::new(2)).unwrap();
    assert_eq!(w, array![0.25, 0.75]);
  }

  #[test]
  fn chain_rejects_non_finite_points() {
    let chain = SolverChain::with_backends(vec![Box::new(Fixed(array![f64::NAN, 1.0]))]);
    assert!(matches!(
      chain.solve(&SimplexProgram::new(2)),
      Err(GeneratorError::SolverNonConvergence { .. })
    ));
  }

  #[test]
  fn violation_reports_turnover_excess() {
    let program = SimplexProgram::new(2).constraint(Constraint::Turnover {
      anchor: array![1.0, 0.0],
      cap: 0.1,
    });
    assert_abs_diff_eq!(program.violation(&array![0.5, 0.5]), 0.4, epsilon = 1e-12);
  }
}
