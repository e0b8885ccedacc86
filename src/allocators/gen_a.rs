//! # Generator A
//!
//! $$
//! \max_{\mathbf w\in\Delta}\ \mu^\top\mathbf w-\rho\lVert\mathbf w\rVert_2-\lambda\,\mathbf w^\top\Sigma\mathbf w
//! \quad\text{s.t.}\quad \text{CVaR}_\alpha(\mathbf w)\le c,\ \text{EDaR}_\beta(\mathbf w)\le e
//! $$
//!
//! Sharpe-style allocation with a robustness penalty, scenario tail-risk caps,
//! then cluster risk balancing and a turnover shrink.

use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;
use tracing::warn;

use super::erc::balance_clusters;
use super::error::GeneratorError;
use super::solver::Constraint;
use super::solver::SimplexProgram;
use super::solver::SolverChain;
use super::solver::TailLoss;
use super::solver::Term;
use super::types::check_covariance;
use super::types::clip_and_normalize;
use super::types::half_l1_distance;
use super::types::symmetrize;
use super::types::uniform_weights;
use super::types::ConstraintsBag;

/// Slack allowed on the turnover cap before the shrink kicks in.
const TURNOVER_SLACK: f64 = 1e-6;

pub(crate) fn build_program(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> SimplexProgram {
  let n = mu.len();
  let mut program = SimplexProgram::new(n).term(Term::Reward(mu.clone()));

  if bag.dro_rho > 0.0 {
    program = program.term(Term::L2Distance {
      anchor: Array1::zeros(n),
      coef: bag.dro_rho,
    });
  }
  program = program.term(Term::Quadratic {
    matrix: symmetrize(sigma),
    coef: bag.risk_aversion,
  });

  if let Some(cap) = bag.gross_leverage_cap {
    program = program.constraint(Constraint::GrossLeverage(cap));
  }
  if let Some((cap, prev)) = bag.turnover() {
    program = program.constraint(Constraint::Turnover {
      anchor: prev.clone(),
      cap,
    });
  }
  if let (Some(scenarios), Some(cap)) = (&bag.scenario_returns, bag.cvar_cap) {
    program = program.constraint(Constraint::Tail {
      tail: TailLoss::cvar(scenarios, bag.cvar_alpha),
      cap,
    });
  }
  if let (Some(drawdowns), Some(cap)) = (&bag.edar_scenarios, bag.edar_cap) {
    program = program.constraint(Constraint::Tail {
      tail: TailLoss::drawdown(drawdowns, bag.edar_alpha),
      cap,
    });
  }

  program
}

/// Pull `w` back toward `w_prev` until one-way turnover equals the cap.
pub(crate) fn shrink_turnover(w: Array1<f64>, bag: &ConstraintsBag) -> Array1<f64> {
  let Some((cap, prev)) = bag.turnover() else {
    return w;
  };

  let turnover = half_l1_distance(&w, prev);
  if turnover <= cap + TURNOVER_SLACK || turnover <= 0.0 {
    return w;
  }

  let factor = cap / turnover;
  debug!(turnover, cap, factor, "shrinking move toward previous weights");
  let shrunk = prev + &((&w - prev) * factor);
  clip_and_normalize(&shrunk)
}

fn check_inputs(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> Result<(), GeneratorError> {
  check_covariance(sigma, mu.len())?;
  bag.validate(mu.len())
}

fn finish(raw: Array1<f64>, sigma: &Array2<f64>, bag: &ConstraintsBag) -> Array1<f64> {
  let w = clip_and_normalize(&raw);
  let w = balance_clusters(&w, sigma, &bag.clusters, bag.erc_tol);
  let w = shrink_turnover(w, bag);
  clip_and_normalize(&w)
}

/// Run generator A, degrading to uniform weights when no backend solves the
/// program. Only inconsistent input shapes are reported as errors.
pub fn generator_a(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> Result<Array1<f64>, GeneratorError> {
  generator_a_with_status(mu, sigma, bag).map(|(w, _)| w)
}

/// Like [`generator_a`], also reporting whether the solver gave up and the
/// uniform fallback went through post-processing instead.
pub(crate) fn generator_a_with_status(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  bag: &ConstraintsBag,
) -> Result<(Array1<f64>, bool), GeneratorError> {
  check_inputs(mu, sigma, bag)?;
  if mu.is_empty() {
    return Ok((Array1::zeros(0), false));
  }

  let (raw, degraded) = match SolverChain::default().solve(&build_program(mu, sigma, bag)) {
    Ok(w) => (w, false),
    Err(err) => {
      warn!(generator = "A", error = %err, "falling back to uniform weights");
      (uniform_weights(mu.len()), true)
    }
  };
  Ok((finish(raw, sigma, bag), degraded))
}
