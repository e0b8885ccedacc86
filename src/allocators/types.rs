//! # Allocator Types
//!
//! $$
//! \mathcal C=(\lambda,\rho,L,\tau,\mathbf w_{prev},\text{CVaR}_\alpha,\text{EDaR}_\beta,\epsilon_{rc},\mathcal P)
//! $$
//!
//! Shared configuration, generator identities and weight-vector helpers.

use std::fmt::Display;

use ndarray::Array1;
use ndarray::Array2;

use super::error::GeneratorError;

/// Tolerance used when checking that a weight vector sums to one.
pub const SUM_TOLERANCE: f64 = 1e-6;

/// The four independent allocation generators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeneratorKind {
  /// Risk-adjusted return with robustness penalty and scenario risk caps.
  A,
  /// Hierarchical Risk Parity.
  B,
  /// Closed-form ridge-regularized allocation.
  C,
  /// CVaR minimization followed by cluster risk balancing.
  D,
}

impl GeneratorKind {
  pub const ALL: [GeneratorKind; 4] = [Self::A, Self::B, Self::C, Self::D];

  /// Short label used in artifact names.
  pub fn label(self) -> &'static str {
    match self {
      Self::A => "A",
      Self::B => "B",
      Self::C => "C",
      Self::D => "D",
    }
  }

  /// Parse a generator label, case-insensitive.
  pub fn from_label(s: &str) -> Option<Self> {
    match s.trim().to_uppercase().as_str() {
      "A" => Some(Self::A),
      "B" | "HRP" => Some(Self::B),
      "C" | "DRO" => Some(Self::C),
      "D" | "CVAR" => Some(Self::D),
      _ => None,
    }
  }
}

impl Display for GeneratorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.label())
  }
}

/// Numeric knobs shared by every generator invocation.
///
/// The bag is built once per run and only ever borrowed afterwards, so it can
/// be shared across generator threads without locking.
#[derive(Clone, Debug)]
pub struct ConstraintsBag {
  /// Weight on the quadratic risk term of generator A.
  pub risk_aversion: f64,
  /// Strength of the L2 robustness penalty.
  pub dro_rho: f64,
  /// Cap on `sum(|w|)`.
  pub gross_leverage_cap: Option<f64>,
  /// Cap on one-way turnover `0.5 * sum(|w - w_prev|)`. Needs `w_prev`.
  pub turnover_cap: Option<f64>,
  /// Previous-period weights.
  pub w_prev: Option<Array1<f64>>,
  /// Scenario returns, T rows by N assets.
  pub scenario_returns: Option<Array2<f64>>,
  /// Upper bound on scenario CVaR. Needs `scenario_returns`.
  pub cvar_cap: Option<f64>,
  /// CVaR tail probability.
  pub cvar_alpha: f64,
  /// Drawdown paths, T rows by N assets, positive entries are losses.
  pub edar_scenarios: Option<Array2<f64>>,
  /// Upper bound on drawdown-at-risk. Needs `edar_scenarios`.
  pub edar_cap: Option<f64>,
  /// Drawdown confidence level.
  pub edar_alpha: f64,
  /// Tracking-error budget used to scale the meta-learner deviation penalty.
  pub tracking_error_cap: Option<f64>,
  /// Cluster risk-contribution tolerance.
  pub erc_tol: f64,
  /// Disjoint index groups used for risk balancing.
  pub clusters: Vec<Vec<usize>>,
}

impl Default for ConstraintsBag {
  fn default() -> Self {
    Self {
      risk_aversion: 1e-4,
      dro_rho: 0.0,
      gross_leverage_cap: None,
      turnover_cap: None,
      w_prev: None,
      scenario_returns: None,
      cvar_cap: None,
      cvar_alpha: 0.05,
      edar_scenarios: None,
      edar_cap: None,
      edar_alpha: 0.2,
      tracking_error_cap: None,
      erc_tol: 0.02,
      clusters: Vec::new(),
    }
  }
}

impl ConstraintsBag {
  /// Turnover cap and previous weights, when both are present.
  pub fn turnover(&self) -> Option<(f64, &Array1<f64>)> {
    match (self.turnover_cap, self.w_prev.as_ref()) {
      (Some(cap), Some(prev)) => Some((cap, prev)),
      _ => None,
    }
  }

  /// Check every asset-indexed field against `n` assets.
  pub(crate) fn validate(&self, n: usize) -> Result<(), GeneratorError> {
    if let Some(prev) = &self.w_prev {
      if prev.len() != n {
        return Err(GeneratorError::shape_mismatch("w_prev", n, prev.len()));
      }
    }
    if let Some(scen) = &self.scenario_returns {
      if scen.ncols() != n {
        return Err(GeneratorError::shape_mismatch("scenario_returns columns", n, scen.ncols()));
      }
    }
    if let Some(scen) = &self.edar_scenarios {
      if scen.ncols() != n {
        return Err(GeneratorError::shape_mismatch("edar_scenarios columns", n, scen.ncols()));
      }
    }
    for cluster in &self.clusters {
      if let Some(&bad) = cluster.iter().find(|&&i| i >= n) {
        return Err(GeneratorError::shape_mismatch("cluster index", n, bad));
      }
    }
    Ok(())
  }
}

/// `1/n` for every asset; empty for `n = 0`.
pub fn uniform_weights(n: usize) -> Array1<f64> {
  if n == 0 {
    return Array1::zeros(0);
  }
  Array1::from_elem(n, 1.0 / n as f64)
}

/// Clip negatives to zero. NaN passes through so the caller's total check sees it.
pub(crate) fn clip_negative(w: &Array1<f64>) -> Array1<f64> {
  w.mapv(|x| if x < 0.0 { 0.0 } else { x })
}

/// Clip negatives and rescale to unit sum, uniform when the total is not a
/// finite positive number.
pub(crate) fn clip_and_normalize(w: &Array1<f64>) -> Array1<f64> {
  let clipped = clip_negative(w);
  let total = clipped.sum();
  if !total.is_finite() || total <= 0.0 {
    return uniform_weights(w.len());
  }
  clipped / total
}

/// One-way turnover `0.5 * sum(|a - b|)`.
pub(crate) fn half_l1_distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
  0.5 * a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>()
}

/// Square check for a covariance matrix against `n` assets.
pub(crate) fn check_covariance(sigma: &Array2<f64>, n: usize) -> Result<(), GeneratorError> {
  if sigma.nrows() != sigma.ncols() {
    return Err(GeneratorError::shape_mismatch(
      "covariance columns",
      sigma.nrows(),
      sigma.ncols(),
    ));
  }
  if sigma.nrows() != n {
    return Err(GeneratorError::shape_mismatch("covariance rows", n, sigma.nrows()));
  }
  Ok(())
}

/// `0.5 * (Σ + Σᵀ)`.
pub(crate) fn symmetrize(sigma: &Array2<f64>) -> Array2<f64> {
  (sigma + &sigma.t()) * 0.5
}

/// Split `n_assets` into at most `n_clusters` contiguous, non-empty groups.
///
/// Earlier groups take the remainder, so 7 assets in 3 groups become
/// `[0,1,2], [3,4], [5,6]`.
pub fn contiguous_clusters(n_assets: usize, n_clusters: usize) -> Vec<Vec<usize>> {
  let k = n_clusters.min(n_assets).max(1);
  let base = n_assets / k;
  let extra = n_assets % k;
  let mut clusters = Vec::with_capacity(k);
  let mut start = 0;
  for g in 0..k {
    let size = base + usize::from(g < extra);
    if size > 0 {
      clusters.push((start..start + size).collect());
    }
    start += size;
  }
  clusters
}
