//! # Constraint Diagnostics
//!
//! $$
//! v=\max_{\mathcal G}\left|RC_{\mathcal G}-\overline{RC}\right|-\epsilon
//! $$
//!
//! Cluster-level equal-risk diagnostics.

use ndarray::Array1;
use ndarray::Array2;

use super::erc::risk_contributions;

/// Distance of the worst cluster from equal risk, minus `tol`.
///
/// Non-positive values pass. Empty clusters are skipped; with no non-empty
/// cluster the result is `-tol`.
pub fn erc_cluster_violation(
  w: &Array1<f64>,
  sigma: &Array2<f64>,
  clusters: &[Vec<usize>],
  tol: f64,
) -> f64 {
  if clusters.iter().all(|c| c.is_empty()) {
    return -tol;
  }

  let rc = risk_contributions(w, sigma);
  let totals: Vec<f64> = clusters
    .iter()
    .filter(|c| !c.is_empty())
    .map(|c| c.iter().filter_map(|&i| rc.get(i)).sum::<f64>())
    .collect();

  let target = totals.iter().sum::<f64>() / totals.len() as f64;
  let deviation = totals
    .iter()
    .map(|t| (t - target).abs())
    .fold(0.0_f64, f64::max);
  deviation - tol
}
