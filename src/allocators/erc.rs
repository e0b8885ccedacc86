//! # Equal Risk Contribution
//!
//! $$
//! RC_i=\frac{w_i(\Sigma\mathbf w)_i}{\mathbf w^\top\Sigma\mathbf w+\varepsilon},\qquad
//! \mathbf w_{\mathcal G}\leftarrow \mathbf w_{\mathcal G}\,\frac{\overline{RC}}{RC_{\mathcal G}}
//! $$
//!
//! Per-asset risk contributions and cluster-level risk balancing.

use ndarray::Array1;
use ndarray::Array2;
use tracing::debug;

use super::types::clip_negative;

const RC_EPS: f64 = 1e-16;

/// Default iteration budget for [`balance_clusters`].
pub const DEFAULT_BALANCE_MAX_ITER: usize = 50;

/// Share of portfolio variance attributable to each asset.
///
/// Sums to one whenever `wᵀΣw` is finite and positive.
pub fn risk_contributions(w: &Array1<f64>, sigma: &Array2<f64>) -> Array1<f64> {
  let m = sigma.dot(w);
  let total = w.dot(&m) + RC_EPS;
  (w * &m) / total
}

/// Sum of risk contributions inside each cluster. Empty clusters report zero
/// and indices outside `rc` are ignored.
pub(crate) fn cluster_totals(rc: &Array1<f64>, clusters: &[Vec<usize>]) -> Vec<f64> {
  clusters
    .iter()
    .map(|idx| idx.iter().filter_map(|&i| rc.get(i)).sum::<f64>())
    .collect()
}

/// Rescale cluster weights until their risk contributions sit within `tol` of
/// the cluster mean, with the default budget of 50 iterations.
pub fn balance_clusters(
  w: &Array1<f64>,
  sigma: &Array2<f64>,
  clusters: &[Vec<usize>],
  tol: f64,
) -> Array1<f64> {
  balance_clusters_with_max_iter(w, sigma, clusters, tol, DEFAULT_BALANCE_MAX_ITER)
}

/// [`balance_clusters`] with an explicit iteration budget.
///
/// Exhausting the budget is not an error: the last iterate is returned as a
/// best-effort answer. Without clusters `w` comes back untouched.
pub fn balance_clusters_with_max_iter(
  w: &Array1<f64>,
  sigma: &Array2<f64>,
  clusters: &[Vec<usize>],
  tol: f64,
  max_iter: usize,
) -> Array1<f64> {
  if clusters.is_empty() {
    return w.clone();
  }

  let mut w_adj = clip_negative(w);

  for iter in 0..max_iter {
    let rc = risk_contributions(&w_adj, sigma);
    let totals = cluster_totals(&rc, clusters);
    let target = totals.iter().sum::<f64>() / totals.len() as f64;
    if target == 0.0 {
      break;
    }

    let deviation = totals
      .iter()
      .map(|t| (t - target).abs())
      .fold(0.0_f64, f64::max);
    if deviation <= tol {
      debug!(iter, deviation, "cluster risk balanced");
      break;
    }

    for (idx, &total) in clusters.iter().zip(totals.iter()) {
      if idx.is_empty() || total == 0.0 {
        continue;
      }
      let scale = target / total;
      for &i in idx {
        if let Some(x) = w_adj.get_mut(i) {
          *x *= scale;
        }
      }
    }

    let s = w_adj.sum();
    if s > 0.0 {
      w_adj /= s;
    }
  }

  w_adj
}
