//! # Generator B
//!
//! $$
//! d_{ij}=\sqrt{\tfrac12(1-\rho_{ij})},\qquad
//! \alpha_L=\frac{\sigma^2_R}{\sigma^2_L+\sigma^2_R}
//! $$
//!
//! Hierarchical Risk Parity: Ward-linkage seriation of the correlation
//! distance followed by recursive inverse-variance bisection.

use ndarray::Array1;
use ndarray::Array2;
use tracing::warn;

use super::error::GeneratorError;
use super::types::check_covariance;
use super::types::uniform_weights;

const VAR_FLOOR: f64 = 1e-12;

/// Correlation matrix with a variance floor; the diagonal is forced to one.
pub(crate) fn corr_from_cov(sigma: &Array2<f64>) -> Array2<f64> {
  let n = sigma.nrows();
  let sd: Vec<f64> = (0..n).map(|i| sigma[[i, i]].max(VAR_FLOOR).sqrt()).collect();

  Array2::from_shape_fn((n, n), |(i, j)| {
    if i == j {
      return 1.0;
    }
    let outer = sd[i] * sd[j];
    if outer > 0.0 {
      sigma[[i, j]] / outer
    } else {
      1.0
    }
  })
}

/// Leaf order of the Ward dendrogram built on `dist`.
///
/// Slot `i` always holds the cluster whose smallest leaf is `i`, so scanning
/// slot pairs in order and keeping the first strict minimum breaks ties on
/// the lexicographically smallest leaf pair.
fn ward_seriation(dist: &Array2<f64>) -> Vec<usize> {
  let n = dist.nrows();
  if n <= 1 {
    return (0..n).collect();
  }

  let mut left_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut right_child: Vec<usize> = Vec::with_capacity(n - 1);
  let mut active = vec![true; n];
  let mut size = vec![1.0_f64; n];
  let mut d = dist.to_owned();
  let mut node_id: Vec<usize> = (0..n).collect();

  for step in 0..(n - 1) {
    let mut min_d = f64::INFINITY;
    let mut mi = 0;
    let mut mj = 0;

    for i in 0..n {
      if !active[i] {
        continue;
      }
      for j in (i + 1)..n {
        if active[j] && d[[i, j]] < min_d {
          min_d = d[[i, j]];
          mi = i;
          mj = j;
        }
      }
    }

    let (a, b) = (node_id[mi], node_id[mj]);
    left_child.push(a.min(b));
    right_child.push(a.max(b));

    // Lance–Williams update for Ward's criterion on unsquared distances.
    let d_ij2 = min_d * min_d;
    for k in 0..n {
      if !active[k] || k == mi || k == mj {
        continue;
      }
      let t = size[mi] + size[mj] + size[k];
      let v = ((size[mi] + size[k]) * d[[mi, k]].powi(2) + (size[mj] + size[k]) * d[[mj, k]].powi(2)
        - size[k] * d_ij2)
        / t;
      let updated = v.max(0.0).sqrt();
      d[[mi, k]] = updated;
      d[[k, mi]] = updated;
    }

    size[mi] += size[mj];
    node_id[mi] = n + step;
    active[mj] = false;
  }

  fn collect_leaves(node: usize, n: usize, left: &[usize], right: &[usize], out: &mut Vec<usize>) {
    if node < n {
      out.push(node);
    } else {
      let idx = node - n;
      collect_leaves(left[idx], n, left, right, out);
      collect_leaves(right[idx], n, left, right, out);
    }
  }

  let root = n + n - 2;
  let mut order = Vec::with_capacity(n);
  collect_leaves(root, n, &left_child, &right_child, &mut order);
  order
}

/// Variance of the inverse-variance portfolio on `indices`.
fn cluster_var(indices: &[usize], sigma: &Array2<f64>) -> f64 {
  let inv: Vec<f64> = indices.iter().map(|&i| 1.0 / sigma[[i, i]].max(VAR_FLOOR)).collect();
  let total: f64 = inv.iter().sum();

  let mut var = 0.0;
  for (a, &i) in indices.iter().enumerate() {
    for (b, &j) in indices.iter().enumerate() {
      var += inv[a] / total * inv[b] / total * sigma[[i, j]];
    }
  }
  var
}

fn recursive_bisect(order: &[usize], sigma: &Array2<f64>, weights: &mut Array1<f64>) {
  if order.len() <= 1 {
    return;
  }

  let mid = order.len() / 2;
  let (left, right) = order.split_at(mid);

  let var_left = cluster_var(left, sigma);
  let var_right = cluster_var(right, sigma);
  let denom = var_left + var_right;
  let alloc_left = if denom > 0.0 { var_right / denom } else { 0.5 };

  for &i in left {
    weights[i] *= alloc_left;
  }
  for &i in right {
    weights[i] *= 1.0 - alloc_left;
  }

  recursive_bisect(left, sigma, weights);
  recursive_bisect(right, sigma, weights);
}

/// Hierarchical Risk Parity weights for `sigma`.
///
/// Empty input gives an empty vector. A single asset, or a distance matrix
/// with non-finite entries, gives uniform weights.
pub fn generator_b_hrp(sigma: &Array2<f64>) -> Result<Array1<f64>, GeneratorError> {
  let n = sigma.nrows();
  check_covariance(sigma, n)?;
  if n <= 1 {
    return Ok(uniform_weights(n));
  }

  let corr = corr_from_cov(sigma);
  let dist = corr.mapv(|c| (0.5 * (1.0 - c)).max(0.0).sqrt());
  if dist.iter().any(|x| !x.is_finite()) {
    warn!(generator = "B", "degenerate correlation distances, using uniform weights");
    return Ok(uniform_weights(n));
  }

  let order = ward_seriation(&dist);
  let mut weights = Array1::ones(n);
  recursive_bisect(&order, sigma, &mut weights);

  let total = weights.sum();
  if !(total.is_finite() && total > 0.0) {
    return Ok(uniform_weights(n));
  }
  Ok(weights / total)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use proptest::prelude::*;

  use super::*;

  #[test]
  fn identity_covariance_gives_equal_weights() {
    let w = generator_b_hrp(&Array2::eye(4)).unwrap();
    for &x in w.iter() {
      assert_abs_diff_eq!(x, 0.25, epsilon = 1e-6);
    }
  }

  #[test]
  fn scaled_identity_gives_equal_weights_for_odd_n() {
    let w = generator_b_hrp(&(Array2::eye(5) * 0.09)).unwrap();
    for &x in w.iter() {
      assert_abs_diff_eq!(x, 0.2, epsilon = 1e-6);
    }
  }

  #[test]
  fn edge_sizes() {
    assert_eq!(generator_b_hrp(&Array2::zeros((0, 0))).unwrap().len(), 0);
    assert_eq!(generator_b_hrp(&array![[0.04]]).unwrap(), array![1.0]);
  }

  #[test]
  fn nan_covariance_degrades_to_uniform() {
    let sigma = array![[0.04, f64::NAN], [f64::NAN, 0.09]];
    assert_eq!(generator_b_hrp(&sigma).unwrap(), array![0.5, 0.5]);
  }

  #[test]
  fn non_square_is_rejected() {
    let sigma = Array2::<f64>::zeros((2, 3));
    assert!(matches!(
      generator_b_hrp(&sigma),
      Err(GeneratorError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn ward_groups_correlated_pairs() {
    // Assets 0 and 2 move together, as do 1 and 3.
    let sigma = array![
      [1.0, 0.0, 0.9, 0.0],
      [0.0, 1.0, 0.0, 0.9],
      [0.9, 0.0, 1.0, 0.0],
      [0.0, 0.9, 0.0, 1.0]
    ];
    let dist = corr_from_cov(&sigma).mapv(|c| (0.5 * (1.0 - c)).max(0.0).sqrt());
    assert_eq!(ward_seriation(&dist), vec![0, 2, 1, 3]);
  }

  #[test]
  fn low_variance_asset_gets_more_weight() {
    let w = generator_b_hrp(&array![[0.01, 0.0], [0.0, 0.04]]).unwrap();
    assert_abs_diff_eq!(w[0], 0.8, epsilon = 1e-12);
  }

  #[test]
  fn zero_variance_asset_is_floored() {
    let w = generator_b_hrp(&array![[0.0, 0.0], [0.0, 0.04]]).unwrap();
    assert!(w.iter().all(|x| x.is_finite()));
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
  }

  proptest! {
    #[test]
    fn weights_stay_on_simplex(entries in prop::collection::vec(-1.0f64..1.0, 25)) {
      let a = Array2::from_shape_vec((5, 5), entries).unwrap();
      let sigma = a.dot(&a.t()) + Array2::<f64>::eye(5) * 0.01;
      let w = generator_b_hrp(&sigma).unwrap();
      prop_assert!((w.sum() - 1.0).abs() < 1e-9);
      prop_assert!(w.iter().all(|&x| x >= 0.0));
    }
  }
}
