//! # Generator C
//!
//! $$
//! \mathbf w\propto\left[\tfrac1\gamma\left(\tfrac12(\Sigma+\Sigma^\top)+\rho I\right)^{+}\mu\right]_+
//! $$
//!
//! Closed-form ridge-regularized allocation.

use nalgebra::DMatrix;
use nalgebra::DVector;
use ndarray::Array1;
use ndarray::Array2;

use super::error::GeneratorError;
use super::types::check_covariance;
use super::types::clip_and_normalize;
use super::types::symmetrize;
use super::types::uniform_weights;

const ZERO_ATOL: f64 = 1e-8;
const PINV_EPS: f64 = 1e-12;

pub fn generator_c_dro_closed(
  mu: &Array1<f64>,
  sigma: &Array2<f64>,
  gamma: f64,
  rho: f64,
) -> Result<Array1<f64>, GeneratorError> {
  let n = mu.len();
  check_covariance(sigma, n)?;
  if n == 0 {
    return Ok(Array1::zeros(0));
  }

  let sym = symmetrize(sigma);
  let jitter = rho.max(1e-6);
  let reg = DMatrix::from_fn(n, n, |i, j| sym[[i, j]] + if i == j { jitter } else { 0.0 });
  let inv = reg
    .pseudo_inverse(PINV_EPS)
    .map_err(|e| GeneratorError::degeneracy(format!("pseudo-inverse failed: {e}")))?;

  let raw = inv * DVector::from_iterator(n, mu.iter().copied());
  if raw.iter().all(|x| x.abs() <= ZERO_ATOL) {
    return Ok(uniform_weights(n));
  }

  let scaled = Array1::from_iter(raw.iter().map(|x| x / gamma.max(1e-6)));
  Ok(clip_and_normalize(&scaled))
}
