//! # Objectives
//!
//! $$
//! S(\mathbf w)=\frac{\mathbf w^\top\mu}{\sqrt{\mathbf w^\top\Sigma\mathbf w}},\qquad
//! P_\rho(\mathbf w)=\rho\,\lVert\mathbf w\rVert_2
//! $$
//!
//! Scalar objectives shared by generators and tests.

use ndarray::Array1;
use ndarray::Array2;

/// Portfolio Sharpe ratio; zero when the variance is numerically nil.
pub fn sharpe_objective(w: &Array1<f64>, mu: &Array1<f64>, sigma: &Array2<f64>) -> f64 {
  let numerator = w.dot(mu);
  let variance = w.dot(&sigma.dot(w));
  if variance <= 1e-16 {
    return 0.0;
  }
  numerator / variance.sqrt()
}

/// L2 robustness penalty; negative `rho` counts as zero.
pub fn dro_penalty(w: &Array1<f64>, rho: f64) -> f64 {
  rho.max(0.0) * w.dot(w).sqrt()
}
