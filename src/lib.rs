//! # fair-alloc
//!
//! $$
//! \mathbf{w}^\* \in \Delta^{n-1}=\{\mathbf{w}\ge 0,\ \mathbf 1^\top\mathbf{w}=1\}
//! $$
//!
//! Decision-layer portfolio allocation: four independent long-only generators
//! (Sharpe/scenario-risk, hierarchical risk parity, closed-form robust, CVaR),
//! a meta-learner that blends their scenario-implied returns, and a pipeline
//! that loads upstream estimates, runs everything and writes an audit trail.

pub mod allocators;
pub mod pipeline;
