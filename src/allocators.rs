//! # Allocators
//!
//! $$
//! RC_i = \frac{w_i(\Sigma\mathbf{w})_i}{\mathbf{w}^\top\Sigma\mathbf{w}}
//! $$
//!
//! Risk-balanced allocation engines and their shared numerical helpers.

pub mod constraints;
pub mod erc;
pub mod error;
pub mod gen_a;
pub mod gen_b;
pub mod gen_c;
pub mod gen_d;
pub mod meta;
pub mod objectives;
pub(crate) mod solver;
pub mod types;

pub use constraints::erc_cluster_violation;
pub use erc::balance_clusters;
pub use erc::balance_clusters_with_max_iter;
pub use erc::risk_contributions;
pub use error::GeneratorError;
pub use gen_a::generator_a;
pub use gen_b::generator_b_hrp;
pub use gen_c::generator_c_dro_closed;
pub use gen_d::generator_d_cvar_erc;
pub use meta::fit_meta_weights;
pub use meta::MetaLearnerConfig;
pub use objectives::dro_penalty;
pub use objectives::sharpe_objective;
pub use types::contiguous_clusters;
pub use types::uniform_weights;
pub use types::ConstraintsBag;
pub use types::GeneratorKind;
