//! # Optimization Pipeline
//!
//! $$
//! \text{Load}\to\text{Constrain}\to\{\mathbf w^{(A)},\dots,\mathbf w^{(D)}\}\to
//! \mathbf w^\*=\textstyle\sum_j\alpha_j\mathbf w^{(j)}\to RC(\mathbf w^\*)\to\text{Audit}
//! $$
//!
//! Orchestrates one allocation run from upstream artifacts to the audit trail.

pub mod artifacts;
pub mod audit;
pub mod config;
pub mod error;

use std::collections::BTreeMap;
use std::path::PathBuf;

use ndarray::Array1;
use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use artifacts::ArtifactLayout;
pub use audit::AuditReport;
pub use audit::AuditTrail;
pub use config::Params;
pub use config::Thresholds;
pub use error::PipelineError;

use crate::allocators::contiguous_clusters;
use crate::allocators::fit_meta_weights;
use crate::allocators::gen_a::generator_a_with_status;
use crate::allocators::gen_d::generator_d_with_status;
use crate::allocators::generator_b_hrp;
use crate::allocators::generator_c_dro_closed;
use crate::allocators::risk_contributions;
use crate::allocators::types::clip_and_normalize;
use crate::allocators::uniform_weights;
use crate::allocators::ConstraintsBag;
use crate::allocators::GeneratorError;
use crate::allocators::GeneratorKind;
use crate::allocators::MetaLearnerConfig;

const N_CLUSTERS: usize = 3;
const MAX_META_GENERATORS: usize = 3;
const CVAR_ALPHA: f64 = 0.05;
const EDAR_ALPHA: f64 = 0.8;
const DRO_RHO: f64 = 0.05;
const RISK_AVERSION: f64 = 1e-4;
const GEN_C_GAMMA: f64 = 1.0;
const META_PENALTY_TO: f64 = 0.1;
const AUDIT_NOTE: &str = "optimization pipeline";

/// Where to read from and write to, and what to run.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
  /// Artifact root holding `estimates/`, `factors/` and `weights/`.
  pub artifacts_root: PathBuf,
  pub params_path: PathBuf,
  pub thresholds_path: PathBuf,
  /// Files snapshotted and hashed by the audit step.
  pub config_paths: Vec<PathBuf>,
  /// Defaults to `<artifacts_root>/audit`.
  pub audit_dir: Option<PathBuf>,
  /// Defaults to `seeds.yml` inside the audit directory.
  pub seed_path: Option<PathBuf>,
  /// Generators to run, in output order.
  pub generators: Vec<GeneratorKind>,
  pub use_meta: bool,
  /// Risk-balancing groups; a contiguous split into three when absent.
  pub clusters: Option<Vec<Vec<usize>>>,
  /// Previous-period weights, enabling the turnover cap.
  pub w_prev: Option<Array1<f64>>,
}

impl PipelineOptions {
  /// Defaults with configuration files taken from `config_dir`.
  pub fn with_config_dir(
    artifacts_root: impl Into<PathBuf>,
    config_dir: impl Into<PathBuf>,
  ) -> Self {
    let config_dir = config_dir.into();
    let params_path = config_dir.join("params.yml");
    let thresholds_path = config_dir.join("thresholds.yml");
    Self {
      artifacts_root: artifacts_root.into(),
      config_paths: vec![
        params_path.clone(),
        thresholds_path.clone(),
        config_dir.join("goals.yml"),
      ],
      params_path,
      thresholds_path,
      audit_dir: None,
      seed_path: None,
      generators: GeneratorKind::ALL.to_vec(),
      use_meta: true,
      clusters: None,
      w_prev: None,
    }
  }
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self::with_config_dir("artifacts", "configs")
  }
}

/// One generator's contribution to a run.
#[derive(Clone, Debug)]
pub struct GeneratorOutput {
  pub kind: GeneratorKind,
  pub weights: Array1<f64>,
  pub path: PathBuf,
  /// Set when the weights derive from the uniform fallback, either because no
  /// solver converged or because the inputs were inconsistent.
  pub degraded: bool,
}

/// Everything a run produced, in memory and on disk.
#[derive(Clone, Debug)]
pub struct OptimizationOutcome {
  pub assets: Vec<String>,
  pub generators: Vec<GeneratorOutput>,
  /// Blend coefficients keyed by the blended generators, when a blend ran.
  pub meta_weights: Option<Vec<(GeneratorKind, f64)>>,
  pub meta_weights_path: Option<PathBuf>,
  pub allocation: Array1<f64>,
  pub allocation_path: PathBuf,
  pub risk_contributions: Array1<f64>,
  pub diagnostics_path: PathBuf,
  pub audit: AuditReport,
}

impl OptimizationOutcome {
  /// Generators that fell back to uniform weights.
  pub fn degraded(&self) -> Vec<GeneratorKind> {
    self.generators.iter().filter(|g| g.degraded).map(|g| g.kind).collect()
  }
}

/// Read-only inputs shared by every generator.
#[derive(Clone, Debug)]
struct Inputs {
  assets: Vec<String>,
  mu: Array1<f64>,
  sigma: Array2<f64>,
  scenarios: Array2<f64>,
}

/// Linear run: load, constrain, generate, blend, diagnose, persist and audit.
#[derive(Clone, Debug)]
pub struct OptimizationPipeline {
  options: PipelineOptions,
  layout: ArtifactLayout,
}

impl OptimizationPipeline {
  pub fn new(options: PipelineOptions) -> Self {
    let layout = ArtifactLayout::new(options.artifacts_root.clone());
    Self { options, layout }
  }

  pub fn options(&self) -> &PipelineOptions {
    &self.options
  }

  fn load_inputs(&self) -> Result<Inputs, PipelineError> {
    let (assets, mu) = artifacts::read_expected_returns(&self.layout.mu_path())?;
    let sigma_path = self.layout.sigma_path();
    let sigma = artifacts::read_covariance(&sigma_path)?;
    if sigma.dim() != (mu.len(), mu.len()) {
      return Err(PipelineError::malformed(
        &sigma_path,
        format!("covariance is {:?}, expected {n}x{n}", sigma.dim(), n = mu.len()),
      ));
    }
    let (_, scenarios) = artifacts::read_factor_returns(&self.layout.factors_path())?;

    debug!(n_assets = mu.len(), n_scenarios = scenarios.nrows(), "inputs loaded");
    Ok(Inputs {
      assets,
      mu,
      sigma,
      scenarios,
    })
  }

  fn build_constraints(
    &self,
    inputs: &Inputs,
    thresholds: &Thresholds,
    params: &Params,
  ) -> ConstraintsBag {
    let n = inputs.mu.len();
    ConstraintsBag {
      risk_aversion: RISK_AVERSION,
      dro_rho: DRO_RHO,
      gross_leverage_cap: Some(thresholds.execution.gross_leverage_cap),
      turnover_cap: Some(thresholds.execution.turnover_cap),
      w_prev: self.options.w_prev.clone(),
      scenario_returns: Some(inputs.scenarios.clone()),
      cvar_cap: Some(params.household.cvar_cap_1m),
      cvar_alpha: CVAR_ALPHA,
      edar_scenarios: Some(inputs.scenarios.clone()),
      edar_cap: Some(params.household.edar_cap_3y),
      edar_alpha: EDAR_ALPHA,
      tracking_error_cap: Some(thresholds.execution.te_max_factor),
      erc_tol: thresholds.tau.rc_tol,
      clusters: self
        .options
        .clusters
        .clone()
        .unwrap_or_else(|| contiguous_clusters(n, N_CLUSTERS)),
    }
  }

  /// Run every requested generator, in parallel, keeping request order.
  fn run_generators(
    &self,
    inputs: &Inputs,
    bag: &ConstraintsBag,
  ) -> Result<Vec<(GeneratorKind, Array1<f64>, bool)>, PipelineError> {
    let n = inputs.mu.len();
    self
      .options
      .generators
      .par_iter()
      .map(|&kind| match run_generator(kind, inputs, bag) {
        Ok((w, degraded)) if w.len() == n => Ok((kind, clip_and_normalize(&w), degraded)),
        Ok((w, _)) => {
          warn!(generator = %kind, len = w.len(), n, "wrong-length output, using uniform weights");
          Ok((kind, uniform_weights(n), true))
        }
        Err(err) if err.is_recoverable() => {
          warn!(generator = %kind, error = %err, "generator failed, using uniform weights");
          Ok((kind, uniform_weights(n), true))
        }
        Err(source) => Err(PipelineError::Generator { kind, source }),
      })
      .collect()
  }

  /// Blend the first generators by their scenario-implied returns.
  fn meta_blend(
    &self,
    inputs: &Inputs,
    bag: &ConstraintsBag,
    outputs: &[GeneratorOutput],
  ) -> Option<(Vec<(GeneratorKind, f64)>, Array1<f64>)> {
    if !self.options.use_meta || outputs.len() < 2 {
      return None;
    }
    let n = inputs.mu.len();
    if inputs.scenarios.ncols() != n {
      warn!(
        scenario_columns = inputs.scenarios.ncols(),
        n_assets = n,
        "scenario columns do not match assets, skipping meta blend"
      );
      return None;
    }

    let subset = &outputs[..outputs.len().min(MAX_META_GENERATORS)];
    let mut weights = Array2::<f64>::zeros((subset.len(), n));
    for (mut row, out) in weights.rows_mut().into_iter().zip(subset) {
      row.assign(&out.weights);
    }
    let implied = inputs.scenarios.dot(&weights.t());

    let config = MetaLearnerConfig {
      j_max: subset.len(),
      penalty_to: META_PENALTY_TO,
      penalty_te: bag.tracking_error_cap.unwrap_or(0.0),
      baseline_idx: 0,
    };
    let alpha = fit_meta_weights(&implied, &inputs.sigma, &config);
    let allocation = clip_and_normalize(&alpha.dot(&weights));

    let meta = subset.iter().map(|o| o.kind).zip(alpha.iter().copied()).collect();
    Some((meta, allocation))
  }

  pub fn run(&self) -> Result<OptimizationOutcome, PipelineError> {
    if self.options.generators.is_empty() {
      return Err(PipelineError::NoGenerators);
    }
    info!(
      root = %self.layout.root.display(),
      generators = ?self.options.generators,
      "starting optimization pipeline"
    );

    let inputs = self.load_inputs()?;
    let thresholds: Thresholds = config::load_yaml_or_default(&self.options.thresholds_path)?;
    let params: Params = config::load_yaml_or_default(&self.options.params_path)?;
    let bag = self.build_constraints(&inputs, &thresholds, &params);

    let mut generators = Vec::with_capacity(self.options.generators.len());
    for (kind, weights, degraded) in self.run_generators(&inputs, &bag)? {
      let path = self.layout.generator_path(kind);
      artifacts::write_series(&path, ["asset", "weight"], &inputs.assets, &weights)?;
      generators.push(GeneratorOutput {
        kind,
        weights,
        path,
        degraded,
      });
    }

    let blend = self.meta_blend(&inputs, &bag, &generators);
    let (meta_weights, meta_weights_path, allocation) = match blend {
      Some((meta, allocation)) => {
        let path = self.layout.meta_weights_path();
        let labels: Vec<String> = meta.iter().map(|(k, _)| k.label().to_string()).collect();
        let alpha = Array1::from_iter(meta.iter().map(|(_, a)| *a));
        artifacts::write_series(&path, ["generator", "alpha"], &labels, &alpha)?;
        (Some(meta), Some(path), allocation)
      }
      None => (None, None, generators[0].weights.clone()),
    };

    let allocation_path = self.layout.allocation_path();
    artifacts::write_series(&allocation_path, ["asset", "weight"], &inputs.assets, &allocation)?;

    let rc = risk_contributions(&allocation, &inputs.sigma);
    let diagnostics_path = self.layout.diagnostics_path();
    artifacts::write_diagnostics(&diagnostics_path, &inputs.assets, &rc, &allocation)?;

    let mut checksums = BTreeMap::from([
      ("allocation".to_string(), allocation_path.clone()),
      ("diagnostics".to_string(), diagnostics_path.clone()),
    ]);
    for g in &generators {
      checksums.insert(format!("gen_{}", g.kind.label()), g.path.clone());
    }
    if let Some(path) = &meta_weights_path {
      checksums.insert("meta".to_string(), path.clone());
    }

    let audit_dir = self.options.audit_dir.clone().unwrap_or_else(|| self.layout.audit_dir());
    let trail = AuditTrail::new(audit_dir)?;
    let seed_path = self
      .options
      .seed_path
      .clone()
      .unwrap_or_else(|| trail.dir().join("seeds.yml"));
    let audit = trail.snapshot(AUDIT_NOTE, &seed_path, &self.options.config_paths, &checksums)?;

    info!(path = %allocation_path.display(), "final allocation written");
    Ok(OptimizationOutcome {
      assets: inputs.assets,
      generators,
      meta_weights,
      meta_weights_path,
      allocation,
      allocation_path,
      risk_contributions: rc,
      diagnostics_path,
      audit,
    })
  }
}

/// Weights plus whether the generator fell back to its post-processed
/// uniform allocation.
fn run_generator(
  kind: GeneratorKind,
  inputs: &Inputs,
  bag: &ConstraintsBag,
) -> Result<(Array1<f64>, bool), GeneratorError> {
  match kind {
    GeneratorKind::A => generator_a_with_status(&inputs.mu, &inputs.sigma, bag),
    GeneratorKind::B => generator_b_hrp(&inputs.sigma).map(|w| (w, false)),
    GeneratorKind::C => {
      let w = generator_c_dro_closed(&inputs.mu, &inputs.sigma, GEN_C_GAMMA, bag.dro_rho)?;
      Ok((w, false))
    }
    GeneratorKind::D => generator_d_with_status(&inputs.mu, &inputs.sigma, bag),
  }
}

/// Shorthand for `OptimizationPipeline::new(options).run()`.
pub fn run_optimization_pipeline(
  options: PipelineOptions,
) -> Result<OptimizationOutcome, PipelineError> {
  OptimizationPipeline::new(options).run()
}
