use std::env;
use std::path::PathBuf;

use anyhow::Context;
use fair_alloc::pipeline::run_optimization_pipeline;
use fair_alloc::pipeline::PipelineOptions;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let root = env::var_os("FAIR_ARTIFACTS_ROOT")
    .map_or_else(|| PathBuf::from("artifacts"), PathBuf::from);
  let config_dir = env::var_os("FAIR_CONFIG_DIR")
    .map_or_else(|| PathBuf::from("configs"), PathBuf::from);

  let outcome = run_optimization_pipeline(PipelineOptions::with_config_dir(&root, &config_dir))
    .with_context(|| format!("optimization failed for {}", root.display()))?;

  for (asset, w) in outcome.assets.iter().zip(outcome.allocation.iter()) {
    println!("{asset:<24} {w:>8.4}");
  }
  let degraded = outcome.degraded();
  if !degraded.is_empty() {
    println!("degraded generators: {degraded:?}");
  }
  Ok(())
}
