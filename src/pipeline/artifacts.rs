//! # Artifacts
//!
//! $$
//! \texttt{root}/\{\texttt{estimates},\texttt{factors}\}\ \to\ \texttt{root}/\texttt{weights}
//! $$
//!
//! File layout and readers/writers for the persistence boundary.

use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use ndarray::Array1;
use ndarray::Array2;
use ndarray_npy::read_npy;
use sha2::Digest;
use sha2::Sha256;

use super::error::PipelineError;
use crate::allocators::GeneratorKind;

/// Paths of every artifact under one root directory.
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
  pub root: PathBuf,
}

impl ArtifactLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn mu_path(&self) -> PathBuf {
    self.root.join("estimates").join("mu_post.csv")
  }

  pub fn sigma_path(&self) -> PathBuf {
    self.root.join("estimates").join("sigma.npy")
  }

  pub fn factors_path(&self) -> PathBuf {
    self.root.join("factors").join("factors_orthogonal.csv")
  }

  pub fn weights_dir(&self) -> PathBuf {
    self.root.join("weights")
  }

  pub fn generator_path(&self, kind: GeneratorKind) -> PathBuf {
    self.weights_dir().join(format!("generator_{}.csv", kind.label()))
  }

  pub fn meta_weights_path(&self) -> PathBuf {
    self.weights_dir().join("meta_weights.csv")
  }

  pub fn allocation_path(&self) -> PathBuf {
    self.weights_dir().join("factor_allocation.csv")
  }

  pub fn diagnostics_path(&self) -> PathBuf {
    self.weights_dir().join("allocation_diagnostics.csv")
  }

  pub fn audit_dir(&self) -> PathBuf {
    self.root.join("audit")
  }
}

fn require(path: &Path, stage: &'static str) -> Result<(), PipelineError> {
  if path.exists() {
    Ok(())
  } else {
    Err(PipelineError::MissingUpstreamArtifact {
      stage,
      path: path.to_path_buf(),
    })
  }
}

fn parse_cell(path: &Path, row: usize, cell: &str) -> Result<f64, PipelineError> {
  let cell = cell.trim();
  if cell.is_empty() {
    return Ok(0.0);
  }
  cell
    .parse::<f64>()
    .map_err(|e| PipelineError::malformed(path, format!("row {row}: `{cell}`: {e}")))
}

/// Expected returns keyed by asset, in file order.
pub fn read_expected_returns(path: &Path) -> Result<(Vec<String>, Array1<f64>), PipelineError> {
  require(path, "estimate")?;
  let mut reader = csv::Reader::from_path(path).map_err(PipelineError::csv(path))?;

  let mut assets = Vec::new();
  let mut values = Vec::new();
  for (row, record) in reader.records().enumerate() {
    let record = record.map_err(PipelineError::csv(path))?;
    let (Some(asset), Some(value)) = (record.get(0), record.get(1)) else {
      return Err(PipelineError::malformed(path, format!("row {row}: expected `asset,mu`")));
    };
    assets.push(asset.trim().to_string());
    values.push(parse_cell(path, row, value)?);
  }

  Ok((assets, Array1::from(values)))
}

pub fn read_covariance(path: &Path) -> Result<Array2<f64>, PipelineError> {
  require(path, "estimate")?;
  read_npy(path).map_err(|e| PipelineError::malformed(path, e.to_string()))
}

/// Scenario returns, one row per date. Empty cells read as zero.
pub fn read_factor_returns(path: &Path) -> Result<(Vec<String>, Array2<f64>), PipelineError> {
  require(path, "factors")?;
  let mut reader = csv::Reader::from_path(path).map_err(PipelineError::csv(path))?;

  let columns: Vec<String> = reader
    .headers()
    .map_err(PipelineError::csv(path))?
    .iter()
    .skip(1)
    .map(|h| h.trim().to_string())
    .collect();

  let mut data = Vec::new();
  let mut n_rows = 0;
  for (row, record) in reader.records().enumerate() {
    let record = record.map_err(PipelineError::csv(path))?;
    for cell in record.iter().skip(1) {
      data.push(parse_cell(path, row, cell)?);
    }
    n_rows += 1;
  }

  let matrix = Array2::from_shape_vec((n_rows, columns.len()), data)
    .map_err(|e| PipelineError::malformed(path, e.to_string()))?;
  Ok((columns, matrix))
}

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(PipelineError::io(parent))?;
  }
  Ok(())
}

/// Two-column `label,value` table.
pub fn write_series(
  path: &Path,
  header: [&str; 2],
  labels: &[String],
  values: &Array1<f64>,
) -> Result<(), PipelineError> {
  ensure_parent(path)?;
  let mut writer = csv::Writer::from_path(path).map_err(PipelineError::csv(path))?;
  writer.write_record(header).map_err(PipelineError::csv(path))?;
  for (label, value) in labels.iter().zip(values.iter()) {
    writer
      .write_record([label.as_str(), value.to_string().as_str()])
      .map_err(PipelineError::csv(path))?;
  }
  writer.flush().map_err(PipelineError::io(path))
}

/// `asset,risk_contribution,weight` table.
pub fn write_diagnostics(
  path: &Path,
  assets: &[String],
  risk_contributions: &Array1<f64>,
  weights: &Array1<f64>,
) -> Result<(), PipelineError> {
  ensure_parent(path)?;
  let mut writer = csv::Writer::from_path(path).map_err(PipelineError::csv(path))?;
  writer
    .write_record(["asset", "risk_contribution", "weight"])
    .map_err(PipelineError::csv(path))?;
  for ((asset, rc), w) in assets.iter().zip(risk_contributions.iter()).zip(weights.iter()) {
    writer
      .write_record([asset.as_str(), rc.to_string().as_str(), w.to_string().as_str()])
      .map_err(PipelineError::csv(path))?;
  }
  writer.flush().map_err(PipelineError::io(path))
}

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> Result<String, PipelineError> {
  let mut file = File::open(path).map_err(PipelineError::io(path))?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher).map_err(PipelineError::io(path))?;
  Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use ndarray::array;
  use ndarray_npy::write_npy;
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn missing_estimates_name_the_stage() {
    let dir = TempDir::new().unwrap();
    let layout = ArtifactLayout::new(dir.path());
    let err = read_expected_returns(&layout.mu_path()).unwrap_err();
    assert!(matches!(
      err,
      PipelineError::MissingUpstreamArtifact { stage: "estimate", .. }
    ));
    let err = read_factor_returns(&layout.factors_path()).unwrap_err();
    assert!(err.to_string().contains("`factors` stage"));
  }

  #[test]
  fn factor_gaps_read_as_zero() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("factors.csv");
    fs::write(&path, "date,f1,f2\n2024-01-31,0.01,\n2024-02-29,,-0.02\n").unwrap();
    let (columns, m) = read_factor_returns(&path).unwrap();
    assert_eq!(columns, vec!["f1", "f2"]);
    assert_eq!(m, array![[0.01, 0.0], [0.0, -0.02]]);
  }

  #[test]
  fn ragged_factor_rows_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("factors.csv");
    fs::write(&path, "date,f1,f2\n2024-01-31,0.01\n").unwrap();
    assert!(matches!(
      read_factor_returns(&path),
      Err(PipelineError::Csv { .. })
    ));
  }

  #[test]
  fn bad_number_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mu.csv");
    fs::write(&path, "asset,mu\neq,abc\n").unwrap();
    assert!(matches!(
      read_expected_returns(&path),
      Err(PipelineError::MalformedArtifact { .. })
    ));
  }

  #[test]
  fn series_and_covariance_io() {
    let dir = TempDir::new().unwrap();
    let layout = ArtifactLayout::new(dir.path());

    fs::create_dir_all(layout.sigma_path().parent().unwrap()).unwrap();
    write_npy(layout.sigma_path(), &array![[0.04, 0.0], [0.0, 0.09]]).unwrap();
    assert_eq!(read_covariance(&layout.sigma_path()).unwrap()[[1, 1]], 0.09);

    let path = layout.generator_path(GeneratorKind::B);
    let labels = ["x".to_string(), "y".to_string()];
    write_series(&path, ["asset", "weight"], &labels, &array![0.25, 0.75]).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "asset,weight\nx,0.25\ny,0.75\n");
    assert_eq!(sha256_file(&path).unwrap().len(), 64);
  }
}
