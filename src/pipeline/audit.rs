//! # Audit Trail
//!
//! $$
//! h(f)=\operatorname{SHA256}(f),\qquad \text{record}_t=(t,\ \text{note},\ \{f\mapsto h(f)\})
//! $$
//!
//! Seed and config snapshots, an append-only checksum ledger and a change log.

use std::collections::BTreeMap;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::artifacts::sha256_file;
use super::config::load_seeds;
use super::config::save_seeds;
use super::error::PipelineError;

/// One artifact as referenced by a checksum record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FileChecksum {
  pub path: String,
  pub sha256: String,
}

/// One entry of `checksums.json`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChecksumRecord {
  pub timestamp: String,
  pub note: String,
  /// Artifact label → location and hash.
  pub files: BTreeMap<String, FileChecksum>,
  /// Config path → hash, for config files that exist.
  pub configs: BTreeMap<String, String>,
  pub seeds_sha256: String,
}

/// Everything one snapshot produced.
#[derive(Clone, Debug)]
pub struct AuditReport {
  pub seed_snapshot: PathBuf,
  pub config_snapshots: Vec<PathBuf>,
  pub checksums: PathBuf,
  pub change_log: PathBuf,
}

/// Writer rooted at an audit directory.
#[derive(Clone, Debug)]
pub struct AuditTrail {
  dir: PathBuf,
}

fn stamp(ts: &DateTime<Utc>) -> String {
  ts.format("%Y%m%dT%H%M%SZ").to_string()
}

fn copy_with_timestamp(
  src: &Path,
  dest_dir: &Path,
  prefix: &str,
  ts: &DateTime<Utc>,
) -> Result<PathBuf, PipelineError> {
  fs::create_dir_all(dest_dir).map_err(PipelineError::io(dest_dir))?;
  let suffix = src
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default();
  let target = dest_dir.join(format!("{prefix}_{}{suffix}", stamp(ts)));
  fs::copy(src, &target).map_err(PipelineError::io(src))?;
  Ok(target)
}

impl AuditTrail {
  pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(PipelineError::io(&dir))?;
    Ok(Self { dir })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Copy the seed file into `seeds.yml` and a timestamped history entry,
  /// creating it with the default seeds first when absent.
  pub fn snapshot_seeds(
    &self,
    seed_path: &Path,
    ts: &DateTime<Utc>,
  ) -> Result<PathBuf, PipelineError> {
    if !seed_path.exists() {
      let seeds = load_seeds(seed_path)?;
      save_seeds(&seeds, seed_path)?;
    }

    let stamped = copy_with_timestamp(seed_path, &self.dir.join("seeds_history"), "seeds", ts)?;
    let dest = self.dir.join("seeds.yml");
    if dest != seed_path {
      fs::copy(seed_path, &dest).map_err(PipelineError::io(seed_path))?;
    }
    Ok(stamped)
  }

  /// Timestamped copies of the config files that exist; missing ones are skipped.
  pub fn snapshot_configs(
    &self,
    config_paths: &[PathBuf],
    ts: &DateTime<Utc>,
  ) -> Result<Vec<PathBuf>, PipelineError> {
    let configs_dir = self.dir.join("configs");
    let mut snapshots = Vec::new();
    for cfg in config_paths.iter().filter(|p| p.exists()) {
      let prefix = cfg
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
      snapshots.push(copy_with_timestamp(cfg, &configs_dir, &prefix, ts)?);
    }
    Ok(snapshots)
  }

  /// Append `record` to `checksums.json`, which always holds a JSON list.
  pub fn record_checksums(&self, record: &ChecksumRecord) -> Result<PathBuf, PipelineError> {
    let path = self.dir.join("checksums.json");
    let entry =
      serde_json::to_value(record).map_err(|e| PipelineError::Serialization(e.to_string()))?;

    let mut ledger = if path.exists() {
      let text = fs::read_to_string(&path).map_err(PipelineError::io(&path))?;
      match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => items,
        Ok(other) => vec![other],
        Err(e) => return Err(PipelineError::malformed(&path, e.to_string())),
      }
    } else {
      Vec::new()
    };
    ledger.push(entry);

    let text = serde_json::to_string_pretty(&Value::Array(ledger))
      .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    fs::write(&path, text).map_err(PipelineError::io(&path))?;
    Ok(path)
  }

  pub fn append_change_log(
    &self,
    message: &str,
    ts: &DateTime<Utc>,
  ) -> Result<PathBuf, PipelineError> {
    let path = self.dir.join("change_log.md");
    let line = format!("- {} {}\n", ts.format("%Y-%m-%dT%H:%M:%SZ"), message.trim());
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .map_err(PipelineError::io(&path))?;
    file.write_all(line.as_bytes()).map_err(PipelineError::io(&path))?;
    Ok(path)
  }

  /// Seeds, configs, checksums and change log for one run.
  ///
  /// `artifacts` maps a label to a file that must exist.
  pub fn snapshot(
    &self,
    note: &str,
    seed_path: &Path,
    config_paths: &[PathBuf],
    artifacts: &BTreeMap<String, PathBuf>,
  ) -> Result<AuditReport, PipelineError> {
    let ts = Utc::now();

    let seed_snapshot = self.snapshot_seeds(seed_path, &ts)?;
    let config_snapshots = self.snapshot_configs(config_paths, &ts)?;

    let mut files = BTreeMap::new();
    for (label, path) in artifacts {
      files.insert(
        label.clone(),
        FileChecksum {
          path: path.display().to_string(),
          sha256: sha256_file(path)?,
        },
      );
    }

    let mut configs = BTreeMap::new();
    let mut existing = Vec::new();
    for cfg in config_paths.iter().filter(|p| p.exists()) {
      configs.insert(cfg.display().to_string(), sha256_file(cfg)?);
      if let Some(name) = cfg.file_name() {
        existing.push(name.to_string_lossy().into_owned());
      }
    }

    let record = ChecksumRecord {
      timestamp: ts.to_rfc3339(),
      note: note.to_string(),
      files,
      configs,
      seeds_sha256: sha256_file(seed_path)?,
    };
    let checksums = self.record_checksums(&record)?;

    let mut summary = vec![note.to_string()];
    if !existing.is_empty() {
      summary.push(format!("Configs: {}", existing.join(", ")));
    }
    let change_log = self.append_change_log(&summary.join("; "), &ts)?;

    debug!(dir = %self.dir.display(), "audit snapshot recorded");
    Ok(AuditReport {
      seed_snapshot,
      config_snapshots,
      checksums,
      change_log,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use tempfile::TempDir;

  use super::*;

  fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
  }

  #[test]
  fn missing_seed_file_is_created_with_defaults() {
    let dir = TempDir::new().unwrap();
    let audit = AuditTrail::new(dir.path().join("audit")).unwrap();
    let seed_path = dir.path().join("seeds.yml");

    let stamped = audit.snapshot_seeds(&seed_path, &ts()).unwrap();
    assert!(seed_path.exists());
    assert!(stamped.ends_with("seeds_history/seeds_20240301T123005Z.yml"));
    assert_eq!(load_seeds(&audit.dir().join("seeds.yml")).unwrap()["global"], 42);
  }

  #[test]
  fn seed_file_inside_audit_dir_is_not_copied_onto_itself() {
    let dir = TempDir::new().unwrap();
    let audit = AuditTrail::new(dir.path()).unwrap();
    let seed_path = dir.path().join("seeds.yml");
    fs::write(&seed_path, "seeds:\n  global: 9\n").unwrap();

    audit.snapshot_seeds(&seed_path, &ts()).unwrap();
    assert_eq!(load_seeds(&seed_path).unwrap()["global"], 9);
  }

  #[test]
  fn checksum_ledger_appends_and_wraps_legacy_objects() {
    let dir = TempDir::new().unwrap();
    let audit = AuditTrail::new(dir.path()).unwrap();
    fs::write(dir.path().join("checksums.json"), r#"{"timestamp": "old", "files": {}}"#).unwrap();

    let record = ChecksumRecord {
      timestamp: ts().to_rfc3339(),
      note: "run".into(),
      files: BTreeMap::new(),
      configs: BTreeMap::new(),
      seeds_sha256: "00".into(),
    };
    audit.record_checksums(&record).unwrap();
    let path = audit.record_checksums(&record).unwrap();

    let ledger: Vec<Value> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(ledger.len(), 3);
    assert_eq!(ledger[0]["timestamp"], "old");
    let last: ChecksumRecord = serde_json::from_value(ledger[2].clone()).unwrap();
    assert_eq!(last, record);
  }

  #[test]
  fn snapshot_hashes_artifacts_and_logs_configs() {
    let dir = TempDir::new().unwrap();
    let audit = AuditTrail::new(dir.path().join("audit")).unwrap();

    let artifact = dir.path().join("alloc.csv");
    fs::write(&artifact, "asset,weight\nx,1\n").unwrap();
    let params = dir.path().join("params.yml");
    fs::write(&params, "household: {}\n").unwrap();
    let missing = dir.path().join("goals.yml");

    let artifacts = BTreeMap::from([("allocation".to_string(), artifact.clone())]);
    let report = audit
      .snapshot(
        "optimization pipeline",
        &dir.path().join("seeds.yml"),
        &[params, missing],
        &artifacts,
      )
      .unwrap();

    assert_eq!(report.config_snapshots.len(), 1);
    let log = fs::read_to_string(report.change_log).unwrap();
    assert!(log.starts_with("- "));
    assert!(log.trim_end().ends_with("optimization pipeline; Configs: params.yml"));

    let text = fs::read_to_string(report.checksums).unwrap();
    let ledger: Vec<ChecksumRecord> = serde_json::from_str(&text).unwrap();
    assert_eq!(ledger[0].files["allocation"].sha256, sha256_file(&artifact).unwrap());
  }
}
