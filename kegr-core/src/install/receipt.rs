// kegr-core/src/install/receipt.rs
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kegr_common::dependency::DependencyExt;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::Formula;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Written into a keg once every install step has succeeded. A keg without a
/// receipt is not a finished installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub installed_on: DateTime<Utc>,
    pub built_from_source: bool,
    pub source_url: String,
    pub source_sha256: String,
    pub runtime_dependencies: Vec<String>,
    pub host: String,
    pub kegr_version: String,
}

impl InstallReceipt {
    pub fn for_formula(formula: &Formula, host: &str) -> Result<Self> {
        Ok(Self {
            name: formula.name().to_string(),
            version: formula.version_str_full()?,
            installed_on: Utc::now(),
            built_from_source: true,
            source_url: formula.url.clone(),
            source_sha256: formula.sha256.clone(),
            runtime_dependencies: formula
                .dependencies
                .runtime()
                .iter()
                .map(|d| d.name.clone())
                .collect(),
            host: host.to_string(),
            kegr_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

pub fn write_receipt(keg: &Path, receipt: &InstallReceipt) -> Result<PathBuf> {
    let receipt_path = keg.join(RECEIPT_FILE);
    debug!("Writing install receipt: {}", receipt_path.display());
    let mut file = fs::File::create(&receipt_path)?;
    serde_json::to_writer_pretty(&mut file, receipt)?;
    Ok(receipt_path)
}

pub fn read_receipt(keg: &Path) -> Result<InstallReceipt> {
    let receipt_path = keg.join(RECEIPT_FILE);
    let content = fs::read_to_string(&receipt_path).map_err(|e| {
        KegrError::NotFound(format!(
            "No install receipt at {}: {}",
            receipt_path.display(),
            e
        ))
    })?;
    Ok(serde_json::from_str(&content)?)
}
