// kegr-core/src/install/fetch.rs
use std::collections::HashMap;
use std::path::PathBuf;

use kegr_common::config::Config;
use kegr_common::error::Result;
use kegr_common::model::Formula;
use kegr_net::{fetch_resource, fetch_source};
use tracing::debug;

/// Verified downloads a source install works from.
#[derive(Debug, Clone, Default)]
pub struct StagedSources {
    pub source_archive: PathBuf,
    /// Cached resource files by resource name.
    pub resources: HashMap<String, PathBuf>,
}

/// Downloads the main source archive and every declared resource.
pub async fn fetch_sources(formula: &Formula, config: &Config) -> Result<StagedSources> {
    let source_archive = fetch_source(formula, config).await?;
    debug!("Source for {} at {}", formula.name(), source_archive.display());
    let resources = fetch_resources(formula, config).await?;
    Ok(StagedSources {
        source_archive,
        resources,
    })
}

/// Downloads every declared resource; used on its own by `test`.
pub async fn fetch_resources(formula: &Formula, config: &Config) -> Result<HashMap<String, PathBuf>> {
    let mut resources = HashMap::with_capacity(formula.resources.len());
    for resource in &formula.resources {
        let path = fetch_resource(formula.name(), resource, config).await?;
        debug!("Resource '{}' at {}", resource.name, path.display());
        resources.insert(resource.name.clone(), path);
    }
    Ok(resources)
}
