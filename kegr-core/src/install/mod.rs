// kegr-core/src/install/mod.rs
// Drives a recipe's lifecycle phases against the Cellar.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kegr_common::config::Config;
use kegr_common::dependency::DependencyExt;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::Formula;
use tracing::{debug, info, warn};

use crate::build::devtools::HostInfo;
use crate::build::env::BuildEnvironment;
use crate::build::extract::{stage_archive, stage_resource};
use crate::build::link::link_opt;
use crate::build::process::SharedRunner;
use crate::pipeline::{
    run_steps, BuildContext, KegContext, Recipe, TestContext, INSTALL_PHASE, POST_INSTALL_PHASE,
    TEST_PHASE,
};

pub mod clean;
pub mod fetch;
pub mod receipt;

pub use clean::{clean_keg, CleanReport};
pub use fetch::{fetch_resources, fetch_sources, StagedSources};
pub use receipt::{read_receipt, write_receipt, InstallReceipt, RECEIPT_FILE};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Replace an existing keg of the same version.
    pub force: bool,
}

/// Builds `recipe` from `staged` sources into its keg and links `opt/<name>`.
///
/// Dependencies are checked and sources staged before an existing keg is
/// touched. A forced reinstall moves the old keg aside and only deletes it
/// once the new build succeeded; on failure the partial keg is removed and
/// the old one put back. Returns the keg path.
pub fn install_formula(
    recipe: &Recipe,
    config: &Config,
    host: &HostInfo,
    staged: &StagedSources,
    options: &InstallOptions,
    runner: SharedRunner,
) -> Result<PathBuf> {
    let formula = &recipe.formula;
    let version = formula.version_str_full()?;
    let keg = config.formula_keg_path(formula.name(), &version);
    info!("Installing {} {} into {}", formula.name(), version, keg.display());

    if keg.exists() && !options.force {
        return Err(KegrError::InstallError(format!(
            "{} {} is already installed at {} (use --force to reinstall)",
            formula.name(),
            version,
            keg.display()
        )));
    }
    check_dependencies(formula, config)?;

    let tmp_root = config.tmp_dir();
    fs::create_dir_all(&tmp_root)?;
    let workdir = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", formula.name(), version))
        .tempdir_in(&tmp_root)?;
    debug!("Build directory: {}", workdir.path().display());

    let buildpath = stage_archive(&staged.source_archive, &workdir.path().join("src"))?;
    let mut resources = HashMap::new();
    for (name, fetched) in &staged.resources {
        let resource = formula.resource(name).ok_or_else(|| {
            KegrError::NotFound(format!("'{}' declares no resource '{}'", formula.name(), name))
        })?;
        let staged_at = stage_resource(resource, fetched, &workdir.path().join("resources"))?;
        resources.insert(name.clone(), staged_at);
    }
    let env = BuildEnvironment::new(config, &formula.dependencies)?;

    let previous = if keg.exists() {
        Some(move_aside(&keg, &version)?)
    } else {
        None
    };

    let result = fs::create_dir_all(&keg)
        .map_err(|e| {
            KegrError::IoError(format!("Failed to create keg dir {}: {}", keg.display(), e))
        })
        .and_then(|()| {
            let mut ctx = BuildContext::new(
                formula.clone(),
                config.clone(),
                host.clone(),
                env,
                buildpath,
                keg.clone(),
                runner,
            )
            .with_resources(resources);
            build_into_keg(recipe, &mut ctx, config, host)
        });

    match result {
        Ok(()) => {
            if let Some(old) = previous {
                debug!("Removing replaced keg {}", old.display());
                if let Err(e) = fs::remove_dir_all(&old) {
                    warn!("Could not remove replaced keg {}: {}", old.display(), e);
                }
            }
            info!("{} {} installed", formula.name(), version);
            Ok(keg)
        }
        Err(e) => {
            warn!("Install of {} failed, removing {}", formula.name(), keg.display());
            if keg.exists() {
                if let Err(rm) = fs::remove_dir_all(&keg) {
                    warn!("Could not remove failed keg {}: {}", keg.display(), rm);
                }
            }
            if let Some(old) = previous {
                restore_previous(config, formula.name(), &old, &keg);
            }
            Err(e)
        }
    }
}

/// Renames an existing keg to a hidden sibling so a failed reinstall can put
/// it back.
fn move_aside(keg: &Path, version: &str) -> Result<PathBuf> {
    let backup = keg.with_file_name(format!(".{version}.kegr-previous"));
    if backup.exists() {
        debug!("Discarding stale keg backup {}", backup.display());
        fs::remove_dir_all(&backup)?;
    }
    debug!("Moving existing keg {} to {}", keg.display(), backup.display());
    fs::rename(keg, &backup).map_err(|e| {
        KegrError::InstallError(format!(
            "Failed to move existing keg {} aside: {}",
            keg.display(),
            e
        ))
    })?;
    Ok(backup)
}

fn restore_previous(config: &Config, name: &str, backup: &Path, keg: &Path) {
    info!("Restoring previous keg {}", keg.display());
    if let Err(e) = fs::rename(backup, keg) {
        warn!(
            "Could not restore previous keg from {}: {}",
            backup.display(),
            e
        );
        return;
    }
    if let Err(e) = link_opt(config, name, keg) {
        warn!("Could not relink opt/{} to {}: {}", name, keg.display(), e);
    }
}

fn build_into_keg(
    recipe: &Recipe,
    ctx: &mut BuildContext,
    config: &Config,
    host: &HostInfo,
) -> Result<()> {
    run_steps(INSTALL_PHASE, &recipe.install, ctx)?;
    let keg = ctx.prefix.clone();
    if is_empty_dir(&keg)? {
        return Err(KegrError::InstallError(format!(
            "Empty installation: nothing was installed into {}",
            keg.display()
        )));
    }
    clean_keg(&keg, &recipe.formula.skip_clean)?;
    let receipt = InstallReceipt::for_formula(&recipe.formula, &host.to_string())?;
    write_receipt(&keg, &receipt)?;
    link_opt(config, recipe.name(), &keg)?;
    Ok(())
}

/// Every non-optional runtime or build dependency must already be linked
/// into `opt`.
fn check_dependencies(formula: &Formula, config: &Config) -> Result<()> {
    let missing: Vec<&str> = formula
        .dependencies
        .required_for_build()
        .into_iter()
        .filter(|dep| config.formula_opt_path(&dep.name).symlink_metadata().is_err())
        .map(|dep| dep.name.as_str())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(KegrError::DependencyError(format!(
        "{} needs {} installed first",
        formula.name(),
        missing.join(", ")
    )))
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// The keg of an installed (receipted) formula.
pub fn installed_keg(formula: &Formula, config: &Config) -> Result<PathBuf> {
    let keg = config.formula_keg_path(formula.name(), &formula.version_str_full()?);
    if !keg.join(RECEIPT_FILE).is_file() {
        return Err(KegrError::NotFound(format!(
            "{} is not installed (no receipt in {})",
            formula.name(),
            keg.display()
        )));
    }
    Ok(keg)
}

pub fn run_post_install(
    recipe: &Recipe,
    config: &Config,
    host: &HostInfo,
    runner: SharedRunner,
) -> Result<()> {
    let keg = installed_keg(&recipe.formula, config)?;
    let env = BuildEnvironment::new(config, &recipe.formula.dependencies)?;
    let mut ctx = KegContext::new(
        recipe.formula.clone(),
        config.clone(),
        host.clone(),
        env,
        keg,
        runner,
    );
    run_steps(POST_INSTALL_PHASE, &recipe.post_install, &mut ctx)
}

/// Runs the verification steps. The keg itself is never modified; scratch
/// files live in a temporary `testpath`.
pub fn run_tests(
    recipe: &Recipe,
    config: &Config,
    host: &HostInfo,
    resources: HashMap<String, PathBuf>,
    runner: SharedRunner,
) -> Result<()> {
    let keg = installed_keg(&recipe.formula, config)?;
    let env = BuildEnvironment::new(config, &recipe.formula.dependencies)?;
    let mut ctx = TestContext::new(
        recipe.formula.clone(),
        config.clone(),
        host.clone(),
        env,
        keg,
        runner,
    )?
    .with_resources(resources);
    run_steps(TEST_PHASE, &recipe.test, &mut ctx)
}
