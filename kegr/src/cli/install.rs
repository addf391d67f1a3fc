// kegr/src/cli/install.rs

use std::sync::Arc;

use clap::Args;
use kegr_common::config::Config;
use kegr_common::error::Result;
use kegr_core::formulae;
use kegr_core::install::fetch_sources;
use kegr_core::{install_formula, run_post_install, HostInfo, InstallOptions, SystemRunner};
use tracing::{info, instrument};

use crate::cli::{blocking, ohai};

#[derive(Debug, Args)]
pub struct InstallArgs {
    name: String,

    #[arg(long, help = "Replace an existing keg of the same version")]
    force: bool,

    #[arg(long, help = "Leave the post-install steps for a later `kegr post-install`")]
    skip_post_install: bool,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(formula = %self.name))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let recipe = formulae::lookup(&self.name)?;
        let version = recipe.formula.version_str_full()?;

        ohai(&format!("Fetching {} {}", recipe.name(), version));
        let staged = fetch_sources(&recipe.formula, config).await?;

        let host = HostInfo::detect();
        info!("Building on {}", host);
        ohai(&format!("Building {} {} from source", recipe.name(), version));

        let options = InstallOptions { force: self.force };
        let post_install = !self.skip_post_install;
        let config = config.clone();
        let keg = blocking(move || {
            let keg = install_formula(
                &recipe,
                &config,
                &host,
                &staged,
                &options,
                Arc::new(SystemRunner),
            )?;
            if post_install {
                run_post_install(&recipe, &config, &host, Arc::new(SystemRunner))?;
            }
            Ok(keg)
        })
        .await?;

        ohai(&format!("Installed {} {} into {}", self.name, version, keg.display()));
        Ok(())
    }
}
