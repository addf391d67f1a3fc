// kegr/src/cli/post_install.rs

use std::sync::Arc;

use clap::Args;
use kegr_common::config::Config;
use kegr_common::error::Result;
use kegr_core::formulae;
use kegr_core::{run_post_install, HostInfo, SystemRunner};

use crate::cli::{blocking, ohai};

#[derive(Debug, Args)]
pub struct PostInstall {
    name: String,
}

impl PostInstall {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let recipe = formulae::lookup(&self.name)?;
        ohai(&format!("Running post-install for {}", recipe.name()));
        let config = config.clone();
        blocking(move || {
            run_post_install(&recipe, &config, &HostInfo::detect(), Arc::new(SystemRunner))
        })
        .await
    }
}
