// kegr/src/cli/info.rs
// Prints a formula's metadata, from a built-in recipe or a JSON descriptor.

use std::path::Path;

use clap::Args;
use colored::Colorize;
use kegr_common::config::Config;
use kegr_common::error::Result;
use kegr_common::model::{FetchMode, Formula};
use kegr_core::formulae;
use kegr_core::install::{installed_keg, read_receipt};

#[derive(Debug, Args)]
pub struct Info {
    /// Built-in formula name or path to a `.json` descriptor
    pub formula: String,
}

impl Info {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let path = Path::new(&self.formula);
        let formula = if path.extension().is_some_and(|ext| ext == "json") {
            formulae::load_descriptor(path)?
        } else {
            formulae::lookup(&self.formula)?.formula
        };
        print_formula_info(&formula, config)
    }
}

fn print_formula_info(formula: &Formula, config: &Config) -> Result<()> {
    println!(
        "{} {}",
        formula.name().green().bold(),
        formula.version_str_full()?
    );
    if let Some(desc) = &formula.desc {
        println!("{desc}");
    }
    if let Some(homepage) = &formula.homepage {
        println!("{}", homepage.blue().underline());
    }
    println!("{} {}", "Source:".bold(), formula.url);
    for mirror in &formula.mirrors {
        println!("  mirror: {mirror}");
    }

    match installed_keg(formula, config) {
        Ok(keg) => {
            let installed_on = read_receipt(&keg)
                .map(|r| r.installed_on.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|_| "unknown date".to_string());
            println!("{} {} ({})", "Installed:".bold(), keg.display(), installed_on);
        }
        Err(_) => println!("{} no", "Installed:".bold()),
    }

    if !formula.dependencies.is_empty() {
        println!("{}", "Dependencies:".bold());
        for dep in &formula.dependencies {
            println!("  {} ({})", dep.name, dep.tags);
        }
    }
    if !formula.resources.is_empty() {
        println!("{}", "Resources:".bold());
        for resource in &formula.resources {
            let mode = match resource.using {
                FetchMode::Unpack => "",
                FetchMode::NoUnzip => " [no unzip]",
            };
            println!("  {}: {}{}", resource.name, resource.url, mode);
        }
    }
    if !formula.skip_clean.is_empty() {
        println!("{} {}", "Skip clean:".bold(), formula.skip_clean.join(", "));
    }
    Ok(())
}
