// kegr-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use directories::UserDirs;
use tracing::debug;

use super::error::{KegrError, Result};

// Fallback if HOMEBREW_PREFIX is not set or is empty.
const DEFAULT_FALLBACK_KEGR_ROOT: &str = "/opt/homebrew";

#[derive(Debug, Clone)]
pub struct Config {
    pub kegr_root: PathBuf,
    /// Default number of parallel make jobs handed to build tools.
    pub make_jobs: usize,
    pub cache_override: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading kegr configuration");

        let kegr_root_str = env::var("HOMEBREW_PREFIX")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                debug!(
                    "HOMEBREW_PREFIX environment variable not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_KEGR_ROOT
                );
                DEFAULT_FALLBACK_KEGR_ROOT.to_string()
            });

        let kegr_root = PathBuf::from(&kegr_root_str);
        if !kegr_root.is_absolute() {
            return Err(KegrError::Config(format!(
                "HOMEBREW_PREFIX must be an absolute path, got '{kegr_root_str}'"
            )));
        }
        debug!("Effective KEGR_ROOT set to: {}", kegr_root.display());

        let make_jobs = parse_make_jobs(env::var("HOMEBREW_MAKE_JOBS").ok().as_deref());
        debug!("Default make jobs: {}", make_jobs);

        let cache_override = env::var("HOMEBREW_CACHE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        debug!("Configuration loaded successfully.");
        Ok(Self {
            kegr_root,
            make_jobs,
            cache_override,
        })
    }

    /// Builds a configuration rooted at `root` without consulting the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            kegr_root: root.into(),
            make_jobs: num_cpus::get().max(1),
            cache_override: None,
        }
    }

    pub fn kegr_root(&self) -> &Path {
        &self.kegr_root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.kegr_root.join("bin")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.kegr_root.join("lib")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.kegr_root.join("include")
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.kegr_root.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.kegr_root.join("opt")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_override
            .clone()
            .unwrap_or_else(|| self.kegr_root.join("kegr_cache"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.kegr_root.join("kegr_logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.kegr_root.join("tmp")
    }

    pub fn formula_cellar_dir(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn formula_keg_path(&self, formula_name: &str, version_str: &str) -> PathBuf {
        self.formula_cellar_dir(formula_name).join(version_str)
    }

    pub fn formula_opt_path(&self, formula_name: &str) -> PathBuf {
        self.opt_dir().join(formula_name)
    }

    pub fn home_dir(&self) -> PathBuf {
        UserDirs::new().map_or_else(|| PathBuf::from("/"), |ud| ud.home_dir().to_path_buf())
    }
}

fn parse_make_jobs(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|jobs| *jobs > 0)
        .unwrap_or_else(num_cpus::get)
        .max(1)
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
