// kegr-core/src/build/env.rs
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kegr_common::config::Config;
use kegr_common::dependency::Dependency;
use kegr_common::error::{KegrError, Result};
use tracing::debug;

use crate::build::devtools;

// Variables passed through from the caller's environment. Everything else is
// dropped; PATH is rebuilt from scratch.
const ENV_VARS_TO_KEEP: &[&str] = &[
    "USER",
    "LOGNAME",
    "HOME",
    "TMPDIR",
    "TERM",
    "SHELL",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TZ",
];

const SYSTEM_PATH_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/sbin", "/sbin"];

// Searched after the dependencies' own .pc directories once PKG_CONFIG_LIBDIR
// replaces pkg-config's compiled-in default.
const SYSTEM_PKG_CONFIG_DIRS: &[&str] = &[
    "/usr/lib/pkgconfig",
    "/usr/share/pkgconfig",
    "/usr/lib/x86_64-linux-gnu/pkgconfig",
    "/usr/lib/aarch64-linux-gnu/pkgconfig",
];

fn join_path_list(var: &str, dirs: &[PathBuf]) -> Result<String> {
    env::join_paths(dirs)
        .map_err(|e| KegrError::BuildEnvError(format!("Failed to join {var}: {e}")))?
        .into_string()
        .map_err(|os| {
            KegrError::BuildEnvError(format!("{var} contains non-UTF8 characters: {os:?}"))
        })
}

/// Shared handle to the build parallelism level.
///
/// Every clone observes the same value, so a scoped override taken through one
/// context is seen by every command launched while the guard is alive.
#[derive(Debug, Clone)]
pub struct MakeJobs(Arc<AtomicUsize>);

impl MakeJobs {
    pub fn new(jobs: usize) -> Self {
        Self(Arc::new(AtomicUsize::new(jobs.max(1))))
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Forces the level to `jobs` until the returned guard is dropped.
    ///
    /// The previous value comes back when the guard goes out of scope, which
    /// happens on normal return, on `?` propagation and during unwinding.
    /// Guards must be dropped in reverse order of creation.
    #[must_use = "the override ends as soon as the guard is dropped"]
    pub fn scoped(&self, jobs: usize) -> MakeJobsGuard {
        let previous = self.0.swap(jobs.max(1), Ordering::SeqCst);
        debug!("Make jobs set to {} (was {})", jobs.max(1), previous);
        MakeJobsGuard {
            jobs: Arc::clone(&self.0),
            previous,
        }
    }
}

pub struct MakeJobsGuard {
    jobs: Arc<AtomicUsize>,
    previous: usize,
}

impl Drop for MakeJobsGuard {
    fn drop(&mut self) {
        self.jobs.store(self.previous, Ordering::SeqCst);
        debug!("Make jobs restored to {}", self.previous);
    }
}

/// Sanitized variable map handed to every external build command.
#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
    make_jobs: MakeJobs,
}

impl BuildEnvironment {
    /// Creates the environment for a source build under `config`'s root.
    ///
    /// Host variables are filtered down to a small allow-list. `PATH` is
    /// rebuilt with each dependency's `opt/<dep>/bin` and `sbin` first, then
    /// the prefix `bin` and the system directories. `PKG_CONFIG_PATH`,
    /// `PKG_CONFIG_LIBDIR` and `ACLOCAL_PATH` are set from the dependencies'
    /// opt links. `CC`/`CXX` are set when a compiler can be located.
    pub fn new(config: &Config, dependencies: &[Dependency]) -> Result<Self> {
        debug!("Creating build environment rooted at {}", config.kegr_root().display());
        let keep: HashSet<&str> = ENV_VARS_TO_KEEP.iter().copied().collect();
        let mut vars: BTreeMap<String, String> = env::vars()
            .filter(|(key, _)| keep.contains(key.as_str()))
            .collect();
        debug!("Kept {} host environment variables", vars.len());

        let mut compiler_dirs: Vec<PathBuf> = Vec::new();
        let compilers = [("CC", "cc"), ("CXX", "c++")];
        for (var, name) in compilers {
            match devtools::find_compiler(name) {
                Ok(path) => {
                    if let Some(dir) = path.parent() {
                        compiler_dirs.push(dir.to_path_buf());
                    }
                    vars.insert(var.to_string(), path.to_string_lossy().to_string());
                }
                Err(e) => debug!("No {} available for the build environment: {}", var, e),
            }
        }

        let dep_prefixes: Vec<PathBuf> = dependencies
            .iter()
            .map(|dep| config.formula_opt_path(&dep.name))
            .filter(|opt| opt.exists())
            .collect();

        let mut dep_bins = Vec::new();
        let mut pkg_config_dirs = Vec::new();
        let mut aclocal_dirs = Vec::new();
        for prefix in &dep_prefixes {
            for sub in ["bin", "sbin"] {
                let dir = prefix.join(sub);
                if dir.is_dir() {
                    debug!("Prepending dependency {} to PATH", dir.display());
                    dep_bins.push(dir);
                }
            }
            for sub in ["lib/pkgconfig", "share/pkgconfig"] {
                let dir = prefix.join(sub);
                if dir.is_dir() {
                    pkg_config_dirs.push(dir);
                }
            }
            let aclocal = prefix.join("share/aclocal");
            if aclocal.is_dir() {
                aclocal_dirs.push(aclocal);
            }
        }

        let mut path_dirs = dep_bins;
        path_dirs.push(config.bin_dir());
        path_dirs.append(&mut compiler_dirs);
        path_dirs.extend(SYSTEM_PATH_DIRS.iter().map(PathBuf::from));
        let mut seen = HashSet::new();
        path_dirs.retain(|dir| seen.insert(dir.clone()));

        let path = join_path_list("PATH", &path_dirs)?;
        debug!("Build PATH: {}", path);
        vars.insert("PATH".to_string(), path);

        if !pkg_config_dirs.is_empty() {
            let mut libdir = pkg_config_dirs.clone();
            libdir.extend(SYSTEM_PKG_CONFIG_DIRS.iter().map(PathBuf::from));
            vars.insert(
                "PKG_CONFIG_PATH".to_string(),
                join_path_list("PKG_CONFIG_PATH", &pkg_config_dirs)?,
            );
            vars.insert(
                "PKG_CONFIG_LIBDIR".to_string(),
                join_path_list("PKG_CONFIG_LIBDIR", &libdir)?,
            );
        }
        if !aclocal_dirs.is_empty() {
            vars.insert(
                "ACLOCAL_PATH".to_string(),
                join_path_list("ACLOCAL_PATH", &aclocal_dirs)?,
            );
        }

        if !vars.get("HOME").is_some_and(|home| !home.is_empty()) {
            vars.insert(
                "HOME".to_string(),
                config.home_dir().to_string_lossy().to_string(),
            );
        }

        Ok(Self {
            vars,
            make_jobs: MakeJobs::new(config.make_jobs),
        })
    }

    /// Builds an environment from explicit variables, ignoring the host.
    pub fn with_vars<I, K, V>(vars: I, make_jobs: usize) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            make_jobs: MakeJobs::new(make_jobs),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        debug!("ENV set {}={}", key, value);
        self.vars.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Appends `value` to `key`, space separated. Existing content is kept in
    /// place; an unset or empty variable simply takes `value`.
    pub fn append(&mut self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let combined = match self.vars.get(key).map(|v| v.trim_end()) {
            Some(existing) if !existing.is_empty() => format!("{existing} {value}"),
            _ => value.to_string(),
        };
        debug!("ENV append {} => {}", key, combined);
        self.vars.insert(key.to_string(), combined);
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn make_jobs(&self) -> &MakeJobs {
        &self.make_jobs
    }

    /// Snapshot for a child process, with the parallelism level read at call
    /// time.
    pub fn to_command_env(&self) -> BTreeMap<String, String> {
        let jobs = self.make_jobs.get();
        let mut vars = self.vars.clone();
        vars.insert("MAKEFLAGS".to_string(), format!("-j{jobs}"));
        vars.insert("HOMEBREW_MAKE_JOBS".to_string(), jobs.to_string());
        vars
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::panic::{self, AssertUnwindSafe};

    use super::*;

    #[test]
    fn append_keeps_existing_flags_in_front() {
        let mut env = BuildEnvironment::with_vars([("CPPFLAGS", "-I/usr/local/include")], 4);
        env.append("CPPFLAGS", "-I/opt/gettext/include");
        env.append("CPPFLAGS", "-I/opt/readline/include");
        assert_eq!(
            env.get("CPPFLAGS"),
            Some("-I/usr/local/include -I/opt/gettext/include -I/opt/readline/include")
        );
    }

    #[test]
    fn appending_twice_duplicates_without_reordering() {
        let mut env = BuildEnvironment::with_vars([("LDFLAGS", "-L/base")], 4);
        env.append("LDFLAGS", "-L/dep");
        env.append("LDFLAGS", "-L/dep");
        let value = env.get("LDFLAGS").unwrap();
        assert!(value.starts_with("-L/base -L/dep"));
        assert_eq!(value, "-L/base -L/dep -L/dep");
    }

    #[test]
    fn append_to_unset_variable() {
        let mut env = BuildEnvironment::with_vars(Vec::<(String, String)>::new(), 1);
        env.append("LDFLAGS", "-L/dep");
        assert_eq!(env.get("LDFLAGS"), Some("-L/dep"));
        env.append("LDFLAGS", "  ");
        assert_eq!(env.get("LDFLAGS"), Some("-L/dep"));
    }

    #[test]
    fn command_env_carries_current_jobs() {
        let env = BuildEnvironment::with_vars([("PATH", "/usr/bin")], 8);
        let vars = env.to_command_env();
        assert_eq!(vars.get("MAKEFLAGS").map(String::as_str), Some("-j8"));
        assert_eq!(vars.get("HOMEBREW_MAKE_JOBS").map(String::as_str), Some("8"));

        let _serial = env.make_jobs().scoped(1);
        let vars = env.to_command_env();
        assert_eq!(vars.get("MAKEFLAGS").map(String::as_str), Some("-j1"));
    }

    #[test]
    fn scoped_jobs_restore_after_success() {
        let jobs = MakeJobs::new(6);
        {
            let _guard = jobs.scoped(1);
            assert_eq!(jobs.get(), 1);
        }
        assert_eq!(jobs.get(), 6);
    }

    #[test]
    fn scoped_jobs_restore_after_error() {
        let jobs = MakeJobs::new(6);
        let failing = |jobs: &MakeJobs| -> Result<()> {
            let _guard = jobs.scoped(1);
            Err(KegrError::Generic("make install failed".to_string()))
        };
        assert!(failing(&jobs).is_err());
        assert_eq!(jobs.get(), 6);
    }

    #[test]
    fn scoped_jobs_restore_after_panic() {
        let jobs = MakeJobs::new(6);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = jobs.scoped(1);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(jobs.get(), 6);
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let jobs = MakeJobs::new(6);
        {
            let _outer = jobs.scoped(2);
            {
                let _inner = jobs.scoped(1);
                assert_eq!(jobs.get(), 1);
            }
            assert_eq!(jobs.get(), 2);
        }
        assert_eq!(jobs.get(), 6);
    }

    #[test]
    fn dependency_opt_paths_reach_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path().join("root"));
        let opt = config.opt_dir();
        fs::create_dir_all(opt.join("pkg-config/bin")).unwrap();
        fs::create_dir_all(opt.join("cairo/lib/pkgconfig")).unwrap();
        fs::create_dir_all(opt.join("cairo/share/aclocal")).unwrap();
        let deps = vec![
            Dependency::new_build("pkg-config"),
            Dependency::new_runtime("cairo"),
            Dependency::new_runtime("not-installed"),
        ];

        let env = BuildEnvironment::new(&config, &deps).unwrap();

        let path = env.get("PATH").unwrap();
        let first = path.split(':').next().unwrap();
        assert_eq!(first, opt.join("pkg-config/bin").to_string_lossy());
        assert!(!path.contains("not-installed"));
        let cairo_pc = opt.join("cairo/lib/pkgconfig").to_string_lossy().to_string();
        assert_eq!(env.get("PKG_CONFIG_PATH"), Some(cairo_pc.as_str()));
        let libdir = env.get("PKG_CONFIG_LIBDIR").unwrap();
        assert!(libdir.starts_with(&cairo_pc));
        assert!(libdir.contains("/usr/lib/pkgconfig"));
        assert_eq!(
            env.get("ACLOCAL_PATH"),
            Some(&*opt.join("cairo/share/aclocal").to_string_lossy())
        );
    }

    #[test]
    fn no_dependencies_leaves_pkg_config_unset() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_root(dir.path());
        let env = BuildEnvironment::new(&config, &[]).unwrap();
        assert!(env.get("PKG_CONFIG_PATH").is_none());
        assert!(env.get("ACLOCAL_PATH").is_none());
        assert!(env
            .get("PATH")
            .unwrap()
            .starts_with(&*config.bin_dir().to_string_lossy()));
    }

    #[test]
    fn clones_share_the_level() {
        let env = BuildEnvironment::with_vars([("A", "1")], 4);
        let copy = env.clone();
        let _guard = env.make_jobs().scoped(1);
        assert_eq!(copy.make_jobs().get(), 1);
    }
}
