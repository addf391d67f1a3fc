// kegr-core/src/pipeline/context.rs
// State handed to each lifecycle phase. Every context owns what it needs; no
// step reaches for process-global state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kegr_common::config::Config;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::Formula;
use tempfile::TempDir;
use tracing::debug;

use crate::build::devtools::HostInfo;
use crate::build::env::BuildEnvironment;
use crate::build::process::{CommandRunner, Invocation, SharedRunner};

/// Locations inside a keg plus access to declared dependencies' opt paths.
pub trait KegPaths {
    fn formula(&self) -> &Formula;
    fn config(&self) -> &Config;
    fn prefix(&self) -> &Path;

    /// The host-wide installation root (`HOMEBREW_PREFIX`).
    fn root(&self) -> &Path {
        self.config().kegr_root()
    }

    fn bin(&self) -> PathBuf {
        self.prefix().join("bin")
    }

    fn lib(&self) -> PathBuf {
        self.prefix().join("lib")
    }

    fn include(&self) -> PathBuf {
        self.prefix().join("include")
    }

    fn etc(&self) -> PathBuf {
        self.prefix().join("etc")
    }

    /// `<root>/opt/<dep>` for a dependency the formula declares.
    fn opt_prefix(&self, dep: &str) -> Result<PathBuf> {
        if self.formula().dependency(dep).is_none() {
            return Err(KegrError::DependencyError(format!(
                "'{}' is not a declared dependency of '{}'",
                dep,
                self.formula().name()
            )));
        }
        Ok(self.config().formula_opt_path(dep))
    }

    fn opt_include(&self, dep: &str) -> Result<PathBuf> {
        Ok(self.opt_prefix(dep)?.join("include"))
    }

    fn opt_lib(&self, dep: &str) -> Result<PathBuf> {
        Ok(self.opt_prefix(dep)?.join("lib"))
    }
}

/// External command execution with the context's environment and working
/// directory. Every helper treats a non-zero exit as an error.
pub trait CommandContext {
    fn runner(&self) -> &dyn CommandRunner;
    fn env(&self) -> &BuildEnvironment;
    fn cwd(&self) -> &Path;

    fn invocation<I, S>(&self, program: &str, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(program, args)
            .cwd(self.cwd())
            .envs(self.env().to_command_env(), true)
    }

    /// Runs `program` and fails unless it exits zero.
    fn system<I, S>(&self, program: &str, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(program, args);
        debug!("==> {}", invocation);
        self.runner().run(&invocation)?.check(&invocation)?;
        Ok(())
    }

    /// Runs `program` and returns its stdout.
    fn output_of<I, S>(&self, program: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(program, args);
        debug!("==> {}", invocation);
        Ok(self.runner().run(&invocation)?.check(&invocation)?.stdout)
    }

    /// Runs `command` through `sh -c` and returns its stdout.
    fn shell_output(&self, command: &str) -> Result<String> {
        self.output_of("/bin/sh", ["-c", command])
    }
}

/// Context for the install phase.
pub struct BuildContext {
    pub formula: Formula,
    pub config: Config,
    pub host: HostInfo,
    pub env: BuildEnvironment,
    /// Root of the unpacked source tree.
    pub buildpath: PathBuf,
    /// Keg the build installs into.
    pub prefix: PathBuf,
    /// Staged resources by name.
    pub resources: HashMap<String, PathBuf>,
    /// Arguments collected for `./configure`.
    pub configure_args: Vec<String>,
    cwd: PathBuf,
    runner: SharedRunner,
}

impl BuildContext {
    pub fn new(
        formula: Formula,
        config: Config,
        host: HostInfo,
        env: BuildEnvironment,
        buildpath: PathBuf,
        prefix: PathBuf,
        runner: SharedRunner,
    ) -> Self {
        Self {
            formula,
            config,
            host,
            env,
            cwd: buildpath.clone(),
            buildpath,
            prefix,
            resources: HashMap::new(),
            configure_args: Vec::new(),
            runner,
        }
    }

    pub fn with_resources(mut self, resources: HashMap<String, PathBuf>) -> Self {
        self.resources = resources;
        self
    }

    /// Runs `f` with build parallelism forced to one. The previous level is
    /// back in place once `f` returns, errors or panics.
    pub fn deparallelize<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let _serial = self.env.make_jobs().scoped(1);
        f(self)
    }

    /// Runs `f` with commands executing in `subdir` of the build path.
    pub fn within<T>(
        &mut self,
        subdir: impl AsRef<Path>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = std::mem::replace(&mut self.cwd, self.buildpath.join(subdir));
        debug!("Entering {}", self.cwd.display());
        let result = f(self);
        self.cwd = previous;
        result
    }

    pub fn resource(&self, name: &str) -> Result<&Path> {
        self.resources
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| KegrError::NotFound(format!("Resource '{name}' was not staged")))
    }
}

impl KegPaths for BuildContext {
    fn formula(&self) -> &Formula {
        &self.formula
    }
    fn config(&self) -> &Config {
        &self.config
    }
    fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl CommandContext for BuildContext {
    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
    fn env(&self) -> &BuildEnvironment {
        &self.env
    }
    fn cwd(&self) -> &Path {
        &self.cwd
    }
}

/// Context for post-install, run against a linked keg.
pub struct KegContext {
    pub formula: Formula,
    pub config: Config,
    pub host: HostInfo,
    pub env: BuildEnvironment,
    pub prefix: PathBuf,
    runner: SharedRunner,
}

impl KegContext {
    pub fn new(
        formula: Formula,
        config: Config,
        host: HostInfo,
        env: BuildEnvironment,
        prefix: PathBuf,
        runner: SharedRunner,
    ) -> Self {
        Self {
            formula,
            config,
            host,
            env,
            prefix,
            runner,
        }
    }
}

impl KegPaths for KegContext {
    fn formula(&self) -> &Formula {
        &self.formula
    }
    fn config(&self) -> &Config {
        &self.config
    }
    fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl CommandContext for KegContext {
    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
    fn env(&self) -> &BuildEnvironment {
        &self.env
    }
    fn cwd(&self) -> &Path {
        &self.prefix
    }
}

/// Context for verification. Commands run inside a scratch `testpath` that is
/// removed when the context is dropped.
pub struct TestContext {
    pub formula: Formula,
    pub config: Config,
    pub host: HostInfo,
    pub env: BuildEnvironment,
    pub prefix: PathBuf,
    pub resources: HashMap<String, PathBuf>,
    testpath: TempDir,
    runner: SharedRunner,
}

impl TestContext {
    pub fn new(
        formula: Formula,
        config: Config,
        host: HostInfo,
        env: BuildEnvironment,
        prefix: PathBuf,
        runner: SharedRunner,
    ) -> Result<Self> {
        let testpath = tempfile::Builder::new()
            .prefix(&format!("{}-test", formula.name()))
            .tempdir()?;
        debug!("Test scratch directory: {}", testpath.path().display());
        Ok(Self {
            formula,
            config,
            host,
            env,
            prefix,
            resources: HashMap::new(),
            testpath,
            runner,
        })
    }

    pub fn with_resources(mut self, resources: HashMap<String, PathBuf>) -> Self {
        self.resources = resources;
        self
    }

    pub fn testpath(&self) -> &Path {
        self.testpath.path()
    }

    /// Copies a fetched resource into `testpath` and returns its new path.
    pub fn install_resource(&self, name: &str) -> Result<PathBuf> {
        let source = self
            .resources
            .get(name)
            .ok_or_else(|| KegrError::NotFound(format!("Resource '{name}' was not fetched")))?;
        let file_name = source.file_name().ok_or_else(|| {
            KegrError::Generic(format!("Resource path {} has no file name", source.display()))
        })?;
        let target = self.testpath().join(file_name);
        fs::copy(source, &target)?;
        Ok(target)
    }

    /// Runs `command` in a shell and compares its trimmed stdout to `expected`.
    pub fn assert_output_eq(&self, command: &str, expected: &str) -> Result<()> {
        let output = self.shell_output(command)?;
        let actual = output.trim();
        if actual == expected {
            Ok(())
        } else {
            Err(KegrError::AssertionFailed(format!(
                "`{command}`: expected {expected:?}, got {actual:?}"
            )))
        }
    }

    pub fn assert_exists(&self, path: &Path, message: &str) -> Result<()> {
        if path.exists() {
            Ok(())
        } else {
            Err(KegrError::AssertionFailed(format!(
                "{} ({} does not exist)",
                message,
                path.display()
            )))
        }
    }
}

impl KegPaths for TestContext {
    fn formula(&self) -> &Formula {
        &self.formula
    }
    fn config(&self) -> &Config {
        &self.config
    }
    fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl CommandContext for TestContext {
    fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }
    fn env(&self) -> &BuildEnvironment {
        &self.env
    }
    fn cwd(&self) -> &Path {
        self.testpath.path()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kegr_common::dependency::Dependency;
    use tempfile::TempDir;

    use super::*;
    use crate::build::process::{CommandOutput, RecordingRunner};

    fn formula() -> Formula {
        let mut formula = Formula::new("demo", "https://example.com/demo-1.0.tar.gz", "00");
        formula.dependencies = vec![
            Dependency::new_runtime("openblas"),
            Dependency::new_build("pkg-config"),
        ];
        formula
    }

    fn build_ctx(root: &Path, runner: Arc<RecordingRunner>) -> BuildContext {
        let config = Config::with_root(root);
        let prefix = config.formula_keg_path("demo", "1.0");
        BuildContext::new(
            formula(),
            config,
            HostInfo::linux(),
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 8),
            root.join("build"),
            prefix,
            runner,
        )
    }

    #[test]
    fn opt_paths_require_declared_dependencies() {
        let dir = TempDir::new().unwrap();
        let ctx = build_ctx(dir.path(), Arc::new(RecordingRunner::new()));
        assert_eq!(ctx.opt_lib("openblas").unwrap(), dir.path().join("opt/openblas/lib"));
        assert_eq!(
            ctx.opt_include("pkg-config").unwrap(),
            dir.path().join("opt/pkg-config/include")
        );
        assert!(matches!(
            ctx.opt_prefix("cairo"),
            Err(KegrError::DependencyError(_))
        ));
    }

    #[test]
    fn keg_paths_hang_off_prefix() {
        let dir = TempDir::new().unwrap();
        let ctx = build_ctx(dir.path(), Arc::new(RecordingRunner::new()));
        assert_eq!(ctx.bin(), dir.path().join("Cellar/demo/1.0/bin"));
        assert_eq!(ctx.etc(), dir.path().join("Cellar/demo/1.0/etc"));
        assert_eq!(ctx.root(), dir.path());
    }

    #[test]
    fn deparallelize_runs_serially_then_restores() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let mut ctx = build_ctx(dir.path(), runner.clone());
        ctx.system("make", Vec::<String>::new()).unwrap();
        ctx.deparallelize(|ctx| ctx.system("make", ["install"])).unwrap();
        ctx.system("make", ["check"]).unwrap();

        let flags: Vec<String> = runner
            .calls()
            .iter()
            .map(|c| c.envs["MAKEFLAGS"].clone())
            .collect();
        assert_eq!(flags, vec!["-j8", "-j1", "-j8"]);
        assert!(runner.calls().iter().all(|c| c.clear_env));
    }

    #[test]
    fn deparallelize_restores_after_failure() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("make install", CommandOutput::failed(2, "race"));
        let mut ctx = build_ctx(dir.path(), runner);
        let result = ctx.deparallelize(|ctx| ctx.system("make", ["install"]));
        assert!(matches!(result, Err(KegrError::CommandFailed { .. })));
        assert_eq!(ctx.env.make_jobs().get(), 8);
    }

    #[test]
    fn within_scopes_working_directory() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let mut ctx = build_ctx(dir.path(), runner.clone());
        ctx.within("src/nmath/standalone", |ctx| ctx.system("make", Vec::<String>::new()))
            .unwrap();
        ctx.system("make", Vec::<String>::new()).unwrap();
        let cwds: Vec<PathBuf> = runner.calls().into_iter().filter_map(|c| c.cwd).collect();
        assert_eq!(
            cwds,
            vec![
                dir.path().join("build/src/nmath/standalone"),
                dir.path().join("build")
            ]
        );
    }

    #[test]
    fn output_assertions_trim_and_compare() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("print(1+1)", CommandOutput::ok("[1] 2\n"));
        runner.respond("DYLIB_EXT", CommandOutput::ok(".so\n"));
        let config = Config::with_root(dir.path());
        let ctx = TestContext::new(
            formula(),
            config,
            HostInfo::linux(),
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 1),
            dir.path().join("keg"),
            runner.clone(),
        )
        .unwrap();
        ctx.assert_output_eq("Rscript -e 'print(1+1)'", "[1] 2").unwrap();
        let err = ctx
            .assert_output_eq("R CMD config DYLIB_EXT", ".dylib")
            .unwrap_err();
        assert!(matches!(err, KegrError::AssertionFailed(_)));
        assert_eq!(runner.calls()[0].cwd.as_deref(), Some(ctx.testpath()));
    }

    #[test]
    fn missing_path_assertion_carries_message() {
        let dir = TempDir::new().unwrap();
        let ctx = TestContext::new(
            formula(),
            Config::with_root(dir.path()),
            HostInfo::linux(),
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 1),
            dir.path().join("keg"),
            Arc::new(RecordingRunner::new()),
        )
        .unwrap();
        let err = ctx
            .assert_exists(&ctx.testpath().join("gss/libs/gss.so"), "Failed to install gss package")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to install gss package"));
    }

    #[test]
    fn resources_are_copied_into_testpath() {
        let dir = TempDir::new().unwrap();
        let fetched = dir.path().join("gss_2.1-9.tar.gz");
        fs::write(&fetched, "archive").unwrap();
        let mut resources = HashMap::new();
        resources.insert("gss".to_string(), fetched);
        let ctx = TestContext::new(
            formula(),
            Config::with_root(dir.path()),
            HostInfo::linux(),
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 1),
            dir.path().join("keg"),
            Arc::new(RecordingRunner::new()),
        )
        .unwrap()
        .with_resources(resources);
        let installed = ctx.install_resource("gss").unwrap();
        assert_eq!(installed, ctx.testpath().join("gss_2.1-9.tar.gz"));
        assert!(ctx.install_resource("missing").is_err());
    }
}
