// kegr-core/src/formulae/r_cairo.rs
// R built against cairo instead of X11, with a shared libR and the
// standalone nmath library.

use std::fs;
use std::path::{Path, PathBuf};

use kegr_common::dependency::Dependency;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::{FetchMode, Formula, Resource};
use tracing::debug;

use crate::build::devtools::HostInfo;
use crate::build::inreplace::{inreplace, inreplace_files, Substitution};
use crate::build::link::{install_symlink_glob, symlink_replacing};
use crate::pipeline::{BuildContext, CommandContext, KegContext, KegPaths, Recipe, Step, TestContext};

pub const NAME: &str = "r-cairo";

const NO_ARGS: [&str; 0] = [];

/// Dependencies whose headers and libraries are added to the compiler flags
/// explicitly.
const FLAG_DEPENDENCIES: [&str; 2] = ["gettext", "readline"];

pub fn formula() -> Formula {
    let mut formula = Formula::new(
        NAME,
        "https://cran.r-project.org/src/base/R-3/R-3.5.2.tar.gz",
        "e53d8c3cf20f2b8d7a9c1631b6f6a22874506fb392034758b3bb341c586c5b62",
    );
    formula.desc = Some("Software environment for statistical computing".to_string());
    formula.homepage = Some("https://www.r-project.org/".to_string());
    formula.revision = 2;
    formula.dependencies = vec![
        Dependency::new_build("pkg-config"),
        Dependency::new_runtime("gcc"),
        Dependency::new_runtime("gettext"),
        Dependency::new_runtime("jpeg"),
        Dependency::new_runtime("libpng"),
        Dependency::new_runtime("openblas"),
        Dependency::new_runtime("pcre"),
        Dependency::new_runtime("readline"),
        Dependency::new_runtime("xz"),
        Dependency::new_runtime("cairo"),
    ];
    formula.resources = vec![Resource::new(
        "gss",
        "https://cloud.r-project.org/src/contrib/gss_2.1-9.tar.gz",
        "2961fe61c1d3bb3fe7b8e1070d6fb1dfc5d71e0c6e8a6b7c46ff6b42867c4cf3",
    )
    .with_mirror("https://mirror.las.iastate.edu/CRAN/src/contrib/gss_2.1-9.tar.gz")
    .with_fetch_mode(FetchMode::NoUnzip)];
    // R's own helper scripts under lib/R/bin must keep their modes.
    formula.skip_clean = vec!["lib/R/bin".to_string()];
    formula
}

pub fn recipe() -> Recipe {
    Recipe {
        formula: formula(),
        install: vec![
            Step::new("clock_gettime workaround", apply_clock_gettime_workaround),
            Step::new("patch cairo detection", patch_cairo_detection),
            Step::new("configure arguments", assemble_configure_args),
            Step::new("dependency flags", add_dependency_flags),
            Step::new("configure", configure),
            Step::new("make", make),
            Step::new("make install", make_install),
            Step::new("standalone nmath", build_standalone_nmath),
            Step::new("rewrite Makeconf", rewrite_makeconf),
            Step::new("link headers and libraries", link_headers_and_libraries),
            Step::new("unresolve gcc path", unresolve_gcc_path),
        ],
        post_install: vec![Step::new("site library", link_site_library)],
        test: vec![
            Step::new("arithmetic", check_arithmetic),
            Step::new("dylib extension", check_dylib_ext),
            Step::new("install gss", check_package_install),
        ],
    }
}

/// macOS 10.11 with Xcode 8 or newer declares `clock_gettime` in the SDK
/// without the symbol existing on the OS.
pub fn needs_clock_gettime_workaround(host: &HostInfo) -> bool {
    host.macos_release_is("10.11") && host.xcode_at_least("8.0")
}

pub fn configure_args(prefix: &Path, openblas_lib: &Path) -> Vec<String> {
    vec![
        format!("--prefix={}", prefix.display()),
        "--enable-memory-profiling".to_string(),
        "--with-cairo".to_string(),
        "--without-x".to_string(),
        "--with-aqua".to_string(),
        "--with-lapack".to_string(),
        "--enable-R-shlib".to_string(),
        "SED=/usr/bin/sed".to_string(),
        "--disable-java".to_string(),
        format!("--with-blas=-L{} -lopenblas", openblas_lib.display()),
    ]
}

/// Edits that let packages compiled later find headers and libraries under
/// the installation root.
pub fn makeconf_substitutions(root: &Path) -> Result<Vec<Substitution>> {
    Ok(vec![
        Substitution::append_to_matches(
            r"(?m)^CPPFLAGS =.*",
            format!(" -I{}", root.join("include").display()),
        )?,
        Substitution::append_to_matches(
            r"(?m)^LDFLAGS =.*",
            format!(" -L{}", root.join("lib").display()),
        )?,
        Substitution::append_to_matches(r"(?m).LDFLAGS =.*", " $(LDFLAGS)")?,
    ])
}

fn makeconf_path<C: KegPaths>(ctx: &C) -> PathBuf {
    ctx.lib().join("R/etc/Makeconf")
}

fn apply_clock_gettime_workaround(ctx: &mut BuildContext) -> Result<()> {
    if needs_clock_gettime_workaround(&ctx.host) {
        debug!("Disabling clock_gettime detection on {}", ctx.host);
        ctx.env.set("ac_cv_have_decl_clock_gettime", "no");
    }
    Ok(())
}

fn patch_cairo_detection(ctx: &mut BuildContext) -> Result<()> {
    let files = [
        ctx.buildpath.join("configure"),
        ctx.buildpath.join("m4/cairo.m4"),
    ];
    inreplace_files(&files, &[Substitution::literal("cairo-xlib.h", "cairo.h")])
}

fn assemble_configure_args(ctx: &mut BuildContext) -> Result<()> {
    let openblas_lib = ctx.opt_lib("openblas")?;
    ctx.configure_args = configure_args(&ctx.prefix, &openblas_lib);
    Ok(())
}

fn add_dependency_flags(ctx: &mut BuildContext) -> Result<()> {
    for dep in FLAG_DEPENDENCIES {
        let include = ctx.opt_include(dep)?;
        let lib = ctx.opt_lib(dep)?;
        ctx.env.append("CPPFLAGS", &format!("-I{}", include.display()));
        ctx.env.append("LDFLAGS", &format!("-L{}", lib.display()));
    }
    Ok(())
}

fn configure(ctx: &mut BuildContext) -> Result<()> {
    let script = ctx.buildpath.join("configure");
    ctx.system(&script.to_string_lossy(), ctx.configure_args.clone())
}

fn make(ctx: &mut BuildContext) -> Result<()> {
    ctx.system("make", NO_ARGS)
}

fn make_install(ctx: &mut BuildContext) -> Result<()> {
    ctx.deparallelize(|ctx| ctx.system("make", ["install"]))
}

fn build_standalone_nmath(ctx: &mut BuildContext) -> Result<()> {
    ctx.within("src/nmath/standalone", |ctx| {
        ctx.system("make", NO_ARGS)?;
        ctx.deparallelize(|ctx| ctx.system("make", ["install"]))
    })
}

fn rewrite_makeconf(ctx: &mut BuildContext) -> Result<()> {
    let subs = makeconf_substitutions(ctx.root())?;
    inreplace(&makeconf_path(&*ctx), &subs)?;
    Ok(())
}

fn link_headers_and_libraries(ctx: &mut BuildContext) -> Result<()> {
    let r_home = ctx.lib().join("R");
    install_symlink_glob(&ctx.include(), &r_home.join("include/*"))?;
    install_symlink_glob(&ctx.lib(), &r_home.join("lib/*"))?;
    Ok(())
}

/// Makeconf should name gcc through its stable opt link rather than the
/// versioned keg it resolves to. A Makeconf that never mentions the gcc keg
/// was built against another toolchain and is left alone.
fn unresolve_gcc_path(ctx: &mut BuildContext) -> Result<()> {
    let opt_gcc = ctx.opt_prefix("gcc")?;
    let resolved = fs::canonicalize(&opt_gcc).map_err(|e| {
        KegrError::DependencyError(format!("Cannot resolve {}: {}", opt_gcc.display(), e))
    })?;
    let resolved = resolved.to_string_lossy().into_owned();
    let makeconf = makeconf_path(&*ctx);
    if !fs::read_to_string(&makeconf)?.contains(&resolved) {
        debug!("{} does not mention {}, nothing to unresolve", makeconf.display(), resolved);
        return Ok(());
    }
    let sub = Substitution::literal(resolved, opt_gcc.to_string_lossy().into_owned());
    inreplace(&makeconf, &[sub])?;
    Ok(())
}

fn link_site_library(ctx: &mut KegContext) -> Result<()> {
    let rscript = ctx.bin().join("Rscript");
    let output = ctx.output_of(
        &rscript.to_string_lossy(),
        ["-e", "cat(as.character(getRversion()[1,1:2]))"],
    )?;
    let short_version = output.trim();
    if short_version.is_empty() {
        return Err(KegrError::VersionError(format!(
            "{} printed no version",
            rscript.display()
        )));
    }
    let site_library = ctx
        .root()
        .join("lib/R")
        .join(short_version)
        .join("site-library");
    fs::create_dir_all(&site_library)?;
    symlink_replacing(&site_library, &ctx.lib().join("R/site-library"))
}

fn check_arithmetic(ctx: &mut TestContext) -> Result<()> {
    let rscript = ctx.bin().join("Rscript");
    ctx.assert_output_eq(&format!("{} -e 'print(1+1)'", rscript.display()), "[1] 2")
}

fn check_dylib_ext(ctx: &mut TestContext) -> Result<()> {
    let r = ctx.bin().join("R");
    ctx.assert_output_eq(
        &format!("{} CMD config DYLIB_EXT", r.display()),
        ctx.host.dylib_ext(),
    )
}

fn check_package_install(ctx: &mut TestContext) -> Result<()> {
    let tarball = ctx.install_resource("gss")?;
    let r = ctx.bin().join("R");
    ctx.system(
        &r.to_string_lossy(),
        [
            "CMD".to_string(),
            "INSTALL".to_string(),
            "--library=.".to_string(),
            tarball.to_string_lossy().into_owned(),
        ],
    )?;
    ctx.assert_exists(
        &ctx.testpath().join("gss/libs/gss.so"),
        "Failed to install gss package",
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::os::unix::fs::symlink;
    use std::sync::Arc;

    use kegr_common::config::Config;
    use tempfile::TempDir;

    use super::*;
    use crate::build::env::BuildEnvironment;
    use crate::build::process::{CommandOutput, RecordingRunner};
    use crate::pipeline::{run_steps, INSTALL_PHASE, POST_INSTALL_PHASE, TEST_PHASE};

    const MAKECONF: &str = "\
CC = gcc
CPPFLAGS = -I/usr/local/include
LDFLAGS = -L/usr/local/lib
DYLIB_LDFLAGS = -dynamiclib
SHLIB_LDFLAGS = -bundle
FLIBS = -L@GCC@/lib/gcc/8 -lgfortran
";

    struct Fixture {
        _dir: TempDir,
        config: Config,
        buildpath: PathBuf,
        keg: PathBuf,
        gcc_keg: PathBuf,
    }

    /// A root with opt links, an unpacked source tree and a keg that looks
    /// like `make install` already ran.
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let config = Config::with_root(&root);
        fs::create_dir_all(config.opt_dir()).unwrap();

        let gcc_keg = config.formula_keg_path("gcc", "8.2.0");
        fs::create_dir_all(&gcc_keg).unwrap();
        symlink(&gcc_keg, config.formula_opt_path("gcc")).unwrap();
        let gcc_keg = fs::canonicalize(&gcc_keg).unwrap();

        let buildpath = dir.path().join("R-3.5.2");
        fs::create_dir_all(buildpath.join("m4")).unwrap();
        fs::write(
            buildpath.join("configure"),
            "#include <cairo-xlib.h>\nxlib_ok=cairo-xlib.h\n",
        )
        .unwrap();
        fs::write(buildpath.join("m4/cairo.m4"), "AC_CHECK_HEADER([cairo-xlib.h])\n").unwrap();

        let keg = config.formula_keg_path(NAME, "3.5.2_2");
        fs::create_dir_all(keg.join("lib/R/etc")).unwrap();
        fs::create_dir_all(keg.join("lib/R/include")).unwrap();
        fs::create_dir_all(keg.join("lib/R/lib")).unwrap();
        fs::write(keg.join("lib/R/include/Rinternals.h"), "").unwrap();
        fs::write(keg.join("lib/R/lib/libR.so"), "").unwrap();
        fs::write(keg.join("lib/R/lib/.hidden"), "").unwrap();
        fs::write(
            keg.join("lib/R/etc/Makeconf"),
            MAKECONF.replace("@GCC@", &gcc_keg.to_string_lossy()),
        )
        .unwrap();

        Fixture {
            _dir: dir,
            config,
            buildpath,
            keg,
            gcc_keg,
        }
    }

    fn build_ctx(fx: &Fixture, host: HostInfo, runner: Arc<RecordingRunner>) -> BuildContext {
        BuildContext::new(
            formula(),
            fx.config.clone(),
            host,
            BuildEnvironment::with_vars([("PATH", "/usr/bin"), ("CPPFLAGS", "-DNDEBUG")], 4),
            fx.buildpath.clone(),
            fx.keg.clone(),
            runner,
        )
    }

    fn makeconf(fx: &Fixture) -> String {
        fs::read_to_string(fx.keg.join("lib/R/etc/Makeconf")).unwrap()
    }

    #[test]
    fn formula_metadata() {
        let formula = formula();
        assert_eq!(formula.version_str_full().unwrap(), "3.5.2_2");
        assert_eq!(formula.dependencies.len(), 10);
        let gss = formula.resource("gss").unwrap();
        assert_eq!(gss.using, FetchMode::NoUnzip);
        assert_eq!(gss.mirrors.len(), 1);
        assert_eq!(formula.skip_clean, vec!["lib/R/bin".to_string()]);
    }

    #[test]
    fn clock_gettime_workaround_only_for_el_capitan_with_xcode_8() {
        let el_capitan_8 = HostInfo::macos("10.11.6", Some("8.2.1")).unwrap();
        let el_capitan_7 = HostInfo::macos("10.11.6", Some("7.3.1")).unwrap();
        let el_capitan_no_xcode = HostInfo::macos("10.11", None).unwrap();
        let sierra_8 = HostInfo::macos("10.12.6", Some("8.0")).unwrap();
        assert!(needs_clock_gettime_workaround(&el_capitan_8));
        assert!(!needs_clock_gettime_workaround(&el_capitan_7));
        assert!(!needs_clock_gettime_workaround(&el_capitan_no_xcode));
        assert!(!needs_clock_gettime_workaround(&sierra_8));
        assert!(!needs_clock_gettime_workaround(&HostInfo::linux()));
    }

    #[test]
    fn clock_gettime_variable_follows_host() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        let host = HostInfo::macos("10.11.6", Some("8.0")).unwrap();
        let mut ctx = build_ctx(&fx, host, runner.clone());
        apply_clock_gettime_workaround(&mut ctx).unwrap();
        assert_eq!(ctx.env.get("ac_cv_have_decl_clock_gettime"), Some("no"));

        let mut ctx = build_ctx(&fx, HostInfo::linux(), runner);
        apply_clock_gettime_workaround(&mut ctx).unwrap();
        assert_eq!(ctx.env.get("ac_cv_have_decl_clock_gettime"), None);
    }

    #[test]
    fn configure_arguments_are_exact() {
        let args = configure_args(Path::new("/cellar/r-cairo/3.5.2_2"), Path::new("/opt/openblas/lib"));
        assert_eq!(
            args,
            vec![
                "--prefix=/cellar/r-cairo/3.5.2_2",
                "--enable-memory-profiling",
                "--with-cairo",
                "--without-x",
                "--with-aqua",
                "--with-lapack",
                "--enable-R-shlib",
                "SED=/usr/bin/sed",
                "--disable-java",
                "--with-blas=-L/opt/openblas/lib -lopenblas",
            ]
        );
    }

    #[test]
    fn dependency_flags_extend_existing_values() {
        let fx = fixture();
        let mut ctx = build_ctx(&fx, HostInfo::linux(), Arc::new(RecordingRunner::new()));
        add_dependency_flags(&mut ctx).unwrap();
        let opt = fx.config.opt_dir();
        assert_eq!(
            ctx.env.get("CPPFLAGS").unwrap(),
            format!(
                "-DNDEBUG -I{} -I{}",
                opt.join("gettext/include").display(),
                opt.join("readline/include").display()
            )
        );
        assert_eq!(
            ctx.env.get("LDFLAGS").unwrap(),
            format!(
                "-L{} -L{}",
                opt.join("gettext/lib").display(),
                opt.join("readline/lib").display()
            )
        );

        let once = ctx.env.get("CPPFLAGS").unwrap().to_string();
        add_dependency_flags(&mut ctx).unwrap();
        let twice = ctx.env.get("CPPFLAGS").unwrap();
        assert!(twice.starts_with(&once));
        assert_eq!(twice.matches("gettext/include").count(), 2);
    }

    #[test]
    fn install_phase_runs_in_order() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        let mut ctx = build_ctx(&fx, HostInfo::linux(), runner.clone());
        run_steps(INSTALL_PHASE, &recipe().install, &mut ctx).unwrap();

        let configure = fx.buildpath.join("configure");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with(&format!("{} --prefix=", configure.display())));
        assert_eq!(&lines[1..], ["make", "make install", "make", "make install"]);

        let calls = runner.calls();
        let flags: Vec<&str> = calls.iter().map(|c| c.envs["MAKEFLAGS"].as_str()).collect();
        assert_eq!(flags, ["-j4", "-j4", "-j1", "-j4", "-j1"]);
        let standalone = fx.buildpath.join("src/nmath/standalone");
        assert_eq!(calls[3].cwd.as_deref(), Some(standalone.as_path()));
        assert_eq!(calls[4].cwd.as_deref(), Some(standalone.as_path()));
        assert_eq!(calls[2].cwd.as_deref(), Some(fx.buildpath.as_path()));
        assert_eq!(ctx.env.make_jobs().get(), 4);

        assert!(!fs::read_to_string(&configure).unwrap().contains("cairo-xlib.h"));
        assert_eq!(
            fs::read_to_string(fx.buildpath.join("m4/cairo.m4")).unwrap(),
            "AC_CHECK_HEADER([cairo.h])\n"
        );
    }

    #[test]
    fn install_phase_rewrites_makeconf_and_links() {
        let fx = fixture();
        let mut ctx = build_ctx(&fx, HostInfo::linux(), Arc::new(RecordingRunner::new()));
        run_steps(INSTALL_PHASE, &recipe().install, &mut ctx).unwrap();

        let root = fx.config.kegr_root();
        let opt_gcc = fx.config.formula_opt_path("gcc");
        let text = makeconf(&fx);
        assert!(text.contains(&format!(
            "CPPFLAGS = -I/usr/local/include -I{}\n",
            root.join("include").display()
        )));
        assert!(text.contains(&format!(
            "\nLDFLAGS = -L/usr/local/lib -L{}\n",
            root.join("lib").display()
        )));
        assert!(text.contains("DYLIB_LDFLAGS = -dynamiclib $(LDFLAGS)\n"));
        assert!(text.contains("SHLIB_LDFLAGS = -bundle $(LDFLAGS)\n"));
        assert!(text.contains(&format!("FLIBS = -L{}/lib/gcc/8", opt_gcc.display())));
        assert!(!text.contains(&fx.gcc_keg.to_string_lossy().into_owned()));

        assert_eq!(
            fs::read_link(fx.keg.join("include/Rinternals.h")).unwrap(),
            fx.keg.join("lib/R/include/Rinternals.h")
        );
        assert_eq!(
            fs::read_link(fx.keg.join("lib/libR.so")).unwrap(),
            fx.keg.join("lib/R/lib/libR.so")
        );
        assert!(fx.keg.join("lib/.hidden").symlink_metadata().is_err());
    }

    #[test]
    fn rerunning_install_steps_does_not_grow_makeconf() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        let mut ctx = build_ctx(&fx, HostInfo::linux(), runner.clone());
        run_steps(INSTALL_PHASE, &recipe().install, &mut ctx).unwrap();
        let once = makeconf(&fx);
        let mut ctx = build_ctx(&fx, HostInfo::linux(), runner);
        run_steps(INSTALL_PHASE, &recipe().install, &mut ctx).unwrap();
        assert_eq!(makeconf(&fx), once);
        assert_eq!(once.matches("$(LDFLAGS)").count(), 2);
    }

    #[test]
    fn cairo_patch_fails_when_source_lacks_the_xlib_header() {
        let fx = fixture();
        let source = "for ac_header in cairo.h cairo-pdf.h\n";
        fs::write(fx.buildpath.join("configure"), source).unwrap();
        let mut ctx = build_ctx(&fx, HostInfo::linux(), Arc::new(RecordingRunner::new()));
        let err = patch_cairo_detection(&mut ctx).unwrap_err();
        match err {
            KegrError::SubstitutionNotFound { file, pattern } => {
                assert!(file.ends_with("configure"));
                assert_eq!(pattern, "cairo-xlib.h");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(fs::read_to_string(fx.buildpath.join("configure")).unwrap(), source);
    }

    #[test]
    fn makeconf_without_gcc_keg_is_left_alone() {
        let fx = fixture();
        let makeconf_file = fx.keg.join("lib/R/etc/Makeconf");
        fs::write(&makeconf_file, "FLIBS = -L/usr/lib/gcc/x86_64-linux-gnu/8 -lgfortran\n").unwrap();
        let mut ctx = build_ctx(&fx, HostInfo::linux(), Arc::new(RecordingRunner::new()));
        unresolve_gcc_path(&mut ctx).unwrap();
        assert_eq!(
            makeconf(&fx),
            "FLIBS = -L/usr/lib/gcc/x86_64-linux-gnu/8 -lgfortran\n"
        );
    }

    #[test]
    fn failed_configure_stops_the_phase() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("--enable-R-shlib", CommandOutput::failed(1, "configure: error: no cairo"));
        let mut ctx = build_ctx(&fx, HostInfo::linux(), runner.clone());
        let err = run_steps(INSTALL_PHASE, &recipe().install, &mut ctx).unwrap_err();
        assert!(matches!(err, KegrError::StepFailed { step: "configure", .. }));
        assert_eq!(runner.calls().len(), 1);
        assert!(makeconf(&fx).contains("CPPFLAGS = -I/usr/local/include\n"));
    }

    #[test]
    fn missing_makeconf_line_is_an_error() {
        let fx = fixture();
        fs::write(fx.keg.join("lib/R/etc/Makeconf"), "CC = gcc\n").unwrap();
        let mut ctx = build_ctx(&fx, HostInfo::linux(), Arc::new(RecordingRunner::new()));
        let err = rewrite_makeconf(&mut ctx).unwrap_err();
        assert!(matches!(err, KegrError::SubstitutionNotFound { .. }));
    }

    fn keg_ctx(fx: &Fixture, runner: Arc<RecordingRunner>) -> KegContext {
        KegContext::new(
            formula(),
            fx.config.clone(),
            HostInfo::linux(),
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 1),
            fx.keg.clone(),
            runner,
        )
    }

    #[test]
    fn post_install_links_versioned_site_library() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("Rscript", CommandOutput::ok("3.5"));
        runner.respond("Rscript", CommandOutput::ok("3.5"));
        let mut ctx = keg_ctx(&fx, runner.clone());
        run_steps(POST_INSTALL_PHASE, &recipe().post_install, &mut ctx).unwrap();
        run_steps(POST_INSTALL_PHASE, &recipe().post_install, &mut ctx).unwrap();

        let site_library = fx.config.kegr_root().join("lib/R/3.5/site-library");
        assert!(site_library.is_dir());
        assert_eq!(
            fs::read_link(fx.keg.join("lib/R/site-library")).unwrap(),
            site_library
        );
        assert_eq!(runner.calls()[0].cwd.as_deref(), Some(fx.keg.as_path()));
    }

    #[test]
    fn post_install_refuses_to_replace_a_real_directory() {
        let fx = fixture();
        fs::create_dir_all(fx.keg.join("lib/R/site-library")).unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("Rscript", CommandOutput::ok("3.5\n"));
        let err = link_site_library(&mut keg_ctx(&fx, runner)).unwrap_err();
        assert!(matches!(err, KegrError::LinkConflict(_)));
    }

    #[test]
    fn post_install_needs_a_version() {
        let fx = fixture();
        let err = link_site_library(&mut keg_ctx(&fx, Arc::new(RecordingRunner::new()))).unwrap_err();
        assert!(matches!(err, KegrError::VersionError(_)));
    }

    fn test_ctx(fx: &Fixture, host: HostInfo, runner: Arc<RecordingRunner>) -> TestContext {
        let fetched = fx.config.cache_dir().join("gss_2.1-9.tar.gz");
        fs::create_dir_all(fetched.parent().unwrap()).unwrap();
        fs::write(&fetched, "gss").unwrap();
        let mut resources = HashMap::new();
        resources.insert("gss".to_string(), fetched);
        TestContext::new(
            formula(),
            fx.config.clone(),
            host,
            BuildEnvironment::with_vars([("PATH", "/usr/bin")], 1),
            fx.keg.clone(),
            runner,
        )
        .unwrap()
        .with_resources(resources)
    }

    #[test]
    fn test_phase_passes_when_gss_builds() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("print(1+1)", CommandOutput::ok("[1] 2\n"));
        runner.respond("DYLIB_EXT", CommandOutput::ok(".dylib\n"));
        let host = HostInfo::macos("10.14", Some("10.1")).unwrap();
        let mut ctx = test_ctx(&fx, host, runner.clone());
        let libs = ctx.testpath().join("gss/libs");
        fs::create_dir_all(&libs).unwrap();
        fs::write(libs.join("gss.so"), "").unwrap();

        run_steps(TEST_PHASE, &recipe().test, &mut ctx).unwrap();
        let last = runner.calls().pop().unwrap();
        assert_eq!(
            last.args,
            vec![
                "CMD".to_string(),
                "INSTALL".to_string(),
                "--library=.".to_string(),
                ctx.testpath().join("gss_2.1-9.tar.gz").to_string_lossy().into_owned(),
            ]
        );
        assert!(fx.keg.join("lib/R/etc/Makeconf").is_file());
    }

    #[test]
    fn test_phase_reports_missing_gss_library() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("print(1+1)", CommandOutput::ok("[1] 2"));
        runner.respond("DYLIB_EXT", CommandOutput::ok(".so"));
        let mut ctx = test_ctx(&fx, HostInfo::linux(), runner);
        let err = run_steps(TEST_PHASE, &recipe().test, &mut ctx).unwrap_err();
        assert!(matches!(err, KegrError::StepFailed { step: "install gss", .. }));
        assert!(err.to_string().contains("Failed to install gss package"));
    }

    #[test]
    fn test_phase_checks_platform_dylib_extension() {
        let fx = fixture();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("print(1+1)", CommandOutput::ok("[1] 2"));
        runner.respond("DYLIB_EXT", CommandOutput::ok(".so"));
        let host = HostInfo::macos("10.14", Some("10.1")).unwrap();
        let mut ctx = test_ctx(&fx, host, runner);
        let err = run_steps(TEST_PHASE, &recipe().test, &mut ctx).unwrap_err();
        assert!(matches!(err, KegrError::StepFailed { step: "dylib extension", .. }));
    }
}
