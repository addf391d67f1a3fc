// kegr-core/src/build/devtools.rs
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use kegr_common::error::{KegrError, Result};
use kegr_common::model::Version;
use tracing::debug;
use which;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOs {
    MacOs,
    Linux,
    Other(String),
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::MacOs => write!(f, "macos"),
            HostOs::Linux => write!(f, "linux"),
            HostOs::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Snapshot of the facts recipes branch on.
///
/// Detection runs once; every predicate below only reads the snapshot, so a
/// condition can be evaluated any number of times and tested with a
/// hand-built value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub os: HostOs,
    pub os_version: Option<Version>,
    pub xcode_version: Option<Version>,
    pub arch: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        let os = match env::consts::OS {
            "macos" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            other => HostOs::Other(other.to_string()),
        };
        let (os_version, xcode_version) = if os == HostOs::MacOs {
            (get_macos_version(), get_xcode_version())
        } else {
            (None, None)
        };
        let info = Self {
            os,
            os_version,
            xcode_version,
            arch: get_arch(),
        };
        debug!("Detected host: {}", info);
        info
    }

    pub fn macos(os_version: &str, xcode_version: Option<&str>) -> Result<Self> {
        Ok(Self {
            os: HostOs::MacOs,
            os_version: Some(Version::parse(os_version)?),
            xcode_version: xcode_version.map(Version::parse).transpose()?,
            arch: "arm64".to_string(),
        })
    }

    pub fn linux() -> Self {
        Self {
            os: HostOs::Linux,
            os_version: None,
            xcode_version: None,
            arch: "x86_64".to_string(),
        }
    }

    pub fn is_macos(&self) -> bool {
        self.os == HostOs::MacOs
    }

    /// True on macOS releases whose `major.minor` equals `release`.
    pub fn macos_release_is(&self, release: &str) -> bool {
        if !self.is_macos() {
            return false;
        }
        match (&self.os_version, Version::parse(release)) {
            (Some(current), Ok(wanted)) => {
                current.major() == wanted.major() && current.minor() == wanted.minor()
            }
            _ => false,
        }
    }

    pub fn xcode_at_least(&self, minimum: &str) -> bool {
        match (&self.xcode_version, Version::parse(minimum)) {
            (Some(current), Ok(minimum)) => *current >= minimum,
            _ => false,
        }
    }

    /// Shared-library suffix native to the platform.
    pub fn dylib_ext(&self) -> &'static str {
        if self.is_macos() {
            ".dylib"
        } else {
            ".so"
        }
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.os, self.arch)?;
        if let Some(v) = &self.os_version {
            write!(f, " {v}")?;
        }
        if let Some(v) = &self.xcode_version {
            write!(f, " (Xcode {v})")?;
        }
        Ok(())
    }
}

pub fn find_compiler(name: &str) -> Result<PathBuf> {
    let env_var_name = match name {
        "cc" => "CC",
        "c++" | "cxx" => "CXX",
        _ => "",
    };
    if !env_var_name.is_empty() {
        if let Ok(compiler_path) = env::var(env_var_name) {
            let path = PathBuf::from(compiler_path);
            if path.is_file() {
                debug!("Using compiler from env var {}: {}", env_var_name, path.display());
                return Ok(path);
            }
            debug!(
                "Env var {} points to non-existent file: {}",
                env_var_name,
                path.display()
            );
        }
    }

    if cfg!(target_os = "macos") {
        if let Some(path) = command_stdout("xcrun", &["--find", name]).map(PathBuf::from) {
            if path.is_file() {
                debug!("Found compiler via xcrun: {}", path.display());
                return Ok(path);
            }
            debug!("xcrun reported '{}' at missing path {}", name, path.display());
        }
    }

    debug!("Falling back to searching PATH for '{name}'");
    which::which(name).map_err(|e| {
        KegrError::BuildEnvError(format!("Failed to find compiler '{name}' on PATH: {e}"))
    })
}

fn get_macos_version() -> Option<Version> {
    let raw = command_stdout("sw_vers", &["-productVersion"])?;
    match Version::parse(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!("Unparseable macOS version '{}': {}", raw, e);
            None
        }
    }
}

/// `xcodebuild -version` prints `Xcode 15.3` on its first line. Machines with
/// only the command line tools have no Xcode version.
fn get_xcode_version() -> Option<Version> {
    let out = command_stdout("xcodebuild", &["-version"])?;
    let raw = out.lines().next()?.strip_prefix("Xcode")?.trim().to_string();
    Version::parse(&raw).ok()
}

fn get_arch() -> String {
    match env::consts::ARCH {
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Ok(out) => {
            debug!(
                "'{} {}' failed: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
            None
        }
        Err(e) => {
            debug!("Failed to execute '{}': {}", program, e);
            None
        }
    }
}
