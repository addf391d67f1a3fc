// kegr-common/src/model/formula.rs
// Static descriptor for one package: where its sources come from, what it
// depends on and which secondary resources travel with it.

use serde::{Deserialize, Serialize};

use crate::dependency::{Dependency, DependencyExt};
use crate::error::{KegrError, Result};

/// How a fetched artifact is staged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Extract the archive.
    #[default]
    Unpack,
    /// Keep the downloaded file as-is (`:using => :nounzip`).
    NoUnzip,
}

/// A secondary source artifact fetched independently of the main source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    pub sha256: String,
    #[serde(default)]
    pub using: FetchMode,
}

impl Resource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            mirrors: Vec::new(),
            sha256: sha256.into(),
            using: FetchMode::Unpack,
        }
    }

    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirrors.push(mirror.into());
        self
    }

    pub fn with_fetch_mode(mut self, using: FetchMode) -> Self {
        self.using = using;
        self
    }

    /// Last path segment of the primary URL.
    pub fn file_name(&self) -> String {
        url_file_name(&self.url).unwrap_or_else(|| format!("{}-download", self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Explicit version; derived from the URL when absent.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Keg-relative paths the cleaner must leave alone.
    #[serde(default)]
    pub skip_clean: Vec<String>,
}

impl Formula {
    pub fn new(name: impl Into<String>, url: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: None,
            homepage: None,
            url: url.into(),
            sha256: sha256.into(),
            mirrors: Vec::new(),
            version: None,
            revision: 0,
            dependencies: Vec::new(),
            resources: Vec::new(),
            skip_clean: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The upstream version, explicit or inferred from the source file name.
    pub fn version(&self) -> Result<String> {
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            return Ok(version.to_string());
        }
        url_file_name(&self.url)
            .and_then(|file| version_from_file_name(&file))
            .ok_or_else(|| {
                KegrError::VersionError(format!(
                    "Cannot determine version for '{}' from URL '{}'",
                    self.name, self.url
                ))
            })
    }

    /// Version plus `_<revision>` when the formula has been revised; this is
    /// the keg directory name.
    pub fn version_str_full(&self) -> Result<String> {
        let version = self.version()?;
        if self.revision > 0 {
            Ok(format!("{}_{}", version, self.revision))
        } else {
            Ok(version)
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.find_dependency(name)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn source_file_name(&self) -> String {
        url_file_name(&self.url).unwrap_or_else(|| format!("{}-download", self.name))
    }
}

fn url_file_name(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz", ".tbz2", ".txz", ".tar", ".zip",
];

/// `R-3.5.2.tar.gz` => `3.5.2`, `gss_2.1-9.tar.gz` => `2.1-9`.
fn version_from_file_name(file: &str) -> Option<String> {
    let stem = ARCHIVE_SUFFIXES
        .iter()
        .find_map(|suffix| file.strip_suffix(suffix))
        .unwrap_or(file);
    let start = stem
        .char_indices()
        .find(|(i, c)| {
            c.is_ascii_digit()
                && (*i == 0 || matches!(stem.as_bytes()[i - 1], b'-' | b'_' | b'v'))
        })
        .map(|(i, _)| i)?;
    let version = &stem[start..];
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
