use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum KegrError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("HttpError: {0}")]
    HttpError(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Checksum Error: {0}")]
    ChecksumError(String),

    #[error("Version error: {0}")]
    VersionError(String),

    #[error("Dependency Error: {0}")]
    DependencyError(String),

    #[error("Build environment setup failed: {0}")]
    BuildEnvError(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Command '{program}' failed with {status}{}", stderr_suffix(.stderr_tail))]
    CommandFailed {
        program: String,
        status: String,
        stderr_tail: String,
    },

    #[error("Substitution failed in {file}: pattern '{pattern}' not found")]
    SubstitutionNotFound { file: String, pattern: String },

    #[error("Symlink conflict: {0}")]
    LinkConflict(String),

    #[error("Archive Error: {0}")]
    ArchiveError(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{phase} step '{step}' failed: {source}")]
    StepFailed {
        phase: &'static str,
        step: &'static str,
        #[source]
        source: Box<KegrError>,
    },

    #[error("Search Error: {0}")]
    Search(String),
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(":\n{tail}")
    }
}

impl From<std::io::Error> for KegrError {
    fn from(err: std::io::Error) -> Self {
        KegrError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for KegrError {
    fn from(err: reqwest::Error) -> Self {
        KegrError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for KegrError {
    fn from(err: serde_json::Error) -> Self {
        KegrError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for KegrError {
    fn from(err: semver::Error) -> Self {
        KegrError::SemVer(Arc::new(err))
    }
}

impl KegrError {
    /// Unwraps `StepFailed` layers down to the error a step actually returned.
    pub fn root_cause(&self) -> &KegrError {
        match self {
            KegrError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, KegrError>;
