// kegr-net/src/http.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kegr_common::config::Config;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::{Formula, Resource};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::validation::{validate_url, verify_checksum};

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "kegr recipe runner (Rust; +https://github.com/alexykn/kegr)";

/// Fetches the main source archive of a formula into the download cache.
pub async fn fetch_source(formula: &Formula, config: &Config) -> Result<PathBuf> {
    let cache_dir = config.cache_dir();
    create_cache_dir(&cache_dir)?;
    let version = formula.version_str_full()?;
    let cache_path = cache_dir.join(format!(
        "{}--{}--{}",
        formula.name(),
        version,
        formula.source_file_name()
    ));

    debug!(
        "Preparing to fetch main source for '{}' from URL: {}",
        formula.name(),
        formula.url
    );
    fetch_with_mirrors(
        formula.name(),
        &formula.url,
        &formula.mirrors,
        &formula.sha256,
        &cache_path,
    )
    .await
}

/// Fetches a named resource of a formula into `<cache>/resources`.
pub async fn fetch_resource(
    formula_name: &str,
    resource: &Resource,
    config: &Config,
) -> Result<PathBuf> {
    let resource_cache_dir = config.cache_dir().join("resources");
    create_cache_dir(&resource_cache_dir)?;
    let cache_path = resource_cache_dir.join(format!("{}-{}", resource.name, resource.file_name()));

    debug!(
        "Preparing to fetch resource '{}' for formula '{}' from URL: {}",
        resource.name, formula_name, resource.url
    );
    fetch_with_mirrors(
        &resource.name,
        &resource.url,
        &resource.mirrors,
        &resource.sha256,
        &cache_path,
    )
    .await
}

async fn fetch_with_mirrors(
    label: &str,
    url: &str,
    mirrors: &[String],
    sha256_expected: &str,
    cache_path: &Path,
) -> Result<PathBuf> {
    debug!("Target cache path: {}", cache_path.display());
    debug!("Expected SHA256: {}", sha256_expected);

    if reuse_cached(cache_path, sha256_expected) {
        return Ok(cache_path.to_path_buf());
    }

    let client = build_http_client()?;
    let urls_to_try = std::iter::once(url).chain(mirrors.iter().map(|s| s.as_str()));
    let mut last_error: Option<KegrError> = None;

    for current_url in urls_to_try {
        if let Err(e) = validate_url(current_url) {
            error!("Skipping {}: {}", current_url, e);
            last_error = Some(e);
            continue;
        }
        debug!("Attempting download from: {}", current_url);
        match download_and_verify(&client, current_url, cache_path, sha256_expected).await {
            Ok(path) => {
                debug!("Successfully downloaded and verified: {}", path.display());
                return Ok(path);
            }
            Err(e) => {
                error!("Download attempt failed from {}: {}", current_url, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        KegrError::DownloadError(
            label.to_string(),
            url.to_string(),
            "All download attempts failed.".to_string(),
        )
    }))
}

/// A cached file is reused only when its checksum still matches; a corrupt
/// entry is removed so the next download starts clean.
fn reuse_cached(cache_path: &Path, sha256_expected: &str) -> bool {
    if !cache_path.is_file() {
        debug!("File not found in cache.");
        return false;
    }
    if sha256_expected.is_empty() {
        debug!(
            "Using cached file (no checksum provided): {}",
            cache_path.display()
        );
        return true;
    }
    match verify_checksum(cache_path, sha256_expected) {
        Ok(()) => {
            debug!("Using valid cached file: {}", cache_path.display());
            true
        }
        Err(e) => {
            debug!(
                "Cached file checksum mismatch ({}): {}. Redownloading.",
                cache_path.display(),
                e
            );
            if let Err(remove_err) = fs::remove_file(cache_path) {
                debug!(
                    "Failed to remove corrupted cached file {}: {}",
                    cache_path.display(),
                    remove_err
                );
            }
            false
        }
    }
}

fn create_cache_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        KegrError::IoError(format!(
            "Failed to create cache directory {}: {}",
            dir.display(),
            e
        ))
    })
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| KegrError::HttpError(format!("Failed to build HTTP client: {e}")))
}

async fn download_and_verify(
    client: &Client,
    url: &str,
    final_path: &Path,
    sha256_expected: &str,
) -> Result<PathBuf> {
    let file_label = final_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = final_path.with_file_name(format!(".{file_label}.download"));
    debug!("Downloading to temporary path: {}", temp_path.display());
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            tracing::warn!(
                "Could not remove existing temporary file {}: {}",
                temp_path.display(),
                e
            );
        }
    }

    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url}: {e}");
        KegrError::HttpError(format!("HTTP request failed for {url}: {e}"))
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        return match status {
            StatusCode::NOT_FOUND => Err(KegrError::DownloadError(
                file_label,
                url.to_string(),
                "Resource not found (404)".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(KegrError::DownloadError(
                file_label,
                url.to_string(),
                "Access forbidden (403)".to_string(),
            )),
            _ => Err(KegrError::HttpError(format!("HTTP error {status} for URL {url}"))),
        };
    }

    let content = response
        .bytes()
        .await
        .map_err(|e| KegrError::HttpError(format!("Failed to read response body bytes: {e}")))?;
    let mut temp_file = TokioFile::create(&temp_path).await.map_err(|e| {
        KegrError::IoError(format!(
            "Failed to create temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;
    temp_file.write_all(&content).await.map_err(|e| {
        KegrError::IoError(format!(
            "Failed to write download to {}: {}",
            temp_path.display(),
            e
        ))
    })?;
    temp_file.flush().await?;
    drop(temp_file);

    if !sha256_expected.is_empty() {
        if let Err(e) = verify_checksum(&temp_path, sha256_expected) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        debug!("Checksum verified for temporary file: {}", temp_path.display());
    } else {
        tracing::warn!(
            "Skipping checksum verification for {} - none provided.",
            temp_path.display()
        );
    }

    fs::rename(&temp_path, final_path).map_err(|e| {
        KegrError::IoError(format!(
            "Failed to move temp file {} to {}: {}",
            temp_path.display(),
            final_path.display(),
            e
        ))
    })?;
    debug!("Moved verified file to final location: {}", final_path.display());
    Ok(final_path.to_path_buf())
}
