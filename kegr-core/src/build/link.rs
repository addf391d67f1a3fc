// kegr-core/src/build/link.rs
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use kegr_common::config::Config;
use kegr_common::error::{KegrError, Result};
use tracing::debug;

/// Symlinks each of `sources` into `dir` under its own file name.
///
/// `dir` is created when missing. A symlink already sitting at a destination
/// is replaced; a real file or directory there is a `LinkConflict`.
pub fn install_symlink<P: AsRef<Path>>(dir: &Path, sources: &[P]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| {
        KegrError::IoError(format!("Failed to create {}: {}", dir.display(), e))
    })?;
    let mut created = Vec::with_capacity(sources.len());
    for source in sources {
        let source = source.as_ref();
        let Some(file_name) = source.file_name() else {
            return Err(KegrError::Generic(format!(
                "Cannot symlink {}: no file name",
                source.display()
            )));
        };
        let link = dir.join(file_name);
        symlink_replacing(source, &link)?;
        created.push(link);
    }
    Ok(created)
}

/// `install_symlink` over every path matching `pattern`. Hidden entries are
/// skipped.
pub fn install_symlink_glob(dir: &Path, pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern_str = pattern.to_string_lossy();
    let matches = glob::glob(&pattern_str).map_err(|e| {
        KegrError::Generic(format!("Invalid glob pattern '{pattern_str}': {e}"))
    })?;
    let mut sources = Vec::new();
    for entry in matches {
        let path = entry.map_err(|e| KegrError::IoError(format!("Glob error: {e}")))?;
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
        {
            continue;
        }
        sources.push(path);
    }
    debug!("{} matched {} entries", pattern_str, sources.len());
    install_symlink(dir, &sources)
}

/// Creates `link -> target`. An existing symlink at `link` is recreated so
/// reruns converge; any other existing entry is left in place and reported.
pub fn symlink_replacing(target: &Path, link: &Path) -> Result<()> {
    match link.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!("Replacing existing symlink {}", link.display());
            fs::remove_file(link)?;
        }
        Ok(_) => {
            return Err(KegrError::LinkConflict(format!(
                "{} already exists and is not a symlink",
                link.display()
            )));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    unix_fs::symlink(target, link).map_err(|e| {
        KegrError::IoError(format!(
            "Failed to symlink {} -> {}: {}",
            link.display(),
            target.display(),
            e
        ))
    })?;
    debug!("Linked {} -> {}", link.display(), target.display());
    Ok(())
}

/// Points `<root>/opt/<name>` at `keg`.
pub fn link_opt(config: &Config, name: &str, keg: &Path) -> Result<PathBuf> {
    let opt_link = config.formula_opt_path(name);
    symlink_replacing(keg, &opt_link)?;
    Ok(opt_link)
}
