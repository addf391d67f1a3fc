// kegr-core/src/install/clean.rs
// Post-build tidying of a keg.

use std::fs;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kegr_common::error::Result;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::build::inreplace::STAMP_SUFFIX;

/// Top-level keg directories whose contents keep their execute bits.
const EXECUTABLE_DIRS: &[&str] = &["bin", "sbin", "libexec"];

const MACHO_MAGICS: &[[u8; 4]] = &[
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
    [0xca, 0xfe, 0xba, 0xbe],
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    pub made_non_executable: Vec<PathBuf>,
}

/// Removes libtool archives, `.DS_Store` files and substitution stamps, and
/// drops stray execute bits. Paths listed in `skip_clean` (relative to the keg) are not visited.
pub fn clean_keg(keg: &Path, skip_clean: &[String]) -> Result<CleanReport> {
    let skipped: Vec<PathBuf> = skip_clean.iter().map(|rel| keg.join(rel)).collect();
    let mut report = CleanReport::default();
    debug!("Cleaning keg {}", keg.display());

    let walker = WalkDir::new(keg)
        .into_iter()
        .filter_entry(|e| !skipped.iter().any(|s| e.path().starts_with(s)));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cleaner could not read entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(".la") || name == ".DS_Store" || name.ends_with(STAMP_SUFFIX) {
            fs::remove_file(path)?;
            debug!("Removed {}", path.display());
            report.removed.push(path.to_path_buf());
            continue;
        }
        #[cfg(unix)]
        if strip_exec_bit_if_needed(keg, path)? {
            report.made_non_executable.push(path.to_path_buf());
        }
    }
    debug!(
        "Cleaner removed {} files, fixed {} modes",
        report.removed.len(),
        report.made_non_executable.len()
    );
    Ok(report)
}

#[cfg(unix)]
fn strip_exec_bit_if_needed(keg: &Path, path: &Path) -> Result<bool> {
    let in_exec_dir = path
        .strip_prefix(keg)
        .ok()
        .and_then(|rel| rel.components().next())
        .is_some_and(|c| EXECUTABLE_DIRS.iter().any(|d| c.as_os_str() == *d));
    if in_exec_dir {
        return Ok(false);
    }
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    if mode & 0o111 == 0 || looks_executable(path)? {
        return Ok(false);
    }
    perms.set_mode(mode & !0o111);
    fs::set_permissions(path, perms)?;
    debug!("Cleared execute bit on {}", path.display());
    Ok(true)
}

/// Scripts with a shebang and ELF or Mach-O binaries.
fn looks_executable(path: &Path) -> Result<bool> {
    let mut head = [0u8; 4];
    let mut file = fs::File::open(path)?;
    let read = file.read(&mut head)?;
    if read >= 2 && head.starts_with(b"#!") {
        return Ok(true);
    }
    if read < 4 {
        return Ok(false);
    }
    Ok(&head == b"\x7fELF" || MACHO_MAGICS.contains(&head))
}
