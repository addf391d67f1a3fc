// kegr-core/src/build/extract.rs
// Staging of fetched archives into a build directory.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use kegr_common::error::{KegrError, Result};
use kegr_common::model::{FetchMode, Resource};
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gzip,
    Bzip2,
    Xz,
    Tar,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz") || name.ends_with(".tbz2") {
            Some(Self::Bzip2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::Xz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    fn open(self, path: &Path) -> Result<Box<dyn Read>> {
        let file = File::open(path).map_err(|e| {
            KegrError::ArchiveError(format!("Failed to open archive {}: {}", path.display(), e))
        })?;
        Ok(match self {
            Self::Gzip => Box::new(GzDecoder::new(file)),
            Self::Bzip2 => Box::new(BzDecoder::new(file)),
            Self::Xz => Box::new(XzDecoder::new(file)),
            Self::Tar => Box::new(file),
        })
    }
}

fn kind_of(path: &Path) -> Result<ArchiveKind> {
    ArchiveKind::from_path(path).ok_or_else(|| {
        KegrError::ArchiveError(format!("Unsupported archive type: {}", path.display()))
    })
}

/// Returns the single top-level directory shared by every entry, if any.
pub fn infer_archive_root_dir(archive_path: &Path) -> Result<Option<PathBuf>> {
    debug!("Inferring root directory for archive: {}", archive_path.display());
    let reader = kind_of(archive_path)?.open(archive_path)?;
    let mut archive = Archive::new(reader);
    let mut roots = HashSet::new();
    let mut first_root: Option<PathBuf> = None;
    let mut root_is_dir = false;

    for entry in entries(&mut archive, archive_path)? {
        let entry = entry.map_err(|e| read_error(archive_path, e))?;
        let path = entry.path().map_err(|e| read_error(archive_path, e))?.into_owned();
        let mut components = path.components().filter(|c| !matches!(c, Component::CurDir));
        let Some(first) = components.next() else {
            continue;
        };
        let Component::Normal(name) = first else {
            debug!("Non-standard top-level component {:?} in {}", first, archive_path.display());
            return Ok(None);
        };
        let nested = components.next().is_some();
        if nested || entry.header().entry_type() == EntryType::Directory {
            root_is_dir = true;
        }
        roots.insert(PathBuf::from(name));
        if roots.len() > 1 {
            debug!("Multiple top-level items in {}", archive_path.display());
            return Ok(None);
        }
        first_root.get_or_insert_with(|| PathBuf::from(name));
    }

    match first_root {
        Some(root) if root_is_dir => {
            debug!("Inferred single root directory {} in {}", root.display(), archive_path.display());
            Ok(Some(root))
        }
        Some(_) => Ok(None),
        None => {
            warn!("Archive {} appears to be empty", archive_path.display());
            Ok(None)
        }
    }
}

/// Hardlinks are created after every regular file is on disk.
#[cfg(unix)]
struct DeferredHardLink {
    link: PathBuf,
    target: PathBuf,
}

/// Unpacks a tar archive (optionally compressed) into `target_dir`, dropping
/// the first `strip_components` path components of every entry.
///
/// Entries that would land outside `target_dir` (absolute paths or `..`) are
/// refused and fail the extraction as a whole.
pub fn extract_archive(archive_path: &Path, target_dir: &Path, strip_components: usize) -> Result<()> {
    debug!(
        "Extracting '{}' to '{}' (strip_components={})",
        archive_path.display(),
        target_dir.display(),
        strip_components
    );
    fs::create_dir_all(target_dir).map_err(|e| {
        KegrError::IoError(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;
    let reader = kind_of(archive_path)?.open(archive_path)?;
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    #[cfg(unix)]
    let mut deferred: Vec<DeferredHardLink> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry in entries(&mut archive, archive_path)? {
        let mut entry = entry.map_err(|e| read_error(archive_path, e))?;
        let original = entry.path().map_err(|e| read_error(archive_path, e))?.into_owned();
        let dest = match confined_path(target_dir, &original, strip_components) {
            Ok(Some(dest)) => dest,
            Ok(None) => {
                debug!("Skipping entry due to strip_components: {}", original.display());
                continue;
            }
            Err(msg) => {
                error!("{} in {}", msg, archive_path.display());
                errors.push(msg);
                continue;
            }
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        if entry.header().entry_type() == EntryType::Link {
            match entry.link_name() {
                Ok(Some(target)) => {
                    match confined_path(target_dir, &target, strip_components) {
                        Ok(Some(target)) => deferred.push(DeferredHardLink { link: dest, target }),
                        _ => errors.push(format!(
                            "Hardlink '{}' points outside the archive",
                            original.display()
                        )),
                    }
                }
                _ => errors.push(format!(
                    "Hardlink entry '{}' has no link target name",
                    original.display()
                )),
            }
            continue;
        }

        if let Err(e) = entry.unpack(&dest) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                let msg = format!("Failed to unpack {} to {}: {}", original.display(), dest.display(), e);
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    #[cfg(unix)]
    for link in deferred {
        if !link.target.exists() {
            errors.push(format!(
                "Target '{}' for hardlink '{}' does not exist",
                link.target.display(),
                link.link.display()
            ));
            continue;
        }
        if link.link.symlink_metadata().is_ok() {
            if let Err(e) = fs::remove_file(&link.link) {
                warn!("Could not remove existing file at {}: {}", link.link.display(), e);
            }
        }
        if let Err(e) = fs::hard_link(&link.target, &link.link) {
            errors.push(format!(
                "Failed to create hardlink '{}' -> '{}': {}",
                link.link.display(),
                link.target.display(),
                e
            ));
        }
    }

    if !errors.is_empty() {
        return Err(KegrError::ArchiveError(format!(
            "Failed to extract {} with {} error(s): {}",
            archive_path.display(),
            errors.len(),
            errors.join("; ")
        )));
    }
    debug!("Finished extraction of {}", archive_path.display());
    Ok(())
}

/// Extracts `archive_path` under `dest` and returns the directory the build
/// should run in: the archive's single top-level directory when it has one,
/// `dest` otherwise.
pub fn stage_archive(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let root = infer_archive_root_dir(archive_path)?;
    extract_archive(archive_path, dest, 0)?;
    Ok(match root {
        Some(root) => dest.join(root),
        None => dest.to_path_buf(),
    })
}

/// Places a fetched resource under `dest` according to its fetch mode and
/// returns its staged location.
pub fn stage_resource(resource: &Resource, fetched: &Path, dest: &Path) -> Result<PathBuf> {
    match resource.using {
        FetchMode::NoUnzip => {
            fs::create_dir_all(dest)?;
            let target = dest.join(resource.file_name());
            fs::copy(fetched, &target).map_err(|e| {
                KegrError::IoError(format!(
                    "Failed to copy resource {} to {}: {}",
                    fetched.display(),
                    target.display(),
                    e
                ))
            })?;
            debug!("Staged resource '{}' verbatim at {}", resource.name, target.display());
            Ok(target)
        }
        FetchMode::Unpack => stage_archive(fetched, &dest.join(&resource.name)),
    }
}

fn entries<'a, R: Read>(
    archive: &'a mut Archive<R>,
    archive_path: &Path,
) -> Result<tar::Entries<'a, R>> {
    archive.entries().map_err(|e| read_error(archive_path, e))
}

fn read_error(archive_path: &Path, e: io::Error) -> KegrError {
    KegrError::ArchiveError(format!("Error reading {}: {}", archive_path.display(), e))
}

/// Maps an archive path onto disk below `target_dir`. `Ok(None)` means the
/// entry vanished entirely under `strip_components`.
fn confined_path(
    target_dir: &Path,
    path: &Path,
    strip_components: usize,
) -> std::result::Result<Option<PathBuf>, String> {
    let mut dest = target_dir.to_path_buf();
    let mut pushed = false;
    for comp in path.components().skip(strip_components) {
        match comp {
            Component::Normal(p) => {
                dest.push(p);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Unsafe '..' in archive path {}", path.display()));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!("Absolute archive path {}", path.display()));
            }
        }
    }
    Ok(pushed.then_some(dest))
}
