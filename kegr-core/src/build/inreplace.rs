// kegr-core/src/build/inreplace.rs
// In-place text substitution for source and installed files.
//
// Every substitution must either change the file or have changed it on an
// earlier run. Literal and regex edits that change a file are recorded in a
// hidden stamp beside it; a later run that finds nothing to replace passes
// only when the stamp lists that exact edit. Anything else means the file no
// longer looks the way the recipe expects and is reported as
// `SubstitutionNotFound`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use kegr_common::error::{KegrError, Result};
use regex::{NoExpand, Regex};
use tracing::debug;

#[derive(Debug, Clone)]
enum Kind {
    Literal { from: String, to: String },
    Pattern { pattern: Regex, to: String },
    AppendToMatches { pattern: Regex, suffix: String },
}

/// One edit applied to a file's text. Replacement text is always inserted
/// verbatim; `$` and `\` carry no special meaning in it.
#[derive(Debug, Clone)]
pub struct Substitution {
    kind: Kind,
}

/// File name suffix of the stamps that record applied edits.
pub const STAMP_SUFFIX: &str = ".kegr-inreplace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Changed(String),
    AlreadyApplied,
    NotFound,
}

impl Substitution {
    pub fn literal(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            kind: Kind::Literal {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    pub fn regex(pattern: &str, to: impl Into<String>) -> Result<Self> {
        Ok(Self {
            kind: Kind::Pattern {
                pattern: compile(pattern)?,
                to: to.into(),
            },
        })
    }

    /// Appends `suffix` to the end of every match of `pattern`. A match that
    /// already ends with `suffix` is left alone.
    pub fn append_to_matches(pattern: &str, suffix: impl Into<String>) -> Result<Self> {
        Ok(Self {
            kind: Kind::AppendToMatches {
                pattern: compile(pattern)?,
                suffix: suffix.into(),
            },
        })
    }

    /// Applies the edit to `content` alone. Only `AppendToMatches` can tell
    /// from the text that it already ran; the other kinds report `NotFound`
    /// and leave the decision to the stamp kept by [`inreplace`].
    pub fn apply(&self, content: &str) -> Outcome {
        match &self.kind {
            Kind::Literal { from, to } => {
                if !from.is_empty() && content.contains(from.as_str()) {
                    Outcome::Changed(content.replace(from.as_str(), to))
                } else {
                    Outcome::NotFound
                }
            }
            Kind::Pattern { pattern, to } => {
                if pattern.is_match(content) {
                    Outcome::Changed(pattern.replace_all(content, NoExpand(to)).into_owned())
                } else {
                    Outcome::NotFound
                }
            }
            Kind::AppendToMatches { pattern, suffix } => {
                let mut out = String::with_capacity(content.len() + suffix.len() * 4);
                let mut last = 0;
                let mut matched = false;
                let mut changed = false;
                for m in pattern.find_iter(content) {
                    matched = true;
                    out.push_str(&content[last..m.end()]);
                    if !m.as_str().ends_with(suffix.as_str()) {
                        out.push_str(suffix);
                        changed = true;
                    }
                    last = m.end();
                }
                out.push_str(&content[last..]);
                match (matched, changed) {
                    (false, _) => Outcome::NotFound,
                    (true, false) => Outcome::AlreadyApplied,
                    (true, true) => Outcome::Changed(out),
                }
            }
        }
    }
}

impl Substitution {
    /// Identity recorded in a stamp, covering both sides of the edit.
    fn stamp_key(&self) -> Result<Option<String>> {
        let key = match &self.kind {
            Kind::Literal { from, to } => serde_json::to_string(&("literal", from, to))?,
            Kind::Pattern { pattern, to } => {
                serde_json::to_string(&("regex", pattern.as_str(), to))?
            }
            Kind::AppendToMatches { .. } => return Ok(None),
        };
        Ok(Some(key))
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Literal { from, .. } => write!(f, "{from}"),
            Kind::Pattern { pattern, .. } | Kind::AppendToMatches { pattern, .. } => {
                write!(f, "/{}/", pattern.as_str())
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        KegrError::ValidationError(format!("Invalid substitution pattern '{pattern}': {e}"))
    })
}

fn stamp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{STAMP_SUFFIX}"))
}

fn read_stamp(path: &Path) -> Result<HashSet<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(KegrError::IoError(format!(
            "Failed to read substitution stamp {}: {}",
            path.display(),
            e
        ))),
    }
}

/// Applies `subs` in order to the file at `path`. Returns whether the file was
/// rewritten; an unchanged file is not touched on disk.
pub fn inreplace(path: &Path, subs: &[Substitution]) -> Result<bool> {
    let original = fs::read_to_string(path).map_err(|e| {
        KegrError::IoError(format!("Failed to read {} for substitution: {}", path.display(), e))
    })?;
    let stamp = stamp_path(path);
    let applied_before = read_stamp(&stamp)?;
    let mut newly_applied = Vec::new();
    let mut content = original.clone();
    for sub in subs {
        let key = sub.stamp_key()?;
        match sub.apply(&content) {
            Outcome::Changed(updated) => {
                debug!("inreplace {}: applied {}", path.display(), sub);
                content = updated;
                newly_applied.extend(key);
            }
            Outcome::AlreadyApplied => {
                debug!("inreplace {}: {} already applied", path.display(), sub);
            }
            Outcome::NotFound if key.as_ref().is_some_and(|k| applied_before.contains(k)) => {
                debug!("inreplace {}: {} applied on an earlier run", path.display(), sub);
            }
            Outcome::NotFound => {
                return Err(KegrError::SubstitutionNotFound {
                    file: path.display().to_string(),
                    pattern: sub.to_string(),
                });
            }
        }
    }
    if content == original {
        return Ok(false);
    }
    fs::write(path, content).map_err(|e| {
        KegrError::IoError(format!("Failed to write {}: {}", path.display(), e))
    })?;
    if !newly_applied.is_empty() {
        let mut lines: Vec<String> = applied_before.into_iter().collect();
        lines.extend(newly_applied);
        lines.sort();
        lines.dedup();
        let mut text = lines.join("\n");
        text.push('\n');
        fs::write(&stamp, text).map_err(|e| {
            KegrError::IoError(format!(
                "Failed to write substitution stamp {}: {}",
                stamp.display(),
                e
            ))
        })?;
    }
    Ok(true)
}

pub fn inreplace_files<P: AsRef<Path>>(paths: &[P], subs: &[Substitution]) -> Result<()> {
    for path in paths {
        inreplace(path.as_ref(), subs)?;
    }
    Ok(())
}
