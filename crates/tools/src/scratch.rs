//! Sandboxed scratch file space shared between tools.
//!
//! Every path handed to the sandbox is sanitised and resolved to a
//! descendant of the configured root; traversal attempts are rejected.
//! Size limits: 50 MB per file, 500 MB for the whole tree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use valet_domain::error::{Error, Result};

pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;
pub const MAX_TOTAL_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_CLEANUP_HOURS: f64 = 72.0;

/// Metadata for one scratch file, as reported by `list_files`.
#[derive(Debug, Clone, Serialize)]
pub struct ScratchFileInfo {
    /// Path relative to the scratch root.
    pub name: String,
    pub size: u64,
    /// RFC 3339 modification time.
    pub modified: String,
    pub age_hours: f64,
}

/// Sandboxed local filesystem for temporary working files.
///
/// Methods are synchronous; callers on the event loop wrap them in
/// `spawn_blocking`.
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    /// Create the sandbox, making the root directory if needed.
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Path handling ─────────────────────────────────────────────

    /// Replace unsafe characters, strip leading dots, cap at 255 chars.
    pub fn sanitize_filename(name: &str) -> Result<String> {
        let replaced: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let trimmed = replaced.trim_start_matches('.');
        let capped: String = trimmed.chars().take(255).collect();
        if capped.is_empty() {
            return Err(Error::Other(format!(
                "filename is empty after sanitization: {name:?}"
            )));
        }
        Ok(capped)
    }

    /// Resolve a POSIX-style relative path to an absolute path inside
    /// the root. Each component is sanitised; the result must stay
    /// inside the sandbox.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let mut parts = Vec::new();
        for part in name.split('/').filter(|p| !p.is_empty()) {
            parts.push(Self::sanitize_filename(part)?);
        }
        if parts.is_empty() {
            return Err(Error::Other(format!(
                "path resolves to empty after sanitization: {name:?}"
            )));
        }

        let mut target = self.root.clone();
        target.extend(&parts);

        // Leading-dot stripping removes ".." components, but keep an
        // explicit containment check as the invariant.
        if !target.starts_with(&self.root) {
            return Err(Error::Other(format!("path traversal detected: {name:?}")));
        }
        Ok(target)
    }

    // ── File operations ───────────────────────────────────────────

    /// Write content, creating subdirectories as needed. Enforces the
    /// per-file and total-tree limits; a rejected write has no side
    /// effects.
    pub fn write(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        if content.len() as u64 > MAX_FILE_SIZE {
            return Err(Error::Other(format!(
                "file too large: {} bytes (max {MAX_FILE_SIZE})",
                content.len()
            )));
        }

        let target = self.resolve(name)?;
        let existing = target.metadata().map(|m| m.len()).unwrap_or(0);
        let new_total = self.total_size()? - existing + content.len() as u64;
        if new_total > MAX_TOTAL_SIZE {
            return Err(Error::Other(format!(
                "scratch space quota exceeded: {new_total} bytes (max {MAX_TOTAL_SIZE})"
            )));
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
        Ok(target)
    }

    /// Read a UTF-8 text file.
    pub fn read(&self, name: &str) -> Result<String> {
        let bytes = self.read_bytes(name)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::Other(format!("file is binary (not UTF-8 text): {name}")))
    }

    pub fn read_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let target = self.resolve(name)?;
        if !target.is_file() {
            return Err(Error::Other(format!("file not found: {name}")));
        }
        Ok(std::fs::read(target)?)
    }

    /// Delete a file. Returns false if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let target = self.resolve(name)?;
        if !target.is_file() {
            return Ok(false);
        }
        std::fs::remove_file(target)?;
        Ok(true)
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.resolve(name)?.is_file())
    }

    /// Every regular file in the sandbox, sorted by relative path.
    pub fn list_files(&self) -> Result<Vec<ScratchFileInfo>> {
        let now = Utc::now();
        let mut files = Vec::new();
        for path in walk_files(&self.root)? {
            let meta = path.metadata()?;
            let modified: DateTime<Utc> = meta.modified()?.into();
            let age_hours = (now - modified).num_seconds() as f64 / 3600.0;
            let name = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            files.push(ScratchFileInfo {
                name,
                size: meta.len(),
                modified: modified.to_rfc3339_opts(SecondsFormat::Secs, true),
                age_hours: (age_hours * 10.0).round() / 10.0,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for path in walk_files(&self.root)? {
            total += path.metadata()?.len();
        }
        Ok(total)
    }

    /// Remove files older than `max_age_hours`, then prune empty
    /// subdirectories. Returns the number of files removed.
    pub fn cleanup(&self, max_age_hours: f64) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for path in walk_files(&self.root)? {
            let modified: DateTime<Utc> = path.metadata()?.modified()?.into();
            let age_hours = (now - modified).num_seconds() as f64 / 3600.0;
            if age_hours > max_age_hours {
                std::fs::remove_file(&path)?;
                removed += 1;
                tracing::debug!(path = %path.display(), age_hours, "scratch cleanup removed file");
            }
        }
        prune_empty_dirs(&self.root, false)?;
        Ok(removed)
    }

    /// Remove everything. Returns the number of files removed.
    pub fn wipe(&self) -> Result<usize> {
        self.cleanup(-1.0)
    }
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    Ok(out)
}

fn prune_empty_dirs(dir: &Path, remove_self: bool) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            prune_empty_dirs(&path, true)?;
        }
    }
    if remove_self && std::fs::read_dir(dir)?.next().is_none() {
        std::fs::remove_dir(dir)?;
    }
    Ok(())
}
