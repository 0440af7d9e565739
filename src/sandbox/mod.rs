//! Filesystem sandbox: path confinement for every capability.
//!
//! All file arguments go through [`PathGuard::guard`] before a handler
//! sees them, and handlers resolve their default file names through the
//! same guard. The guard only decides *where* a capability may act; it
//! does not constrain what the capability computes.
//!
//! Resolution order:
//!
//! 1. Absolute paths already under the real root are taken as-is
//! 2. The virtual root token (e.g. `/data`) is remapped to the real root
//! 3. Other absolute paths are taken as-is (and usually rejected)
//! 4. Relative paths are joined onto the real root
//!
//! The result is then normalized and canonicalized (symlinks followed)
//! *before* the prefix comparison, so neither `..` segments nor symlinks
//! can escape the root.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// A path resolved outside the sandbox root (or could not be resolved).
#[derive(Debug, Clone, Error)]
#[error("access denied: '{path}' is outside the data directory")]
pub struct AccessDenied {
    pub path: String,
}

/// Validates candidate paths against a canonical sandbox root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    virtual_root: Option<String>,
}

impl PathGuard {
    /// Creates a guard for an existing root directory.
    ///
    /// `virtual_root` is the prefix callers use to refer to the root
    /// (empty or `/` disables remapping).
    pub fn new(root: impl AsRef<Path>, virtual_root: &str) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("sandbox root {} is not a directory", root.display()),
            ));
        }
        let virtual_root = virtual_root.trim_end_matches('/');
        let virtual_root = (!virtual_root.is_empty()).then(|| virtual_root.to_string());
        Ok(Self { root, virtual_root })
    }

    /// Canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` to its canonical form, or fails if it lies outside the root.
    ///
    /// Has no side effects; calling it again on its own output returns the
    /// same path.
    pub fn guard(&self, path: &str) -> Result<PathBuf, AccessDenied> {
        let denied = || AccessDenied {
            path: path.to_string(),
        };

        let path = path.trim();
        if path.is_empty() || path.contains('\0') {
            return Err(denied());
        }

        let candidate = self.remap(path);
        let normalized = normalize(&candidate);
        let resolved = resolve_existing_prefix(&normalized).ok_or_else(denied)?;

        if !resolved.starts_with(&self.root) {
            warn!(
                "Path guard rejected '{path}' (resolved to {})",
                resolved.display()
            );
            return Err(denied());
        }

        debug!("Path guard: '{path}' → {}", resolved.display());
        Ok(resolved)
    }

    fn remap(&self, path: &str) -> PathBuf {
        let as_path = Path::new(path);
        if as_path.is_absolute() && as_path.starts_with(&self.root) {
            return as_path.to_path_buf();
        }
        if let Some(ref token) = self.virtual_root {
            if path == token {
                return self.root.clone();
            }
            if let Some(rest) = path.strip_prefix(token.as_str()) {
                if rest.starts_with('/') {
                    return self.root.join(rest.trim_start_matches('/'));
                }
            }
        }
        if as_path.is_absolute() {
            as_path.to_path_buf()
        } else {
            self.root.join(as_path)
        }
    }
}

/// Folds `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalizes the longest existing ancestor and re-appends the rest.
///
/// Paths that do not exist yet (output files) still get their parent's
/// symlinks resolved. Dangling symlinks fail to canonicalize and yield `None`.
fn resolve_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing: Vec<OsString> = Vec::new();

    while std::fs::symlink_metadata(&existing).is_err() {
        let name = existing.file_name()?.to_os_string();
        missing.push(name);
        if !existing.pop() {
            return None;
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).ok()?;
    for part in missing.iter().rev() {
        resolved.push(part);
    }
    Some(resolved)
}
