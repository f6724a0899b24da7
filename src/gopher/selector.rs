//! Selector parsing and resolution against the server root.
//!
//! Selectors are cleaned lexically as if rooted at `/` before they are
//! joined with the root, so `..` can never climb above it.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::item::EntryKind;

/// A selector resolved to an existing entry under the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Cleaned logical selector, without leading `/`. Empty for the root.
    pub selector: String,
    /// Absolute filesystem path, always inside the root.
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl Resolved {
    /// Selector advertised for a child entry of this directory.
    pub fn child_selector(&self, name: &str) -> String {
        if self.selector.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.selector, name)
        }
    }
}

#[derive(Debug)]
pub enum ResolveError {
    /// Request line is not valid UTF-8.
    InvalidSelector,
    /// Joined path ended up outside the root.
    Escape(PathBuf),
    NotFound(PathBuf),
    Unreadable(PathBuf, io::Error),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::InvalidSelector => write!(f, "selector is not valid UTF-8"),
            ResolveError::Escape(path) => {
                write!(f, "path '{}' escapes the server root", path.display())
            }
            ResolveError::NotFound(path) => write!(f, "'{}' does not exist", path.display()),
            ResolveError::Unreadable(path, e) => {
                write!(f, "failed to stat '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Strip the line terminator (`\r\n` or `\n`) from a raw request line.
pub fn parse_request_line(line: &[u8]) -> Result<&str, ResolveError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line).map_err(|_| ResolveError::InvalidSelector)
}

/// Lexically clean a selector.
///
/// Repeated separators and `.` segments are dropped, `..` removes the
/// previous segment and is ignored at the top.
pub fn clean(selector: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in selector.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Join a cleaned selector with `root`, refusing anything outside it.
pub fn confine(root: &Path, selector: &str) -> Result<PathBuf, ResolveError> {
    if selector.is_empty() {
        return Ok(root.to_path_buf());
    }
    let relative = Path::new(selector);
    let path = root.join(relative);
    let normal = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if !normal || !path.starts_with(root) {
        return Err(ResolveError::Escape(path));
    }
    Ok(path)
}

/// Resolve a selector to an existing entry under `root`.
///
/// Symlinks are followed when looking up the entry kind.
pub async fn resolve(root: &Path, selector: &str) -> Result<Resolved, ResolveError> {
    let selector = clean(selector);
    let path = confine(root, &selector)?;

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ResolveError::NotFound(path))
        }
        Err(e) => return Err(ResolveError::Unreadable(path, e)),
    };

    Ok(Resolved {
        selector,
        path,
        kind: metadata.file_type().into(),
    })
}
