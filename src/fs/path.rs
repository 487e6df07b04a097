//! Path normalization
//!
//! Filesystem paths are absolute and slash-separated. Empty segments and `.`
//! are dropped, `..` pops a segment, and trailing separators are ignored.

use std::fmt;

use super::errors::FsError;

pub const SEPARATOR: char = '/';

/// Characters Drive names may contain but paths here may not
const INVALID_CHARS: &[char] = &[':', '\0'];

/// A normalized absolute path, stored as its segments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FsPath {
    segments: Vec<String>,
}

impl FsPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse and normalize a caller-supplied path.
    /// The empty string denotes the root.
    pub fn parse(path: &str) -> Result<Self, FsError> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        if !path.starts_with(SEPARATOR) {
            return Err(FsError::invalid_path(path, "path must start with '/'"));
        }
        if path.contains(INVALID_CHARS) {
            return Err(FsError::invalid_path(path, "path contains ':' or NUL"));
        }

        let mut segments: Vec<String> = Vec::new();
        for segment in path.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(FsError::invalid_path(path, "path escapes the root"));
                    }
                }
                name => segments.push(name.to_string()),
            }
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment (None for the root)
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path (None for the root)
    pub fn parent(&self) -> Option<FsPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single validated name
    pub fn join(&self, name: &str) -> Result<FsPath, FsError> {
        validate_name(name)?;
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Ok(Self { segments })
    }

    /// Append a name taken from the remote side, without validation
    pub(crate) fn child(&self, name: &str) -> FsPath {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// True if `self` is `other` or lies beneath it
    pub fn starts_with(&self, other: &FsPath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Validate a single entry name (as used by renames)
pub fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::invalid_path(name, "not a valid entry name"));
    }
    if name.contains(SEPARATOR) {
        return Err(FsError::invalid_path(name, "name contains the path separator"));
    }
    if name.contains(INVALID_CHARS) {
        return Err(FsError::invalid_path(name, "name contains ':' or NUL"));
    }
    Ok(())
}
