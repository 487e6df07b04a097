//! Open modes
//!
//! Parses `fopen`-style mode strings into what the stream adapter needs.

use std::str::FromStr;

use super::errors::FsError;

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r`: read an existing file
    Read,
    /// `w`: create, or overwrite an existing file
    Write,
    /// `x`: create; the file must not exist yet
    CreateNew,
    /// `a`: append to an existing file
    Append,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

impl FromStr for OpenMode {
    type Err = FsError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        let mut chars = mode.chars();
        let parsed = match chars.next() {
            Some('r') => OpenMode::Read,
            Some('w') => OpenMode::Write,
            Some('x') => OpenMode::CreateNew,
            Some('a') => OpenMode::Append,
            _ => return Err(FsError::InvalidMode(mode.to_string())),
        };
        // Binary and text markers make no difference to a byte stream
        if chars.all(|c| c == 'b' || c == 't') {
            Ok(parsed)
        } else {
            Err(FsError::InvalidMode(mode.to_string()))
        }
    }
}
