//! Revision fingerprint of the external program's source tree.

use crate::transport;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const DIRTY_SUFFIX: &str = "-dirty";
const DOWNLOADED: &str = "downloaded";

/// Where the program tree came from.
///
/// Only a clean commit is trusted as a cache key. Dirty and downloaded trees
/// always force a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgramRevision {
    Commit(String),
    Dirty(String),
    Downloaded,
}

impl ProgramRevision {
    /// Inspect `program_dir` with git. Missing git metadata means the tree
    /// was downloaded as an archive.
    pub fn detect(program_dir: &Path) -> Self {
        let dir = program_dir.display().to_string();
        let head = match transport::query("git", &["-C", &dir, "rev-parse", "HEAD"], None) {
            Ok(out) if out.success() => out.stdout.trim().to_string(),
            _ => return Self::Downloaded,
        };
        if head.is_empty() {
            return Self::Downloaded;
        }
        match transport::query("git", &["-C", &dir, "status", "--porcelain"], None) {
            Ok(out) if out.success() && out.stdout.trim().is_empty() => Self::Commit(head),
            _ => Self::Dirty(head),
        }
    }

    /// A revision that can be compared against a recorded one.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Commit(_))
    }
}

impl fmt::Display for ProgramRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit(hash) => write!(f, "{}", hash),
            Self::Dirty(hash) => write!(f, "{}{}", hash, DIRTY_SUFFIX),
            Self::Downloaded => write!(f, "{}", DOWNLOADED),
        }
    }
}

impl FromStr for ProgramRevision {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(if s == DOWNLOADED || s.is_empty() {
            Self::Downloaded
        } else if let Some(hash) = s.strip_suffix(DIRTY_SUFFIX) {
            Self::Dirty(hash.to_string())
        } else {
            Self::Commit(s.to_string())
        })
    }
}
