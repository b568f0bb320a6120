//! Engine version parsing and ordering.
//!
//! Versions are read once at startup from the engine's `Version.h` and are
//! compared lexicographically on `(major, minor, patch)`. A two-component
//! string like `5.2` parses with `patch = 0`, so `5.2.0.newer_than(5.2)`
//! holds.

use regex::Regex;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::CrysknifeError;

/// Relative location of the version header inside an engine checkout.
pub const VERSION_HEADER: &str = "Runtime/Launch/Resources/Version.h";

/// An engine release identifier, ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// `self >= other`, the comparison behind `NewerThan` predicates and
    /// `EngineNewerThan` decorators.
    pub fn newer_than(&self, other: EngineVersion) -> bool {
        *self >= other
    }

    /// Extracts the version from the contents of the engine's `Version.h`.
    pub fn from_version_header(content: &str) -> Result<Self, CrysknifeError> {
        let probe = |name: &str| -> Option<u32> {
            // The defines are stable across engine releases; the regex only
            // tolerates whitespace drift.
            let re = Regex::new(&format!(r"#define\s+ENGINE_{name}_VERSION\s+(\d+)")).ok()?;
            re.captures(content)?.get(1)?.as_str().parse().ok()
        };
        match (probe("MAJOR"), probe("MINOR"), probe("PATCH")) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self::new(major, minor, patch)),
            _ => Err(CrysknifeError::InvalidVersion {
                input: "Version.h".into(),
            }),
        }
    }

    /// Reads and parses `Version.h` under the given engine source root.
    pub fn probe(source_root: &Path) -> Result<Self, CrysknifeError> {
        let path = source_root.join(VERSION_HEADER);
        let content = fs::read_to_string(&path).map_err(|source| CrysknifeError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_version_header(&content)
    }
}

impl FromStr for EngineVersion {
    type Err = CrysknifeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let invalid = || CrysknifeError::InvalidVersion { input: s.into() };
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
