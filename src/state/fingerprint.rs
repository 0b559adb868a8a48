//! Version fingerprints: the last-modified time of a file, used for change detection.
//!
//! A fingerprint is not a content hash. Two versions of a file with the same
//! nanosecond mtime are indistinguishable, which is acceptable for files that
//! are dropped into an intake directory and never edited in place.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::core::paths::lexical_absolute;

/// Nanoseconds since the Unix epoch of a file's mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionFingerprint(i64);

impl VersionFingerprint {
    /// Recorded for files that could not be stat'ed at capture time.
    pub const MISSING: Self = Self(0);

    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VersionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable processed-set key: the lexically absolute path of a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

impl FileIdentity {
    /// Identity of `path`; relative paths are anchored at the CWD.
    #[must_use]
    pub fn of(path: &Path) -> Self {
        Self(lexical_absolute(path).to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl From<String> for FileIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current fingerprint of `path`, or [`VersionFingerprint::MISSING`] if it cannot be stat'ed.
pub fn capture(path: &Path) -> VersionFingerprint {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_or(VersionFingerprint::MISSING, |mtime| {
            VersionFingerprint(system_time_to_nanos(mtime))
        })
}

/// Whether `path` still carries the `recorded` fingerprint.
///
/// A file that no longer exists counts as matching: there is nothing left to
/// re-process. Note the asymmetry with [`capture`], which records `MISSING`
/// for the same situation.
pub fn matches(path: &Path, recorded: VersionFingerprint) -> bool {
    match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(mtime) => system_time_to_nanos(mtime) == recorded.0,
        Err(err) if err.kind() == ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos()).map_or(i64::MIN, |n| -n),
    }
}
