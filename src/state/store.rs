//! Durable processed-set: which input files were anonymized, and at which version.
//!
//! Loading is best-effort. A missing, unreadable or malformed state file
//! yields an empty store (the worst outcome is redundant re-processing).
//! Saving is strict: a failed write is returned to the caller, and the store
//! stays dirty so the next save retries.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::core::errors::{IntakeError, Result, StateLoadError};
use crate::state::fingerprint::{self, FileIdentity, VersionFingerprint};

/// On-disk shape: `{"processed": {"<absolute-path>": <mtime-ns>, ...}}`.
#[derive(Serialize)]
struct Snapshot<'a> {
    processed: &'a BTreeMap<FileIdentity, VersionFingerprint>,
}

/// Processed-set owned by one service instance for its whole lifetime.
#[derive(Debug)]
pub struct ProcessedStore {
    path: PathBuf,
    processed: BTreeMap<FileIdentity, VersionFingerprint>,
    dirty: bool,
}

impl ProcessedStore {
    /// Empty, clean store that will persist to `path`.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            processed: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Restore from `path`, degrading any failure to an empty store.
    ///
    /// The store is always usable; the error (if any) says why prior state was
    /// discarded so the caller can report it once.
    pub fn restore(path: impl Into<PathBuf>) -> (Self, Option<StateLoadError>) {
        let path = path.into();
        match Self::try_load(&path) {
            Ok(store) => (store, None),
            Err(err) => (Self::empty(path), Some(err)),
        }
    }

    /// Restore from `path`, warning on stderr when prior state is discarded.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let (store, err) = Self::restore(path);
        if let Some(err) = err {
            eprintln!("[DIN-STATE] WARNING: {err}; starting with an empty processed-set");
        }
        store
    }

    fn try_load(path: &Path) -> std::result::Result<Self, StateLoadError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(source) => {
                return Err(StateLoadError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let payload: Value =
            serde_json::from_str(&raw).map_err(|source| StateLoadError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let Value::Object(mut top) = payload else {
            return Err(StateLoadError::Shape {
                path: path.to_path_buf(),
                details: "top level must be an object".to_string(),
            });
        };

        let mut store = Self::empty(path);
        match top.remove("processed") {
            None => {}
            Some(Value::Object(entries)) => {
                // Non-integer fingerprints are dropped one by one.
                store.processed = entries
                    .into_iter()
                    .filter_map(|(key, value)| {
                        value
                            .as_i64()
                            .map(|n| (FileIdentity::from(key), VersionFingerprint::from_nanos(n)))
                    })
                    .collect();
            }
            Some(other) => {
                return Err(StateLoadError::Shape {
                    path: path.to_path_buf(),
                    details: format!("`processed` must be an object, found {}", kind_of(&other)),
                });
            }
        }
        Ok(store)
    }

    /// True iff `file` was recorded and its fingerprint still matches.
    pub fn is_processed(&self, file: &Path) -> bool {
        self.processed
            .get(&FileIdentity::of(file))
            .is_some_and(|recorded| fingerprint::matches(file, *recorded))
    }

    /// Record the current fingerprint of `file`, overwriting any prior value.
    pub fn mark_processed(&mut self, file: &Path) {
        self.processed
            .insert(FileIdentity::of(file), fingerprint::capture(file));
        self.dirty = true;
    }

    /// Forget every entry. Persisted state is untouched until [`Self::save`].
    pub fn reset(&mut self) {
        self.processed.clear();
        self.dirty = true;
    }

    /// Write the full snapshot if anything changed since the last save.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_string_pretty(&Snapshot {
            processed: &self.processed,
        })?;
        write_atomic(&self.path, json.as_bytes())?;
        self.dirty = false;
        Ok(())
    }

    /// Fingerprint recorded for `file`, if any.
    pub fn recorded(&self, file: &Path) -> Option<VersionFingerprint> {
        self.processed.get(&FileIdentity::of(file)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FileIdentity, &VersionFingerprint)> {
        self.processed.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write `data` to a sibling temp file, fsync, then rename over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IntakeError::io(parent, source))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            let mut file = opts
                .open(&tmp_path)
                .map_err(|source| IntakeError::io(&tmp_path, source))?;
            file.write_all(data)
                .and_then(|()| file.sync_all())
                .map_err(|source| IntakeError::io(&tmp_path, source))?;
        }
        fs::rename(&tmp_path, path).map_err(|source| IntakeError::io(path, source))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
