//! The anonymizer seam: an owned handle the intake service drives one file at a time.
//!
//! The de-identification itself is not this crate's concern. Anything that
//! can turn an input path into "done" or "failed with a message" plugs in
//! here; [`command::CommandAnonymizer`] is the stock implementation.

#![allow(missing_docs)]

pub mod command;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::Config;

/// In-flight work inside the anonymizer, split the way the pipeline is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    /// Datasets waiting for header de-identification.
    pub datasets: usize,
    /// Datasets waiting for burned-in PHI removal from pixel data.
    pub pixel_phi: usize,
}

/// Lifetime counters reported by the anonymizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymizerTotals {
    pub patients: u64,
    pub studies: u64,
    pub series: u64,
    pub instances: u64,
    pub quarantined: u64,
}

/// Everything an anonymizer needs to know, resolved up front and passed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnonymizerSettings {
    /// Program to run and its leading arguments.
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Root of anonymized output; images land in `<storage_dir>/public`.
    pub storage_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    pub remove_pixel_phi: bool,
    pub script_path: Option<PathBuf>,
    pub site_id: Option<String>,
    pub uid_root: Option<String>,
    pub log_level: String,
}

impl AnonymizerSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.anonymizer.command.clone(),
            args: config.anonymizer.args.clone(),
            storage_dir: config.paths.output_dir.clone(),
            quarantine_dir: config.paths.quarantine_dir.clone(),
            remove_pixel_phi: config.processing.remove_pixel_phi,
            script_path: config.processing.script_path.clone(),
            site_id: config.identity.site_id.clone(),
            uid_root: config.identity.uid_root.clone(),
            log_level: config.logging.level.to_string(),
        }
    }
}

/// Contract between the run coordinator and whatever performs de-identification.
///
/// Per-file failures are values, never panics: `Err` carries a message that
/// is counted and logged, and the file stays eligible for the next run.
pub trait Anonymizer {
    /// Anonymize one input file.
    fn anonymize_file(&mut self, path: &Path) -> Result<(), String>;

    /// Current in-flight queue depths.
    fn queued(&self) -> QueueDepths;

    /// Accumulated lifetime totals.
    fn totals(&self) -> AnonymizerTotals;

    /// Directory where rejected inputs end up.
    fn quarantine_path(&self) -> PathBuf;

    /// Release resources; later calls should fail rather than do work.
    fn stop(&mut self);
}

impl<A: Anonymizer + ?Sized> Anonymizer for Box<A> {
    fn anonymize_file(&mut self, path: &Path) -> Result<(), String> {
        (**self).anonymize_file(path)
    }

    fn queued(&self) -> QueueDepths {
        (**self).queued()
    }

    fn totals(&self) -> AnonymizerTotals {
        (**self).totals()
    }

    fn quarantine_path(&self) -> PathBuf {
        (**self).quarantine_path()
    }

    fn stop(&mut self) {
        (**self).stop();
    }
}
