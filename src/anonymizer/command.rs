//! Anonymizer backed by an external program, spawned once per input file.
//!
//! Exit-code contract for the program:
//! - `0`: anonymized; the last stdout line may be a JSON object with
//!   `patient`, `study` and `series` identifiers for the totals.
//! - `2`: rejected and moved to the quarantine directory.
//! - anything else: failed; stderr (or the exit status) is the message.
//!
//! Settings reach the program as `DICOM_INTAKE_*` environment variables.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;

use crate::anonymizer::{Anonymizer, AnonymizerSettings, AnonymizerTotals, QueueDepths};
use crate::core::errors::{IntakeError, Result};

/// Exit status the program uses to report a quarantined input.
pub const QUARANTINE_EXIT_CODE: i32 = 2;

/// Optional per-instance report printed by the program on success.
#[derive(Debug, Deserialize)]
struct InstanceReport {
    patient: Option<String>,
    study: Option<String>,
    series: Option<String>,
}

pub struct CommandAnonymizer {
    settings: AnonymizerSettings,
    patients: HashSet<String>,
    studies: HashSet<String>,
    series: HashSet<String>,
    instances: u64,
    quarantined: u64,
    stopped: bool,
}

impl CommandAnonymizer {
    /// Build the handle. Fails if no program is configured.
    pub fn new(settings: AnonymizerSettings) -> Result<Self> {
        if settings.command.as_os_str().is_empty() {
            return Err(IntakeError::InvalidConfig {
                details: "anonymizer.command is required".to_string(),
            });
        }
        Ok(Self {
            settings,
            patients: HashSet::new(),
            studies: HashSet::new(),
            series: HashSet::new(),
            instances: 0,
            quarantined: 0,
            stopped: false,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &AnonymizerSettings {
        &self.settings
    }

    fn command_for(&self, path: &Path) -> Command {
        let s = &self.settings;
        let mut cmd = Command::new(&s.command);
        cmd.args(&s.args)
            .arg(path)
            .env("DICOM_INTAKE_STORAGE_DIR", &s.storage_dir)
            .env("DICOM_INTAKE_IMAGES_DIR", s.storage_dir.join("public"))
            .env("DICOM_INTAKE_QUARANTINE_DIR", &s.quarantine_dir)
            .env(
                "DICOM_INTAKE_REMOVE_PIXEL_PHI",
                if s.remove_pixel_phi { "true" } else { "false" },
            )
            .env("DICOM_INTAKE_LOG_LEVEL", &s.log_level);
        if let Some(script) = &s.script_path {
            cmd.env("DICOM_INTAKE_SCRIPT_PATH", script);
        }
        if let Some(site_id) = &s.site_id {
            cmd.env("DICOM_INTAKE_SITE_ID", site_id);
        }
        if let Some(uid_root) = &s.uid_root {
            cmd.env("DICOM_INTAKE_UID_ROOT", uid_root);
        }
        cmd
    }

    fn record_success(&mut self, stdout: &[u8]) {
        self.instances += 1;
        let stdout = String::from_utf8_lossy(stdout);
        let Some(last) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
            return;
        };
        // Programs that print plain text are fine; the report is optional.
        let Ok(report) = serde_json::from_str::<InstanceReport>(last.trim()) else {
            return;
        };
        if let Some(patient) = report.patient {
            self.patients.insert(patient);
        }
        if let Some(study) = report.study {
            self.studies.insert(study);
        }
        if let Some(series) = report.series {
            self.series.insert(series);
        }
    }
}

impl Anonymizer for CommandAnonymizer {
    fn anonymize_file(&mut self, path: &Path) -> std::result::Result<(), String> {
        if self.stopped {
            return Err("anonymizer stopped".to_string());
        }

        let output = self.command_for(path).output().map_err(|e| {
            format!(
                "failed to execute {}: {e}",
                self.settings.command.display()
            )
        })?;

        match output.status.code() {
            Some(0) => {
                self.record_success(&output.stdout);
                Ok(())
            }
            Some(QUARANTINE_EXIT_CODE) => {
                self.quarantined += 1;
                Err(failure_message("quarantined", &output))
            }
            _ => Err(failure_message("anonymizer failed", &output)),
        }
    }

    fn queued(&self) -> QueueDepths {
        // Each call runs to completion before returning.
        QueueDepths::default()
    }

    fn totals(&self) -> AnonymizerTotals {
        AnonymizerTotals {
            patients: self.patients.len() as u64,
            studies: self.studies.len() as u64,
            series: self.series.len() as u64,
            instances: self.instances,
            quarantined: self.quarantined,
        }
    }

    fn quarantine_path(&self) -> PathBuf {
        self.settings.quarantine_dir.clone()
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

fn failure_message(prefix: &str, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{prefix} ({})", output.status)
    } else {
        format!("{prefix} ({}): {stderr}", output.status)
    }
}
