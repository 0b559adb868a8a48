//! Configuration system: TOML file + env var overrides + resolved directory layout.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{IntakeError, Result};
use crate::core::paths::resolve_absolute_path;

/// Default file name of the processed-set state file under `paths.temp_dir`.
pub const DEFAULT_STATE_FILENAME: &str = ".anonymizer_state.json";

/// Full intake configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub processing: ProcessingConfig,
    pub identity: IdentityConfig,
    pub logging: LoggingConfig,
    pub limits: LimitsConfig,
    pub anonymizer: AnonymizerCommandConfig,
    /// Where this configuration was loaded from (not part of the file).
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// Directory layout. Empty paths mean "unset" until [`Config::load`] resolves them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Defaults to `<output_dir>/private/quarantine`; must live inside `output_dir`.
    pub quarantine_dir: PathBuf,
    /// Defaults to `<system temp>/dicom_intake`.
    pub temp_dir: PathBuf,
    pub state_filename: String,
}

/// Scan and anonymization behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProcessingConfig {
    pub recursive_scan: bool,
    pub remove_pixel_phi: bool,
    /// Optional rule script handed to the anonymizer program.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<PathBuf>,
}

/// Site identity stamped into anonymized output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IdentityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid_root: Option<String>,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Defaults to `<temp_dir>/activity.jsonl`.
    pub jsonl_log: PathBuf,
}

/// Per-invocation limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LimitsConfig {
    /// Batch cap: at most this many candidates are attempted per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_files: Option<usize>,
}

/// External anonymizer program invoked once per file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AnonymizerCommandConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
}

/// Minimum severity written to the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl FromStr for LogLevel {
    type Err = IntakeError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" | "critical" => Ok(Self::Error),
            other => Err(IntakeError::InvalidConfig {
                details: format!(
                    "logging.level must be one of debug, info, warning, error; got {other:?}"
                ),
            }),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = IntakeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            quarantine_dir: PathBuf::new(),
            temp_dir: PathBuf::new(),
            state_filename: DEFAULT_STATE_FILENAME.to_string(),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DIN-CONFIG] WARNING: HOME not set, falling back to /tmp for config path"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        home_dir
            .join(".config")
            .join("dicom-intake")
            .join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used
    /// (and validation then reports the missing required directories).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| IntakeError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if path.is_some() {
            return Err(IntakeError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.resolve_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without resolving or validating it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Location of the processed-set state file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.paths.temp_dir.join(&self.paths.state_filename)
    }

    /// Directory the anonymizer writes de-identified images into.
    #[must_use]
    pub fn public_dir(&self) -> PathBuf {
        self.paths.output_dir.join("public")
    }

    /// Directory for anonymizer bookkeeping (quarantine lives here by default).
    #[must_use]
    pub fn private_dir(&self) -> PathBuf {
        self.paths.output_dir.join("private")
    }

    /// Startup step: the input directory must already exist, everything else is created.
    pub fn prepare_directories(&self) -> Result<()> {
        self.check_input_dir()?;
        for dir in [
            &self.paths.output_dir,
            &self.public_dir(),
            &self.private_dir(),
            &self.paths.quarantine_dir,
            &self.paths.temp_dir,
        ] {
            fs::create_dir_all(dir).map_err(|source| IntakeError::io(dir, source))?;
        }
        Ok(())
    }

    /// Reject a missing or non-directory input root.
    pub fn check_input_dir(&self) -> Result<()> {
        if self.paths.input_dir.is_dir() {
            Ok(())
        } else {
            Err(IntakeError::InvalidConfig {
                details: format!(
                    "input directory does not exist: {}",
                    self.paths.input_dir.display()
                ),
            })
        }
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DICOM_INTAKE_INPUT_DIR") {
            self.paths.input_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DICOM_INTAKE_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DICOM_INTAKE_QUARANTINE_DIR") {
            self.paths.quarantine_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DICOM_INTAKE_TEMP_DIR") {
            self.paths.temp_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DICOM_INTAKE_RECURSIVE_SCAN") {
            self.processing.recursive_scan = parse_env_bool("DICOM_INTAKE_RECURSIVE_SCAN", &raw)?;
        }
        if let Some(raw) = lookup("DICOM_INTAKE_REMOVE_PIXEL_PHI") {
            self.processing.remove_pixel_phi =
                parse_env_bool("DICOM_INTAKE_REMOVE_PIXEL_PHI", &raw)?;
        }
        if let Some(raw) = lookup("DICOM_INTAKE_MAX_CONCURRENT_FILES") {
            self.limits.max_concurrent_files = Some(parse_env_usize(
                "DICOM_INTAKE_MAX_CONCURRENT_FILES",
                &raw,
            )?);
        }
        if let Some(raw) = lookup("DICOM_INTAKE_LOG_LEVEL") {
            self.logging.level = raw.parse().map_err(|_| IntakeError::ConfigParse {
                context: "env",
                details: format!("DICOM_INTAKE_LOG_LEVEL={raw:?}: unknown level"),
            })?;
        }
        if let Some(raw) = lookup("DICOM_INTAKE_ANONYMIZER_COMMAND") {
            self.anonymizer.command = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Make every configured path absolute (relative to the config file's directory)
    /// and fill in derived defaults.
    fn resolve_paths(&mut self) {
        let base_dir = self
            .config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let paths = &mut self.paths;
        for slot in [
            &mut paths.input_dir,
            &mut paths.output_dir,
            &mut paths.quarantine_dir,
            &mut paths.temp_dir,
        ] {
            if !is_unset(slot) {
                *slot = expand_path(slot, &base_dir);
            }
        }

        if is_unset(&paths.quarantine_dir) && !is_unset(&paths.output_dir) {
            paths.quarantine_dir = paths.output_dir.join("private").join("quarantine");
        }
        if is_unset(&paths.temp_dir) {
            paths.temp_dir = env::temp_dir().join("dicom_intake");
        }

        if is_unset(&self.logging.jsonl_log) {
            self.logging.jsonl_log = self.paths.temp_dir.join("activity.jsonl");
        } else {
            self.logging.jsonl_log = expand_path(&self.logging.jsonl_log, &base_dir);
        }

        if let Some(script) = self.processing.script_path.take() {
            self.processing.script_path = Some(expand_path(&script, &base_dir));
        }

        // Bare program names are looked up on PATH at spawn time.
        if self.anonymizer.command.components().count() > 1 {
            self.anonymizer.command = expand_path(&self.anonymizer.command, &base_dir);
        }

        self.identity.site_id = self.identity.site_id.take().filter(|s| !s.trim().is_empty());
        self.identity.uid_root = self
            .identity
            .uid_root
            .take()
            .filter(|s| !s.trim().is_empty());
    }

    fn validate(&self) -> Result<()> {
        if is_unset(&self.paths.input_dir) || is_unset(&self.paths.output_dir) {
            return Err(IntakeError::InvalidConfig {
                details: "paths.input_dir and paths.output_dir are required".to_string(),
            });
        }

        if !self.paths.quarantine_dir.starts_with(&self.paths.output_dir) {
            return Err(IntakeError::InvalidConfig {
                details: format!(
                    "paths.quarantine_dir ({}) must live inside paths.output_dir ({})",
                    self.paths.quarantine_dir.display(),
                    self.paths.output_dir.display()
                ),
            });
        }

        let name = self.paths.state_filename.as_str();
        if name.is_empty() || Path::new(name).file_name() != Some(name.as_ref()) {
            return Err(IntakeError::InvalidConfig {
                details: format!("paths.state_filename must be a plain file name, got {name:?}"),
            });
        }

        if self.limits.max_concurrent_files == Some(0) {
            return Err(IntakeError::InvalidConfig {
                details: "limits.max_concurrent_files must be a positive integer".to_string(),
            });
        }

        Ok(())
    }
}

fn is_unset(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// `~/` expansion, then join relative paths onto `base_dir`, then normalize.
fn expand_path(value: &Path, base_dir: &Path) -> PathBuf {
    let expanded = match (value.strip_prefix("~"), env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => value.to_path_buf(),
    };
    if expanded.is_absolute() {
        resolve_absolute_path(&expanded)
    } else {
        resolve_absolute_path(&base_dir.join(expanded))
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| IntakeError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| IntakeError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
