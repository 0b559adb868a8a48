#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use dicom_intake::anonymizer::{Anonymizer, AnonymizerTotals, QueueDepths};
use dicom_intake::core::config::{Config, LogLevel};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dicom-intake") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "dicom-intake.exe"
    } else {
        "dicom-intake"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dicom-intake binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_with_env(case_name, args, &[])
}

/// Run the binary with extra environment variables, keeping a per-case log.
pub fn run_cli_case_with_env(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("dicom-intake-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command.args(args).env("RUST_BACKTRACE", "1");
    for (key, value) in env {
        command.env(key, value);
    }
    let output = command.output().expect("execute dicom-intake command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("env={env:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Config rooted in a scratch directory: `in/`, `out/`, `tmp/`.
pub fn scratch_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.input_dir = root.join("in");
    config.paths.output_dir = root.join("out");
    config.paths.quarantine_dir = root.join("out").join("private").join("quarantine");
    config.paths.temp_dir = root.join("tmp");
    config.logging.level = LogLevel::Debug;
    config.logging.jsonl_log = root.join("tmp").join("activity.jsonl");
    fs::create_dir_all(&config.paths.input_dir).expect("create input dir");
    config
}

/// Write a small DICOM-looking file relative to the input root.
pub fn write_input(config: &Config, relative: &str) -> PathBuf {
    let path = config.paths.input_dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create input subdir");
    }
    fs::write(&path, b"DICM").expect("write input file");
    path
}

/// Anonymizer double: records calls, copies successes into `<output>/public`,
/// fails any file whose name is in the shared failing set.
#[derive(Clone)]
pub struct RecordingAnonymizer {
    public_dir: PathBuf,
    quarantine_dir: PathBuf,
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
    pub failing: Arc<Mutex<HashSet<String>>>,
    instances: u64,
}

impl RecordingAnonymizer {
    pub fn new(config: &Config) -> Self {
        Self {
            public_dir: config.public_dir(),
            quarantine_dir: config.paths.quarantine_dir.clone(),
            calls: Arc::default(),
            failing: Arc::default(),
            instances: 0,
        }
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn heal(&self, name: &str) {
        self.failing.lock().remove(name);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Anonymizer for RecordingAnonymizer {
    fn anonymize_file(&mut self, path: &Path) -> Result<(), String> {
        self.calls.lock().push(path.to_path_buf());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.failing.lock().contains(&name) {
            return Err(format!("{name}: missing transfer syntax"));
        }
        fs::copy(path, self.public_dir.join(&name)).map_err(|e| e.to_string())?;
        self.instances += 1;
        Ok(())
    }

    fn queued(&self) -> QueueDepths {
        QueueDepths::default()
    }

    fn totals(&self) -> AnonymizerTotals {
        AnonymizerTotals {
            instances: self.instances,
            ..AnonymizerTotals::default()
        }
    }

    fn quarantine_path(&self) -> PathBuf {
        self.quarantine_dir.clone()
    }

    fn stop(&mut self) {}
}
