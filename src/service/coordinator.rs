//! Incremental run coordinator: scan, skip what is unchanged, anonymize the rest.
//!
//! One [`IntakeService`] owns the processed-set, the anonymizer handle and the
//! activity log for its whole lifetime. Every public operation takes the
//! invocation lock first, so overlapping `run`/`status` calls on the same
//! instance execute one after another.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::anonymizer::{Anonymizer, AnonymizerTotals, QueueDepths};
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::logger::jsonl::{
    EventType, JsonlConfig, JsonlWriter, LogEntry, RunCountsRecord, Severity,
};
use crate::scanner::candidates;
use crate::state::store::ProcessedStore;

/// Summary of one invocation.
///
/// `files_seen` counts candidates after the batch cap; every enqueued file
/// ends up in exactly one of `completed` or `errors`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub files_seen: usize,
    pub enqueued: usize,
    pub completed: usize,
    pub errors: usize,
    /// Files in the quarantine directory when the run finished.
    pub quarantined: usize,
    /// Wall clock for the whole run, rounded to two decimals.
    pub duration_ms: f64,
}

impl RunResult {
    /// True when no enqueued file failed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.errors == 0
    }

    fn counts(&self) -> RunCountsRecord {
        RunCountsRecord {
            files_seen: self.files_seen,
            enqueued: self.enqueued,
            completed: self.completed,
            errors: self.errors,
            quarantined: self.quarantined,
        }
    }
}

/// Read-only view of the service. Counts are taken fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub queue: QueueDepths,
    pub totals: AnonymizerTotals,
    /// Candidates currently under the input root.
    pub input_files: usize,
    /// Files under `<output>/public`.
    pub output_files: usize,
    pub quarantine_files: usize,
}

struct RunState<A> {
    store: ProcessedStore,
    anonymizer: A,
    log: JsonlWriter,
}

/// Long-lived intake service around an injected anonymizer.
pub struct IntakeService<A: Anonymizer> {
    config: Config,
    state: Mutex<RunState<A>>,
    started: Instant,
}

impl<A: Anonymizer> IntakeService<A> {
    /// Prepare directories, open the activity log and restore the processed-set.
    pub fn new(config: Config, anonymizer: A) -> Result<Self> {
        // 1. Directories: input must exist, the rest is created.
        config.prepare_directories()?;

        // 2. Activity log.
        let mut log = open_activity_log(&config);

        // 3. Processed-set. A bad state file costs a full re-run, nothing more.
        let state_file = config.state_file();
        let (store, load_err) = ProcessedStore::restore(state_file.clone());
        if let Some(err) = load_err {
            eprintln!("[DIN-STATE] WARNING: {err}; starting with an empty processed-set");
            log.write_entry(
                &LogEntry::new(EventType::StateRecovered, Severity::Warning)
                    .with_path(&state_file)
                    .with_error(None, err.to_string()),
            );
        }

        // 4. Announce.
        log.write_entry(&LogEntry {
            config_hash: Some(config.stable_hash().unwrap_or_default()),
            details: Some(format!(
                "version={} processed={} input={}",
                env!("CARGO_PKG_VERSION"),
                store.len(),
                config.paths.input_dir.display()
            )),
            ..LogEntry::new(EventType::ServiceStart, Severity::Info)
        });

        Ok(Self {
            config,
            state: Mutex::new(RunState {
                store,
                anonymizer,
                log,
            }),
            started: Instant::now(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of files currently recorded as processed.
    pub fn processed_count(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Process every new or changed candidate under the input root.
    ///
    /// `force_rescan` clears the processed-set first, so every candidate is
    /// enqueued again. Per-file failures are counted, never returned; only a
    /// failed state save makes the run itself fail.
    pub fn run(&self, force_rescan: bool) -> Result<RunResult> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let started = Instant::now();

        state.log.try_recover();
        state.log.write_entry(&LogEntry {
            force_rescan: Some(force_rescan),
            ..LogEntry::new(EventType::RunStart, Severity::Info)
        });

        if force_rescan {
            state.store.reset();
        }

        let limit = self.config.limits.max_concurrent_files.unwrap_or(usize::MAX);
        let mut result = RunResult {
            files_seen: 0,
            enqueued: 0,
            completed: 0,
            errors: 0,
            quarantined: 0,
            duration_ms: 0.0,
        };

        // The batch is fixed before anything is anonymized; files written
        // under the input root during the run wait for the next one.
        let batch: Vec<PathBuf> = candidates::scan(
            &self.config.paths.input_dir,
            self.config.processing.recursive_scan,
        )
        .take(limit)
        .collect();
        result.files_seen = batch.len();

        for path in batch {
            if !force_rescan && state.store.is_processed(&path) {
                continue;
            }
            result.enqueued += 1;
            match state.anonymizer.anonymize_file(&path) {
                Ok(()) => {
                    result.completed += 1;
                    state.store.mark_processed(&path);
                    state.log.write_entry(
                        &LogEntry::new(EventType::FileAnonymized, Severity::Debug).with_path(&path),
                    );
                }
                Err(message) => {
                    result.errors += 1;
                    state.log.write_entry(
                        &LogEntry::new(EventType::FileFailed, Severity::Warning)
                            .with_path(&path)
                            .with_error(None, message),
                    );
                }
            }
        }

        persist(state)?;

        result.duration_ms = round_ms(started.elapsed().as_secs_f64() * 1000.0);
        result.quarantined = candidates::count_files(&state.anonymizer.quarantine_path());

        state.log.write_entry(&LogEntry {
            counts: Some(result.counts()),
            duration_ms: Some(result.duration_ms),
            ok: Some(result.is_clean()),
            ..LogEntry::new(EventType::RunComplete, Severity::Info)
        });
        state.log.flush();
        Ok(result)
    }

    /// Queue depths, lifetime totals and fresh file counts.
    pub fn status(&self) -> Result<StatusSnapshot> {
        let state = self.state.lock();
        Ok(StatusSnapshot {
            queue: state.anonymizer.queued(),
            totals: state.anonymizer.totals(),
            input_files: candidates::count(
                &self.config.paths.input_dir,
                self.config.processing.recursive_scan,
            ),
            output_files: candidates::count_files(&self.config.public_dir()),
            quarantine_files: candidates::count_files(&state.anonymizer.quarantine_path()),
        })
    }

    /// Stop the anonymizer and save the processed-set.
    pub fn shutdown(self) -> Result<()> {
        let uptime_secs = self.started.elapsed().as_secs();
        let mut state = self.state.into_inner();

        state.anonymizer.stop();
        let saved = persist(&mut state);

        state.log.write_entry(
            &LogEntry::new(EventType::ServiceStop, Severity::Info)
                .with_details(format!("uptime_secs={uptime_secs}")),
        );
        state.log.fsync();
        saved
    }
}

/// Save the processed-set, logging either outcome.
fn persist<A>(state: &mut RunState<A>) -> Result<()> {
    if !state.store.is_dirty() {
        return Ok(());
    }
    match state.store.save() {
        Ok(()) => {
            state.log.write_entry(&LogEntry {
                details: Some(format!("entries={}", state.store.len())),
                ..LogEntry::new(EventType::StateSaved, Severity::Debug).with_path(state.store.path())
            });
            Ok(())
        }
        Err(err) => {
            state.log.write_entry(
                &LogEntry::new(EventType::Error, Severity::Critical)
                    .with_path(state.store.path())
                    .with_error(Some(err.code()), err.to_string()),
            );
            Err(err)
        }
    }
}

fn open_activity_log(config: &Config) -> JsonlWriter {
    let path: &Path = &config.logging.jsonl_log;
    if path.as_os_str().is_empty() {
        return JsonlWriter::discard();
    }
    JsonlWriter::open(JsonlConfig {
        fallback_path: None,
        ..JsonlConfig::at(path, Severity::from(config.logging.level))
    })
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
