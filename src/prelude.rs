//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dicom_intake::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, LogLevel};
pub use crate::core::errors::{IntakeError, Result};

// State
pub use crate::state::fingerprint::{FileIdentity, VersionFingerprint};
pub use crate::state::store::ProcessedStore;

// Anonymizer
pub use crate::anonymizer::command::CommandAnonymizer;
pub use crate::anonymizer::{Anonymizer, AnonymizerSettings, AnonymizerTotals, QueueDepths};

// Service
pub use crate::service::coordinator::{IntakeService, RunResult, StatusSnapshot};
