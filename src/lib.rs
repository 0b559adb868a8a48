#![forbid(unsafe_code)]

//! dicom_intake: incremental intake for a DICOM anonymization pipeline.
//!
//! Each run scans an input directory for DICOM-looking files, skips the ones
//! already anonymized at their current version, hands the rest to an
//! [`anonymizer::Anonymizer`], and records successes in a durable
//! processed-set so the next run only sees new or changed files.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dicom_intake::prelude::*;
//!
//! # fn main() -> dicom_intake::core::errors::Result<()> {
//! let config = Config::load(None)?;
//! let anonymizer = CommandAnonymizer::new(AnonymizerSettings::from_config(&config))?;
//! let service = IntakeService::new(config, anonymizer)?;
//! let result = service.run(false)?;
//! println!("{} of {} files anonymized", result.completed, result.enqueued);
//! service.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod anonymizer;
pub mod core;
pub mod logger;
pub mod scanner;
pub mod service;
pub mod state;
