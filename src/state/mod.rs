//! Incremental processing state: version fingerprints and the durable processed-set.

pub mod fingerprint;
pub mod store;
