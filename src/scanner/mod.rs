//! Candidate discovery: which files under the intake root look like DICOM.

pub mod candidates;
