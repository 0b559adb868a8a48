//! The long-lived intake service and its per-invocation run logic.

pub mod coordinator;
