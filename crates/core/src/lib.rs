//! Shared primitives for the job-processing subsystem.
//!
//! This crate has zero internal dependencies so it can be used by the
//! persistence layer, the event broker, the worker harness, and the API.

pub mod error;
pub mod job_events;
pub mod text;
pub mod types;
