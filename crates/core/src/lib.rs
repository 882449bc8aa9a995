//! Domain logic shared by every cronhost crate.
//!
//! This crate has zero internal dependencies so it can be used by the
//! persistence layer, the engine, and any future CLI tooling alike.

pub mod artifact;
pub mod diagnostics;
pub mod envvars;
pub mod output;
pub mod packages;
pub mod retry;
pub mod schedule;
pub mod status;
pub mod types;
