//! Small helpers shared by the workspace crates: the configuration error type
//! and environment variable lookups.

pub mod config;
pub mod env;
