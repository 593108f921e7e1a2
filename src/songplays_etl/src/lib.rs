//! Songplay data-lake ETL.
//!
//! Reads song-catalog and event-log JSON lines from object storage, reshapes
//! them into five analytical tables (songs, artists, users, time, songplays)
//! and writes them back as partitioned columnar tables.
//!
//! The crate is organised as a describe-then-execute pipeline:
//! - [`source`] lazily scans the raw datasets,
//! - [`transform`] composes one [`transform::TablePlan`] per output table,
//! - [`sink`] materializes a plan into its destination (staged Parquet or Delta),
//! - [`pipeline`] wires the two independent branches together,
//! - [`context::EtlContext`] owns the engine session for the duration of a run.

pub mod config;
pub mod context;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

pub use config::{JoinStrategy, Settings, SinkFormat};
pub use context::EtlContext;
pub use errors::{ErrorKind, EtlError};
