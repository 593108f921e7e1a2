//! Table sinks: materialize a [`TablePlan`] into its destination.
//!
//! A sink never exposes a half-written table. [`ParquetSink`] stages the
//! files under the run's scratch prefix and promotes them once the write has
//! completed; [`DeltaSink`] relies on the Delta transaction log for an atomic
//! overwrite.

mod delta;
mod parquet;

use std::path::PathBuf;

use async_trait::async_trait;
use deltalake::DeltaTableError;
use deltalake::datafusion::error::DataFusionError;
use serde::Serialize;
use snafu::{Backtrace, Snafu};
use url::Url;

use crate::config::SinkFormat;
use crate::models::OutputTable;
use crate::transform::TablePlan;

pub use delta::DeltaSink;
pub use parquet::ParquetSink;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// The engine failed while executing the plan or writing its files.
    #[snafu(display("Engine failed while writing {table}: {source}"))]
    Engine {
        table: OutputTable,
        source: DataFusionError,
        backtrace: Backtrace,
    },

    /// Listing, moving or deleting objects failed.
    #[snafu(display("Object store operation on {location} failed: {source}"))]
    ObjectStore {
        location: String,
        source: object_store::Error,
        backtrace: Backtrace,
    },

    /// No object store is registered for a location.
    #[snafu(display("No object store for {location}: {source}"))]
    StoreLookup {
        location: String,
        source: DataFusionError,
        backtrace: Backtrace,
    },

    /// The Delta log rejected the write.
    #[snafu(display("Delta write of {table} failed: {source}"))]
    Delta {
        table: OutputTable,
        source: DeltaTableError,
        backtrace: Backtrace,
    },

    /// A local filesystem operation failed.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Another writer holds the table location.
    #[snafu(display("The {table} table at {location} is already being written"))]
    ConcurrentWriter {
        table: OutputTable,
        location: String,
        backtrace: Backtrace,
    },

    /// The promotion task panicked or was aborted.
    #[snafu(display("Promotion of {table} did not complete: {source}"))]
    Promotion {
        table: OutputTable,
        source: tokio::task::JoinError,
        backtrace: Backtrace,
    },

    /// A staging or destination URL could not be derived.
    #[snafu(display("Invalid sink location below {base}: {source}"))]
    Location {
        base: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
}

/// Outcome of one table write.
#[derive(Debug, Clone, Serialize)]
pub struct SinkReport {
    pub table: OutputTable,
    pub location: String,
    pub rows: u64,
    pub format: SinkFormat,
    pub partition_columns: Vec<String>,
}

#[async_trait]
pub trait TableSink: Send + Sync {
    /// Format of the tables this sink produces.
    fn format(&self) -> SinkFormat;

    /// Materialize `plan` and replace whatever `destination` held before.
    ///
    /// On error the previous content of `destination` is still readable.
    async fn write(&self, plan: TablePlan, destination: &Url) -> Result<SinkReport, SinkError>;

    /// Release scratch space held by the sink.
    async fn cleanup(&self) -> Result<(), SinkError>;
}
