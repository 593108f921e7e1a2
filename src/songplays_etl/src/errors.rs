//! Error taxonomy for a pipeline run.
//!
//! Every failure is fatal for the run. [`EtlError::kind`] collapses the variants
//! into the categories an operator cares about: configuration, source reads,
//! planning and sink writes.

use deltalake::arrow::error::ArrowError;
use deltalake::datafusion::error::DataFusionError;
use shared_utils::config::ConfigError;
use snafu::{Backtrace, Snafu};

use crate::models::OutputTable;
use crate::sink::SinkError;

/// The unified error type for the `songplays_etl` crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EtlError {
    /// Credentials or settings are missing or unusable.
    #[snafu(display("Configuration error: {source}"))]
    Config {
        source: ConfigError,
        backtrace: Backtrace,
    },

    /// A storage location could not be derived from a configured root.
    #[snafu(display("Invalid storage location {base} + {segment}: {source}"))]
    Location {
        base: String,
        segment: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },

    /// An object store for a configured root could not be built.
    #[snafu(display("Failed to build object store for {url}: {source}"))]
    ObjectStore {
        url: String,
        source: object_store::Error,
        backtrace: Backtrace,
    },

    /// An input dataset could not be scanned or does not match its schema.
    #[snafu(display("Failed to read {dataset} from {location}: {source}"))]
    SourceRead {
        dataset: &'static str,
        location: String,
        source: DataFusionError,
        backtrace: Backtrace,
    },

    /// No input records exist under the dataset location.
    #[snafu(display("No {dataset} records found under {location}"))]
    SourceEmpty {
        dataset: &'static str,
        location: String,
        backtrace: Backtrace,
    },

    /// A transformation could not be composed into a valid plan.
    #[snafu(display("Failed to plan {stage}: {source}"))]
    Plan {
        stage: &'static str,
        source: DataFusionError,
        backtrace: Backtrace,
    },

    /// A table could not be materialized into its destination.
    #[snafu(display("Failed to write the {table} table: {source}"))]
    SinkWrite {
        table: OutputTable,
        #[snafu(backtrace)]
        source: SinkError,
    },

    /// The run's scratch space could not be released.
    #[snafu(display("Failed to release the execution context: {source}"))]
    Shutdown {
        #[snafu(backtrace)]
        source: SinkError,
    },
}

/// Coarse failure category, used for reporting at the process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing credentials, bad settings or storage roots.
    Config,
    /// Inputs missing or inconsistent with the declared schema.
    SourceRead,
    /// A plan could not be built; points at a defect in a transform.
    Plan,
    /// A destination was unwritable or already being written.
    SinkWrite,
}

impl EtlError {
    /// Returns the failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::Location { .. } | Self::ObjectStore { .. } => {
                ErrorKind::Config
            }
            Self::SourceRead { .. } | Self::SourceEmpty { .. } => ErrorKind::SourceRead,
            Self::Plan { .. } => ErrorKind::Plan,
            Self::SinkWrite { .. } | Self::Shutdown { .. } => ErrorKind::SinkWrite,
        }
    }
}

/// Whether an engine error was raised while decoding JSON input.
///
/// Scans are lazy, so a malformed line deep inside an input file only surfaces
/// once a table is materialized. Such errors belong to the source, not the sink.
pub fn is_decode_error(err: &DataFusionError) -> bool {
    match err.find_root() {
        DataFusionError::ArrowError(ArrowError::JsonError(_), _) => true,
        DataFusionError::External(inner) => {
            matches!(inner.downcast_ref::<ArrowError>(), Some(ArrowError::JsonError(_)))
        }
        _ => false,
    }
}
