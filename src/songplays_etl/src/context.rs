//! The execution context owned by one pipeline run.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use deltalake::datafusion::prelude::{SessionConfig, SessionContext};
use snafu::ResultExt;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::config::{Settings, SinkFormat};
use crate::errors::{EtlError, ShutdownSnafu, SinkWriteSnafu};
use crate::models::{Dataset, OutputTable};
use crate::sink::{ConcurrentWriterSnafu, DeltaSink, ParquetSink, TableSink};
use crate::storage;

/// Name of the directory below the output root holding staged writes.
pub const STAGING_DIR: &str = "_staging/";

/// Table locations currently being written by any context in this process.
static WRITERS: LazyLock<Mutex<HashSet<Url>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Explicitly constructed engine session plus everything a run needs to
/// read inputs and write tables.
///
/// Create one per run with [`EtlContext::new`], pass it by reference to the
/// transforms and release it with [`EtlContext::shutdown`].
pub struct EtlContext {
    session: SessionContext,
    settings: Settings,
    sink: Arc<dyn TableSink>,
    run_id: Uuid,
}

impl EtlContext {
    pub fn new(settings: Settings) -> Result<Self, EtlError> {
        // song_data is nested three levels below its prefix
        let config = SessionConfig::new()
            .with_information_schema(true)
            .set_bool("datafusion.execution.listing_table_ignore_subdirectory", false);
        let session = SessionContext::new_with_config(config);
        storage::register_stores(&session, &settings)?;

        let run_id = Uuid::new_v4();
        let sink: Arc<dyn TableSink> = match settings.sink {
            SinkFormat::Parquet => {
                let staging = storage::child(&settings.output_root, STAGING_DIR)?;
                let staging = storage::child(&staging, &format!("{run_id}/"))?;
                Arc::new(ParquetSink::new(session.runtime_env(), staging))
            }
            SinkFormat::Delta => Arc::new(DeltaSink::new(&settings.credentials)),
        };

        info!(
            run_id = %run_id,
            input_root = %settings.input_root,
            output_root = %settings.output_root,
            join_strategy = %settings.join_strategy,
            sink = %settings.sink,
            "Execution context ready"
        );

        Ok(Self {
            session,
            settings,
            sink,
            run_id,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sink(&self) -> &dyn TableSink {
        self.sink.as_ref()
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Directory URL of an input dataset.
    pub fn dataset_location(&self, dataset: Dataset) -> Result<Url, EtlError> {
        storage::child(&self.settings.input_root, dataset.prefix())
    }

    /// Directory URL an output table is written to.
    pub fn table_location(&self, table: OutputTable) -> Result<Url, EtlError> {
        storage::child(&self.settings.output_root, &format!("{}/", table.dir_name()))
    }

    /// Claim exclusive write access to the location of `table` for the
    /// lifetime of the guard.
    ///
    /// Claims are keyed by destination URL and shared by every context in the
    /// process, so two runs over the same output root cannot interleave.
    pub fn claim_writer(&self, table: OutputTable) -> Result<WriterGuard, EtlError> {
        let location = self.table_location(table)?;
        let mut writers = WRITERS.lock().unwrap_or_else(PoisonError::into_inner);
        if !writers.insert(location.clone()) {
            return ConcurrentWriterSnafu {
                table,
                location: location.as_str(),
            }
            .fail()
            .context(SinkWriteSnafu { table });
        }
        debug!(table = %table, location = %location, "Writer claimed");
        Ok(WriterGuard { location })
    }

    /// Dispose of the session and remove the run's scratch space.
    pub async fn shutdown(self) -> Result<(), EtlError> {
        self.sink.cleanup().await.context(ShutdownSnafu)?;
        debug!(run_id = %self.run_id, "Execution context released");
        drop(self.session);
        Ok(())
    }
}

/// Exclusive claim on a table location; released on drop.
#[derive(Debug)]
pub struct WriterGuard {
    location: Url,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut writers = WRITERS.lock().unwrap_or_else(PoisonError::into_inner);
        writers.remove(&self.location);
    }
}
