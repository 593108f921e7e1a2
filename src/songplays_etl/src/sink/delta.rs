use std::collections::HashMap;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use deltalake::arrow::array::{Array, Int64Array};
use deltalake::arrow::record_batch::RecordBatch;
use deltalake::{DeltaOps, DeltaTable};
use deltalake::protocol::SaveMode;
use secrecy::ExposeSecret;
use snafu::ResultExt;
use tokio::fs;
use tracing::debug;
use url::Url;

use super::{DeltaSnafu, IoSnafu, SinkError, SinkReport, TableSink};
use crate::config::{Credentials, SinkFormat};
use crate::storage;
use crate::transform::TablePlan;

static S3_HANDLERS: Once = Once::new();

/// Delta Lake tables, overwritten through the transaction log.
///
/// A failed write never commits, so readers keep seeing the previous version.
/// The plan is streamed into the writer rather than collected up front.
pub struct DeltaSink {
    storage_options: HashMap<String, String>,
}

impl DeltaSink {
    pub fn new(credentials: &Credentials) -> Self {
        let storage_options = HashMap::from([
            (
                "AWS_ACCESS_KEY_ID".to_string(),
                credentials.access_key_id.expose_secret().to_string(),
            ),
            (
                "AWS_SECRET_ACCESS_KEY".to_string(),
                credentials.secret_access_key.expose_secret().to_string(),
            ),
            ("AWS_REGION".to_string(), credentials.region.clone()),
            // single writer per table is enforced by the run itself
            ("AWS_S3_ALLOW_UNSAFE_RENAME".to_string(), "true".to_string()),
        ]);
        Self { storage_options }
    }
}

/// Rows in the files of the current version, from their commit statistics.
fn committed_rows(table: &DeltaTable) -> Result<u64, deltalake::DeltaTableError> {
    let files = table.snapshot()?.add_actions_table(true)?;
    Ok(record_counts(&files))
}

fn record_counts(files: &RecordBatch) -> u64 {
    files
        .column_by_name("num_records")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .map(|counts| counts.iter().flatten().map(|n| n.max(0) as u64).sum())
        .unwrap_or(0)
}

#[async_trait]
impl TableSink for DeltaSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Delta
    }

    async fn write(&self, plan: TablePlan, destination: &Url) -> Result<SinkReport, SinkError> {
        let table = plan.table;
        let partition_columns = plan.partition_columns();
        let (state, logical_plan) = plan.frame.into_parts();

        if let Some(dir) = storage::local_path(destination) {
            fs::create_dir_all(&dir)
                .await
                .context(IoSnafu { path: &dir })?;
        } else {
            S3_HANDLERS.call_once(|| deltalake::aws::register_handlers(None));
        }

        let ops = DeltaOps::try_from_uri_with_storage_options(
            destination.as_str(),
            self.storage_options.clone(),
        )
        .await
        .context(DeltaSnafu { table })?;
        // an empty plan still commits, replacing the previous version
        let committed = ops
            .write(Vec::<RecordBatch>::new())
            .with_input_execution_plan(Arc::new(logical_plan))
            .with_input_session_state(state)
            .with_save_mode(SaveMode::Overwrite)
            .with_partition_columns(partition_columns.clone())
            .await
            .context(DeltaSnafu { table })?;
        let rows = committed_rows(&committed).context(DeltaSnafu { table })?;
        debug!(table = %table, version = committed.version(), rows, "Committed Delta version");

        Ok(SinkReport {
            table,
            location: destination.to_string(),
            rows,
            format: SinkFormat::Delta,
            partition_columns,
        })
    }

    async fn cleanup(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use deltalake::arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    #[test]
    fn record_counts_skip_missing_statistics() {
        let schema = Arc::new(Schema::new(vec![Field::new("num_records", DataType::Int64, true)]));
        let files = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![Some(3), None, Some(4)]))],
        )
        .unwrap();
        assert_eq!(record_counts(&files), 7);

        let no_stats = RecordBatch::new_empty(Arc::new(Schema::empty()));
        assert_eq!(record_counts(&no_stats), 0);
    }

    #[test]
    fn storage_options_carry_credentials() {
        let credentials = Credentials::new("AKIDEXAMPLE", "wJalrXUtnFEMI", "eu-west-1");
        let sink = DeltaSink::new(&credentials);
        assert_eq!(sink.storage_options["AWS_ACCESS_KEY_ID"], "AKIDEXAMPLE");
        assert_eq!(
            sink.storage_options["AWS_SECRET_ACCESS_KEY"],
            credentials.secret_access_key.expose_secret()
        );
        assert_eq!(sink.storage_options["AWS_REGION"], "eu-west-1");
        assert_eq!(sink.format(), SinkFormat::Delta);
    }
}
