//! Lazy scans of the raw JSON-lines datasets.

use deltalake::datafusion::prelude::{DataFrame, NdJsonReadOptions};
use snafu::ResultExt;
use tracing::debug;

use crate::context::EtlContext;
use crate::errors::{EtlError, PlanSnafu, SourceEmptySnafu, SourceReadSnafu};
use crate::models::Dataset;

/// Scan every `.json` object below the dataset prefix with the declared
/// schema, renamed to canonical column names. Nothing is read yet.
pub async fn scan(ctx: &EtlContext, dataset: Dataset) -> Result<DataFrame, EtlError> {
    let location = ctx.dataset_location(dataset)?;
    let schema = dataset.raw_schema();
    let options = NdJsonReadOptions::default()
        .schema(&schema)
        .file_extension(".json");

    let raw = ctx
        .session()
        .read_json(location.as_str(), options)
        .await
        .context(SourceReadSnafu {
            dataset: dataset.label(),
            location: location.as_str(),
        })?;
    raw.select(dataset.canonical_projection())
        .context(PlanSnafu { stage: dataset.label() })
}

/// Scan a dataset and check that its first record can be decoded.
///
/// Errors:
/// - `SourceEmpty` when no record exists under the prefix
/// - `SourceRead` when listing fails or the first records violate the schema
pub async fn read(ctx: &EtlContext, dataset: Dataset) -> Result<DataFrame, EtlError> {
    let frame = scan(ctx, dataset).await?;
    let location = ctx.dataset_location(dataset)?;

    let first = frame
        .clone()
        .limit(0, Some(1))
        .context(PlanSnafu { stage: dataset.label() })?
        .collect()
        .await
        .context(SourceReadSnafu {
            dataset: dataset.label(),
            location: location.as_str(),
        })?;
    if first.iter().all(|batch| batch.num_rows() == 0) {
        return SourceEmptySnafu {
            dataset: dataset.label(),
            location: location.as_str(),
        }
        .fail();
    }

    debug!(dataset = dataset.label(), location = %location, "Source is readable");
    Ok(frame)
}

/// SongRecords below `{input_root}/song_data/`.
pub async fn read_song_records(ctx: &EtlContext) -> Result<DataFrame, EtlError> {
    read(ctx, Dataset::SongData).await
}

/// LogEvents below `{input_root}/log_data/`.
pub async fn read_log_events(ctx: &EtlContext) -> Result<DataFrame, EtlError> {
    read(ctx, Dataset::LogData).await
}
