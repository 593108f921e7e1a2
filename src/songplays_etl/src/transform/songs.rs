//! Songs and Artists, both derived from the song catalog.

use deltalake::datafusion::prelude::{DataFrame, Expr, coalesce, col, lit};
use snafu::ResultExt;

use crate::errors::{EtlError, PlanSnafu};
use crate::models::OutputTable;
use crate::transform::TablePlan;

/// Year recorded for songs whose release year is missing.
///
/// The song catalog already uses `0` for an unknown year; a missing key is
/// folded into the same value so the `year` partition directory and the
/// stored column always agree.
pub const UNKNOWN_YEAR: i32 = 0;

/// One row per distinct (song_id, title, artist_id, duration, year).
pub fn songs_table(songs: DataFrame) -> Result<TablePlan, EtlError> {
    let columns: Vec<Expr> = OutputTable::Songs
        .columns()
        .iter()
        .map(|&name| match name {
            "year" => coalesce(vec![col("year"), lit(UNKNOWN_YEAR)]).alias("year"),
            other => col(other),
        })
        .collect();
    let frame = songs
        .select(columns)
        .and_then(DataFrame::distinct)
        .context(PlanSnafu { stage: "songs" })?;
    TablePlan::new(OutputTable::Songs, frame).context(PlanSnafu { stage: "songs" })
}

/// One row per distinct artist description.
pub fn artists_table(songs: DataFrame) -> Result<TablePlan, EtlError> {
    let frame = songs
        .select(vec![
            col("artist_id"),
            col("artist_name").alias("name"),
            col("artist_location").alias("location"),
            col("artist_latitude").alias("latitude"),
            col("artist_longitude").alias("longitude"),
        ])
        .and_then(DataFrame::distinct)
        .context(PlanSnafu { stage: "artists" })?;
    TablePlan::new(OutputTable::Artists, frame).context(PlanSnafu { stage: "artists" })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use deltalake::arrow::array::{
        Array, ArrayRef, Float64Array, Int32Array, RecordBatch, StringArray,
    };
    use deltalake::datafusion::prelude::SessionContext;

    use super::*;
    use crate::models::Dataset;

    fn catalog(ctx: &SessionContext) -> DataFrame {
        let text = |v: Vec<Option<&str>>| Arc::new(StringArray::from(v)) as ArrayRef;
        let float = |v: Vec<Option<f64>>| Arc::new(Float64Array::from(v)) as ArrayRef;
        let batch = RecordBatch::try_new(
            Dataset::SongData.canonical_schema(),
            vec![
                text(vec![Some("S1"), Some("S1"), Some("S2")]),
                text(vec![Some("Nobody"), Some("Nobody"), Some("Valentine")]),
                text(vec![Some("A1"), Some("A1"), Some("A1")]),
                text(vec![Some("Elliott Smith"), Some("Elliott Smith"), Some("Elliott Smith")]),
                text(vec![Some("Omaha"), Some("Omaha"), Some("Omaha")]),
                float(vec![Some(41.2), Some(41.2), Some(41.2)]),
                float(vec![None, None, None]),
                float(vec![Some(210.0), Some(210.0), Some(185.5)]),
                Arc::new(Int32Array::from(vec![Some(1998), Some(1998), Some(2000)])),
            ],
        )
        .unwrap();
        ctx.read_batch(batch).unwrap()
    }

    #[tokio::test]
    async fn songs_are_deduplicated_on_the_full_row() {
        let ctx = SessionContext::new();
        let plan = songs_table(catalog(&ctx)).unwrap();

        assert_eq!(plan.column_names(), OutputTable::Songs.columns());
        assert_eq!(plan.partition_columns(), vec!["year", "artist_id"]);
        assert_eq!(plan.frame.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_years_fall_back_to_unknown() {
        let ctx = SessionContext::new();
        let text = |v: &str| Arc::new(StringArray::from(vec![v])) as ArrayRef;
        let batch = RecordBatch::try_new(
            Dataset::SongData.canonical_schema(),
            vec![
                text("S9"),
                text("Untitled"),
                text("A9"),
                text("Unknown Artist"),
                text(""),
                Arc::new(Float64Array::from(vec![None::<f64>])),
                Arc::new(Float64Array::from(vec![None::<f64>])),
                Arc::new(Float64Array::from(vec![Some(99.0)])),
                Arc::new(Int32Array::from(vec![None::<i32>])),
            ],
        )
        .unwrap();

        let plan = songs_table(ctx.read_batch(batch).unwrap()).unwrap();
        let batches = plan.frame.collect().await.unwrap();
        let years = batches[0]
            .column_by_name("year")
            .unwrap()
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(years.null_count(), 0);
        assert_eq!(years.value(0), UNKNOWN_YEAR);
    }

    #[tokio::test]
    async fn artists_are_renamed_and_deduplicated() {
        let ctx = SessionContext::new();
        let plan = artists_table(catalog(&ctx)).unwrap();

        assert_eq!(
            plan.column_names(),
            vec!["artist_id", "name", "location", "latitude", "longitude"]
        );
        assert!(plan.partition_columns().is_empty());
        assert_eq!(plan.frame.count().await.unwrap(), 1);
    }

    #[test]
    fn plans_are_inspectable_without_execution() {
        let ctx = SessionContext::new();
        let empty = ctx
            .read_batch(RecordBatch::new_empty(Dataset::SongData.canonical_schema()))
            .unwrap();
        let plan = songs_table(empty).unwrap();
        let shown = plan.display_plan();
        assert!(shown.contains("Distinct") || shown.contains("Aggregate"), "{shown}");
    }
}
