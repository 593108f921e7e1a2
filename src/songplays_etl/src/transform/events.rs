//! Event-log derived plans: the NextSong filter, Users and Time.

use deltalake::arrow::datatypes::{DataType, TimeUnit};
use deltalake::datafusion::functions_window::expr_fn::row_number;
use deltalake::datafusion::logical_expr::ExprFunctionExt;
use deltalake::datafusion::prelude::{DataFrame, Expr, btrim, cast, col, lit, upper};
use snafu::ResultExt;

use crate::errors::{EtlError, PlanSnafu};
use crate::models::OutputTable;
use crate::transform::{TablePlan, calendar_part};

/// Page value (case-insensitive) of a song play.
pub const NEXT_SONG_PAGE: &str = "NEXTSONG";

const RECENCY_RANK: &str = "recency_rank";

/// Keep only song plays.
pub fn next_song_events(events: DataFrame) -> Result<DataFrame, EtlError> {
    events
        .filter(upper(col("page")).eq(lit(NEXT_SONG_PAGE)))
        .context(PlanSnafu { stage: "next_song_events" })
}

/// UTC instant of an epoch-milliseconds column.
///
/// Millisecond precision is kept; the value is widened to microseconds, the
/// unit columnar table formats store.
pub fn start_time_expr(ts: Expr) -> Expr {
    cast(
        cast(ts, DataType::Timestamp(TimeUnit::Millisecond, None)),
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
    )
}

/// Add `start_time` derived from `ts`.
pub fn with_start_time(events: DataFrame) -> Result<DataFrame, EtlError> {
    events
        .with_column("start_time", start_time_expr(col("ts")))
        .context(PlanSnafu { stage: "start_time" })
}

/// One row per user, taken from their most recent song play.
///
/// Ties on `ts` are broken by `level` (paid before free) and then by name and
/// gender so the pick is deterministic. Events without a user id are ignored.
pub fn users_table(next_songs: DataFrame) -> Result<TablePlan, EtlError> {
    let stage = PlanSnafu { stage: "users" };
    let rank = row_number()
        .partition_by(vec![col("user_id")])
        .order_by(vec![
            col("ts").sort(false, false),
            col("level").sort(false, false),
            col("first_name").sort(true, false),
            col("last_name").sort(true, false),
            col("gender").sort(true, false),
        ])
        .build()
        .context(stage)?;

    let frame = next_songs
        .filter(
            col("user_id")
                .is_not_null()
                .and(btrim(vec![col("user_id")]).not_eq(lit(""))),
        )
        .and_then(|f| f.with_column(RECENCY_RANK, rank))
        .and_then(|f| f.filter(col(RECENCY_RANK).eq(lit(1u64))))
        .context(stage)?;
    TablePlan::new(OutputTable::Users, frame).context(stage)
}

/// Calendar breakdown of every distinct `start_time`.
///
/// `week` is the ISO-8601 week; `weekday` counts from 0 = Sunday.
pub fn time_table(plays: DataFrame) -> Result<TablePlan, EtlError> {
    let stage = PlanSnafu { stage: "time" };
    let frame = plays
        .select(vec![
            col("start_time"),
            calendar_part("hour", col("start_time")).alias("hour"),
            calendar_part("day", col("start_time")).alias("day"),
            calendar_part("week", col("start_time")).alias("week"),
            calendar_part("month", col("start_time")).alias("month"),
            calendar_part("year", col("start_time")).alias("year"),
            calendar_part("dow", col("start_time")).alias("weekday"),
        ])
        .and_then(DataFrame::distinct)
        .context(stage)?;
    TablePlan::new(OutputTable::Time, frame).context(stage)
}
