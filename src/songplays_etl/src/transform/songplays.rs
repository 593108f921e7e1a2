//! Songplays: NextSong events joined to the song catalog.
//!
//! Log events carry the artist name and song title but no ids, so the join
//! matches on names. [`JoinStrategy`] decides how strictly. Events without a
//! matching song are dropped (inner join) and counted by [`unmatched_events`].

use deltalake::arrow::datatypes::DataType;
use deltalake::datafusion::common::JoinType;
use deltalake::datafusion::functions_window::expr_fn::row_number;
use deltalake::datafusion::logical_expr::ExprFunctionExt;
use deltalake::datafusion::prelude::{DataFrame, Expr, btrim, cast, col, lower};
use serde::Serialize;
use snafu::ResultExt;

use crate::config::JoinStrategy;
use crate::errors::{EtlError, PlanSnafu};
use crate::models::OutputTable;
use crate::transform::{TablePlan, calendar_part};

/// Columns of a songplay row before the surrogate key is assigned.
const PLAY_COLUMNS: [&str; 10] = [
    "start_time",
    "user_id",
    "level",
    "song_id",
    "artist_id",
    "session_id",
    "location",
    "user_agent",
    "year",
    "month",
];

/// How many NextSong events found no song.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JoinStats {
    pub next_song_events: u64,
    pub unmatched_events: u64,
}

impl JoinStats {
    pub fn matched_events(&self) -> u64 {
        self.next_song_events.saturating_sub(self.unmatched_events)
    }

    /// Fraction of NextSong events dropped by the join, 0.0 when there are none.
    pub fn drop_rate(&self) -> f64 {
        if self.next_song_events == 0 {
            0.0
        } else {
            self.unmatched_events as f64 / self.next_song_events as f64
        }
    }
}

fn folded(name: Expr) -> Expr {
    lower(btrim(vec![name]))
}

/// Join predicate between an event row and a song row.
pub fn join_condition(strategy: JoinStrategy) -> Expr {
    match strategy {
        JoinStrategy::Exact => col("artist").eq(col("artist_name")),
        JoinStrategy::Normalized => folded(col("artist")).eq(folded(col("artist_name"))),
        JoinStrategy::NormalizedWithTitle => folded(col("artist"))
            .eq(folded(col("artist_name")))
            .and(folded(col("song")).eq(folded(col("title")))),
    }
}

// Only the columns the join needs, so no name on the song side shadows an
// event column (both carry a `location`).
fn song_keys(songs: DataFrame) -> Result<DataFrame, EtlError> {
    songs
        .select_columns(&["song_id", "artist_id", "artist_name", "title"])
        .context(PlanSnafu { stage: "song_keys" })
}

/// Songplays plan from start-time-stamped NextSong events and song records.
///
/// Rows are deduplicated before `songplay_id` is assigned. Ids are a dense
/// 1-based numbering over all output columns, so unchanged input yields the
/// same ids on every run.
pub fn songplays_table(
    plays: DataFrame,
    songs: DataFrame,
    strategy: JoinStrategy,
) -> Result<TablePlan, EtlError> {
    let stage = PlanSnafu { stage: "songplays" };
    let songs = song_keys(songs)?;

    let rows = plays
        .join_on(songs, JoinType::Inner, [join_condition(strategy)])
        .and_then(|joined| {
            joined.select(vec![
                col("start_time"),
                col("user_id"),
                col("level"),
                col("song_id"),
                col("artist_id"),
                col("session_id"),
                col("location"),
                col("user_agent"),
                calendar_part("year", col("start_time")).alias("year"),
                calendar_part("month", col("start_time")).alias("month"),
            ])
        })
        .and_then(DataFrame::distinct)
        .context(stage)?;

    let songplay_id = row_number()
        .order_by(PLAY_COLUMNS.iter().map(|c| col(*c).sort(true, true)).collect())
        .build()
        .context(stage)?;
    let frame = rows
        .with_column("songplay_id", cast(songplay_id, DataType::Int64))
        .context(stage)?;
    TablePlan::new(OutputTable::Songplays, frame).context(stage)
}

/// NextSong events for which the join finds no song.
pub fn unmatched_events(
    plays: DataFrame,
    songs: DataFrame,
    strategy: JoinStrategy,
) -> Result<DataFrame, EtlError> {
    let songs = song_keys(songs)?;
    plays
        .join_on(songs, JoinType::LeftAnti, [join_condition(strategy)])
        .context(PlanSnafu { stage: "unmatched_events" })
}
