//! The two independent branches of a run and their composition.
//!
//! ```text
//! song_data ─► songs, artists
//! log_data  ─► NextSong ─► users, time
//!                      └─► ⋈ song_data (re-read) ─► songplays
//! ```

use std::time::Instant;

use deltalake::datafusion::prelude::DataFrame;
use serde::Serialize;
use snafu::{IntoError, ResultExt};
use tracing::{debug, info, warn};

use crate::context::EtlContext;
use crate::errors::{EtlError, SinkWriteSnafu, SourceReadSnafu, is_decode_error};
use crate::models::{Dataset, OutputTable};
use crate::sink::{SinkError, SinkReport};
use crate::source;
use crate::transform::{
    JoinStats, TablePlan, artists_table, next_song_events, songplays_table, songs_table,
    time_table, unmatched_events, users_table, with_start_time,
};

/// Outcome of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tables: Vec<SinkReport>,
    pub join: JoinStats,
}

impl RunReport {
    /// Rows written to `table`, if it was written.
    pub fn rows(&self, table: OutputTable) -> Option<u64> {
        self.tables
            .iter()
            .find(|report| report.table == table)
            .map(|report| report.rows)
    }
}

fn classify_write_error(ctx: &EtlContext, table: OutputTable, err: SinkError) -> EtlError {
    match err {
        // lazily scanned input that only fails to decode once materialized
        SinkError::Engine { source, .. } if is_decode_error(&source) => SourceReadSnafu {
            dataset: "input",
            location: ctx.settings().input_root.as_str(),
        }
        .into_error(source),
        other => SinkWriteSnafu { table }.into_error(other),
    }
}

/// Materialize one plan into its table location, holding the table's writer
/// claim for the duration of the write.
pub async fn write_table(ctx: &EtlContext, plan: TablePlan) -> Result<SinkReport, EtlError> {
    let table = plan.table;
    let destination = ctx.table_location(table)?;
    debug!(table = %table, plan = %plan.display_plan(), "Writing table");

    let _claim = ctx.claim_writer(table)?;
    let started = Instant::now();
    let report = ctx
        .sink()
        .write(plan, &destination)
        .await
        .map_err(|e| classify_write_error(ctx, table, e))?;

    info!(
        table = %table,
        rows = report.rows,
        location = %report.location,
        format = %report.format,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Table written"
    );
    Ok(report)
}

/// Songs and Artists from the song catalog.
pub async fn run_song_catalog(ctx: &EtlContext) -> Result<Vec<SinkReport>, EtlError> {
    let songs = source::read_song_records(ctx).await?;
    let songs_plan = songs_table(songs.clone())?;
    let artists_plan = artists_table(songs)?;

    let (songs, artists) = tokio::try_join!(
        write_table(ctx, songs_plan),
        write_table(ctx, artists_plan)
    )?;
    Ok(vec![songs, artists])
}

/// Users, Time and Songplays from the event log.
///
/// The song catalog is read again here rather than shared with
/// [`run_song_catalog`], keeping the branches independent.
pub async fn run_event_log(ctx: &EtlContext) -> Result<(Vec<SinkReport>, JoinStats), EtlError> {
    let strategy = ctx.settings().join_strategy;
    let events = source::read_log_events(ctx).await?;
    let songs = source::read_song_records(ctx).await?;
    let plays = with_start_time(next_song_events(events)?)?;

    let users_plan = users_table(plays.clone())?;
    let time_plan = time_table(plays.clone())?;
    let songplays_plan = songplays_table(plays.clone(), songs.clone(), strategy)?;

    let (users, time, songplays) = tokio::try_join!(
        write_table(ctx, users_plan),
        write_table(ctx, time_plan),
        write_table(ctx, songplays_plan)
    )?;

    let join = join_stats(ctx, plays, songs).await?;
    if join.unmatched_events > 0 {
        warn!(
            strategy = %strategy,
            next_song_events = join.next_song_events,
            matched_events = join.matched_events(),
            unmatched_events = join.unmatched_events,
            drop_rate = join.drop_rate(),
            "NextSong events without a matching song were dropped"
        );
    } else {
        info!(strategy = %strategy, next_song_events = join.next_song_events, "Every NextSong event matched a song");
    }
    Ok((vec![users, time, songplays], join))
}

/// Count NextSong events and those the songplays join drops.
pub async fn join_stats(
    ctx: &EtlContext,
    plays: DataFrame,
    songs: DataFrame,
) -> Result<JoinStats, EtlError> {
    let location = ctx.dataset_location(Dataset::LogData)?;
    let strategy = ctx.settings().join_strategy;
    let read_error = SourceReadSnafu {
        dataset: Dataset::LogData.label(),
        location: location.as_str(),
    };

    let next_song_events = plays.clone().count().await.context(read_error)?;
    let unmatched = unmatched_events(plays, songs, strategy)?
        .count()
        .await
        .context(read_error)?;
    Ok(JoinStats {
        next_song_events: next_song_events as u64,
        unmatched_events: unmatched as u64,
    })
}

/// Run both branches concurrently and collect their reports.
///
/// The first failure aborts the run.
pub async fn run(ctx: &EtlContext) -> Result<RunReport, EtlError> {
    let started = Instant::now();
    info!(run_id = %ctx.run_id(), "Starting run");

    let (mut tables, (events, join)) =
        tokio::try_join!(run_song_catalog(ctx), run_event_log(ctx))?;
    tables.extend(events);

    info!(
        run_id = %ctx.run_id(),
        tables = tables.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Run complete"
    );
    Ok(RunReport { tables, join })
}

/// Compose every table plan without reading or writing any data.
pub async fn plan_all(ctx: &EtlContext) -> Result<Vec<TablePlan>, EtlError> {
    let strategy = ctx.settings().join_strategy;
    let songs = source::scan(ctx, Dataset::SongData).await?;
    let events = source::scan(ctx, Dataset::LogData).await?;
    let plays = with_start_time(next_song_events(events)?)?;

    Ok(vec![
        songs_table(songs.clone())?,
        artists_table(songs.clone())?,
        users_table(plays.clone())?,
        time_table(plays.clone())?,
        songplays_table(plays, songs, strategy)?,
    ])
}
