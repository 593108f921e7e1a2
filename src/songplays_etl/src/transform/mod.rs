//! Pure plan composition.
//!
//! Every function here takes lazy [`DataFrame`]s and returns a new lazy plan;
//! nothing is executed until a sink materializes a [`TablePlan`].

pub mod events;
pub mod songplays;
pub mod songs;

use deltalake::arrow::datatypes::DataType;
use deltalake::datafusion::error::DataFusionError;
use deltalake::datafusion::prelude::{DataFrame, Expr, cast, date_part, lit};

use crate::models::OutputTable;

pub use events::{next_song_events, time_table, users_table, with_start_time};
pub use songplays::{JoinStats, songplays_table, unmatched_events};
pub use songs::{artists_table, songs_table};

/// A composed, not yet executed plan for one output table.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: OutputTable,
    pub frame: DataFrame,
}

impl TablePlan {
    /// Wrap `frame`, projecting it onto the table's declared column order.
    pub fn new(table: OutputTable, frame: DataFrame) -> Result<Self, DataFusionError> {
        let frame = frame.select_columns(table.columns())?;
        Ok(Self { table, frame })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn partition_columns(&self) -> Vec<String> {
        self.table
            .partition_columns()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    /// Indented logical plan, for logs and dry runs.
    pub fn display_plan(&self) -> String {
        self.frame.logical_plan().display_indent().to_string()
    }
}

/// Integer calendar field of a timestamp expression.
pub(crate) fn calendar_part(part: &str, timestamp: Expr) -> Expr {
    cast(date_part(lit(part), timestamp), DataType::Int32)
}
