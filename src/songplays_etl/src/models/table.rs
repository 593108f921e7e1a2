use std::fmt;

use serde::Serialize;

/// The five analytical tables written by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTable {
    Songs,
    Artists,
    Users,
    Time,
    Songplays,
}

impl OutputTable {
    pub const ALL: [OutputTable; 5] = [
        Self::Songs,
        Self::Artists,
        Self::Users,
        Self::Time,
        Self::Songplays,
    ];

    /// Directory name below the output root.
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Songs => "songs",
            Self::Artists => "artists",
            Self::Users => "users",
            Self::Time => "time",
            Self::Songplays => "songplays",
        }
    }

    /// Output columns in write order.
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Songs => &["song_id", "title", "artist_id", "duration", "year"],
            Self::Artists => &["artist_id", "name", "location", "latitude", "longitude"],
            Self::Users => &["user_id", "first_name", "last_name", "gender", "level"],
            Self::Time => &[
                "start_time",
                "hour",
                "day",
                "week",
                "month",
                "year",
                "weekday",
            ],
            Self::Songplays => &[
                "songplay_id",
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
            ],
        }
    }

    /// Hive partition columns, outermost first.
    pub const fn partition_columns(self) -> &'static [&'static str] {
        match self {
            Self::Songs => &["year", "artist_id"],
            Self::Time | Self::Songplays => &["year", "month"],
            Self::Artists | Self::Users => &[],
        }
    }
}

impl fmt::Display for OutputTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
