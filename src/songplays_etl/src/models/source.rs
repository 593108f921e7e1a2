//! Input datasets and their declared schemas.
//!
//! Each field lists the name used in the raw JSON lines and the canonical
//! snake_case name the transforms work with. The same declaration drives the
//! read schema (raw names) and the rename projection applied right after the
//! scan, so the two can never drift apart.

use std::sync::Arc;

use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use deltalake::datafusion::prelude::{Expr, ident};

/// Logical type of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// UTF-8 string.
    Text,
    /// 64-bit float.
    Float,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
}

impl FieldType {
    /// Arrow type used when decoding JSON.
    pub fn data_type(self) -> DataType {
        match self {
            Self::Text => DataType::Utf8,
            Self::Float => DataType::Float64,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
        }
    }
}

/// One declared field of an input record.
#[derive(Debug, Clone, Copy)]
pub struct SourceField {
    /// Key in the JSON document.
    pub raw: &'static str,
    /// Column name after the rename projection.
    pub name: &'static str,
    /// Decoded type.
    pub kind: FieldType,
    /// Whether the key may be absent or null.
    pub nullable: bool,
}

const fn field(raw: &'static str, name: &'static str, kind: FieldType, nullable: bool) -> SourceField {
    SourceField {
        raw,
        name,
        kind,
        nullable,
    }
}

/// SongRecord: one song-catalog entry with song and artist metadata.
pub const SONG_FIELDS: &[SourceField] = &[
    field("song_id", "song_id", FieldType::Text, false),
    field("title", "title", FieldType::Text, false),
    field("artist_id", "artist_id", FieldType::Text, false),
    field("artist_name", "artist_name", FieldType::Text, false),
    field("artist_location", "artist_location", FieldType::Text, true),
    field("artist_latitude", "artist_latitude", FieldType::Float, true),
    field("artist_longitude", "artist_longitude", FieldType::Float, true),
    field("duration", "duration", FieldType::Float, true),
    field("year", "year", FieldType::Int32, true),
];

/// LogEvent: one user-activity log line.
///
/// Only `page` and `ts` are always present; non-song pages carry no artist,
/// song or length, and logged-out activity carries no user.
pub const LOG_EVENT_FIELDS: &[SourceField] = &[
    field("page", "page", FieldType::Text, false),
    field("userId", "user_id", FieldType::Text, true),
    field("firstName", "first_name", FieldType::Text, true),
    field("lastName", "last_name", FieldType::Text, true),
    field("gender", "gender", FieldType::Text, true),
    field("level", "level", FieldType::Text, true),
    field("ts", "ts", FieldType::Int64, false),
    field("sessionId", "session_id", FieldType::Int64, true),
    field("artist", "artist", FieldType::Text, true),
    field("song", "song", FieldType::Text, true),
    field("location", "location", FieldType::Text, true),
    field("userAgent", "user_agent", FieldType::Text, true),
];

/// Raw input datasets below the input root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Song catalog, `song_data/<A>/<B>/<C>/<track>.json`.
    SongData,
    /// Event logs, `log_data/<year>/<month>/<day>-events.json`.
    LogData,
}

impl Dataset {
    /// Short name used in logs and errors.
    pub const fn label(self) -> &'static str {
        match self {
            Self::SongData => "song_data",
            Self::LogData => "log_data",
        }
    }

    /// Directory below the input root; every `.json` object beneath it is read.
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::SongData => "song_data/",
            Self::LogData => "log_data/",
        }
    }

    /// Declared fields.
    pub const fn fields(self) -> &'static [SourceField] {
        match self {
            Self::SongData => SONG_FIELDS,
            Self::LogData => LOG_EVENT_FIELDS,
        }
    }

    /// Schema of the JSON lines, keyed by raw field names.
    pub fn raw_schema(self) -> SchemaRef {
        let fields: Vec<Field> = self
            .fields()
            .iter()
            .map(|f| Field::new(f.raw, f.kind.data_type(), f.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Schema after the rename projection.
    pub fn canonical_schema(self) -> SchemaRef {
        let fields: Vec<Field> = self
            .fields()
            .iter()
            .map(|f| Field::new(f.name, f.kind.data_type(), f.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// Projection renaming raw fields to their canonical names.
    ///
    /// Raw keys are referenced verbatim; camelCase keys such as `userId` must
    /// not go through identifier normalization.
    pub fn canonical_projection(self) -> Vec<Expr> {
        self.fields()
            .iter()
            .map(|f| ident(f.raw).alias(f.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltalake::arrow::record_batch::RecordBatch;
    use deltalake::datafusion::prelude::SessionContext;

    fn names(schema: &Schema) -> Vec<&str> {
        schema.fields().iter().map(|f| f.name().as_str()).collect()
    }

    #[test]
    fn log_schema_uses_raw_json_keys() {
        let schema = Dataset::LogData.raw_schema();
        assert!(schema.field_with_name("userId").is_ok());
        assert!(schema.field_with_name("sessionId").is_ok());
        assert!(schema.field_with_name("user_id").is_err());
        assert_eq!(
            schema.field_with_name("ts").unwrap().data_type(),
            &DataType::Int64
        );
    }

    #[test]
    fn canonical_names_are_snake_case_and_unique() {
        for dataset in [Dataset::SongData, Dataset::LogData] {
            let schema = dataset.canonical_schema();
            let names = names(&schema);
            let mut unique = names.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), names.len(), "{}", dataset.label());
            assert!(
                names
                    .iter()
                    .all(|n| n.chars().all(|c| c.is_ascii_lowercase() || c == '_'))
            );
        }
    }

    #[test]
    fn event_columns_match_log_event_record() {
        assert_eq!(
            names(&Dataset::LogData.canonical_schema()),
            vec![
                "page",
                "user_id",
                "first_name",
                "last_name",
                "gender",
                "level",
                "ts",
                "session_id",
                "artist",
                "song",
                "location",
                "user_agent"
            ]
        );
    }

    #[tokio::test]
    async fn projection_resolves_camel_case_keys() {
        let ctx = SessionContext::new();
        for dataset in [Dataset::SongData, Dataset::LogData] {
            let raw = ctx
                .read_batch(RecordBatch::new_empty(dataset.raw_schema()))
                .unwrap();
            let renamed = raw.select(dataset.canonical_projection()).unwrap();
            let schema = renamed.schema().as_arrow().clone();
            assert_eq!(
                names(&schema),
                names(&dataset.canonical_schema()),
                "{}",
                dataset.label()
            );
        }
    }
}
