#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use deltalake::arrow::array::{Array, RecordBatch, StringArray};
use deltalake::arrow::compute::cast;
use deltalake::arrow::datatypes::DataType;
use deltalake::datafusion::prelude::{ParquetReadOptions, SessionContext};
use serde_json::{Value, json};
use songplays_etl::config::{Credentials, Settings};
use songplays_etl::models::OutputTable;
use songplays_etl::{EtlContext, JoinStrategy, SinkFormat};
use tempfile::TempDir;
use url::Url;

/// Epoch millis of 2018-11-12T02:37:38.796Z.
pub const TS: i64 = 1_541_990_258_796;

/// A scratch data lake: `input/` with raw JSON lines, `output/` for tables.
pub struct Lake {
    pub dir: TempDir,
}

impl Lake {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("input")).unwrap();
        Self { dir }
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn table_dir(&self, table: OutputTable) -> PathBuf {
        self.output().join(table.dir_name())
    }

    fn write_lines(&self, relative: &str, records: &[Value]) {
        let path = self.input().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body: String = records.iter().map(|r| format!("{r}\n")).collect();
        fs::write(path, body).unwrap();
    }

    /// One song file per record, laid out like the public song dataset.
    pub fn add_songs(&self, songs: &[Value]) {
        for (i, song) in songs.iter().enumerate() {
            self.write_lines(&format!("song_data/A/B/C/TRABC{i:04}.json"), std::slice::from_ref(song));
        }
    }

    pub fn add_events(&self, day: u32, events: &[Value]) {
        self.write_lines(&format!("log_data/2018/11/2018-11-{day:02}-events.json"), events);
    }

    pub fn put_raw(&self, relative: &str, body: &str) {
        let path = self.input().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    pub fn settings(&self) -> Settings {
        Settings::new(
            Credentials::new("AKIDEXAMPLE", "test-secret", "us-west-2"),
            Url::from_directory_path(self.input()).unwrap(),
            Url::from_directory_path(self.output()).unwrap(),
        )
    }

    pub fn context(&self, strategy: JoinStrategy, sink: SinkFormat) -> EtlContext {
        let settings = self.settings().with_join_strategy(strategy).with_sink(sink);
        EtlContext::new(settings).unwrap()
    }
}

pub fn song(song_id: &str, title: &str, artist_id: &str, artist_name: &str, year: i32) -> Value {
    json!({
        "num_songs": 1,
        "artist_id": artist_id,
        "artist_latitude": null,
        "artist_longitude": null,
        "artist_location": "",
        "artist_name": artist_name,
        "song_id": song_id,
        "title": title,
        "duration": 210.5,
        "year": year,
    })
}

pub fn event(page: &str, user_id: &str, level: &str, artist: &str, song: &str, ts: i64) -> Value {
    json!({
        "artist": artist,
        "auth": "Logged In",
        "firstName": "Ryan",
        "gender": "M",
        "itemInSession": 0,
        "lastName": "Smith",
        "length": 210.5,
        "level": level,
        "location": "San Jose-Sunnyvale-Santa Clara, CA",
        "method": "PUT",
        "page": page,
        "registration": 1541016707796.0,
        "sessionId": 583,
        "song": song,
        "status": 200,
        "ts": ts,
        "userAgent": "Mozilla/5.0 (X11; Linux x86_64)",
        "userId": user_id,
    })
}

pub fn next_song(user_id: &str, artist: &str, song: &str, ts: i64) -> Value {
    event("NextSong", user_id, "free", artist, song, ts)
}

/// Read a written Parquet table back, partition columns included as strings.
pub async fn read_table(dir: &Path, table: OutputTable) -> Vec<RecordBatch> {
    let ctx = SessionContext::new();
    let partitions = table
        .partition_columns()
        .iter()
        .map(|c| (c.to_string(), DataType::Utf8))
        .collect();
    let options = ParquetReadOptions::default().table_partition_cols(partitions);
    let path = format!("{}/", dir.display());
    ctx.read_parquet(path, options)
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
}

pub fn row_count(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

/// Values of one column rendered as strings, nulls as "".
pub fn column(batches: &[RecordBatch], name: &str) -> Vec<String> {
    let mut values = Vec::new();
    for batch in batches {
        let array = batch.column_by_name(name).unwrap();
        let rendered = cast(array, &DataType::Utf8).unwrap();
        let strings = rendered.as_any().downcast_ref::<StringArray>().unwrap();
        for i in 0..strings.len() {
            values.push(if strings.is_null(i) {
                String::new()
            } else {
                strings.value(i).to_string()
            });
        }
    }
    values
}

/// Every row rendered as `col=value|…` in the table's column order, sorted.
pub fn rows(batches: &[RecordBatch], table: OutputTable) -> Vec<String> {
    let columns: Vec<Vec<String>> = table
        .columns()
        .iter()
        .map(|c| column(batches, c))
        .collect();
    let mut rendered: Vec<String> = (0..row_count(batches))
        .map(|i| {
            table
                .columns()
                .iter()
                .zip(&columns)
                .map(|(name, values)| format!("{name}={}", values[i]))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();
    rendered.sort();
    rendered
}
