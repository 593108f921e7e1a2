//! Run configuration: credentials, storage roots and pipeline options.
//!
//! The configuration file is TOML:
//!
//! ```toml
//! [aws]
//! access_key_id = "AKIA..."
//! secret_access_key = "..."
//! region = "us-west-2"            # optional, falls back to AWS_REGION
//!
//! [paths]                          # optional, defaults below
//! input_root = "s3://udacity-dend/"
//! output_root = "s3://sparkify-lake/"
//!
//! [pipeline]                       # optional
//! join_strategy = "normalized"     # exact | normalized | normalized_with_title
//! sink = "parquet"                 # parquet | delta
//! ```
//!
//! Only the two credential keys are required. Loading normalizes the file into
//! [`Settings`]: values are trimmed, roots become URLs with a trailing slash and
//! plain filesystem paths are turned into absolute `file://` URLs.

use std::{fmt, path::Path, str::FromStr};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use shared_utils::config::{ConfigError, require_value};
use shared_utils::env::env_var_or;
use url::Url;

/// Default input root (song_data/ and log_data/ live below it).
pub const DEFAULT_INPUT_ROOT: &str = "s3://udacity-dend/";
/// Default output root (one directory per table below it).
pub const DEFAULT_OUTPUT_ROOT: &str = "s3://sparkify-lake/";
/// Region used when neither the file nor `AWS_REGION` provide one.
pub const DEFAULT_REGION: &str = "us-west-2";

/// How log events are matched against song records when building songplays.
///
/// Log events carry no artist id, so every strategy matches on names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// `event.artist == song.artist_name`, byte for byte.
    Exact,
    /// Artist names compared after trimming and lowercasing.
    #[default]
    Normalized,
    /// Normalized artist name and normalized song title must both match.
    NormalizedWithTitle,
}

impl JoinStrategy {
    /// Snake-case name as used in configuration files.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Normalized => "normalized",
            Self::NormalizedWithTitle => "normalized_with_title",
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" => Ok(Self::Normalized),
            "normalized_with_title" => Ok(Self::NormalizedWithTitle),
            other => Err(ConfigError::invalid_value(
                "join_strategy",
                format!("unknown strategy '{other}' (expected exact, normalized or normalized_with_title)"),
            )),
        }
    }
}

/// Output table format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFormat {
    /// Hive-partitioned Parquet files, staged then promoted.
    #[default]
    Parquet,
    /// Delta Lake tables, overwritten through the transaction log.
    Delta,
}

impl fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parquet => "parquet",
            Self::Delta => "delta",
        })
    }
}

impl FromStr for SinkFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parquet" => Ok(Self::Parquet),
            "delta" => Ok(Self::Delta),
            other => Err(ConfigError::invalid_value(
                "sink",
                format!("unknown sink '{other}' (expected parquet or delta)"),
            )),
        }
    }
}

/// Raw shape of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Credentials section; required.
    pub aws: Option<AwsCfg>,
    /// Storage roots.
    #[serde(default)]
    pub paths: PathsCfg,
    /// Pipeline options.
    #[serde(default)]
    pub pipeline: PipelineCfg,
}

/// `[aws]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsCfg {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<String>,
    /// Region of the buckets.
    pub region: Option<String>,
}

/// `[paths]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsCfg {
    /// Root holding `song_data/` and `log_data/`.
    pub input_root: Option<String>,
    /// Root receiving one directory per output table.
    pub output_root: Option<String>,
}

/// `[pipeline]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineCfg {
    /// Songplays join strategy.
    #[serde(default)]
    pub join_strategy: JoinStrategy,
    /// Output format.
    #[serde(default)]
    pub sink: SinkFormat,
}

/// Storage credentials. Secrets are never printed by `Debug`.
#[derive(Debug)]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: SecretString,
    /// Secret access key.
    pub secret_access_key: SecretString,
    /// Bucket region.
    pub region: String,
}

impl Credentials {
    /// Wraps plain values into a credential set.
    pub fn new(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        Self {
            access_key_id: SecretString::new(access_key_id.into()),
            secret_access_key: SecretString::new(secret_access_key.into()),
            region: region.to_string(),
        }
    }
}

/// Normalized settings for one run.
#[derive(Debug)]
pub struct Settings {
    /// Storage credentials.
    pub credentials: Credentials,
    /// Input root URL, always ending with `/`.
    pub input_root: Url,
    /// Output root URL, always ending with `/`.
    pub output_root: Url,
    /// Songplays join strategy.
    pub join_strategy: JoinStrategy,
    /// Output table format.
    pub sink: SinkFormat,
}

/// Loggable view of [`Settings`] without secrets.
#[derive(Debug, Serialize)]
pub struct SettingsSummary {
    /// Input root URL.
    pub input_root: String,
    /// Output root URL.
    pub output_root: String,
    /// Bucket region.
    pub region: String,
    /// Songplays join strategy.
    pub join_strategy: JoinStrategy,
    /// Output table format.
    pub sink: SinkFormat,
}

impl Settings {
    /// Settings with the default join strategy and sink.
    pub fn new(credentials: Credentials, input_root: Url, output_root: Url) -> Self {
        Self {
            credentials,
            input_root,
            output_root,
            join_strategy: JoinStrategy::default(),
            sink: SinkFormat::default(),
        }
    }

    /// Replaces the join strategy.
    pub fn with_join_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.join_strategy = strategy;
        self
    }

    /// Replaces the sink format.
    pub fn with_sink(mut self, sink: SinkFormat) -> Self {
        self.sink = sink;
        self
    }

    /// Secret-free description for logs.
    pub fn summary(&self) -> SettingsSummary {
        SettingsSummary {
            input_root: self.input_root.to_string(),
            output_root: self.output_root.to_string(),
            region: self.credentials.region.clone(),
            join_strategy: self.join_strategy,
            sink: self.sink,
        }
    }
}

/// Parse a storage root into a directory URL.
///
/// Accepts `s3://bucket/prefix`, `s3a://…` (treated as `s3://`), `file://…`
/// and plain filesystem paths, which are made absolute. The result always
/// ends with `/` so that relative joins stay below the root.
pub fn parse_root(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::invalid_value("root", "storage root cannot be empty"));
    }

    let mut url = if raw.contains("://") {
        let mut url = Url::parse(raw)
            .map_err(|e| ConfigError::invalid_value("root", format!("{raw}: {e}")))?;
        match url.scheme() {
            "s3" | "file" => {}
            "s3a" | "s3n" => {
                // URL parsing treats s3a as a non-special scheme, so switching is infallible
                let _ = url.set_scheme("s3");
            }
            other => {
                return Err(ConfigError::invalid_value(
                    "root",
                    format!("unsupported scheme '{other}' in {raw}"),
                ));
            }
        }
        if url.scheme() == "s3" && url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::invalid_value(
                "root",
                format!("missing bucket name in {raw}"),
            ));
        }
        url
    } else {
        let absolute = std::path::absolute(raw)
            .map_err(|e| ConfigError::invalid_value("root", format!("{raw}: {e}")))?;
        Url::from_directory_path(&absolute)
            .map_err(|_| ConfigError::invalid_value("root", format!("not a usable path: {raw}")))?
    };

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Normalize a parsed configuration file into [`Settings`].
///
/// Errors:
/// - Missing `[aws]` section or blank credential keys
/// - Unparseable storage roots
pub fn normalize_config(file: ConfigFile) -> Result<Settings, ConfigError> {
    let aws = file.aws.unwrap_or_default();
    let access_key_id = require_value(aws.access_key_id.as_deref(), "aws", "access_key_id")?;
    let secret_access_key =
        require_value(aws.secret_access_key.as_deref(), "aws", "secret_access_key")?;
    let region = match aws.region.as_deref().map(str::trim) {
        Some(r) if !r.is_empty() => r.to_string(),
        _ => env_var_or("AWS_REGION", DEFAULT_REGION),
    };

    let input_root = parse_root(file.paths.input_root.as_deref().unwrap_or(DEFAULT_INPUT_ROOT))?;
    let output_root =
        parse_root(file.paths.output_root.as_deref().unwrap_or(DEFAULT_OUTPUT_ROOT))?;

    Ok(Settings {
        credentials: Credentials::new(&access_key_id, &secret_access_key, &region),
        input_root,
        output_root,
        join_strategy: file.pipeline.join_strategy,
        sink: file.pipeline.sink,
    })
}

/// Parse and normalize settings from a TOML string.
pub fn load_settings_str(toml_str: &str) -> Result<Settings, ConfigError> {
    let file: ConfigFile =
        toml::from_str(toml_str).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    normalize_config(file)
}

/// Read a TOML configuration file from disk, parse, and normalize it.
///
/// See [`load_settings_str`] for details.
pub fn load_settings_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    load_settings_str(&text)
}
