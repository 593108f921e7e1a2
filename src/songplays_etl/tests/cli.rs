mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use common::*;
use songplays_etl::models::OutputTable;

const BINARY: &str = env!("CARGO_BIN_EXE_songplays-etl");

fn write_config(lake: &Lake) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = lake.dir.path().join("dl.toml");
    let body = format!(
        r#"[aws]
access_key_id = "AKIDEXAMPLE"
secret_access_key = "test-secret"
region = "us-west-2"

[paths]
input_root = "{}"
output_root = "{}"
"#,
        lake.input().display(),
        lake.output().display()
    );
    fs::write(&path, body)?;
    Ok(path)
}

fn run_cli(config: &Path, extra: &[&str]) -> Result<Output, Box<dyn std::error::Error>> {
    let output = Command::new(BINARY)
        .arg("--config")
        .arg(config)
        .args(extra)
        .env("RUST_LOG", "warn")
        .output()?;
    if !output.status.success() {
        eprintln!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        eprintln!("stdout: {}", String::from_utf8_lossy(&output.stdout));
    }
    Ok(output)
}

fn seed(lake: &Lake) {
    lake.add_songs(&[song("S1", "Nobody", "A1", "Elliott Smith", 1998)]);
    lake.add_events(12, &[next_song("26", "Elliott Smith", "Nobody", TS)]);
}

#[test]
fn run_writes_every_table() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    seed(&lake);
    let config = write_config(&lake)?;

    let output = run_cli(&config, &[])?;
    assert!(output.status.success(), "run failed");

    for table in OutputTable::ALL {
        assert!(lake.table_dir(table).is_dir(), "{table} missing");
    }
    assert!(!lake.output().join("_staging").exists());
    Ok(())
}

#[test]
fn dry_run_prints_plans_and_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    seed(&lake);
    let config = write_config(&lake)?;

    let output = run_cli(&config, &["--dry-run", "--join-strategy", "exact"])?;
    assert!(output.status.success(), "dry run failed");

    let stdout = String::from_utf8(output.stdout)?;
    for table in OutputTable::ALL {
        assert!(stdout.contains(&format!("== {table} ")), "{table} plan not printed");
    }
    assert!(!lake.output().exists());
    Ok(())
}

#[test]
fn flags_override_configured_roots() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    seed(&lake);
    let config = write_config(&lake)?;
    let elsewhere = lake.dir.path().join("elsewhere");
    let elsewhere_arg = elsewhere.display().to_string();

    let output = run_cli(&config, &["--output-root", &elsewhere_arg, "--sink", "parquet"])?;
    assert!(output.status.success(), "run failed");

    assert!(elsewhere.join(OutputTable::Songplays.dir_name()).is_dir());
    assert!(!lake.output().exists());
    Ok(())
}

#[test]
fn missing_config_exits_with_failure() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    let output = run_cli(&lake.dir.path().join("absent.toml"), &[])?;

    assert!(!output.status.success());
    assert!(!lake.output().exists());
    Ok(())
}

#[test]
fn missing_input_exits_with_failure() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    let config = write_config(&lake)?;

    let output = run_cli(&config, &[])?;

    assert!(!output.status.success());
    assert!(!lake.table_dir(OutputTable::Songs).exists());
    Ok(())
}

#[test]
fn unknown_join_strategy_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let lake = Lake::new();
    let config = write_config(&lake)?;

    let output = run_cli(&config, &["--join-strategy", "fuzzy"])?;

    assert!(!output.status.success());
    Ok(())
}
