use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::array::{Array, UInt64Array};
use deltalake::arrow::record_batch::RecordBatch;
use deltalake::datafusion::dataframe::DataFrameWriteOptions;
use deltalake::datafusion::execution::runtime_env::RuntimeEnv;
use futures::TryStreamExt;
use object_store::{ObjectMeta, ObjectStore};
use snafu::ResultExt;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{
    EngineSnafu, IoSnafu, LocationSnafu, ObjectStoreSnafu, PromotionSnafu, SinkError, SinkReport,
    StoreLookupSnafu, TableSink,
};
use crate::config::SinkFormat;
use crate::models::OutputTable;
use crate::storage;
use crate::transform::TablePlan;

/// Hive-partitioned Parquet directories.
///
/// Each table is first written below the run's staging root. Only a
/// completed write replaces the destination:
/// - local roots swap directories, restoring the previous one if the swap fails
/// - object stores delete the old objects, then move the staged ones in place
///
/// Promotion runs as its own task. Once started it completes even when the
/// future driving [`TableSink::write`] is dropped.
pub struct ParquetSink {
    runtime: Arc<RuntimeEnv>,
    staging_root: Url,
}

/// Replacement of a destination by its staged copy.
enum Promotion {
    Local {
        staged: PathBuf,
        target: PathBuf,
    },
    Remote {
        store: Arc<dyn ObjectStore>,
        staged: Url,
        target: Url,
    },
}

impl Promotion {
    async fn run(self, table: OutputTable) -> Result<(), SinkError> {
        match self {
            Self::Local { staged, target } => promote_local(table, &staged, &target).await,
            Self::Remote {
                store,
                staged,
                target,
            } => promote_remote(store.as_ref(), table, &staged, &target).await,
        }
    }
}

fn spawn_promotion(table: OutputTable, promotion: Promotion) -> JoinHandle<Result<(), SinkError>> {
    tokio::spawn(promotion.run(table))
}

async fn exists(path: &Path) -> Result<bool, SinkError> {
    fs::try_exists(path).await.context(IoSnafu { path })
}

async fn promote_local(table: OutputTable, staged: &Path, target: &Path) -> Result<(), SinkError> {
    // tables without rows produce no files
    if !exists(staged).await? {
        fs::create_dir_all(staged)
            .await
            .context(IoSnafu { path: staged })?;
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .context(IoSnafu { path: parent })?;
    }

    let backup = staged.with_file_name(format!("{}.previous", table.dir_name()));
    let had_previous = exists(target).await?;
    if had_previous {
        fs::rename(target, &backup)
            .await
            .context(IoSnafu { path: target })?;
    }

    if let Err(source) = fs::rename(staged, target).await {
        if had_previous {
            if let Err(e) = fs::rename(&backup, target).await {
                warn!(table = %table, error = %e, "Failed to restore previous output");
            }
        }
        return Err(source).context(IoSnafu { path: target });
    }

    if had_previous {
        fs::remove_dir_all(&backup)
            .await
            .context(IoSnafu { path: &backup })?;
    }
    Ok(())
}

async fn promote_remote(
    store: &dyn ObjectStore,
    table: OutputTable,
    staged: &Url,
    target: &Url,
) -> Result<(), SinkError> {
    debug!(table = %table, target = %target, "Promoting staged objects");
    let staged_prefix = storage::object_path(staged);
    let target_prefix = storage::object_path(target);

    let previous: Vec<ObjectMeta> = store
        .list(Some(&target_prefix))
        .try_collect()
        .await
        .context(ObjectStoreSnafu {
            location: target.as_str(),
        })?;
    for meta in previous {
        store
            .delete(&meta.location)
            .await
            .context(ObjectStoreSnafu {
                location: meta.location.as_ref(),
            })?;
    }

    let staged_objects: Vec<ObjectMeta> = store
        .list(Some(&staged_prefix))
        .try_collect()
        .await
        .context(ObjectStoreSnafu {
            location: staged.as_str(),
        })?;
    for meta in staged_objects {
        let Some(parts) = meta.location.prefix_match(&staged_prefix) else {
            continue;
        };
        let destination = parts.fold(target_prefix.clone(), |path, part| path.child(part));
        store
            .rename(&meta.location, &destination)
            .await
            .context(ObjectStoreSnafu {
                location: destination.as_ref(),
            })?;
    }
    Ok(())
}

impl ParquetSink {
    pub fn new(runtime: Arc<RuntimeEnv>, staging_root: Url) -> Self {
        Self {
            runtime,
            staging_root,
        }
    }

    fn store_for(&self, url: &Url) -> Result<Arc<dyn ObjectStore>, SinkError> {
        storage::lookup_store(&self.runtime, url).context(StoreLookupSnafu {
            location: url.as_str(),
        })
    }

    fn staged_location(&self, table: OutputTable) -> Result<Url, SinkError> {
        self.staging_root
            .join(&format!("{}/", table.dir_name()))
            .context(LocationSnafu {
                base: self.staging_root.as_str(),
            })
    }

    fn promotion(&self, staged: &Url, destination: &Url) -> Result<Promotion, SinkError> {
        match (storage::local_path(staged), storage::local_path(destination)) {
            (Some(staged), Some(target)) => Ok(Promotion::Local { staged, target }),
            _ => Ok(Promotion::Remote {
                store: self.store_for(destination)?,
                staged: staged.clone(),
                target: destination.clone(),
            }),
        }
    }
}

fn written_rows(batches: &[RecordBatch]) -> u64 {
    batches
        .iter()
        .filter_map(|b| b.column_by_name("count"))
        .filter_map(|c| c.as_any().downcast_ref::<UInt64Array>())
        .flat_map(|counts| (0..counts.len()).map(move |i| counts.value(i)))
        .sum()
}

#[async_trait]
impl TableSink for ParquetSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Parquet
    }

    async fn write(&self, plan: TablePlan, destination: &Url) -> Result<SinkReport, SinkError> {
        let table = plan.table;
        let partition_columns = plan.partition_columns();
        let staged = self.staged_location(table)?;

        let options = DataFrameWriteOptions::new().with_partition_by(partition_columns.clone());
        let written = plan
            .frame
            .write_parquet(staged.as_str(), options, None)
            .await
            .context(EngineSnafu { table })?;
        let rows = written_rows(&written);
        debug!(table = %table, staged = %staged, rows, "Staged table");

        let promotion = self.promotion(&staged, destination)?;
        spawn_promotion(table, promotion)
            .await
            .context(PromotionSnafu { table })??;

        Ok(SinkReport {
            table,
            location: destination.to_string(),
            rows,
            format: SinkFormat::Parquet,
            partition_columns,
        })
    }

    async fn cleanup(&self) -> Result<(), SinkError> {
        if let Some(dir) = storage::local_path(&self.staging_root) {
            if exists(&dir).await? {
                fs::remove_dir_all(&dir)
                    .await
                    .context(IoSnafu { path: &dir })?;
            }
            // shared by concurrent runs; only removed once empty
            if let Some(parent) = dir.parent() {
                let _ = fs::remove_dir(parent).await;
            }
            return Ok(());
        }

        let store = self.store_for(&self.staging_root)?;
        let prefix = storage::object_path(&self.staging_root);
        let leftovers: Vec<ObjectMeta> = store
            .list(Some(&prefix))
            .try_collect()
            .await
            .context(ObjectStoreSnafu {
                location: self.staging_root.as_str(),
            })?;
        for meta in leftovers {
            store
                .delete(&meta.location)
                .await
                .context(ObjectStoreSnafu {
                    location: meta.location.as_ref(),
                })?;
        }
        Ok(())
    }
}
