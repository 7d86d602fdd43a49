use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use super::Store;
use crate::ingest::columns::{METRIC_COUNT, METRIC_NAMES};
use crate::model::ListingSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct ExportedPartition {
    pub period: String,
    pub rows: usize,
    pub path: PathBuf,
}

fn snapshot_schema() -> Schema {
    let mut fields = vec![
        Field::new("item_id", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, false),
        Field::new("category", DataType::Utf8, false),
        Field::new("promoted_status", DataType::Utf8, false),
        Field::new(
            "start_date",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("product_id", DataType::Int64, true),
        Field::new("batch_id", DataType::Int64, false),
    ];
    fields.extend(
        METRIC_NAMES
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    Schema::new(fields)
}

fn string_column<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn to_record_batch(schema: Arc<Schema>, rows: &[&ListingSnapshot]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = vec![
        string_column(rows.iter().map(|r| r.listing.item_id.as_str())),
        string_column(rows.iter().map(|r| r.listing.title.as_str())),
        string_column(rows.iter().map(|r| r.listing.category.as_str())),
        string_column(rows.iter().map(|r| r.listing.promoted_status.as_str())),
        Arc::new(
            TimestampMillisecondArray::from_iter_values(
                rows.iter().map(|r| r.listing.start_date.timestamp_millis()),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.product_id).collect::<Vec<_>>())),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.batch_id))),
    ];

    let metric_rows: Vec<[f64; METRIC_COUNT]> = rows.iter().map(|r| r.metrics.to_array()).collect();
    for i in 0..METRIC_COUNT {
        columns.push(Arc::new(Float64Array::from_iter_values(metric_rows.iter().map(|m| m[i]))));
    }

    RecordBatch::try_new(schema, columns).context("building snapshot record batch")
}

impl Store {
    /// Write every snapshot to `<dir>/period=<YYYY-MM-DD>/snapshots.parquet`,
    /// one partition per report period. Existing partitions are replaced.
    pub fn export_parquet(&self, dir: &Path) -> Result<Vec<ExportedPartition>> {
        let snapshots = self.all_snapshots()?;
        let mut by_period: BTreeMap<&str, Vec<&ListingSnapshot>> = BTreeMap::new();
        for s in &snapshots {
            by_period.entry(s.period.as_str()).or_default().push(s);
        }

        let schema = Arc::new(snapshot_schema());
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut written = Vec::with_capacity(by_period.len());
        for (period, rows) in by_period {
            let part_dir = dir.join(format!("period={}", period));
            fs::create_dir_all(&part_dir)
                .with_context(|| format!("creating {}", part_dir.display()))?;
            let final_path = part_dir.join("snapshots.parquet");
            let tmp_path = part_dir.join("snapshots.parquet.tmp");

            let batch = to_record_batch(schema.clone(), &rows)?;
            let file = File::create(&tmp_path)
                .with_context(|| format!("creating {}", tmp_path.display()))?;
            let mut writer =
                ArrowWriter::try_new(BufWriter::new(file), schema.clone(), Some(props.clone()))
                    .context("creating parquet writer")?;
            writer.write(&batch).context("writing snapshot batch")?;
            writer.close().context("closing parquet writer")?;
            fs::rename(&tmp_path, &final_path).with_context(|| {
                format!(
                    "renaming `{}` to `{}`",
                    tmp_path.display(),
                    final_path.display()
                )
            })?;

            info!(period, rows = rows.len(), path = %final_path.display(), "exported partition");
            written.push(ExportedPartition {
                period: period.to_string(),
                rows: rows.len(),
                path: final_path,
            });
        }
        Ok(written)
    }
}
