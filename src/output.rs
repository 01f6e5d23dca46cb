use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::orchestrator::{ResultTable, RunOutput};
use crate::parcellator::ParcellationResult;
use crate::planner::JobKey;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

const FIXED_COLUMNS: [&str; 6] = [
    "subject_id",
    "atlas_name",
    "metric_name",
    "roi_label",
    "roi_name",
    "voxel_count",
];

/// Tab-separated table, one row per ROI. NaN is written as `n/a`.
pub fn write_table(path: &Path, table: &ResultTable) -> Result<(), OutputError> {
    let columns = table.reducer_columns();
    write_rows(path, &table.rows, &columns)
}

fn write_rows(path: &Path, rows: &[ParcellationResult], columns: &[&str]) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);

    let header: Vec<&str> = FIXED_COLUMNS.iter().chain(columns).copied().collect();
    writeln!(out, "{}", header.join("\t")).map_err(io_err)?;
    for row in rows {
        let mut fields = vec![
            row.subject_id.clone(),
            row.atlas_name.clone(),
            row.metric_name.clone(),
            row.roi_label.to_string(),
            row.roi_name.clone().unwrap_or_else(|| "n/a".to_string()),
            row.voxel_count.to_string(),
        ];
        fields.extend(columns.iter().map(|name| format_value(row.stat(name))));
        writeln!(out, "{}", fields.join("\t")).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        Some(v) if v == f64::INFINITY => "inf".to_string(),
        Some(v) if v == f64::NEG_INFINITY => "-inf".to_string(),
        _ => "n/a".to_string(),
    }
}

/// `sub-<id>/dwi/sub-<id>_atlas-<atlas>_desc-<metric>_parc.tsv`
pub fn job_table_path(root: &Path, key: &JobKey) -> PathBuf {
    let subject = format!("sub-{}", key.subject_id);
    root.join(&subject).join("dwi").join(format!(
        "{subject}_atlas-{}_desc-{}_parc.tsv",
        key.atlas_name, key.metric_name
    ))
}

/// One table per succeeded job, laid out per subject.
pub fn write_job_tables(root: &Path, table: &ResultTable) -> Result<Vec<PathBuf>, OutputError> {
    let mut groups: BTreeMap<JobKey, Vec<ParcellationResult>> = BTreeMap::new();
    for row in &table.rows {
        let key = JobKey::new(&*row.subject_id, &*row.atlas_name, &*row.metric_name);
        groups.entry(key).or_default().push(row.clone());
    }
    let columns = table.reducer_columns();
    groups
        .iter()
        .map(|(key, rows)| {
            let path = job_table_path(root, key);
            write_rows(&path, rows, &columns)?;
            Ok::<_, OutputError>(path)
        })
        .collect()
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| OutputError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|source| {
        OutputError::Json {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Combined table, per-job tables, provenance and failure ledger under `root`.
pub fn write_run(root: &Path, output: &RunOutput) -> Result<(), OutputError> {
    write_table(&root.join("parcellation.tsv"), &output.table)?;
    let job_tables = write_job_tables(root, &output.table)?;
    write_json(&root.join("provenance.json"), &output.provenance)?;
    write_json(&root.join("failures.json"), &output.failures)?;
    info!(
        root = %root.display(),
        job_tables = job_tables.len(),
        "wrote run outputs"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(subject: &str, label: i32, mean: f64) -> ParcellationResult {
        ParcellationResult {
            subject_id: subject.into(),
            atlas_name: "aal".into(),
            metric_name: "fa".into(),
            roi_label: label,
            roi_name: (label == 1).then(|| "Precentral_L".to_string()),
            stats: vec![("mean".into(), mean), ("count".into(), 4.0)],
            voxel_count: 4,
        }
    }

    #[test]
    fn combined_table_has_header_and_na_for_missing() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable {
            rows: vec![row("01", 1, 0.5), row("01", 2, f64::NAN)],
        };
        let path = dir.path().join("out/parcellation.tsv");
        write_table(&path, &table).unwrap();

        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "subject_id\tatlas_name\tmetric_name\troi_label\troi_name\tvoxel_count\tmean\tcount"
        );
        assert_eq!(lines[1], "01\taal\tfa\t1\tPrecentral_L\t4\t0.5\t4");
        assert_eq!(lines[2], "01\taal\tfa\t2\tn/a\t4\tn/a\t4");
    }

    #[test]
    fn job_tables_follow_the_subject_layout() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable {
            rows: vec![row("01", 1, 0.5), row("02", 1, 0.7)],
        };
        let paths = write_job_tables(dir.path(), &table).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(
            paths[0],
            dir.path().join("sub-01/dwi/sub-01_atlas-aal_desc-fa_parc.tsv")
        );
        assert!(paths.iter().all(|p| p.is_file()));
    }
}
