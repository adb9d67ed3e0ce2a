use crate::config::{DatasetConfig, PipelineConfig};
use crate::pipeline::{RunOptions, run_pipeline};
use crate::store::{count_null_cells, describe_table};
use crate::transform::normalize_label;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

/// What to run before inspecting the data directory.
#[derive(Debug, Clone, Default)]
pub enum Precondition {
    #[default]
    None,
    InProcess,
    /// Program and arguments of an external pipeline run.
    Command(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub config: PipelineConfig,
    pub precondition: Precondition,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub dataset: String,
    pub check: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ArtifactCounts {
    pub raw_files: usize,
    pub store_files: usize,
    pub export_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
    pub artifacts: ArtifactCounts,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

pub fn verify(options: &VerifyOptions) -> Result<VerifyReport> {
    match &options.precondition {
        Precondition::None => {}
        Precondition::InProcess => {
            run_pipeline(&RunOptions::new(options.config.clone()))
                .context("pipeline run before verification failed")?;
        }
        Precondition::Command(argv) => run_external(argv)?,
    }

    let config = &options.config;
    let mut checks = Vec::new();
    for dataset in config.enabled_datasets() {
        check_dataset(config, dataset, &mut checks);
    }

    let report = VerifyReport {
        checks,
        artifacts: count_artifacts(&config.data_dir)?,
    };

    for failure in report.failures() {
        warn!(
            dataset = %failure.dataset,
            check = failure.check,
            detail = %failure.detail,
            "verification check failed"
        );
    }
    info!(
        checks = report.checks.len(),
        passed = report.all_passed(),
        "verification complete"
    );

    Ok(report)
}

fn run_external(argv: &[String]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        bail!("pipeline command must not be empty");
    };

    info!(%program, ?args, "running pipeline before verification");
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to start pipeline command {program}"))?;

    if !output.status.success() {
        bail!(
            "pipeline failed with {}:\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

fn check_dataset(config: &PipelineConfig, dataset: &DatasetConfig, checks: &mut Vec<CheckResult>) {
    let mut push = |check: &'static str, passed: bool, detail: String| {
        checks.push(CheckResult {
            dataset: dataset.key.clone(),
            check,
            passed,
            detail,
        });
    };

    let raw_path = config.raw_path(dataset);
    push(
        "raw_file_exists",
        raw_path.is_file(),
        raw_path.display().to_string(),
    );

    let store_path = config.store_path(dataset);
    let store_present = store_path.is_file();
    push(
        "store_exists",
        store_present,
        store_path.display().to_string(),
    );

    if store_present {
        match describe_table(&store_path, &dataset.table_name) {
            Ok(Some(table)) => {
                push(
                    "table_exists",
                    true,
                    format!("{} rows, {} columns", table.row_count, table.columns.len()),
                );

                let unnormalized: Vec<&String> = table
                    .columns
                    .iter()
                    .enumerate()
                    .filter(|(index, name)| normalize_label(name, *index) != **name)
                    .map(|(_, name)| name)
                    .collect();
                push(
                    "columns_normalized",
                    unnormalized.is_empty(),
                    format!("{unnormalized:?}"),
                );

                match count_null_cells(&store_path, &dataset.table_name) {
                    Ok(nulls) => push("no_null_cells", nulls == 0, format!("{nulls} null cells")),
                    Err(err) => push("no_null_cells", false, err.to_string()),
                }
            }
            Ok(None) => push(
                "table_exists",
                false,
                format!("{} missing", dataset.table_name),
            ),
            Err(err) => push("table_exists", false, err.to_string()),
        }
    }

    if let Some(export_path) = config.export_path(dataset) {
        push(
            "export_exists",
            export_path.is_file(),
            export_path.display().to_string(),
        );
    }
}

fn count_artifacts(data_dir: &Path) -> Result<ArtifactCounts> {
    let mut counts = ArtifactCounts::default();
    if !data_dir.exists() {
        return Ok(counts);
    }

    for entry in WalkDir::new(data_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().extension().and_then(|s| s.to_str()) {
            Some("tsv" | "csv") => counts.raw_files += 1,
            Some("db") => counts.store_files += 1,
            Some("xlsx") => counts.export_files += 1,
            _ => {}
        }
    }

    Ok(counts)
}
