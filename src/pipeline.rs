use crate::config::{DatasetConfig, FetchPolicy, PipelineConfig};
use crate::error::EtlError;
use crate::export::export_table;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::store::persist;
use crate::transform::load;
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: PipelineConfig,
    pub dataset: Option<String>,
    pub skip_export: bool,
}

impl RunOptions {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            dataset: None,
            skip_export: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub key: String,
    pub table_name: String,
    pub downloaded: bool,
    pub payload_sha256: Option<String>,
    pub rows: usize,
    pub columns: usize,
    pub store: PathBuf,
    pub export: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

/// Runs fetch, load, persist and export for each selected dataset in order,
/// stopping at the first failure.
pub fn run_pipeline(options: &RunOptions) -> Result<Vec<DatasetReport>> {
    let config = &options.config;
    config.validate()?;

    let mut datasets: Vec<&DatasetConfig> = config.enabled_datasets().collect();
    if let Some(filter) = &options.dataset {
        datasets.retain(|d| d.key == *filter);
    }
    if datasets.is_empty() {
        bail!("no matching dataset configurations found");
    }

    let fetcher = Fetcher::new(&config.fetch)?;
    let mut reports = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        info!(dataset = %dataset.key, name = dataset.display_name(), "dataset start");
        let report = run_dataset(config, &fetcher, dataset, options.skip_export)?;
        info!(
            dataset = %report.key,
            table = %report.table_name,
            rows = report.rows,
            columns = report.columns,
            downloaded = report.downloaded,
            "dataset complete"
        );
        reports.push(report);
    }

    Ok(reports)
}

pub fn run_dataset(
    config: &PipelineConfig,
    fetcher: &Fetcher,
    dataset: &DatasetConfig,
    skip_export: bool,
) -> Result<DatasetReport> {
    let raw_path = config.raw_path(dataset);
    let store_path = config.store_path(dataset);
    let export_path = config.export_path(dataset).filter(|_| !skip_export);

    let outcome = dataset
        .request_url()
        .and_then(|url| fetcher.fetch(&url, &raw_path, config.fetch.policy))
        .map_err(|e| stage_failure(dataset, e))?;

    let table = dataset
        .delimiter_byte()
        .and_then(|delimiter| load(&raw_path, delimiter, &dataset.encoding))
        .map_err(|e| stage_failure(dataset, e))?;

    let rows = persist(&table, &store_path, &dataset.table_name, true)
        .map_err(|e| stage_failure(dataset, e))?;

    if let Some(path) = &export_path {
        export_table(&table, &dataset.table_name, path).map_err(|e| stage_failure(dataset, e))?;
    }

    let payload_sha256 = match &outcome {
        FetchOutcome::Downloaded { sha256, .. } => Some(sha256.clone()),
        FetchOutcome::Skipped => None,
    };

    Ok(DatasetReport {
        key: dataset.key.clone(),
        table_name: dataset.table_name.clone(),
        downloaded: outcome.was_downloaded(),
        payload_sha256,
        rows,
        columns: table.columns.len(),
        store: store_path,
        export: export_path,
        finished_at: Utc::now(),
    })
}

/// Returns a copy of `config` whose fetch policy is forced to `policy`.
pub fn with_fetch_policy(mut config: PipelineConfig, policy: FetchPolicy) -> PipelineConfig {
    config.fetch.policy = policy;
    config
}

fn stage_failure(dataset: &DatasetConfig, err: EtlError) -> anyhow::Error {
    let stage = err.stage();
    anyhow::Error::new(err).context(format!("{stage} stage failed for dataset {}", dataset.key))
}
