use crate::error::EtlError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use url::Url;

const EUROSTAT_DATA_API: &str = "https://ec.europa.eu/eurostat/api/dissemination/sdmx/2.1/data";

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub store: StoreLayout,
    #[serde(default, rename = "dataset")]
    pub datasets: Vec<DatasetConfig>,
}

impl PipelineConfig {
    /// The two Eurostat tables the loader ships with.
    pub fn builtin() -> Self {
        Self {
            data_dir: default_data_dir(),
            fetch: FetchConfig::default(),
            store: StoreLayout::default(),
            datasets: vec![
                DatasetConfig::eurostat(
                    "net_greenhouse_gas_emissions",
                    "Net greenhouse gas emissions",
                    "sdg_13_10",
                    "database1.db",
                ),
                DatasetConfig::eurostat(
                    "final_energy_consumption_by_sector",
                    "Final energy consumption by sector",
                    "ten00124",
                    "database2.db",
                ),
            ],
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.datasets.is_empty() {
            return Err(EtlError::Config("no datasets configured".to_string()));
        }
        if let StoreLayout::Shared { file } = &self.store
            && file.as_os_str().is_empty()
        {
            return Err(EtlError::Config(
                "store.file must not be empty for the shared layout".to_string(),
            ));
        }

        let mut keys = BTreeSet::new();
        let mut tables = BTreeSet::new();
        for dataset in &self.datasets {
            dataset.validate()?;
            if !keys.insert(dataset.key.as_str()) {
                return Err(EtlError::Config(format!(
                    "duplicate dataset key {}",
                    dataset.key
                )));
            }
            if !tables.insert((self.store_path(dataset), dataset.table_name.as_str())) {
                return Err(EtlError::Config(format!(
                    "table {} is written twice into {}",
                    dataset.table_name,
                    self.store_path(dataset).display()
                )));
            }
        }

        Ok(())
    }

    pub fn enabled_datasets(&self) -> impl Iterator<Item = &DatasetConfig> {
        self.datasets.iter().filter(|d| d.enabled)
    }

    pub fn raw_path(&self, dataset: &DatasetConfig) -> PathBuf {
        resolve_path(&self.data_dir, &dataset.raw_file)
    }

    pub fn store_path(&self, dataset: &DatasetConfig) -> PathBuf {
        match &self.store {
            StoreLayout::PerDataset => resolve_path(&self.data_dir, &dataset.store_file),
            StoreLayout::Shared { file } => resolve_path(&self.data_dir, file),
        }
    }

    pub fn export_path(&self, dataset: &DatasetConfig) -> Option<PathBuf> {
        dataset
            .export_file
            .as_ref()
            .map(|file| resolve_path(&self.data_dir, file))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    #[default]
    Overwrite,
    SkipExisting,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub policy: FetchPolicy,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default = "default_true")]
    pub use_system_proxy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            policy: FetchPolicy::Overwrite,
            timeout_secs: default_timeout_secs(),
            user_agent: None,
            use_system_proxy: true,
        }
    }
}

/// Where tables land: one store file per dataset, or every table in one file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum StoreLayout {
    #[default]
    PerDataset,
    Shared {
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default = "default_query")]
    pub query: BTreeMap<String, String>,
    pub raw_file: PathBuf,
    pub table_name: String,
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
    #[serde(default)]
    pub export_file: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DatasetConfig {
    fn eurostat(table_name: &str, name: &str, code: &str, store_file: &str) -> Self {
        Self {
            key: table_name.to_string(),
            name: Some(name.to_string()),
            url: format!("{EUROSTAT_DATA_API}/{code}"),
            query: default_query(),
            raw_file: PathBuf::from(format!("{table_name}.tsv")),
            table_name: table_name.to_string(),
            store_file: PathBuf::from(store_file),
            export_file: Some(PathBuf::from(format!("{table_name}.xlsx"))),
            delimiter: default_delimiter(),
            encoding: default_encoding(),
            enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.key.trim().is_empty() {
            return Err(EtlError::Config("dataset.key must not be empty".to_string()));
        }
        if self.table_name.trim().is_empty() {
            return Err(EtlError::Config(format!(
                "dataset {}: table_name must not be empty",
                self.key
            )));
        }
        if self.raw_file.as_os_str().is_empty() {
            return Err(EtlError::Config(format!(
                "dataset {}: raw_file must not be empty",
                self.key
            )));
        }
        self.request_url()?;
        self.delimiter_byte()?;
        if encoding_rs::Encoding::for_label(self.encoding.as_bytes()).is_none() {
            return Err(EtlError::Config(format!(
                "dataset {}: unknown encoding {}",
                self.key, self.encoding
            )));
        }
        Ok(())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    /// Dataset URL with the configured query pairs merged in; existing keys are overridden.
    pub fn request_url(&self) -> Result<Url, EtlError> {
        let mut url = Url::parse(&self.url).map_err(|err| {
            EtlError::Config(format!("dataset {}: invalid url {}: {err}", self.key, self.url))
        })?;

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !self.query.contains_key(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.extend(self.query.iter().map(|(k, v)| (k.clone(), v.clone())));

        if pairs.is_empty() {
            url.set_query(None);
        } else {
            let mut qp = url.query_pairs_mut();
            qp.clear();
            for (k, v) in pairs {
                qp.append_pair(&k, &v);
            }
        }

        Ok(url)
    }

    pub fn delimiter_byte(&self) -> Result<u8, EtlError> {
        if !self.delimiter.is_ascii() {
            return Err(EtlError::Config(format!(
                "dataset {}: delimiter {:?} is not a single ASCII character",
                self.key, self.delimiter
            )));
        }
        Ok(self.delimiter as u8)
    }
}

pub fn load_config(config_path: &Path) -> Result<PipelineConfig> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read pipeline config: {}", config_path.display()))?;
    let config: PipelineConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid pipeline config {}", config_path.display()))?;
    Ok(config)
}

pub fn resolve_path(base_dir: &Path, maybe_relative: &Path) -> PathBuf {
    if maybe_relative.is_absolute() {
        return maybe_relative.to_path_buf();
    }
    base_dir.join(maybe_relative)
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_query() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("compressed".to_string(), "false".to_string()),
        ("format".to_string(), "TSV".to_string()),
    ])
}

fn default_store_file() -> PathBuf {
    PathBuf::from("datasets.db")
}

fn default_delimiter() -> char {
    '\t'
}

fn default_encoding() -> String {
    "utf-8".to_string()
}
